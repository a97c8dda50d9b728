use std::fs;
use std::path::{Path, PathBuf};

use blast2lca::errors::TaxonomyError;
use blast2lca::lca::LcaEngine;
use blast2lca::ncbi_taxonomy::NCBITaxonomy;
use blast2lca::taxonomy::Taxonomy;

const NODES: &str = "1\t|\t1\t|\tno rank\t|\t\t|
2\t|\t131567\t|\tsuperkingdom\t|\t\t|
131567\t|\t1\t|\tno rank\t|\t\t|
1224\t|\t2\t|\tphylum\t|\t\t|
1236\t|\t1224\t|\tclass\t|\t\t|
562\t|\t561\t|\tspecies\t|\t\t|
561\t|\t543\t|\tgenus\t|\t\t|
543\t|\t91347\t|\tfamily\t|\t\t|
91347\t|\t1236\t|\torder\t|\t\t|
620\t|\t543\t|\tgenus\t|\t\t|
623\t|\t620\t|\tspecies\t|\t\t|
";

const NAMES: &str = "1\t|\tall\t|\t\t|\tsynonym\t|
1\t|\troot\t|\t\t|\tscientific name\t|
2\t|\tBacteria\t|\tBacteria <prokaryotes>\t|\tscientific name\t|
131567\t|\tcellular organisms\t|\t\t|\tscientific name\t|
1224\t|\tProteobacteria\t|\t\t|\tscientific name\t|
1236\t|\tGammaproteobacteria\t|\t\t|\tscientific name\t|
91347\t|\tEnterobacterales\t|\t\t|\tscientific name\t|
543\t|\tEnterobacteriaceae\t|\t\t|\tscientific name\t|
561\t|\tEscherichia\t|\t\t|\tscientific name\t|
562\t|\tEscherichia coli\t|\t\t|\tscientific name\t|
562\t|\tBacterium coli\t|\t\t|\tsynonym\t|
620\t|\tShigella\t|\t\t|\tscientific name\t|
623\t|\tShigella flexneri\t|\t\t|\tscientific name\t|
";

fn write_dumps(dir: &Path, nodes: &str) -> (PathBuf, PathBuf) {
    let nodes_path = dir.join("nodes.dmp");
    let names_path = dir.join("names.dmp");
    fs::write(&nodes_path, nodes).unwrap();
    fs::write(&names_path, NAMES).unwrap();
    (nodes_path, names_path)
}

#[test]
fn test_build_from_dump_files() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (nodes, names) = write_dumps(dir.path(), NODES);
    let taxonomy = NCBITaxonomy::build(&nodes, &names)?;

    assert_eq!(taxonomy.len(), 11);
    assert_eq!(taxonomy.root().taxid, 1);
    let coli = taxonomy.node_by_taxid(562).unwrap();
    assert_eq!(coli.name, "Escherichia coli");
    assert_eq!(coli.rank, "species");

    let lineage: Vec<&str> = taxonomy
        .lineage(562)
        .unwrap()
        .into_iter()
        .map(|(_, name)| name)
        .collect();
    assert_eq!(
        lineage,
        vec![
            "Escherichia coli",
            "Escherichia",
            "Enterobacteriaceae",
            "Enterobacterales",
            "Gammaproteobacteria",
            "Proteobacteria",
            "Bacteria",
            "cellular organisms",
        ]
    );
    Ok(())
}

#[test]
fn test_compact_ids_are_preorder() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (nodes, names) = write_dumps(dir.path(), NODES);
    let taxonomy = NCBITaxonomy::build(&nodes, &names)?;

    for node in taxonomy.nodes() {
        if node.is_root() {
            assert_eq!(node.id, 0);
            assert_eq!(node.parent_id, 0);
            continue;
        }
        assert!(node.parent_id < node.id, "{} before its parent", node.taxid);
        assert!(taxonomy.nodes()[node.parent_id].children.contains(&node.id));
    }
    Ok(())
}

#[test]
fn test_binary_taxonomy_roundtrip_keeps_lca() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let (nodes, names) = write_dumps(dir.path(), NODES);
    let taxonomy = NCBITaxonomy::build(&nodes, &names)?;

    let bin = dir.path().join("taxonomy.bin");
    taxonomy.write_to_disk(&bin)?;
    let loaded = Taxonomy::from_file(&bin)?;
    assert_eq!(loaded.nodes(), taxonomy.nodes());

    let engine = LcaEngine::new(loaded);
    assert_eq!(engine.query(&[562, 623])?.name, "Enterobacteriaceae");
    assert_eq!(engine.query(&[562, 561])?.name, "Escherichia");
    Ok(())
}

#[test]
fn test_self_loop_and_missing_root_line() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    // taxid 561 is listed as its own parent: the line is ignored, the rest stands
    let looped = NODES.replace("561\t|\t543\t|", "561\t|\t561\t|");
    let (nodes, names) = write_dumps(dir.path(), &looped);
    let taxonomy = NCBITaxonomy::build(&nodes, &names)?;

    assert!(taxonomy.node_by_taxid(543).is_some());
    assert!(taxonomy.node_by_taxid(561).is_none());
    assert!(taxonomy.node_by_taxid(562).is_none());
    for node in taxonomy.nodes() {
        assert_eq!(taxonomy.ancestors(node.id).last().unwrap().taxid, 1);
    }
    Ok(())
}

#[test]
fn test_corrupt_numeric_field_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let corrupt = NODES.replace("1236\t|\t1224", "12x6\t|\t1224");
    let (nodes, names) = write_dumps(dir.path(), &corrupt);
    match NCBITaxonomy::build(&nodes, &names) {
        Err(TaxonomyError::Numeric { line, .. }) => assert_eq!(line, 5),
        other => panic!("expected a numeric error, got {other:?}"),
    }
}

#[test]
fn test_missing_dump_file() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("nodes.dmp");
    let err = NCBITaxonomy::build(&missing, dir.path().join("names.dmp")).unwrap_err();
    assert!(matches!(err, TaxonomyError::Io { ref path, .. } if path == &missing));
}
