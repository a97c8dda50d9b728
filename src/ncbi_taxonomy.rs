//! Builds a [`Taxonomy`] from the NCBI `nodes.dmp` / `names.dmp` dumps.
//!
//! The build runs in two phases. The nodes dump is first streamed into an
//! auxiliary map keyed by taxid (the final index space is only known once the
//! whole file is read). A pre-order walk from the root then assigns compact
//! internal ids and the tree is rebuilt as an array. A second pass over the names
//! dump back-fills the scientific names.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;
use std::time::Instant;

use crate::errors::TaxonomyError;
use crate::gz_stream::open_input;
use crate::taxonomy::{NodeId, TaxId, Taxonomy, TaxonomyNode, ROOT_TAXID};

/// Field separator used by the NCBI dump files.
pub const DMP_SEP: &str = "\t|\t";
/// Trailing record terminator of the NCBI dump files.
pub const DMP_END: &str = "\t|";
pub const SCIENTIFIC_NAME: &str = "scientific name";

#[derive(Debug, Default)]
struct AuxNode {
    parent: Option<TaxId>,
    rank: String,
    children: Vec<TaxId>,
}

/// Loosely-linked tree as read from `nodes.dmp`, before compaction.
#[derive(Debug, Default)]
pub struct NCBITaxonomy {
    aux: HashMap<TaxId, AuxNode>,
    self_loops: usize,
}

/// Splits one dump record into its fields, dropping the trailing `\t|`.
pub fn split_dmp_line(line: &str) -> Vec<&str> {
    let line = line.trim_end_matches(['\r', '\n']);
    let line = line.strip_suffix(DMP_END).unwrap_or(line);
    line.split(DMP_SEP).collect()
}

fn parse_taxid(value: &str, line: usize, field: &'static str) -> Result<TaxId, TaxonomyError> {
    value.trim().parse().map_err(|_| TaxonomyError::Numeric {
        line,
        field,
        value: value.to_string(),
    })
}

fn for_each_line<R, F>(mut reader: R, mut f: F) -> Result<(), TaxonomyError>
where
    R: BufRead,
    F: FnMut(usize, &str) -> Result<(), TaxonomyError>,
{
    let mut buf = Vec::with_capacity(256);
    let mut line_no = 0;
    loop {
        buf.clear();
        let n = reader
            .read_until(b'\n', &mut buf)
            .map_err(|source| TaxonomyError::Io {
                path: Default::default(),
                source,
            })?;
        if n == 0 {
            return Ok(());
        }
        line_no += 1;
        let line = String::from_utf8_lossy(&buf);
        if line.trim().is_empty() {
            continue;
        }
        f(line_no, &line)?;
    }
}

impl NCBITaxonomy {
    /// Reads the nodes dump into the auxiliary map.
    pub fn from_nodes_reader<R: BufRead>(reader: R) -> Result<Self, TaxonomyError> {
        let mut taxonomy = NCBITaxonomy::default();
        for_each_line(reader, |line_no, line| taxonomy.add_record(line_no, line))?;
        if taxonomy.self_loops > 0 {
            debug!("ignored {} self-referential node records", taxonomy.self_loops);
        }
        Ok(taxonomy)
    }

    fn add_record(&mut self, line_no: usize, line: &str) -> Result<(), TaxonomyError> {
        let fields = split_dmp_line(line);
        if fields.len() < 3 {
            return Err(TaxonomyError::Malformed {
                line: line_no,
                detail: format!("expected at least 3 fields, found {}", fields.len()),
            });
        }
        let this = parse_taxid(fields[0], line_no, "taxid")?;
        let that = parse_taxid(fields[1], line_no, "parent taxid")?;
        let rank = fields[2].trim().to_string();

        if this == that {
            // a self-referential edge would make the tree cyclic; keep the rank only
            self.self_loops += 1;
            self.aux.entry(this).or_default().rank = rank;
            return Ok(());
        }

        let node = self.aux.entry(this).or_default();
        let previous_parent = node.parent.replace(that);
        node.rank = rank;
        if let Some(old) = previous_parent {
            if let Some(old_parent) = self.aux.get_mut(&old) {
                old_parent.children.retain(|&c| c != this);
            }
        }
        self.aux.entry(that).or_default().children.push(this);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.aux.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aux.is_empty()
    }

    fn find_root(&self) -> Result<TaxId, TaxonomyError> {
        if self.aux.contains_key(&ROOT_TAXID) {
            return Ok(ROOT_TAXID);
        }
        let mut parentless = self.aux.iter().filter(|(_, n)| n.parent.is_none());
        match (parentless.next(), parentless.next()) {
            (Some((&taxid, _)), None) => Ok(taxid),
            _ => Err(TaxonomyError::MissingRoot(ROOT_TAXID)),
        }
    }

    /// Assigns contiguous pre-order ids starting at the root and rebuilds the tree
    /// as an array. Nodes not reachable from the root are dropped.
    pub fn compact(self) -> Result<Taxonomy, TaxonomyError> {
        let root = self.find_root()?;
        let mut corrs: HashMap<TaxId, NodeId> = HashMap::with_capacity(self.aux.len());
        let mut order: Vec<TaxId> = Vec::with_capacity(self.aux.len());

        let mut stack = vec![root];
        while let Some(taxid) = stack.pop() {
            if corrs.contains_key(&taxid) {
                continue;
            }
            corrs.insert(taxid, order.len());
            order.push(taxid);
            if let Some(node) = self.aux.get(&taxid) {
                stack.extend(node.children.iter().rev().copied());
            }
        }

        let unreachable = self.aux.len() - order.len();
        if unreachable > 0 {
            warn!("{} taxonomy nodes are not reachable from the root and were dropped", unreachable);
        }

        let mut aux = self.aux;
        let nodes = order
            .iter()
            .enumerate()
            .map(|(id, taxid)| {
                let node = aux.remove(taxid).unwrap_or_default();
                let parent_id = match node.parent {
                    Some(p) if *taxid != root => corrs.get(&p).copied().unwrap_or(0),
                    _ => id,
                };
                TaxonomyNode {
                    id,
                    taxid: *taxid,
                    parent_id,
                    children: node
                        .children
                        .iter()
                        .filter_map(|c| corrs.get(c).copied())
                        .collect(),
                    rank: if node.rank.is_empty() {
                        "no rank".to_string()
                    } else {
                        node.rank
                    },
                    name: String::new(),
                }
            })
            .collect();

        Taxonomy::from_nodes(nodes)
    }

    /// Creates a new Taxonomy by reading nodes and names files.
    pub fn build<P: AsRef<Path>, Q: AsRef<Path>>(
        nodes_filename: P,
        names_filename: Q,
    ) -> Result<Taxonomy, TaxonomyError> {
        let open = |path: &Path| {
            open_input(path).map_err(|source| TaxonomyError::Io {
                path: path.to_path_buf(),
                source,
            })
        };
        let nodes = open(nodes_filename.as_ref())?;
        let names = open(names_filename.as_ref())?;
        Self::build_from_readers(nodes, names)
    }

    pub fn build_from_readers<R1: BufRead, R2: BufRead>(
        nodes_reader: R1,
        names_reader: R2,
    ) -> Result<Taxonomy, TaxonomyError> {
        info!("Creating new taxonomy tree ...");
        let start = Instant::now();
        let mut taxonomy = Self::from_nodes_reader(nodes_reader)?.compact()?;
        info!(
            "Taxonomy tree with {} nodes done ({:.3} sec)",
            taxonomy.len(),
            start.elapsed().as_secs_f64()
        );

        info!("Filling names in taxonomy tree ...");
        let start = Instant::now();
        let named = fill_names(&mut taxonomy, names_reader)?;
        info!(
            "{} scientific names done ({:.3} sec)",
            named,
            start.elapsed().as_secs_f64()
        );
        Ok(taxonomy)
    }
}

/// Back-fills scientific names from a names dump. Returns how many nodes were named.
pub fn fill_names<R: BufRead>(taxonomy: &mut Taxonomy, reader: R) -> Result<usize, TaxonomyError> {
    let mut named = 0;
    let mut orphans = 0;
    for_each_line(reader, |line_no, line| {
        let fields = split_dmp_line(line);
        if fields.len() < 4 {
            return Err(TaxonomyError::Malformed {
                line: line_no,
                detail: format!("expected at least 4 fields, found {}", fields.len()),
            });
        }
        if fields[3].trim() != SCIENTIFIC_NAME {
            return Ok(());
        }
        let taxid = parse_taxid(fields[0], line_no, "taxid")?;
        match taxonomy.get_internal_id(taxid) {
            Some(id) => {
                taxonomy.set_name(id, fields[1].to_string());
                named += 1;
            }
            None => orphans += 1,
        }
        Ok(())
    })?;
    if orphans > 0 {
        debug!("{} scientific names refer to taxids outside the tree", orphans);
    }
    Ok(named)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const NODES_DATA: &str = "1\t|\t1\t|\tno rank\t|\t\t|\t8\t|\t0\t|\t1\t|\t0\t|\t0\t|\t0\t|\t0\t|\t0\t|\t\t|
2\t|\t1\t|\tsuperkingdom\t|\t\t|\t0\t|\t0\t|\t11\t|\t0\t|\t0\t|\t0\t|\t0\t|\t0\t|\t\t|
3\t|\t2\t|\tphylum\t|\t\t|\t8\t|\t0\t|\t1\t|\t0\t|\t0\t|\t0\t|\t0\t|\t0\t|\t\t|
4\t|\t1\t|\tsuperkingdom\t|\t\t|\t8\t|\t0\t|\t1\t|\t0\t|\t0\t|\t0\t|\t0\t|\t0\t|\t\t|";

    const NAMES_DATA: &str = "1\t|\tall\t|\t\t|\tsynonym\t|
1\t|\troot\t|\t\t|\tscientific name\t|
2\t|\tBacteria\t|\tBacteria <bacteria>\t|\tscientific name\t|
3\t|\tAT-rich\t|\t\t|\tsynonym\t|
3\t|\tProteobacteria\t|\t\t|\tscientific name\t|
4\t|\tEukaryota\t|\t\t|\tscientific name\t|
99\t|\tNowhere\t|\t\t|\tscientific name\t|";

    #[test]
    fn test_split_dmp_line() {
        assert_eq!(
            split_dmp_line("2\t|\tBacteria\t|\tBacteria <bacteria>\t|\tscientific name\t|\n"),
            vec!["2", "Bacteria", "Bacteria <bacteria>", "scientific name"]
        );
    }

    #[test]
    fn test_build_preorder_ids() {
        let taxonomy =
            NCBITaxonomy::build_from_readers(Cursor::new(NODES_DATA), Cursor::new(NAMES_DATA)).unwrap();

        assert_eq!(taxonomy.len(), 4);
        let root = taxonomy.root();
        assert_eq!(root.taxid, 1);
        assert!(root.is_root());
        assert_eq!(root.name, "root");
        assert_eq!(root.rank, "no rank");

        // pre-order: 1, 2, 3, 4
        let taxids: Vec<TaxId> = taxonomy.nodes().iter().map(|n| n.taxid).collect();
        assert_eq!(taxids, vec![1, 2, 3, 4]);

        let proteo = taxonomy.node_by_taxid(3).unwrap();
        assert_eq!(proteo.name, "Proteobacteria");
        assert_eq!(proteo.rank, "phylum");
        assert_eq!(taxonomy.parent(proteo).taxid, 2);
        assert_eq!(taxonomy.root().children, vec![1, 3]);
    }

    #[test]
    fn test_self_loop_is_ignored() {
        let nodes = "1\t|\t1\t|\tno rank\t|\n5\t|\t5\t|\tgenus\t|\n5\t|\t1\t|\tgenus\t|\n";
        let taxonomy = NCBITaxonomy::from_nodes_reader(Cursor::new(nodes))
            .unwrap()
            .compact()
            .unwrap();
        assert_eq!(taxonomy.len(), 2);
        let genus = taxonomy.node_by_taxid(5).unwrap();
        assert_eq!(genus.parent_id, 0);
        // walking up always terminates at the root
        assert_eq!(taxonomy.ancestors(genus.id).count(), 2);
    }

    #[test]
    fn test_unreachable_cycle_dropped() {
        let nodes = "1\t|\t1\t|\tno rank\t|\n2\t|\t1\t|\tgenus\t|\n7\t|\t8\t|\tgenus\t|\n8\t|\t7\t|\tgenus\t|\n";
        let taxonomy = NCBITaxonomy::from_nodes_reader(Cursor::new(nodes))
            .unwrap()
            .compact()
            .unwrap();
        assert_eq!(taxonomy.len(), 2);
        assert!(taxonomy.get_internal_id(7).is_none());
    }

    #[test]
    fn test_bad_numeric_field_is_fatal() {
        let nodes = "1\t|\t1\t|\tno rank\t|\nabc\t|\t1\t|\tgenus\t|\n";
        let err = NCBITaxonomy::from_nodes_reader(Cursor::new(nodes)).unwrap_err();
        match err {
            TaxonomyError::Numeric { line, field, .. } => {
                assert_eq!(line, 2);
                assert_eq!(field, "taxid");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_short_record_is_fatal() {
        let err = NCBITaxonomy::from_nodes_reader(Cursor::new("1\t|\t1\n")).unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_missing_files() {
        let err = NCBITaxonomy::build("does/not/exist/nodes.dmp", "names.dmp").unwrap_err();
        assert!(matches!(err, TaxonomyError::Io { .. }));
    }
}
