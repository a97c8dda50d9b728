use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::errors::TaxonomyError;

const FILE_MAGIC: &[u8] = b"B2LTAXv1";

/// NCBI taxonomic identifier.
pub type TaxId = u64;

/// Position of a node in the compact arena. Assigned in pre-order from the root.
pub type NodeId = usize;

pub const ROOT_TAXID: TaxId = 1;

/// Marker for any unknown (or lack of) taxon.
pub const UNKNOWN: &str = "unknown";

/// Prefix for an uncertain classification at a finer rank than the LCA.
pub const UNCERTAIN_PREFIX: &str = "uc_";

/// Standard ranks from finest to coarsest.
pub const RANK_ORDER: [&str; 28] = [
    "forma",
    "varietas",
    "subspecies",
    "species",
    "species subgroup",
    "species group",
    "subgenus",
    "genus",
    "subtribe",
    "tribe",
    "subfamily",
    "family",
    "superfamily",
    "parvorder",
    "infraorder",
    "suborder",
    "order",
    "superorder",
    "infraclass",
    "subclass",
    "class",
    "superclass",
    "subphylum",
    "phylum",
    "superphylum",
    "subkingdom",
    "kingdom",
    "superkingdom",
];

/// Position of `rank` in the fine-to-coarse order, or `None` for non-standard ranks
/// ("no rank", "clade", ...).
pub fn rank_order(rank: &str) -> Option<usize> {
    RANK_ORDER.iter().position(|r| *r == rank)
}

pub fn is_no_rank(rank: &str) -> bool {
    rank.is_empty() || rank == "no rank" || rank == "no_rank"
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaxonomyNode {
    pub id: NodeId,
    pub taxid: TaxId,
    /// The root is its own parent.
    pub parent_id: NodeId,
    pub children: Vec<NodeId>,
    pub rank: String,
    pub name: String,
}

impl TaxonomyNode {
    pub fn is_root(&self) -> bool {
        self.parent_id == self.id
    }
}

/// Immutable, array-backed taxonomy tree. Node 0 is the root and every node's
/// `id` equals its index in `nodes`.
#[derive(Debug)]
pub struct Taxonomy {
    nodes: Vec<TaxonomyNode>,
    external_to_internal_id_map: HashMap<TaxId, NodeId>,
}

impl Taxonomy {
    /// Wraps nodes produced by the builder or the binary loader. Checks the arena
    /// invariants so that nothing downstream has to.
    pub fn from_nodes(nodes: Vec<TaxonomyNode>) -> Result<Self, TaxonomyError> {
        let root = nodes.first().ok_or(TaxonomyError::MissingRoot(ROOT_TAXID))?;
        if !root.is_root() || root.id != 0 {
            return Err(TaxonomyError::MissingRoot(root.taxid));
        }
        for (i, node) in nodes.iter().enumerate() {
            if node.id != i || node.parent_id >= nodes.len() {
                return Err(TaxonomyError::Malformed {
                    line: i,
                    detail: format!("node {} has inconsistent indices", node.taxid),
                });
            }
            if i != 0 && node.parent_id >= i {
                // pre-order numbering puts every parent before its children
                return Err(TaxonomyError::Malformed {
                    line: i,
                    detail: format!("node {} is numbered before its parent", node.taxid),
                });
            }
        }

        // every non-root node is listed exactly once, by its own parent
        let mut listed = vec![false; nodes.len()];
        for (i, node) in nodes.iter().enumerate() {
            for &child in &node.children {
                let owned = child > i && child < nodes.len() && nodes[child].parent_id == i;
                if !owned || listed[child] {
                    return Err(TaxonomyError::Malformed {
                        line: i,
                        detail: format!("node {} has a bad child index {}", node.taxid, child),
                    });
                }
                listed[child] = true;
            }
        }
        if let Some(orphan) = listed.iter().skip(1).position(|&seen| !seen) {
            let orphan = orphan + 1;
            return Err(TaxonomyError::Malformed {
                line: orphan,
                detail: format!(
                    "node {} is missing from its parent's children",
                    nodes[orphan].taxid
                ),
            });
        }

        let mut taxonomy = Taxonomy {
            nodes,
            external_to_internal_id_map: HashMap::new(),
        };
        taxonomy.generate_external_to_internal_id_map();
        Ok(taxonomy)
    }

    fn generate_external_to_internal_id_map(&mut self) {
        self.external_to_internal_id_map.clear();
        self.external_to_internal_id_map.reserve(self.nodes.len());
        for node in &self.nodes {
            self.external_to_internal_id_map.insert(node.taxid, node.id);
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn nodes(&self) -> &[TaxonomyNode] {
        &self.nodes
    }

    pub fn root(&self) -> &TaxonomyNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> Option<&TaxonomyNode> {
        self.nodes.get(id)
    }

    pub fn parent(&self, node: &TaxonomyNode) -> &TaxonomyNode {
        &self.nodes[node.parent_id]
    }

    /// Internal index for an NCBI taxid, if the taxid is part of this taxonomy.
    pub fn get_internal_id(&self, taxid: TaxId) -> Option<NodeId> {
        self.external_to_internal_id_map.get(&taxid).copied()
    }

    pub fn node_by_taxid(&self, taxid: TaxId) -> Option<&TaxonomyNode> {
        self.get_internal_id(taxid).map(|id| &self.nodes[id])
    }

    pub(crate) fn set_name(&mut self, id: NodeId, name: String) {
        self.nodes[id].name = name;
    }

    /// Iterates from `id` up to and including the root.
    pub fn ancestors(&self, id: NodeId) -> Ancestors<'_> {
        Ancestors {
            taxonomy: self,
            next: self.nodes.get(id).map(|n| n.id),
        }
    }

    /// Checks if node A is an ancestor of (or equal to) node B.
    pub fn is_a_ancestor_of_b(&self, a: NodeId, b: NodeId) -> bool {
        // parents are always numbered lower than their children
        self.ancestors(b).take_while(|n| n.id >= a).any(|n| n.id == a)
    }

    /// (rank, name) pairs from `id` up to, but excluding, the root.
    pub fn path(&self, id: NodeId) -> Vec<(&str, &str)> {
        self.ancestors(id)
            .filter(|n| !n.is_root())
            .map(|n| (n.rank.as_str(), n.name.as_str()))
            .collect()
    }

    /// Same as [`Taxonomy::path`] but addressed by NCBI taxid.
    pub fn lineage(&self, taxid: TaxId) -> Option<Vec<(&str, &str)>> {
        self.get_internal_id(taxid).map(|id| self.path(id))
    }

    /// Loads a taxonomy previously written with [`Taxonomy::write_to_disk`].
    pub fn from_file<P: AsRef<Path>>(filename: P) -> Result<Self, TaxonomyError> {
        let path = filename.as_ref();
        let file = File::open(path).map_err(|source| TaxonomyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::read_from(BufReader::new(file)).map_err(|e| match e {
            TaxonomyError::Io { source, .. } => TaxonomyError::Io {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    pub fn read_from<R: Read>(mut reader: R) -> Result<Self, TaxonomyError> {
        let io_err = |source| TaxonomyError::Io {
            path: Default::default(),
            source,
        };

        let mut magic = [0u8; 8];
        reader.read_exact(&mut magic).map_err(io_err)?;
        if magic != FILE_MAGIC {
            return Err(TaxonomyError::BadMagic);
        }
        let node_count = reader.read_u64::<LittleEndian>().map_err(io_err)? as usize;

        let nodes: Vec<TaxonomyNode> =
            bincode::serde::decode_from_std_read(&mut reader, bincode::config::standard())
                .map_err(|e| TaxonomyError::Serialization(e.to_string()))?;
        if nodes.len() != node_count {
            return Err(TaxonomyError::Serialization(format!(
                "header announces {} nodes, found {}",
                node_count,
                nodes.len()
            )));
        }
        Self::from_nodes(nodes)
    }

    /// Writes the taxonomy tree to a binary file.
    pub fn write_to_disk<P: AsRef<Path>>(&self, filename: P) -> Result<(), TaxonomyError> {
        let path = filename.as_ref();
        let to_io = |source| TaxonomyError::Io {
            path: path.to_path_buf(),
            source,
        };
        let mut writer = BufWriter::new(File::create(path).map_err(to_io)?);
        self.write_to(&mut writer)?;
        writer.flush().map_err(to_io)
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), TaxonomyError> {
        let io_err = |source| TaxonomyError::Io {
            path: Default::default(),
            source,
        };
        writer.write_all(FILE_MAGIC).map_err(io_err)?;
        writer
            .write_u64::<LittleEndian>(self.nodes.len() as u64)
            .map_err(io_err)?;
        bincode::serde::encode_into_std_write(&self.nodes, writer, bincode::config::standard())
            .map_err(|e| TaxonomyError::Serialization(e.to_string()))?;
        Ok(())
    }
}

pub struct Ancestors<'a> {
    taxonomy: &'a Taxonomy,
    next: Option<NodeId>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a TaxonomyNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = &self.taxonomy.nodes[self.next?];
        self.next = if node.is_root() {
            None
        } else {
            Some(node.parent_id)
        };
        Some(node)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn node(id: NodeId, taxid: TaxId, parent_id: NodeId, children: &[NodeId], rank: &str, name: &str) -> TaxonomyNode {
        TaxonomyNode {
            id,
            taxid,
            parent_id,
            children: children.to_vec(),
            rank: rank.to_string(),
            name: name.to_string(),
        }
    }

    /// root(1) -> Bacteria(2) -> Proteobacteria(1224)
    ///         -> Eukaryota(2759)
    pub(crate) fn small_taxonomy() -> Taxonomy {
        Taxonomy::from_nodes(vec![
            node(0, 1, 0, &[1, 3], "no rank", "root"),
            node(1, 2, 0, &[2], "superkingdom", "Bacteria"),
            node(2, 1224, 1, &[], "phylum", "Proteobacteria"),
            node(3, 2759, 0, &[], "superkingdom", "Eukaryota"),
        ])
        .unwrap()
    }

    #[test]
    fn test_rank_order() {
        assert_eq!(rank_order("forma"), Some(0));
        assert_eq!(rank_order("tribe"), Some(9));
        assert_eq!(rank_order("superkingdom"), Some(27));
        assert!(rank_order("species").unwrap() < rank_order("genus").unwrap());
        assert_eq!(rank_order("clade"), None);
        assert!(is_no_rank("no rank"));
        assert!(!is_no_rank("genus"));
    }

    #[test]
    fn test_lookup_and_ancestry() {
        let taxonomy = small_taxonomy();
        assert_eq!(taxonomy.len(), 4);
        assert_eq!(taxonomy.get_internal_id(1224), Some(2));
        assert_eq!(taxonomy.get_internal_id(4), None);
        assert_eq!(taxonomy.node_by_taxid(2759).unwrap().name, "Eukaryota");

        assert!(taxonomy.is_a_ancestor_of_b(0, 2));
        assert!(taxonomy.is_a_ancestor_of_b(1, 2));
        assert!(taxonomy.is_a_ancestor_of_b(2, 2));
        assert!(!taxonomy.is_a_ancestor_of_b(2, 1));
        assert!(!taxonomy.is_a_ancestor_of_b(3, 2));

        let ids: Vec<NodeId> = taxonomy.ancestors(2).map(|n| n.id).collect();
        assert_eq!(ids, vec![2, 1, 0]);
    }

    #[test]
    fn test_path_excludes_root() {
        let taxonomy = small_taxonomy();
        assert_eq!(
            taxonomy.lineage(1224).unwrap(),
            vec![("phylum", "Proteobacteria"), ("superkingdom", "Bacteria")]
        );
        assert!(taxonomy.path(0).is_empty());
        assert!(taxonomy.lineage(42).is_none());
    }

    #[test]
    fn test_binary_file_roundtrip() {
        let taxonomy = small_taxonomy();
        let file = tempfile::NamedTempFile::new().unwrap();
        taxonomy.write_to_disk(file.path()).unwrap();

        let loaded = Taxonomy::from_file(file.path()).unwrap();
        assert_eq!(loaded.nodes(), taxonomy.nodes());
        assert_eq!(loaded.get_internal_id(2759), Some(3));
    }

    #[test]
    fn test_bad_magic_rejected() {
        let data = b"NOTATAXONOMYFILE".to_vec();
        let err = Taxonomy::read_from(&data[..]).unwrap_err();
        assert!(matches!(err, TaxonomyError::BadMagic));
    }

    #[test]
    fn test_from_nodes_rejects_bad_arena() {
        assert!(matches!(
            Taxonomy::from_nodes(vec![]),
            Err(TaxonomyError::MissingRoot(_))
        ));
        let err = Taxonomy::from_nodes(vec![
            node(0, 1, 0, &[1], "no rank", "root"),
            node(1, 2, 2, &[], "genus", "A"),
            node(2, 3, 0, &[1], "family", "B"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { line: 1, .. }));
    }

    #[test]
    fn test_from_nodes_rejects_bad_children() {
        // child index past the end of the arena
        let err = Taxonomy::from_nodes(vec![
            node(0, 1, 0, &[1, 7], "no rank", "root"),
            node(1, 2, 0, &[], "superkingdom", "Bacteria"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { line: 0, .. }));

        // the root listed as its own child
        let err = Taxonomy::from_nodes(vec![
            node(0, 1, 0, &[0, 1], "no rank", "root"),
            node(1, 2, 0, &[], "superkingdom", "Bacteria"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { line: 0, .. }));

        // child claimed by a node that is not its parent
        let err = Taxonomy::from_nodes(vec![
            node(0, 1, 0, &[1, 2], "no rank", "root"),
            node(1, 2, 0, &[2], "superkingdom", "Bacteria"),
            node(2, 1224, 1, &[], "phylum", "Proteobacteria"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { line: 0, .. }));

        // child listed twice
        let err = Taxonomy::from_nodes(vec![
            node(0, 1, 0, &[1, 1], "no rank", "root"),
            node(1, 2, 0, &[], "superkingdom", "Bacteria"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { line: 0, .. }));

        // node missing from its parent's children
        let err = Taxonomy::from_nodes(vec![
            node(0, 1, 0, &[1], "no rank", "root"),
            node(1, 2, 0, &[], "superkingdom", "Bacteria"),
            node(2, 2759, 0, &[], "superkingdom", "Eukaryota"),
        ])
        .unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { line: 2, .. }));
    }

    #[test]
    fn test_corrupt_children_in_binary_file_rejected() {
        let nodes = vec![
            node(0, 1, 0, &[1, 7], "no rank", "root"),
            node(1, 2, 0, &[], "superkingdom", "Bacteria"),
        ];
        let mut data = FILE_MAGIC.to_vec();
        data.write_u64::<LittleEndian>(nodes.len() as u64).unwrap();
        bincode::serde::encode_into_std_write(&nodes, &mut data, bincode::config::standard())
            .unwrap();

        let err = Taxonomy::read_from(&data[..]).unwrap_err();
        assert!(matches!(err, TaxonomyError::Malformed { .. }));
    }
}
