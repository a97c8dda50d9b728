//! Constant-time lowest common ancestor queries over a [`Taxonomy`].
//!
//! The tree is linearised with an Euler tour (`E`: node ids, `L`: depths,
//! `H`: first occurrence of every node in `E`) and a sparse table over `L`
//! answers range-minimum queries in O(1) after O(N log N) preprocessing. The
//! LCA of two nodes is the shallowest tour entry between their first
//! occurrences.

use log::info;
use std::borrow::Cow;
use std::collections::HashMap;
use std::time::Instant;

use crate::errors::LcaError;
use crate::taxonomy::{
    is_no_rank, rank_order, NodeId, TaxId, Taxonomy, TaxonomyNode, UNCERTAIN_PREFIX, UNKNOWN,
};

/// Sparse table for range-minimum queries. `table[j][i]` holds the position of
/// the minimum of `values[i..i + 2^j]`.
#[derive(Debug)]
struct SparseTable {
    table: Vec<Vec<u32>>,
}

#[inline]
fn floor_log2(n: usize) -> usize {
    (usize::BITS - 1 - n.leading_zeros()) as usize
}

impl SparseTable {
    fn new(values: &[u32]) -> Self {
        let n = values.len();
        let mut table: Vec<Vec<u32>> = Vec::new();
        if n == 0 {
            return SparseTable { table };
        }
        table.push((0..n as u32).collect());

        let mut j = 1;
        while (1usize << j) <= n {
            let half = 1usize << (j - 1);
            let prev = &table[j - 1];
            let level: Vec<u32> = (0..=n - (1usize << j))
                .map(|i| {
                    let left = prev[i];
                    let right = prev[i + half];
                    if values[left as usize] <= values[right as usize] {
                        left
                    } else {
                        right
                    }
                })
                .collect();
            table.push(level);
            j += 1;
        }
        SparseTable { table }
    }

    /// Position of the minimum of `values[i..=j]`; ties resolve to the leftmost block.
    #[inline]
    fn query(&self, values: &[u32], i: usize, j: usize) -> usize {
        debug_assert!(i <= j);
        let k = floor_log2(j - i + 1);
        let left = self.table[k][i];
        let right = self.table[k][j + 1 - (1usize << k)];
        if values[left as usize] <= values[right as usize] {
            left as usize
        } else {
            right as usize
        }
    }
}

#[derive(Debug)]
pub struct LcaEngine {
    taxonomy: Taxonomy,
    euler: Vec<u32>,
    depths: Vec<u32>,
    first: Vec<u32>,
    rmq: SparseTable,
}

impl LcaEngine {
    pub fn new(taxonomy: Taxonomy) -> Self {
        info!("Creating indexes ...");
        let start = Instant::now();
        let (euler, depths, first) = euler_tour(&taxonomy);
        info!(
            "Euler tour of {} steps done ({:.3} sec)",
            euler.len(),
            start.elapsed().as_secs_f64()
        );

        info!("Preprocessing RMQ ...");
        let start = Instant::now();
        let rmq = SparseTable::new(&depths);
        info!("Done ({:.3} sec)", start.elapsed().as_secs_f64());

        LcaEngine {
            taxonomy,
            euler,
            depths,
            first,
            rmq,
        }
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    pub fn euler_tour(&self) -> &[u32] {
        &self.euler
    }

    pub fn tour_depths(&self) -> &[u32] {
        &self.depths
    }

    pub fn first_occurrence(&self, id: NodeId) -> usize {
        self.first[id] as usize
    }

    pub fn depth(&self, id: NodeId) -> usize {
        self.depths[self.first[id] as usize] as usize
    }

    /// LCA of two internal node ids.
    pub fn lca_pair(&self, a: NodeId, b: NodeId) -> NodeId {
        if a == b {
            return a;
        }
        let mut p1 = self.first[a] as usize;
        let mut p2 = self.first[b] as usize;
        if p1 > p2 {
            std::mem::swap(&mut p1, &mut p2);
        }
        self.euler[self.rmq.query(&self.depths, p1, p2)] as usize
    }

    /// LCA of a set of internal node ids.
    pub fn lca_of_ids(&self, ids: &[NodeId]) -> Result<&TaxonomyNode, LcaError> {
        let (&first, rest) = ids.split_first().ok_or(LcaError::EmptySet)?;
        let lca = rest.iter().fold(first, |acc, &id| self.lca_pair(acc, id));
        Ok(&self.taxonomy.nodes()[lca])
    }

    /// LCA of a set of NCBI taxids. Taxids absent from the taxonomy are dropped
    /// before the reduction; if none is left the set is empty.
    pub fn query(&self, taxids: &[TaxId]) -> Result<&TaxonomyNode, LcaError> {
        let ids: Vec<NodeId> = taxids
            .iter()
            .filter_map(|&t| self.taxonomy.get_internal_id(t))
            .collect();
        self.lca_of_ids(&ids)
    }

    /// Standard rank order of the first ranked taxon at or above `node`.
    pub fn effective_rank(&self, node: &TaxonomyNode) -> Option<usize> {
        self.taxonomy
            .ancestors(node.id)
            .filter(|a| !a.is_root())
            .find_map(|a| rank_order(&a.rank))
    }

    /// Name of the ancestor of `node` at `rank`.
    ///
    /// A standard rank finer than the node's own (effective) rank cannot be
    /// resolved, so the node's name is returned with the uncertain marker.
    /// Anything else missing from the lineage yields [`UNKNOWN`].
    pub fn at_level<'a>(&'a self, node: &'a TaxonomyNode, rank: &str) -> Cow<'a, str> {
        if is_no_rank(rank) {
            return Cow::Borrowed(UNKNOWN);
        }
        let wanted = rank_order(rank);
        let mut base_seen = false;
        for ancestor in self.taxonomy.ancestors(node.id) {
            if ancestor.is_root() {
                break;
            }
            if ancestor.rank == rank {
                return Cow::Borrowed(&ancestor.name);
            }
            if base_seen {
                continue;
            }
            if let Some(have) = rank_order(&ancestor.rank) {
                base_seen = true;
                if wanted.is_some_and(|w| w < have) {
                    return uncertain(node);
                }
            }
        }
        Cow::Borrowed(UNKNOWN)
    }

    /// Rank name -> taxon name for every ranked ancestor of `node` (excluding the
    /// root). The deepest ancestor wins when a rank repeats.
    pub fn all_levels<'a>(&'a self, node: &'a TaxonomyNode) -> HashMap<&'a str, &'a str> {
        let mut taxons = HashMap::with_capacity(16);
        for ancestor in self.taxonomy.ancestors(node.id) {
            if ancestor.is_root() || is_no_rank(&ancestor.rank) {
                continue;
            }
            taxons
                .entry(ancestor.rank.as_str())
                .or_insert(ancestor.name.as_str());
        }
        taxons
    }

    /// Resolves several ranks with a single walk to the root. Each entry is what
    /// [`LcaEngine::at_level`] returns for that rank.
    pub fn at_levels<'a, S: AsRef<str>>(
        &'a self,
        node: &'a TaxonomyNode,
        ranks: &[S],
    ) -> Vec<Cow<'a, str>> {
        let all = self.all_levels(node);
        let base = self.effective_rank(node);

        ranks
            .iter()
            .map(|rank| {
                let rank = rank.as_ref();
                if let Some(name) = all.get(rank) {
                    return Cow::Borrowed(*name);
                }
                match (rank_order(rank), base) {
                    (Some(wanted), Some(have)) if wanted < have => uncertain(node),
                    _ => Cow::Borrowed(UNKNOWN),
                }
            })
            .collect()
    }
}

fn uncertain(node: &TaxonomyNode) -> Cow<'_, str> {
    Cow::Owned(format!("{}{}", UNCERTAIN_PREFIX, node.name))
}

/// Euler tour from the root. Every visit appends the node and its depth; after a
/// node's subtree is done, its parent is appended again at the parent's depth.
fn euler_tour(taxonomy: &Taxonomy) -> (Vec<u32>, Vec<u32>, Vec<u32>) {
    let n = taxonomy.len();
    let mut euler = Vec::with_capacity(2 * n);
    let mut depths = Vec::with_capacity(2 * n);
    let mut first = vec![u32::MAX; n];
    if n == 0 {
        return (euler, depths, first);
    }

    let nodes = taxonomy.nodes();
    let mut visit = |id: NodeId, depth: usize, euler: &mut Vec<u32>, depths: &mut Vec<u32>| {
        if first[id] == u32::MAX {
            first[id] = euler.len() as u32;
        }
        euler.push(id as u32);
        depths.push(depth as u32);
    };

    // (node, index of the next child to descend into)
    let mut stack: Vec<(NodeId, usize)> = vec![(0, 0)];
    visit(0, 0, &mut euler, &mut depths);
    while let Some(top) = stack.last_mut() {
        let (id, next_child) = *top;
        if let Some(&child) = nodes[id].children.get(next_child) {
            top.1 += 1;
            let depth = stack.len();
            visit(child, depth, &mut euler, &mut depths);
            stack.push((child, 0));
        } else {
            stack.pop();
            if let Some(&(parent, _)) = stack.last() {
                euler.push(parent as u32);
                depths.push((stack.len() - 1) as u32);
            }
        }
    }

    (euler, depths, first)
}
