//! Lowest common ancestor classification of BLAST tabular hits against the
//! NCBI taxonomy.

pub mod blastm8;
pub mod classify;
pub mod errors;
pub mod gi_taxid;
pub mod gz_stream;
pub mod lca;
pub mod logging;
pub mod ncbi_taxonomy;
pub mod reports;
pub mod taxonomy;

pub use classify::{classify_stream, ClassificationStats, ClassifyOptions};
pub use gi_taxid::{GiTaxidIndex, ResolverMode};
pub use lca::LcaEngine;
pub use taxonomy::{TaxId, Taxonomy, TaxonomyNode};
