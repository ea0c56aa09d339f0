//! LexicMap: sequence-similarity search over large nucleotide genome
//! collections.
//!
//! An index is built from a set of genome files: each genome is sketched
//! with LexicHash masks (one representative k-mer per mask), packed to
//! 2 bits per base, and the captured k-mers go into a sorted, compressed
//! seed store. A query is masked the same way; per-mask prefix-range
//! lookups yield anchors that are chained into HSPs, extended, compared
//! against the indexed query and ranked per target genome.

pub mod genome;
pub mod index;
pub mod kv;
pub mod lexichash;
pub mod util;
