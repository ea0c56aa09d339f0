//! Genome records and 2-bit sequence packing.
//!
//! A genome is the concatenation of its contigs separated by (k-1) `N`
//! bytes. The packed form stores 4 bases per byte, MSB-first within the
//! byte; non-ACGT bytes (the separators included) pack as base `A`, so
//! consumers probing contig boundaries must allow for spurious `A` runs
//! inside the separator intervals.

pub mod reader;
pub mod writer;

pub use reader::Reader;
pub use writer::Writer;

use crate::util::{BASE_TO_BITS, BITS_TO_BASE};

/// One reference genome: identifier, per-contig metadata, the concatenated
/// sequence, and (during building) the masking output.
#[derive(Default)]
pub struct Genome {
    pub id: Vec<u8>,

    /// Concatenated contigs with separators; emptied after packing.
    pub seq: Vec<u8>,
    /// 2-bit packed form of `seq`.
    pub two_bit: Vec<u8>,
    /// Length of the concatenated sequence (separators included).
    pub len: usize,

    pub seq_ids: Vec<Vec<u8>>,
    pub seq_sizes: Vec<usize>,
    pub num_seqs: usize,
    /// Sum of contig lengths, separators excluded.
    pub genome_size: usize,

    /// Per-mask captured k-mers (build phase only).
    pub kmers: Option<Vec<u64>>,
    /// Per-mask capture locations (build phase only).
    pub locses: Option<Vec<Vec<u64>>>,
}

impl Genome {
    pub fn new() -> Self {
        Genome::default()
    }
}

/// Packs a byte sequence into 2-bit codes, 4 bases per byte, MSB-first.
pub fn seq_to_two_bit(seq: &[u8]) -> Vec<u8> {
    let mut packed = vec![0u8; (seq.len() + 3) / 4];
    for (i, &b) in seq.iter().enumerate() {
        let code = BASE_TO_BITS[b as usize];
        let code = if code > 3 { 0 } else { code };
        packed[i >> 2] |= code << ((3 - (i & 3)) << 1);
    }
    packed
}

/// Decodes bases `[begin, end]` (inclusive, 0-based) of a packed sequence.
pub fn two_bit_to_seq(packed: &[u8], begin: usize, end: usize) -> Vec<u8> {
    let mut seq = Vec::with_capacity(end + 1 - begin);
    for i in begin..=end {
        let code = (packed[i >> 2] >> ((3 - (i & 3)) << 1)) & 3;
        seq.push(BITS_TO_BASE[code as usize]);
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_bit_round_trip() {
        let seq = b"ACGTTGCAACGTACG";
        let packed = seq_to_two_bit(seq);
        assert_eq!(packed.len(), 4);
        assert_eq!(two_bit_to_seq(&packed, 0, seq.len() - 1), seq);
    }

    #[test]
    fn two_bit_partial_ranges() {
        let seq = b"ACGTTGCAACGTACGT";
        let packed = seq_to_two_bit(seq);
        assert_eq!(two_bit_to_seq(&packed, 0, 0), b"A");
        assert_eq!(two_bit_to_seq(&packed, 3, 6), b"TTGC");
        assert_eq!(two_bit_to_seq(&packed, 13, 15), b"CGT");
    }

    #[test]
    fn non_acgt_packs_as_a() {
        let seq = b"ANNNT";
        let packed = seq_to_two_bit(seq);
        assert_eq!(two_bit_to_seq(&packed, 0, 4), b"AAAAT");
    }
}
