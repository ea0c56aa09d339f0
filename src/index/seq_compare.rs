//! Query-indexed sequence comparison.
//!
//! The query sequence is indexed once per search (a k-mer → positions
//! table); each candidate extension region from a reference is then matched
//! against that table, producing dense uniform-length anchors that the
//! banded chainer partitions into HSP fragments with identity statistics.

use std::collections::HashMap;

use crate::util::BASE_TO_BITS;

use super::chaining2::{Chain2Result, Chainer2};
use super::search::SubstrPair;

#[derive(Debug, Clone, Copy)]
pub struct SeqComparatorOptions {
    /// Seed size for comparator anchors (not the index k).
    pub k: usize,
    pub chaining: super::chaining2::Chaining2Options,
}

impl Default for SeqComparatorOptions {
    fn default() -> Self {
        SeqComparatorOptions {
            k: 11,
            chaining: Default::default(),
        }
    }
}

/// Identity statistics of one compared region, possibly several fragments.
#[derive(Debug, Default, Clone)]
pub struct SeqComparatorResult {
    pub matched_bases: i32,
    pub aligned_bases: i32,
    pub query_len: usize,

    pub q_begin: i32,
    pub q_end: i32,
    pub t_begin: i32,
    pub t_end: i32,

    /// Fragments sorted by `pident * aligned` descending.
    pub chains: Vec<Chain2Result>,

    /// The matched target subsequence, when sequence output is requested.
    pub t_seq: Option<Vec<u8>>,
}

impl SeqComparatorResult {
    /// Rebuilds the aggregate statistics from a fragment list (used after
    /// fragments are re-grouped per contig).
    pub fn update(&mut self, mut chains: Vec<Chain2Result>, query_len: usize) {
        chains.sort_by(|a, b| {
            (b.pident * b.aligned_bases_q as f64)
                .partial_cmp(&(a.pident * a.aligned_bases_q as f64))
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        self.matched_bases = 0;
        self.aligned_bases = 0;
        self.q_begin = i32::MAX;
        self.t_begin = i32::MAX;
        self.q_end = 0;
        self.t_end = 0;
        for c in &chains {
            self.matched_bases += c.matched_bases;
            self.aligned_bases += c.aligned_bases_q;
            self.q_begin = self.q_begin.min(c.q_begin);
            self.q_end = self.q_end.max(c.q_end);
            self.t_begin = self.t_begin.min(c.t_begin);
            self.t_end = self.t_end.max(c.t_end);
        }
        self.query_len = query_len;
        self.chains = chains;
        self.t_seq = None;
    }
}

/// Compares candidate target regions against one indexed query.
pub struct SeqComparator {
    pub options: SeqComparatorOptions,
    index: HashMap<u64, Vec<u32>>,
}

impl SeqComparator {
    pub fn new(options: SeqComparatorOptions) -> Self {
        SeqComparator {
            options,
            index: HashMap::new(),
        }
    }

    /// Indexes the query sequence. Called once per search.
    pub fn index(&mut self, s: &[u8]) {
        self.index.clear();
        let k = self.options.k;
        each_kmer(s, k, |kmer, pos| {
            self.index.entry(kmer).or_default().push(pos as u32);
        });
    }

    /// Matches a target region against the query region `[q_begin, q_end]`
    /// and chains the anchors. Returns `None` when no fragment reaches the
    /// reporting thresholds.
    pub fn compare(
        &self,
        q_begin: u32,
        q_end: u32,
        t_seq: &[u8],
        query_len: usize,
        chainer: &mut Chainer2,
    ) -> Option<SeqComparatorResult> {
        let k = self.options.k;
        let mut subs: Vec<SubstrPair> = Vec::new();

        each_kmer(t_seq, k, |kmer, t_pos| {
            if let Some(q_positions) = self.index.get(&kmer) {
                for &q_pos in q_positions {
                    if q_pos < q_begin || q_pos > q_end {
                        continue;
                    }
                    subs.push(SubstrPair {
                        q_begin: q_pos as i32,
                        t_begin: t_pos as i32,
                        len: k as u8,
                        mismatch: 0,
                        q_rc: false,
                        t_rc: false,
                    });
                }
            }
        });
        if subs.is_empty() {
            return None;
        }

        // (QBegin asc, QEnd desc) — uniform length makes the second key a
        // TBegin tiebreak
        subs.sort_unstable_by(|a, b| {
            a.q_begin
                .cmp(&b.q_begin)
                .then_with(|| a.t_begin.cmp(&b.t_begin))
        });

        let out = chainer.chain(&subs)?;

        let mut result = SeqComparatorResult {
            matched_bases: out.matched_bases,
            aligned_bases: out.aligned_bases,
            query_len,
            q_begin: out.q_begin,
            q_end: out.q_end,
            t_begin: out.t_begin,
            t_end: out.t_end,
            chains: out.chains,
            t_seq: None,
        };
        for c in result.chains.iter_mut() {
            c.pident = if c.aligned_bases > 0 {
                c.matched_bases as f64 / c.aligned_bases as f64 * 100.0
            } else {
                0.0
            };
        }
        Some(result)
    }
}

/// Invokes `f(kmer, start)` for every window of `k` consecutive ACGT bases.
fn each_kmer<F: FnMut(u64, usize)>(seq: &[u8], k: usize, mut f: F) {
    if seq.len() < k {
        return;
    }
    let kmer_mask = if k >= 32 { u64::MAX } else { (1u64 << (2 * k)) - 1 };
    let mut kmer = 0u64;
    let mut valid = 0usize;
    for (i, &b) in seq.iter().enumerate() {
        let code = BASE_TO_BITS[b as usize];
        if code > 3 {
            valid = 0;
            continue;
        }
        kmer = ((kmer << 2) | code as u64) & kmer_mask;
        valid += 1;
        if valid >= k {
            f(kmer, i + 1 - k);
        }
    }
}
