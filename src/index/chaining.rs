//! Collinear anchor chaining (HSP discovery).
//!
//! A dynamic program over the cleaned anchors of one (query, target) pair:
//! an anchor may extend a chain when it lies down-diagonal of its
//! predecessor on the same strand, within the gap and distance limits.
//! After backtracking the best chain, the index ranges strictly before its
//! first anchor and strictly after its last are chained recursively;
//! anchors interleaved inside the winning chain's span are never reused.

use super::search::SubstrPair;

/// Divisor applied to the anchor distance in the transition penalty.
pub const DISTANCE_PENALTY: f64 = 100.0;

#[derive(Debug, Clone, Copy)]
pub struct ChainingOptions {
    pub max_gap: f64,
    pub max_distance: f64,
    /// Minimum score for a chain to be reported.
    pub min_score: f64,
}

/// Chains anchors sorted by query position. Scratch buffers are reused
/// across calls; instances are pooled by the searcher.
pub struct Chainer {
    pub options: ChainingOptions,
    scores: Vec<f64>,
    predecessors: Vec<Option<usize>>,
}

impl Chainer {
    pub fn new(options: ChainingOptions) -> Self {
        Chainer {
            options,
            scores: Vec::new(),
            predecessors: Vec::new(),
        }
    }

    /// Returns the chains (each a list of ascending anchor indices) and the
    /// best chain score. The first chain carries the best score.
    pub fn chain(&mut self, subs: &[SubstrPair]) -> (Vec<Vec<usize>>, f64) {
        let n = subs.len();
        if n == 0 {
            return (Vec::new(), 0.0);
        }
        if n == 1 {
            let score = subs[0].len as f64;
            return (vec![vec![0]], score);
        }

        let scores = &mut self.scores;
        let predecessors = &mut self.predecessors;
        scores.clear();
        predecessors.clear();

        for (i, a) in subs.iter().enumerate() {
            let mut best = a.len as f64;
            let mut best_pred = None;
            let rc = a.q_rc != a.t_rc;

            for j in (0..i).rev() {
                let b = &subs[j];
                if (b.q_rc != b.t_rc) != rc {
                    continue;
                }
                let dq = (a.q_begin - b.q_begin) as i64;
                // a predecessor must come earlier on the target, mirrored
                // for reverse-strand pairs
                let dt = if rc {
                    (b.t_begin - a.t_begin) as i64
                } else {
                    (a.t_begin - b.t_begin) as i64
                };
                if dt < 0 {
                    continue;
                }
                let distance = dq.max(dt) as f64;
                if distance > self.options.max_distance {
                    continue;
                }
                let gap = (dq - dt).unsigned_abs() as f64;
                if gap > self.options.max_gap {
                    continue;
                }

                let s = scores[j] + a.len as f64 - gap - distance / DISTANCE_PENALTY;
                if s > best {
                    best = s;
                    best_pred = Some(j);
                }
            }
            scores.push(best);
            predecessors.push(best_pred);
        }

        let best_score = scores.iter().cloned().fold(0.0, f64::max);

        let mut chains: Vec<Vec<usize>> = Vec::new();
        chain_a_range(
            scores,
            predecessors,
            0,
            n,
            self.options.min_score,
            &mut chains,
        );
        (chains, best_score)
    }
}

/// Extracts the best chain within the index range `[begin, end)`, then
/// recurses into the unchecked prefix and suffix outside it. Predecessor
/// links leaving the range truncate the backtrack.
fn chain_a_range(
    scores: &[f64],
    predecessors: &[Option<usize>],
    begin: usize,
    end: usize,
    min_score: f64,
    chains: &mut Vec<Vec<usize>>,
) {
    if begin >= end {
        return;
    }

    let mut peak = begin;
    let mut peak_score = f64::MIN;
    for i in begin..end {
        if scores[i] > peak_score {
            peak_score = scores[i];
            peak = i;
        }
    }
    if peak_score < min_score {
        return;
    }

    let mut chain = Vec::new();
    let mut cur = peak;
    loop {
        chain.push(cur);
        match predecessors[cur] {
            Some(prev) if prev >= begin => cur = prev,
            _ => break,
        }
    }
    chain.reverse();
    let first = chain[0];
    chains.push(chain);

    // the unchecked prefix and suffix; anchors between `first` and `peak`
    // that the winning chain skipped are out of play
    chain_a_range(scores, predecessors, begin, first, min_score, chains);
    chain_a_range(scores, predecessors, peak + 1, end, min_score, chains);
}
