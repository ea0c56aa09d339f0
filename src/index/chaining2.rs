//! Banded chaining of dense anchors into non-overlapping HSP fragments.
//!
//! Anchors here come from the sequence comparator and are much denser than
//! the seed anchors fed to the collinear chainer, so the DP is banded: only
//! the last `band` predecessors are inspected, and the score function is
//! just anchor length minus gap. After backtracking a maximal chain, its
//! query/target bounding box occludes the anchors it covers and the regions
//! strictly left and right of the peak are chained recursively.

use super::search::SubstrPair;

/// Chains whose DP peak falls below this score are discarded outright.
pub const MIN_PEAK_SCORE: i32 = 100;

#[derive(Debug, Clone, Copy)]
pub struct Chaining2Options {
    pub max_gap: i32,
    /// Minimum score of a chain.
    pub min_score: i32,
    pub max_distance: i32,
    /// Only the last `band` predecessors are checked in the DP.
    pub band: usize,
}

impl Default for Chaining2Options {
    fn default() -> Self {
        Chaining2Options {
            max_gap: 32,
            min_score: 20,
            max_distance: 50,
            band: 20,
        }
    }
}

/// One chained HSP fragment.
#[derive(Debug, Clone, Default)]
pub struct Chain2Result {
    /// Anchor indices, ascending.
    pub chain: Vec<usize>,
    pub matched_bases: i32,
    pub aligned_bases: i32,
    /// Aligned bases on the query; adjusted when a fragment is clipped
    /// into a contig.
    pub aligned_bases_q: i32,
    pub q_begin: i32,
    pub q_end: i32,
    pub t_begin: i32,
    pub t_end: i32,
    /// Percent identity over the aligned span.
    pub pident: f64,
}

/// Aggregate output of one chaining run.
#[derive(Debug, Default)]
pub struct Chain2Output {
    pub chains: Vec<Chain2Result>,
    pub matched_bases: i32,
    pub aligned_bases: i32,
    pub q_begin: i32,
    pub q_end: i32,
    pub t_begin: i32,
    pub t_end: i32,
}

/// Chains anchors sorted by (QBegin asc, QEnd desc). Scratch buffers are
/// reused across calls; instances are pooled by the comparator.
pub struct Chainer2 {
    pub options: Chaining2Options,
    maxscores: Vec<i32>,
    maxscores_idxs: Vec<usize>,
    bounds: Vec<i32>,
}

impl Chainer2 {
    pub fn new(options: Chaining2Options) -> Self {
        Chainer2 {
            options,
            maxscores: Vec::with_capacity(1024),
            maxscores_idxs: Vec::with_capacity(1024),
            bounds: Vec::with_capacity(32),
        }
    }

    /// Finds non-overlapping chains; returns `None` when nothing reaches
    /// the reporting thresholds.
    pub fn chain(&mut self, subs: &[SubstrPair]) -> Option<Chain2Output> {
        let n = subs.len();
        if n == 0 {
            return None;
        }
        if n == 1 {
            let sub = &subs[0];
            if (sub.len as i32) < self.options.min_score {
                return None;
            }
            let len = sub.len as i32;
            let chain = Chain2Result {
                chain: vec![0],
                matched_bases: len,
                aligned_bases: len,
                aligned_bases_q: len,
                q_begin: sub.q_begin,
                q_end: sub.q_begin + len - 1,
                t_begin: sub.t_begin,
                t_end: sub.t_begin + len - 1,
                pident: 0.0,
            };
            return Some(Chain2Output {
                matched_bases: len,
                aligned_bases: len,
                q_begin: chain.q_begin,
                q_end: chain.q_end,
                t_begin: chain.t_begin,
                t_end: chain.t_end,
                chains: vec![chain],
            });
        }

        let band = self.options.band;
        let max_gap = self.options.max_gap;
        let max_distance = self.options.max_distance;

        let maxscores = &mut self.maxscores;
        let maxscores_idxs = &mut self.maxscores_idxs;
        maxscores.clear();
        maxscores_idxs.clear();
        maxscores.push(subs[0].len as i32);
        maxscores_idxs.push(0);

        // global DP peak
        let mut global_max = 0i32;
        let mut global_max_i = 0usize;

        for i in 1..n {
            let a = &subs[i];
            let mut m = a.len as i32;
            let mut mj = i;

            for step in 1..=band {
                if step > i {
                    break;
                }
                let j = i - step;
                let b = &subs[j];
                if b.t_begin > a.t_begin {
                    // crossed anchors
                    continue;
                }
                let d = (a.q_begin - b.q_begin).max(a.t_begin - b.t_begin);
                if d > max_distance {
                    continue;
                }
                let g = ((a.q_begin - b.q_begin) - (a.t_begin - b.t_begin)).abs();
                if g > max_gap {
                    continue;
                }
                let s = maxscores[j] + a.len as i32 - g;
                if s >= m {
                    m = s;
                    mj = j;
                }
            }
            maxscores.push(m);
            maxscores_idxs.push(mj);

            if m > global_max {
                global_max = m;
                global_max_i = i;
            }
        }

        if global_max < MIN_PEAK_SCORE {
            return None;
        }

        let mut out = Chain2Output::default();
        self.bounds.clear();
        let mut bounds = std::mem::take(&mut self.bounds);
        let min_score = self.options.min_score;

        let (_, qb, qe, tb, te) = chain_a_region(
            subs,
            &self.maxscores,
            &self.maxscores_idxs,
            0,
            min_score,
            &mut out,
            Some(global_max_i),
            &mut bounds,
        );
        self.bounds = bounds;

        if out.chains.is_empty() {
            return None;
        }
        out.q_begin = qb;
        out.q_end = qe;
        out.t_begin = tb;
        out.t_end = te;
        Some(out)
    }
}

/// Chains one region of the anchors, then recurses into the parts left and
/// right of the found peak. `maxscores`/`maxscores_idxs` are the slices for
/// this region; stored predecessor indices are global, hence `offset`.
/// Returns the region's peak score and chain bounding box.
#[allow(clippy::too_many_arguments)]
fn chain_a_region(
    subs: &[SubstrPair],
    maxscores: &[i32],
    maxscores_idxs: &[usize],
    offset: usize,
    min_score: i32,
    out: &mut Chain2Output,
    peak: Option<usize>,
    bounds: &mut Vec<i32>,
) -> (i32, i32, i32, i32, i32) {
    let peak_i = match peak {
        Some(i) => i,
        None => {
            let mut max = 0i32;
            let mut max_i = 0usize;
            for (i, &m) in maxscores.iter().enumerate() {
                if m > max {
                    max = m;
                    max_i = i;
                }
            }
            if max < min_score {
                return (0, -1, -1, -1, -1);
            }
            max_i
        }
    };
    let peak_score = maxscores[peak_i];

    let mut matched = 0i32;
    let (mut qb, mut qe, mut tb, mut te) = (0i32, 0i32, 0i32, 0i32);
    let mut begin_of_next_anchor = 0i32;
    let mut first_anchor = true;
    let mut path: Vec<usize> = Vec::new();

    let mut i = peak_i;
    let mut j: isize;
    loop {
        j = maxscores_idxs[i] as isize - offset as isize;
        if j < 0 {
            // the chain continues into an earlier region
            break;
        }

        // an anchor overlapping any previous chain's bounding box in both
        // coordinates is occluded:
        //
        // Query
        // |        te  / (OK)
        // |        |  /
        // |(NO)/   |____qe
        // |   /   /
        // |qb____/    / (NO)
        // |   /  |   /
        // |OK/   |tb
        // o-------------------- Ref
        let sub = &subs[i];
        let len = sub.len as i32;
        let mut overlapped = false;
        for b in bounds.chunks_exact(4) {
            let top_right = sub.q_begin > b[1] && sub.t_begin > b[3];
            let bottom_left = sub.q_begin + len - 1 < b[0] && sub.t_begin + len - 1 < b[2];
            if !(top_right || bottom_left) {
                overlapped = true;
                break;
            }
        }

        if !overlapped {
            path.push(i + offset);
            if first_anchor {
                first_anchor = false;
                qe = sub.q_begin + len - 1;
                te = sub.t_begin + len - 1;
                qb = sub.q_begin;
                tb = sub.t_begin;
                matched += len;
            } else {
                qb = sub.q_begin;
                tb = sub.t_begin;
                if sub.q_begin + len - 1 >= begin_of_next_anchor {
                    // subtract the overhang shared with the next anchor
                    matched += begin_of_next_anchor - sub.q_begin;
                } else {
                    matched += len;
                }
            }
            begin_of_next_anchor = sub.q_begin;
        }

        if i as isize == j {
            // the chain starts here
            break;
        }
        i = j as usize;
    }

    let mut emitted = false;
    if !first_anchor {
        let aligned = qe - qb + 1;
        path.reverse();
        out.chains.push(Chain2Result {
            chain: path,
            matched_bases: matched,
            aligned_bases: aligned,
            aligned_bases_q: aligned,
            q_begin: qb,
            q_end: qe,
            t_begin: tb,
            t_end: te,
            pident: 0.0,
        });
        out.matched_bases += matched;
        out.aligned_bases += aligned;

        bounds.push(qb);
        bounds.push(qe);
        bounds.push(tb);
        bounds.push(te);
        emitted = true;
    }

    let (mut r_qb, mut r_qe, mut r_tb, mut r_te) = if emitted {
        (qb, qe, tb, te)
    } else {
        (-1, -1, -1, -1)
    };

    // the unchecked region on the right of the peak
    if peak_i + 1 < maxscores.len() {
        let (score, b_qb, b_qe, b_tb, b_te) = chain_a_region(
            &subs[peak_i + 1..],
            &maxscores[peak_i + 1..],
            &maxscores_idxs[peak_i + 1..],
            offset + peak_i + 1,
            min_score,
            out,
            None,
            bounds,
        );
        if score > 0 {
            merge_bounds(&mut r_qb, &mut r_qe, &mut r_tb, &mut r_te, b_qb, b_qe, b_tb, b_te);
        }
    }

    // the unchecked region on the left of where backtracking stopped
    if i > 0 {
        let (score, b_qb, b_qe, b_tb, b_te) = chain_a_region(
            &subs[..i],
            &maxscores[..i],
            &maxscores_idxs[..i],
            offset,
            min_score,
            out,
            None,
            bounds,
        );
        if score > 0 {
            merge_bounds(&mut r_qb, &mut r_qe, &mut r_tb, &mut r_te, b_qb, b_qe, b_tb, b_te);
        }
    }

    (peak_score, r_qb, r_qe, r_tb, r_te)
}

#[allow(clippy::too_many_arguments)]
fn merge_bounds(
    qb: &mut i32,
    qe: &mut i32,
    tb: &mut i32,
    te: &mut i32,
    b_qb: i32,
    b_qe: i32,
    b_tb: i32,
    b_te: i32,
) {
    if b_qb < 0 {
        return;
    }
    if *qb < 0 {
        *qb = b_qb;
        *qe = b_qe;
        *tb = b_tb;
        *te = b_te;
        return;
    }
    *qb = (*qb).min(b_qb);
    *qe = (*qe).max(b_qe);
    *tb = (*tb).min(b_tb);
    *te = (*te).max(b_te);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn anchor(q: i32, t: i32, len: u8) -> SubstrPair {
        SubstrPair {
            q_begin: q,
            t_begin: t,
            len,
            mismatch: 0,
            q_rc: false,
            t_rc: false,
        }
    }

    /// Dense anchors along a diagonal, one per position, like comparator
    /// output for an exact match of the given length.
    fn diagonal(q0: i32, t0: i32, span: i32, k: u8) -> Vec<SubstrPair> {
        (0..=(span - k as i32))
            .map(|d| anchor(q0 + d, t0 + d, k))
            .collect()
    }

    #[test]
    fn exact_match_yields_one_full_chain() {
        let subs = diagonal(0, 500, 200, 11);
        let mut chainer = Chainer2::new(Chaining2Options::default());
        let out = chainer.chain(&subs).unwrap();
        assert_eq!(out.chains.len(), 1);
        let c = &out.chains[0];
        assert_eq!(c.q_begin, 0);
        assert_eq!(c.q_end, 199);
        assert_eq!(c.t_begin, 500);
        assert_eq!(c.t_end, 699);
        // overlapping anchors must not be double counted
        assert_eq!(c.matched_bases, 200);
        assert_eq!(c.aligned_bases, 200);
        assert!(c.matched_bases <= c.aligned_bases);
        // chain indices ascend
        assert!(c.chain.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn weak_signal_is_rejected_by_peak_cutoff() {
        // 5 overlapping 11-mers accumulate 55 < MIN_PEAK_SCORE
        let subs = diagonal(0, 0, 15, 11);
        let mut chainer = Chainer2::new(Chaining2Options::default());
        assert!(chainer.chain(&subs).is_none());
    }

    #[test]
    fn two_separated_matches_yield_two_chains() {
        let mut subs = diagonal(0, 0, 150, 11);
        subs.extend(diagonal(400, 4000, 150, 11));
        let mut chainer = Chainer2::new(Chaining2Options::default());
        let out = chainer.chain(&subs).unwrap();
        assert_eq!(out.chains.len(), 2);
        for c in &out.chains {
            assert_eq!(c.aligned_bases, 150);
            assert_eq!(c.matched_bases, 150);
        }
        // aggregate bounds cover both chains
        assert_eq!(out.q_begin, 0);
        assert_eq!(out.q_end, 549);
        assert_eq!(out.t_begin, 0);
        assert_eq!(out.t_end, 4149);
    }

    #[test]
    fn occluded_anchors_are_not_reused() {
        // a duplicated diagonal: the second copy overlaps the first chain's
        // bounding box and must not yield a second chain over the same span
        let mut subs = diagonal(0, 0, 150, 11);
        subs.extend(diagonal(0, 0, 150, 11));
        subs.sort_by(|a, b| {
            a.q_begin
                .cmp(&b.q_begin)
                .then((b.q_begin + b.len as i32).cmp(&(a.q_begin + a.len as i32)))
                .then(a.t_begin.cmp(&b.t_begin))
        });
        let mut chainer = Chainer2::new(Chaining2Options::default());
        let out = chainer.chain(&subs).unwrap();
        for c in &out.chains {
            assert!(c.matched_bases <= 150);
        }
        assert_eq!(out.chains.len(), 1);
    }

    #[test]
    fn single_anchor_respects_min_score() {
        let mut chainer = Chainer2::new(Chaining2Options {
            min_score: 20,
            ..Chaining2Options::default()
        });
        assert!(chainer.chain(&[anchor(0, 0, 11)]).is_none());
        let out = chainer.chain(&[anchor(3, 7, 25)]).unwrap();
        assert_eq!(out.chains[0].q_begin, 3);
        assert_eq!(out.chains[0].t_end, 7 + 24);
    }
}
