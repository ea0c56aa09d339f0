//! LexicHash sketching: one representative k-mer per mask.
//!
//! A mask is a 64-bit k-mer drawn deterministically from the random seed.
//! Applied to a sequence, each mask selects the window k-mer (forward or
//! reverse complement) minimizing `kmer XOR mask`, i.e. the k-mer sharing
//! the longest prefix with the mask, together with every location where
//! that minimum occurs. Locations carry the strand in bit 0.
//!
//! Mask prefixes are spread evenly over all `4^p` prefixes of length
//! `p = floor(log4(M))` so that captures stay uniform across the sequence;
//! suffix bits come from a seeded `StdRng`. A prefix lookup table restricts
//! the per-window inner loop to masks sharing the window's prefix.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::util::BASE_TO_BITS;

const MASK_FILE_MAGIC: &[u8; 8] = b"lexicmsk";

/// How many times a low-complexity mask suffix is re-drawn before giving up.
const LC_REDRAW_LIMIT: usize = 8;

/// Upper bound of the prefix lookup table depth (4^15 buckets).
const MAX_PREFIX_LEN: usize = 15;

pub struct LexicHash {
    pub k: usize,
    pub seed: i64,
    pub masks: Vec<u64>,

    prefix_len: usize,
    // mask ids grouped by their first `prefix_len` bases
    prefix_buckets: Vec<Vec<u32>>,
}

impl LexicHash {
    /// Creates masks for k-mer size `k` from `seed`.
    ///
    /// `prefix_for_check_lc` > 0 rejects masks whose first that-many bases
    /// form a homopolymer (the suffix is re-drawn a bounded number of times).
    pub fn new(k: usize, masks: usize, seed: i64, prefix_for_check_lc: usize) -> io::Result<Self> {
        if !(3..=32).contains(&k) {
            return Err(invalid_input(format!(
                "invalid k value: {}, valid range: [3, 32]",
                k
            )));
        }
        if masks < 4 {
            return Err(invalid_input(format!(
                "invalid number of masks: {}, should be >= 4",
                masks
            )));
        }
        if prefix_for_check_lc > k {
            return Err(invalid_input(format!(
                "invalid prefix for low-complexity check: {}, valid range: [0, {}]",
                prefix_for_check_lc, k
            )));
        }

        let mut p = 0usize;
        while p + 1 <= k.min(MAX_PREFIX_LEN) && (1usize << (2 * (p + 1))) <= masks {
            p += 1;
        }
        let suffix_bits = 2 * (k - p);
        let suffix_mask = low_bits(suffix_bits);

        let mut rng = StdRng::seed_from_u64(seed as u64);
        let mut mask_kmers = Vec::with_capacity(masks);
        for i in 0..masks {
            let prefix = (i & ((1usize << (2 * p)) - 1)) as u64;
            let mut mask = (prefix << suffix_bits) | (rng.gen::<u64>() & suffix_mask);
            if prefix_for_check_lc > 0 {
                for _ in 0..LC_REDRAW_LIMIT {
                    if !is_homopolymer_prefix(mask, k, prefix_for_check_lc) {
                        break;
                    }
                    mask = (prefix << suffix_bits) | (rng.gen::<u64>() & suffix_mask);
                }
            }
            mask_kmers.push(mask);
        }

        let mut lh = LexicHash {
            k,
            seed,
            masks: mask_kmers,
            prefix_len: 0,
            prefix_buckets: Vec::new(),
        };
        lh.index_masks(p.max(1))?;
        Ok(lh)
    }

    /// Rebuilds the prefix lookup table with the given prefix length.
    pub fn index_masks(&mut self, prefix_len: usize) -> io::Result<()> {
        if prefix_len == 0 || prefix_len > self.k.min(MAX_PREFIX_LEN) {
            return Err(invalid_input(format!(
                "invalid mask-index prefix length: {}, valid range: [1, {}]",
                prefix_len,
                self.k.min(MAX_PREFIX_LEN)
            )));
        }
        let shift = 2 * (self.k - prefix_len);
        let mut buckets = vec![Vec::new(); 1 << (2 * prefix_len)];
        for (i, &mask) in self.masks.iter().enumerate() {
            buckets[(mask >> shift) as usize].push(i as u32);
        }
        self.prefix_len = prefix_len;
        self.prefix_buckets = buckets;
        Ok(())
    }

    /// Applies every mask to `seq` and returns, per mask, the captured
    /// k-mer and all its locations (`(pos << 1) | strand`).
    ///
    /// `skip_regions` are closed intervals of the concatenated sequence
    /// (the N-separator junctions) from which no window may be taken;
    /// windows containing non-ACGT bytes are skipped regardless.
    pub fn mask(&self, seq: &[u8], skip_regions: Option<&[(usize, usize)]>) -> (Vec<u64>, Vec<Vec<u64>>) {
        let m = self.masks.len();
        let mut kmers = vec![0u64; m];
        let mut best = vec![u64::MAX; m];
        let mut found = vec![false; m];
        let mut locses: Vec<Vec<u64>> = vec![Vec::new(); m];

        let shift = 2 * (self.k - self.prefix_len);

        // first pass: each window only updates masks sharing its prefix.
        // Any such update beats every non-sharing window, so the result is
        // already exact for masks touched here.
        self.scan_windows(seq, skip_regions, |kmer, loc| {
            let bucket = &self.prefix_buckets[(kmer >> shift) as usize];
            for &mi in bucket {
                let mi = mi as usize;
                let d = kmer ^ self.masks[mi];
                if !found[mi] || d < best[mi] {
                    found[mi] = true;
                    best[mi] = d;
                    kmers[mi] = kmer;
                    locses[mi].clear();
                    locses[mi].push(loc);
                } else if d == best[mi] {
                    locses[mi].push(loc);
                }
            }
        });

        // second pass for masks no window prefix-matched (rare): plain argmin
        let missing: Vec<usize> = (0..m).filter(|&i| !found[i]).collect();
        if !missing.is_empty() {
            self.scan_windows(seq, skip_regions, |kmer, loc| {
                for &mi in &missing {
                    let d = kmer ^ self.masks[mi];
                    if !found[mi] || d < best[mi] {
                        found[mi] = true;
                        best[mi] = d;
                        kmers[mi] = kmer;
                        locses[mi].clear();
                        locses[mi].push(loc);
                    } else if d == best[mi] {
                        locses[mi].push(loc);
                    }
                }
            });
        }

        (kmers, locses)
    }

    /// Query-time masking. Accepts windows matching a mask on a prefix only;
    /// the capture shape is identical to [`LexicHash::mask`].
    pub fn mask_known_prefixes(
        &self,
        seq: &[u8],
        skip_regions: Option<&[(usize, usize)]>,
    ) -> (Vec<u64>, Vec<Vec<u64>>) {
        self.mask(seq, skip_regions)
    }

    /// Invokes `f(kmer, loc)` for the forward and reverse-complement k-mer
    /// of every valid window.
    fn scan_windows<F: FnMut(u64, u64)>(
        &self,
        seq: &[u8],
        skip_regions: Option<&[(usize, usize)]>,
        mut f: F,
    ) {
        let k = self.k;
        if seq.len() < k {
            return;
        }
        let kmer_mask = low_bits(2 * k);
        let rc_shift = 2 * (k - 1);
        let regions = skip_regions.unwrap_or(&[]);
        let mut region_idx = 0usize;

        let mut fwd = 0u64;
        let mut rc = 0u64;
        let mut valid = 0usize;

        for (i, &b) in seq.iter().enumerate() {
            let code = BASE_TO_BITS[b as usize];
            if code > 3 {
                valid = 0;
                continue;
            }
            fwd = ((fwd << 2) | code as u64) & kmer_mask;
            rc = (rc >> 2) | (((3 - code) as u64) << rc_shift);
            valid += 1;
            if valid < k {
                continue;
            }

            let start = i + 1 - k;
            // windows overlapping a junction produce nothing
            while region_idx < regions.len() && regions[region_idx].1 < start {
                region_idx += 1;
            }
            if region_idx < regions.len() && regions[region_idx].0 <= i {
                continue;
            }

            f(fwd, (start as u64) << 1);
            f(rc, ((start as u64) << 1) | 1);
        }
    }

    pub fn write_to_file(&self, path: &Path) -> io::Result<()> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(MASK_FILE_MAGIC)?;
        w.write_all(&[self.k as u8])?;
        w.write_all(&self.seed.to_be_bytes())?;
        w.write_all(&(self.masks.len() as u64).to_be_bytes())?;
        for &mask in &self.masks {
            w.write_all(&mask.to_be_bytes())?;
        }
        w.flush()
    }

    pub fn from_file(path: &Path) -> io::Result<Self> {
        let mut r = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != MASK_FILE_MAGIC {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("not a mask file: {}", path.display()),
            ));
        }
        let mut b1 = [0u8; 1];
        r.read_exact(&mut b1)?;
        let k = b1[0] as usize;
        let mut b8 = [0u8; 8];
        r.read_exact(&mut b8)?;
        let seed = i64::from_be_bytes(b8);
        r.read_exact(&mut b8)?;
        let m = u64::from_be_bytes(b8) as usize;
        if !(3..=32).contains(&k) || m < 4 || m > (1 << 26) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("corrupt mask file: {}", path.display()),
            ));
        }

        let mut masks = Vec::with_capacity(m);
        for _ in 0..m {
            r.read_exact(&mut b8)?;
            masks.push(u64::from_be_bytes(b8));
        }

        let mut p = 0usize;
        while p + 1 <= k.min(MAX_PREFIX_LEN) && (1usize << (2 * (p + 1))) <= m {
            p += 1;
        }
        let mut lh = LexicHash {
            k,
            seed,
            masks,
            prefix_len: 0,
            prefix_buckets: Vec::new(),
        };
        lh.index_masks(p.max(1))?;
        Ok(lh)
    }
}

#[inline]
fn low_bits(n: usize) -> u64 {
    if n >= 64 {
        u64::MAX
    } else {
        (1u64 << n) - 1
    }
}

fn is_homopolymer_prefix(mask: u64, k: usize, prefix: usize) -> bool {
    let first = (mask >> (2 * (k - 1))) & 3;
    for i in 1..prefix {
        if (mask >> (2 * (k - 1 - i))) & 3 != first {
            return false;
        }
    }
    true
}

fn invalid_input(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}
