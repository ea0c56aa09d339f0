//! Searcher driver: masks the query, fans the captured k-mers out over the
//! chunk searchers, clusters the returned locations into per-target anchor
//! sets, chains, aligns, rectifies coordinates across concatenated contigs
//! and ranks the surviving targets.

use crossbeam_channel::{bounded, Receiver, Sender};
use rayon::prelude::*;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::genome;
use crate::kv;
use crate::lexichash::LexicHash;
use crate::util::{coverage_len, reverse_complement, Pool};

use super::chaining::{Chainer, ChainingOptions};
use super::chaining2::{Chain2Result, Chainer2};
use super::seq_compare::{SeqComparator, SeqComparatorOptions, SeqComparatorResult};
use super::{
    batch_dir, read_index_info, IndexInfo, DIR_GENOMES, DIR_SEEDS, EXT_SEEDS, FILE_GENOMES,
    FILE_INFO, FILE_MASKS, MAIN_VERSION,
};

#[derive(Debug, Clone)]
pub struct IndexSearchingOptions {
    pub num_cpus: usize,
    pub max_open_files: usize,

    /// Load the whole seed data into memory instead of seeking on disk.
    pub in_memory_search: bool,
    /// Minimum shared prefix between a query and a stored k-mer.
    pub min_prefix: u8,
    /// Maximum mismatch of a matched k-mer; negative disables the check.
    pub max_mismatch: i32,
    /// Minimum prefix length for a target supported by a single seed.
    pub min_single_prefix: u8,
    /// Keep only this many best-scoring targets before alignment.
    pub top_n: usize,

    pub max_gap: f64,
    pub max_distance: f64,

    /// Flanking bases added around a chain before sequence comparison.
    pub extend_length: usize,
    pub min_query_aligned_fraction_in_a_genome: f64,

    /// Attach the matched target subsequence to each result.
    pub output_seq: bool,
}

impl Default for IndexSearchingOptions {
    fn default() -> Self {
        IndexSearchingOptions {
            num_cpus: num_cpus::get(),
            max_open_files: 512,
            in_memory_search: false,
            min_prefix: 15,
            max_mismatch: -1,
            min_single_prefix: 20,
            top_n: 500,
            max_gap: 5000.0,
            max_distance: 10000.0,
            extend_length: 2000,
            min_query_aligned_fraction_in_a_genome: 70.0,
            output_seq: false,
        }
    }
}

pub fn check_index_searching_options(opt: &IndexSearchingOptions) -> io::Result<()> {
    if opt.num_cpus < 1 {
        return Err(invalid(format!(
            "invalid number of CPUs: {}, should be >= 1",
            opt.num_cpus
        )));
    }
    if opt.max_open_files < 2 {
        return Err(invalid(format!(
            "invalid max open files: {}, should be >= 2",
            opt.max_open_files
        )));
    }
    if opt.min_prefix < 3 || opt.min_prefix > 32 {
        return Err(invalid(format!(
            "invalid min-prefix: {}, valid range: [3, 32]",
            opt.min_prefix
        )));
    }
    Ok(())
}

/// A matched substring between the query and one target; also called an
/// anchor. Both sides span the same mask-selected prefix, so the target
/// length equals the query length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubstrPair {
    /// Start position in the query (0-based).
    pub q_begin: i32,
    /// Start position in the target (0-based).
    pub t_begin: i32,
    /// Prefix length of the match.
    pub len: u8,
    pub mismatch: u8,
    /// The query k-mer came from the negative strand.
    pub q_rc: bool,
    /// The target k-mer came from the negative strand.
    pub t_rc: bool,
}

/// Removes duplicated and nested anchors. `k` is the largest k-mer size;
/// the look-back window during the scan is bounded by it.
pub fn clear_substr_pairs(subs: &mut Vec<SubstrPair>, k: i32) {
    if subs.len() < 2 {
        return;
    }
    // ascending by start, descending by end, then by target start
    subs.sort_unstable_by(|a, b| {
        a.q_begin
            .cmp(&b.q_begin)
            .then_with(|| (b.q_begin + b.len as i32).cmp(&(a.q_begin + a.len as i32)))
            .then_with(|| a.t_begin.cmp(&b.t_begin))
    });

    let mut markers = vec![false; subs.len()];
    for i in 1..subs.len() {
        let v = &subs[i];
        let v_q_end = v.q_begin + v.len as i32;
        let v_t_end = v.t_begin + v.len as i32;
        let upbound = v_q_end - k;
        let mut j = i;
        while j > 0 {
            j -= 1;
            let p = &subs[j];
            if p.q_begin < upbound {
                break;
            }
            // same or nested region on both sequences
            if v_q_end <= p.q_begin + p.len as i32
                && v.t_begin >= p.t_begin
                && v_t_end <= p.t_begin + p.len as i32
            {
                markers[i] = true;
                break;
            }
        }
    }

    let mut w = 0usize;
    for i in 0..subs.len() {
        if !markers[i] {
            subs.swap(w, i);
            w += 1;
        }
    }
    subs.truncate(w);
}

/// One HSP (or HSP fragment group) on one contig of a target genome.
#[derive(Debug)]
pub struct SimilarityDetail {
    /// The alignment is on the reverse strand.
    pub rc: bool,
    pub similarity_score: f64,
    pub similarity: SeqComparatorResult,
    /// Number of seed anchors in the chain this HSP came from.
    pub n_seeds: usize,

    pub seq_id: Vec<u8>,
    pub seq_len: usize,
}

/// A target genome matching the query.
#[derive(Debug)]
pub struct SearchResult {
    pub genome_batch: usize,
    pub genome_index: usize,
    pub id: Vec<u8>,
    pub genome_size: usize,

    /// Pre-chaining score (sum of squared anchor lengths).
    pub score: f64,
    /// Query coverage per genome, percent.
    pub aligned_fraction: f64,

    /// Per-(HSP, contig) alignment details, best first.
    pub similarity_details: Vec<SimilarityDetail>,
}

struct Candidate {
    key: u64,
    subs: Vec<SubstrPair>,
    score: f64,
}

/// An opened index ready to answer queries.
pub struct Index {
    opt: IndexSearchingOptions,
    pub info: IndexInfo,

    lh: LexicHash,
    k: usize,
    contig_interval: usize,

    searchers: Vec<Mutex<kv::Searcher>>,
    mem_searchers: Vec<Mutex<kv::InMemSearcher>>,

    chaining_options: ChainingOptions,

    chainer_pool: Pool<Chainer>,
    chainer2_pool: Pool<Chainer2>,
    comparator_pool: Pool<SeqComparator>,

    // bounded channels double as counting semaphores over pooled readers
    genome_rdr_pools: Vec<(Sender<genome::Reader>, Receiver<genome::Reader>)>,
}

impl std::fmt::Debug for Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index").field("info", &self.info).finish_non_exhaustive()
    }
}

impl Index {
    /// Opens an index directory for searching.
    pub fn open(dir: &Path, opt: IndexSearchingOptions) -> io::Result<Self> {
        check_index_searching_options(&opt)?;
        if !dir.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("index path not found: {}", dir.display()),
            ));
        }

        let info = read_index_info(&dir.join(FILE_INFO))?;
        if info.main_version != MAIN_VERSION {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!(
                    "index main versions do not match: {} (index) != {} (tool), please re-create the index",
                    info.main_version, MAIN_VERSION
                ),
            ));
        }
        if opt.max_open_files < info.chunks + 2 {
            return Err(invalid(format!(
                "max open files ({}) should not be < chunks ({}) + 2",
                opt.max_open_files, info.chunks
            )));
        }

        log::debug!("reading masks...");
        let lh = LexicHash::from_file(&dir.join(FILE_MASKS))?;
        if lh.k as u8 != info.max_k || lh.masks.len() != info.masks || lh.seed != info.rand_seed {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "mask file does not match the info file (K, masks, seed)",
            ));
        }
        let k = lh.k;
        if opt.min_prefix as usize > k {
            return Err(invalid(format!(
                "min-prefix ({}) should not be > k ({})",
                opt.min_prefix, k
            )));
        }

        // seed chunk files
        let dir_seeds = dir.join(DIR_SEEDS);
        let mut seed_files: Vec<PathBuf> = fs::read_dir(&dir_seeds)
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("seeds directory not found in: {}", dir.display()),
                )
            })?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some(EXT_SEEDS))
            .collect();
        seed_files.sort();
        if seed_files.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("seeds files not found in: {}", dir_seeds.display()),
            ));
        }
        if opt.max_open_files < seed_files.len() {
            return Err(invalid(format!(
                "max open files ({}) should be > number of seed files ({})",
                opt.max_open_files,
                seed_files.len()
            )));
        }

        log::debug!("opening {} seed chunk searchers...", seed_files.len());
        let mut searchers = Vec::new();
        let mut mem_searchers = Vec::new();
        let check_range = |chunk_index: usize, chunk_size: usize| -> io::Result<()> {
            if chunk_index + chunk_size > lh.masks.len() {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "seed chunk covers masks [{}, {}) but the index has only {}",
                        chunk_index,
                        chunk_index + chunk_size,
                        lh.masks.len()
                    ),
                ));
            }
            Ok(())
        };
        if opt.in_memory_search {
            let opened: io::Result<Vec<_>> = seed_files
                .par_iter()
                .map(|f| kv::InMemSearcher::open(f))
                .collect();
            let opened = opened?;
            for scr in &opened {
                check_range(scr.chunk_index, scr.chunk_size)?;
            }
            mem_searchers = opened.into_iter().map(Mutex::new).collect();
        } else {
            let opened: io::Result<Vec<_>> =
                seed_files.par_iter().map(|f| kv::Searcher::open(f)).collect();
            let opened = opened?;
            for scr in &opened {
                check_range(scr.chunk_index, scr.chunk_size)?;
            }
            searchers = opened.into_iter().map(Mutex::new).collect();
        }

        // genome reader pools, one bounded channel per batch
        let mut n_readers = (opt.max_open_files - seed_files.len()) / info.genome_batches.max(1);
        if n_readers >= 2 {
            n_readers = (n_readers / 2).min(opt.num_cpus);
        } else {
            n_readers = 1;
        }
        log::debug!(
            "creating genome reader pools, each batch with {} readers...",
            n_readers
        );
        let mut genome_rdr_pools = Vec::with_capacity(info.genome_batches);
        for batch in 0..info.genome_batches {
            let file = dir
                .join(DIR_GENOMES)
                .join(batch_dir(batch))
                .join(FILE_GENOMES);
            let (tx, rx) = bounded(n_readers);
            for _ in 0..n_readers {
                let rdr = genome::Reader::open(&file)?;
                tx.send(rdr).expect("reader pool capacity");
            }
            genome_rdr_pools.push((tx, rx));
        }

        let chaining_options = ChainingOptions {
            max_gap: opt.max_gap,
            max_distance: opt.max_distance,
            min_score: opt.min_single_prefix as f64,
        };
        let seq_cmp_options = SeqComparatorOptions::default();

        let co = chaining_options;
        let c2o = seq_cmp_options.chaining;
        Ok(Index {
            opt,
            contig_interval: info.contig_interval,
            info,
            lh,
            k,
            searchers,
            mem_searchers,
            chaining_options,
            chainer_pool: Pool::new(move || Chainer::new(co)),
            chainer2_pool: Pool::new(move || Chainer2::new(c2o)),
            comparator_pool: Pool::new(move || SeqComparator::new(seq_cmp_options)),
            genome_rdr_pools,
        })
    }

    /// Searches the index with a query sequence and returns ranked matches.
    pub fn search(&self, s: &[u8]) -> io::Result<Vec<SearchResult>> {
        // 1) mask the query
        let (kmers, locses) = self.lh.mask_known_prefixes(s, None);

        // 2) per-chunk prefix-range lookups, one searcher at a time per chunk
        let min_prefix = self.opt.min_prefix;
        let max_mismatch = self.opt.max_mismatch;
        let seed_results: Vec<Vec<kv::SearchResult>> = if self.opt.in_memory_search {
            self.mem_searchers
                .par_iter()
                .map(|m| {
                    let mut scr = m.lock().unwrap();
                    let begin = scr.chunk_index;
                    let end = begin + scr.chunk_size;
                    scr.search(&kmers[begin..end], min_prefix, max_mismatch)
                })
                .collect::<io::Result<Vec<_>>>()?
        } else {
            self.searchers
                .par_iter()
                .map(|m| {
                    let mut scr = m.lock().unwrap();
                    let begin = scr.chunk_index;
                    let end = begin + scr.chunk_size;
                    scr.search(&kmers[begin..end], min_prefix, max_mismatch)
                })
                .collect::<io::Result<Vec<_>>>()?
        };

        // 3) anchors per (batch, ref)
        let k = self.k as i32;
        let mut anchors: HashMap<u64, Vec<SubstrPair>> = HashMap::new();
        for srs in &seed_results {
            for sr in srs {
                let k_prefix = sr.len_prefix as i32;
                for &loc_q in &locses[sr.i_query] {
                    let rc_q = loc_q & 1 > 0;
                    let pos_q = (loc_q >> 1) as i32;
                    // a reverse-strand prefix match pins to the window end
                    let begin_q = if rc_q { pos_q + k - k_prefix } else { pos_q };

                    for &refpos in &sr.values {
                        let key = refpos >> 30;
                        let pos_t = ((refpos << 34) >> 35) as i32;
                        let rc_t = refpos & 1 > 0;
                        let begin_t = if rc_t { pos_t + k - k_prefix } else { pos_t };

                        anchors.entry(key).or_default().push(SubstrPair {
                            q_begin: begin_q,
                            t_begin: begin_t,
                            len: k_prefix as u8,
                            mismatch: sr.mismatch,
                            q_rc: rc_q,
                            t_rc: rc_t,
                        });
                    }
                }
            }
        }
        if anchors.is_empty() {
            return Ok(Vec::new());
        }

        // 4-5) clean anchors, prefilter single-seed targets, score
        let check_mismatch =
            max_mismatch >= 0 && max_mismatch < k - min_prefix as i32;
        let mut candidates: Vec<Candidate> = Vec::with_capacity(anchors.len());
        for (key, mut subs) in anchors {
            clear_substr_pairs(&mut subs, k);

            if subs.len() == 1 {
                // a lone short seed rarely supports an alignment; give it a
                // chance when its mismatch is low
                if check_mismatch {
                    if subs[0].mismatch as i32 > max_mismatch {
                        continue;
                    }
                } else if subs[0].len < self.opt.min_single_prefix {
                    continue;
                }
            }

            let score = subs.iter().map(|p| (p.len as f64) * (p.len as f64)).sum();
            candidates.push(Candidate { key, subs, score });
        }

        // 6) keep the top N targets
        candidates.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if self.opt.top_n > 0 && candidates.len() > self.opt.top_n {
            candidates.truncate(self.opt.top_n);
        }

        // 7-8) chain, align and filter each target in parallel
        let mut cpr = self.comparator_pool.get();
        cpr.index(s);
        let results: io::Result<Vec<Option<SearchResult>>> = candidates
            .into_par_iter()
            .map(|cand| self.process_target(cand, s, &cpr))
            .collect();
        self.comparator_pool.put(cpr);
        let mut results: Vec<SearchResult> = results?.into_iter().flatten().collect();

        // 9) rank targets by their best fragment
        results.sort_by(|a, b| {
            let sa = a.similarity_details[0].similarity_score;
            let sb = b.similarity_details[0].similarity_score;
            sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
        });
        Ok(results)
    }

    fn process_target(
        &self,
        cand: Candidate,
        query: &[u8],
        cpr: &SeqComparator,
    ) -> io::Result<Option<SearchResult>> {
        let mut chainer = self.chainer_pool.get();
        let (chains, score) = chainer.chain(&cand.subs);
        self.chainer_pool.put(chainer);

        if chains.is_empty() || score < self.chaining_options.min_score {
            return Ok(None);
        }

        let batch = (cand.key >> 17) as usize;
        let ref_idx = (cand.key & 131071) as usize;
        let (tx, rx) = &self.genome_rdr_pools[batch];
        let mut rdr = rx.recv().map_err(|_| broken_pool())?;

        let result = self.align_target(&cand, batch, ref_idx, query, cpr, &chains, &mut rdr);

        // the reader goes back on every exit path
        tx.send(rdr).map_err(|_| broken_pool())?;
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn align_target(
        &self,
        cand: &Candidate,
        batch: usize,
        ref_idx: usize,
        query: &[u8],
        cpr: &SeqComparator,
        chains: &[Vec<usize>],
        rdr: &mut genome::Reader,
    ) -> io::Result<Option<SearchResult>> {
        let k = self.k as i32;
        let q_len = query.len();
        let ext = self.opt.extend_length as i32;
        let contig_interval = self.contig_interval as i32;

        let mut id: Vec<u8> = Vec::new();
        let mut genome_size = 0usize;
        let mut sds: Vec<SimilarityDetail> = Vec::new();
        // bounding boxes of accepted fragments, for duplicate removal
        let mut seen_bounds: Vec<(i32, i32, i32, i32)> = Vec::new();

        for chain in chains {
            let first = &cand.subs[chain[0]];
            let last = &cand.subs[*chain.last().expect("non-empty chain")];
            let qb = first.q_begin;
            let tb = first.t_begin;
            let qe = last.q_begin + last.len as i32 - 1;
            let te = last.t_begin + last.len as i32 - 1;

            // strand: a lone seed tells it directly, otherwise the target
            // direction does
            let rc = if chain.len() == 1 {
                first.q_rc != first.t_rc
            } else {
                tb > last.t_begin
            };

            // extension region on the target
            let (t_begin_ext, mut t_end_ext) = if rc {
                ((last.t_begin - ext).max(0), tb + last.len as i32 - 1 + ext)
            } else {
                ((tb - ext).max(0), te + ext)
            };
            // and on the query
            let q_begin_ext = qb - qb.min(ext);
            let q_end_ext = qe + (q_len as i32 - 1 - qe).min(ext);

            let mut t_genome = rdr.sub_seq(ref_idx, t_begin_ext as usize, t_end_ext as usize)?;
            if (t_genome.seq.len() as i32) < t_end_ext - t_begin_ext + 1 {
                t_end_ext = t_begin_ext + t_genome.seq.len() as i32 - 1;
            }
            if rc {
                reverse_complement(&mut t_genome.seq);
            }

            let mut chainer2 = self.chainer2_pool.get();
            let cr = cpr.compare(
                q_begin_ext as u32,
                q_end_ext as u32,
                &t_genome.seq,
                q_len,
                &mut chainer2,
            );
            self.chainer2_pool.put(chainer2);
            let Some(cr) = cr else { continue };

            if id.is_empty() {
                id.extend_from_slice(&t_genome.id);
                genome_size = t_genome.genome_size;
            }

            // rectify each fragment into contig-local coordinates: a
            // fragment whose matched span crosses a junction is clipped
            // into one piece per contig; consecutive pieces on the same
            // contig are grouped into one similarity detail
            let t_seq_len = t_genome.seq.len() as i32;
            let mut group: Vec<Chain2Result> = Vec::new();
            let mut group_seq = -1isize; // contig of the open group
            let mut group_off = 0i32;

            for c in cr.chains {
                for (i_seq, off_begin, piece) in split_fragment_into_contigs(
                    &c,
                    rc,
                    t_begin_ext,
                    t_seq_len,
                    &t_genome.seq_sizes,
                    contig_interval,
                    k,
                ) {
                    // drop exact duplicates of an already accepted fragment
                    let bbox = (piece.q_begin, piece.q_end, piece.t_begin, piece.t_end);
                    if seen_bounds.contains(&bbox) {
                        continue;
                    }
                    seen_bounds.push(bbox);

                    if group_seq >= 0 && group_seq != i_seq as isize {
                        // piece fell on a different contig: flush the group
                        self.flush_group(
                            &mut sds,
                            std::mem::take(&mut group),
                            &t_genome,
                            group_seq as usize,
                            group_off,
                            t_begin_ext,
                            t_end_ext,
                            rc,
                            chain.len(),
                            cr.query_len,
                        );
                    }
                    group_seq = i_seq as isize;
                    group_off = off_begin;
                    group.push(piece);
                }
            }

            if group_seq >= 0 && !group.is_empty() {
                self.flush_group(
                    &mut sds,
                    group,
                    &t_genome,
                    group_seq as usize,
                    group_off,
                    t_begin_ext,
                    t_end_ext,
                    rc,
                    chain.len(),
                    cr.query_len,
                );
            }
        }

        if sds.is_empty() {
            return Ok(None);
        }

        // aligned fraction: union of query intervals over all fragments
        let mut regions: Vec<(i32, i32)> = Vec::new();
        for sd in &sds {
            for c in &sd.similarity.chains {
                regions.push((c.q_begin, c.q_end));
            }
        }
        let aligned_bases_genome = coverage_len(&mut regions);
        let mut aligned_fraction = aligned_bases_genome as f64 / q_len as f64 * 100.0;
        if aligned_fraction > 100.0 {
            aligned_fraction = 100.0;
        }
        if aligned_fraction < self.opt.min_query_aligned_fraction_in_a_genome {
            return Ok(None);
        }

        sds.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(Some(SearchResult {
            genome_batch: batch,
            genome_index: ref_idx,
            id,
            genome_size,
            score: cand.score,
            aligned_fraction,
            similarity_details: sds,
        }))
    }

    /// Turns one per-contig fragment group into a similarity detail.
    #[allow(clippy::too_many_arguments)]
    fn flush_group(
        &self,
        sds: &mut Vec<SimilarityDetail>,
        group: Vec<Chain2Result>,
        t_genome: &genome::Genome,
        i_seq: usize,
        off_begin: i32,
        t_begin_ext: i32,
        t_end_ext: i32,
        rc: bool,
        n_seeds: usize,
        query_len: usize,
    ) {
        if group.is_empty() {
            return;
        }
        let mut similarity = SeqComparatorResult::default();
        similarity.update(group, query_len);

        if self.opt.output_seq {
            let t_seq = &t_genome.seq;
            let (begin, end) = if rc {
                (
                    t_end_ext - similarity.t_end - off_begin,
                    t_end_ext - similarity.t_begin - off_begin + 1,
                )
            } else {
                (
                    off_begin + similarity.t_begin - t_begin_ext,
                    off_begin + similarity.t_end - t_begin_ext + 1,
                )
            };
            let begin = begin.clamp(0, t_seq.len() as i32) as usize;
            let end = end.clamp(begin as i32, t_seq.len() as i32) as usize;
            similarity.t_seq = Some(t_seq[begin..end].to_vec());
        }

        let similarity_score =
            similarity.aligned_bases as f64 * similarity.chains[0].pident;
        sds.push(SimilarityDetail {
            rc,
            similarity_score,
            similarity,
            n_seeds,
            seq_id: t_genome.seq_ids[i_seq].clone(),
            seq_len: t_genome.seq_sizes[i_seq],
        });
    }
}

/// Maps one HSP fragment from extension-local coordinates onto contigs.
///
/// The fragment's forward-strand range on the concatenated sequence is
/// probed against the contig prefix sums; the probe shrinks by `k` on both
/// sides because separator bases decode as 'A' and a fragment's flanks may
/// reach into them. A range spanning a junction yields one clipped piece
/// per overlapped contig, with the query interval and the identity
/// statistics adjusted by the same deltas. Returns
/// `(contig index, contig start offset, piece)` tuples in contig order.
fn split_fragment_into_contigs(
    c: &Chain2Result,
    rc: bool,
    t_begin_ext: i32,
    t_seq_len: i32,
    seq_sizes: &[usize],
    contig_interval: i32,
    k: i32,
) -> Vec<(usize, i32, Chain2Result)> {
    // forward-strand coordinates on the concatenated sequence
    let (g_begin, g_end) = if rc {
        (
            t_begin_ext + (t_seq_len - c.t_end - 1),
            t_begin_ext + (t_seq_len - c.t_begin - 1),
        )
    } else {
        (t_begin_ext + c.t_begin, t_begin_ext + c.t_end)
    };
    let (probe_begin, probe_end) = if g_begin + k <= g_end - k {
        (g_begin + k, g_end - k)
    } else {
        // fragment shorter than 2k: attribute by its midpoint
        let mid = (g_begin + g_end) / 2;
        (mid, mid)
    };

    let mut pieces = Vec::new();
    let mut off_begin = 0i32;
    for (j, &l) in seq_sizes.iter().enumerate() {
        let off_end = off_begin + l as i32 - 1;
        if probe_begin <= off_end && probe_end >= off_begin {
            let clip_begin = g_begin.max(off_begin);
            let clip_end = g_end.min(off_end);
            if clip_begin <= clip_end {
                let mut piece = c.clone();
                // the query moves against the target on the reverse strand
                if rc {
                    piece.q_begin = c.q_begin + (g_end - clip_end);
                    piece.q_end = c.q_end - (clip_begin - g_begin);
                } else {
                    piece.q_begin = c.q_begin + (clip_begin - g_begin);
                    piece.q_end = c.q_end - (g_end - clip_end);
                }
                piece.t_begin = clip_begin - off_begin;
                piece.t_end = clip_end - off_begin;

                let aligned = piece.q_end - piece.q_begin + 1;
                if aligned > 0 {
                    piece.aligned_bases = aligned;
                    piece.aligned_bases_q = aligned;
                    piece.matched_bases = c.matched_bases.min(aligned);
                    piece.pident = piece.matched_bases as f64 / aligned as f64 * 100.0;
                    pieces.push((j, off_begin, piece));
                }
            }
        }
        off_begin = off_end + contig_interval + 1;
    }
    pieces
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}

fn broken_pool() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "genome reader pool closed")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(q: i32, t: i32, len: u8) -> SubstrPair {
        SubstrPair {
            q_begin: q,
            t_begin: t,
            len,
            mismatch: 0,
            q_rc: false,
            t_rc: false,
        }
    }

    #[test]
    fn nested_and_duplicate_anchors_are_removed() {
        let mut subs = vec![
            pair(10, 100, 21), // keeper
            pair(10, 100, 21), // duplicate
            pair(12, 102, 15), // nested in both coordinates
            pair(12, 400, 15), // same query span, different target: kept
            pair(40, 130, 21), // disjoint: kept
        ];
        clear_substr_pairs(&mut subs, 21);
        assert_eq!(
            subs,
            vec![pair(10, 100, 21), pair(12, 400, 15), pair(40, 130, 21)]
        );
    }

    #[test]
    fn short_anchor_list_is_untouched() {
        let mut subs = vec![pair(5, 50, 21)];
        clear_substr_pairs(&mut subs, 21);
        assert_eq!(subs.len(), 1);
    }

    #[test]
    fn sorting_is_by_start_then_longest_first() {
        let mut subs = vec![pair(10, 300, 15), pair(10, 100, 21), pair(5, 100, 15)];
        clear_substr_pairs(&mut subs, 21);
        assert_eq!(subs[0], pair(5, 100, 15));
        assert_eq!(subs[1], pair(10, 100, 21));
    }

    fn fragment(q_begin: i32, q_end: i32, t_begin: i32, t_end: i32) -> Chain2Result {
        let aligned = q_end - q_begin + 1;
        Chain2Result {
            chain: Vec::new(),
            matched_bases: aligned,
            aligned_bases: aligned,
            aligned_bases_q: aligned,
            q_begin,
            q_end,
            t_begin,
            t_end,
            pident: 100.0,
        }
    }

    #[test]
    fn fragment_inside_one_contig_is_clipped_only() {
        // two contigs of 1000 with a 20-base separator; the fragment sits
        // fully inside the first
        let sizes = vec![1000usize, 1000];
        let c = fragment(10, 209, 300, 499); // extension starts at 100
        let pieces = split_fragment_into_contigs(&c, false, 100, 2000, &sizes, 20, 21);
        assert_eq!(pieces.len(), 1);
        let (i_seq, off, p) = &pieces[0];
        assert_eq!((*i_seq, *off), (0, 0));
        assert_eq!((p.t_begin, p.t_end), (400, 599));
        assert_eq!((p.q_begin, p.q_end), (10, 209));
        assert_eq!(p.matched_bases, 200);
    }

    #[test]
    fn junction_crossing_fragment_is_split_per_contig() {
        let sizes = vec![1000usize, 1000];
        // global target range [800, 1219]: 200 bases in contig 0,
        // the 20-base separator, then 200 bases in contig 1 (starts at 1020)
        let c = fragment(0, 419, 800, 1219);
        let pieces = split_fragment_into_contigs(&c, false, 0, 3000, &sizes, 20, 21);
        assert_eq!(pieces.len(), 2);

        let (i0, off0, p0) = &pieces[0];
        assert_eq!((*i0, *off0), (0, 0));
        assert_eq!((p0.t_begin, p0.t_end), (800, 999));
        assert_eq!((p0.q_begin, p0.q_end), (0, 199));
        assert!(p0.matched_bases <= p0.aligned_bases_q);

        let (i1, off1, p1) = &pieces[1];
        assert_eq!((*i1, *off1), (1, 1020));
        assert_eq!((p1.t_begin, p1.t_end), (0, 199));
        assert_eq!((p1.q_begin, p1.q_end), (220, 419));
    }

    #[test]
    fn reverse_strand_split_mirrors_the_query_adjustment() {
        let sizes = vec![1000usize, 1000];
        // extension covers [0, 2019] and was reverse complemented, so
        // local position x maps to global 2019 - x; the fragment's local
        // [800, 1219] is global [800, 1219] reversed
        let c = fragment(0, 419, 800, 1219);
        let pieces = split_fragment_into_contigs(&c, true, 0, 2020, &sizes, 20, 21);
        assert_eq!(pieces.len(), 2);
        // contig 0 holds the global low end, which is the query's far end
        let (i0, _, p0) = &pieces[0];
        assert_eq!(*i0, 0);
        assert_eq!((p0.t_begin, p0.t_end), (800, 999));
        assert_eq!((p0.q_begin, p0.q_end), (220, 419));
        let (i1, _, p1) = &pieces[1];
        assert_eq!(*i1, 1);
        assert_eq!((p1.t_begin, p1.t_end), (0, 199));
        assert_eq!((p1.q_begin, p1.q_end), (0, 199));
    }

    #[test]
    fn short_fragment_in_a_separator_is_dropped() {
        let sizes = vec![1000usize, 1000];
        // a 30-base fragment whose midpoint falls inside the separator
        let c = fragment(0, 29, 1005, 1034);
        let pieces = split_fragment_into_contigs(&c, false, 0, 3000, &sizes, 40, 21);
        assert!(pieces.is_empty());
    }

    #[test]
    fn default_options_are_sane() {
        let opt = IndexSearchingOptions::default();
        assert!(check_index_searching_options(&opt).is_ok());
        let bad = IndexSearchingOptions {
            min_prefix: 2,
            ..IndexSearchingOptions::default()
        };
        assert!(check_index_searching_options(&bad).is_err());
    }
}
