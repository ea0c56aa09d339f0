//! Index building: batched genome ingestion, masking, accumulation and
//! seed-store writing.
//!
//! The fabric mirrors the pipeline: up to `num_cpus` ingester threads parse
//! and mask genome files, a single collector assigns monotonic reference
//! indices and shards the captured k-mers into the per-mask accumulator
//! (parallel over disjoint mask ranges), and a single writer task streams
//! packed genomes to disk. Bounded channels double as the semaphores
//! limiting concurrency.

use bio::io::fasta;
use crossbeam_channel::bounded;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;

use crate::genome::{self, seq_to_two_bit, Genome};
use crate::kv;
use crate::lexichash::LexicHash;
use crate::util::open_seq_file;

use super::{
    batch_dir, chunk_file, write_index_info, IndexInfo, DIR_GENOMES, DIR_SEEDS, FILE_GENOMES,
    FILE_INFO, FILE_MASKS, MAIN_VERSION, MINOR_VERSION,
};

/// Hard cap of the 17-bit batch/reference fields in location encoding.
pub const MAX_GENOME_BATCH_SIZE: usize = 1 << 17;

#[derive(Debug, Clone)]
pub struct IndexBuildingOptions {
    pub num_cpus: usize,
    pub max_open_files: usize,
    /// Overwrite an existing output directory.
    pub force: bool,

    // LexicHash
    pub k: usize,
    pub masks: usize,
    pub rand_seed: i64,
    /// Prefix length for the low-complexity mask check; 0 disables it.
    pub prefix_for_check_lc: usize,

    // seed store
    /// Number of seed chunk files.
    pub chunks: usize,
    /// Anchor partitions per mask in the seed store.
    pub partitions: usize,

    pub genome_batch_size: usize,

    /// Extracts the reference name from a file name (first capture group).
    pub re_ref_name: Option<Regex>,
    /// Contigs whose names match any of these are skipped.
    pub re_seq_exclude: Vec<Regex>,
}

impl Default for IndexBuildingOptions {
    fn default() -> Self {
        let cpus = num_cpus::get();
        IndexBuildingOptions {
            num_cpus: cpus,
            max_open_files: 512,
            force: false,
            k: 31,
            masks: 4096,
            rand_seed: 1,
            prefix_for_check_lc: 0,
            chunks: cpus.clamp(1, 512),
            partitions: 512,
            genome_batch_size: MAX_GENOME_BATCH_SIZE,
            re_ref_name: None,
            re_seq_exclude: Vec::new(),
        }
    }
}

pub fn check_index_building_options(opt: &IndexBuildingOptions) -> io::Result<()> {
    if !(3..=32).contains(&opt.k) {
        return Err(invalid(format!(
            "invalid k value: {}, valid range: [3, 32]",
            opt.k
        )));
    }
    if opt.masks < 4 {
        return Err(invalid(format!(
            "invalid number of masks: {}, should be >= 4",
            opt.masks
        )));
    }
    if opt.prefix_for_check_lc > opt.k {
        return Err(invalid(format!(
            "invalid prefix for low-complexity check: {}, valid range: [0, {}], 0 for no checking",
            opt.prefix_for_check_lc, opt.k
        )));
    }
    if opt.chunks < 1 || opt.chunks > 512 {
        return Err(invalid(format!(
            "invalid chunks: {}, valid range: [1, 512]",
            opt.chunks
        )));
    }
    if opt.partitions < 1 {
        return Err(invalid(format!(
            "invalid number of partitions: {}, should be >= 1",
            opt.partitions
        )));
    }
    if opt.genome_batch_size < 1 || opt.genome_batch_size > MAX_GENOME_BATCH_SIZE {
        return Err(invalid(format!(
            "invalid genome batch size: {}, valid range: [1, {}]",
            opt.genome_batch_size, MAX_GENOME_BATCH_SIZE
        )));
    }
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
    Ok(())
}

/// Builds an index over the given genome files.
pub fn build_index(outdir: &Path, infiles: &[PathBuf], opt: &IndexBuildingOptions) -> io::Result<()> {
    check_index_building_options(opt)?;
    if infiles.is_empty() {
        return Err(invalid("no input genome files".into()));
    }

    let n_batches = (infiles.len() + opt.genome_batch_size - 1) / opt.genome_batch_size;
    if n_batches > 1 {
        // merging batch sub-indexes is not supported
        return Err(invalid(format!(
            "{} input files with genome-batch-size {} would need {} batches; \
             merging is not supported, increase genome-batch-size",
            infiles.len(),
            opt.genome_batch_size,
            n_batches
        )));
    }

    if outdir.exists() {
        if opt.force {
            fs::remove_dir_all(outdir)?;
        } else if fs::read_dir(outdir)?.next().is_some() {
            return Err(invalid(format!(
                "output directory not empty: {}, use --force to overwrite",
                outdir.display()
            )));
        }
    }
    fs::create_dir_all(outdir)?;

    let lh = LexicHash::new(opt.k, opt.masks, opt.rand_seed, opt.prefix_for_check_lc)?;

    build_one_batch(&lh, opt, outdir, infiles, 0)
}

fn build_one_batch(
    lh: &LexicHash,
    opt: &IndexBuildingOptions,
    outdir: &Path,
    files: &[PathBuf],
    batch: usize,
) -> io::Result<()> {
    log::info!(
        "building index for batch {} with {} files...",
        batch,
        files.len()
    );

    lh.write_to_file(&outdir.join(FILE_MASKS))?;

    let dir_genomes = outdir.join(DIR_GENOMES).join(batch_dir(batch));
    fs::create_dir_all(&dir_genomes)?;
    let dir_seeds = outdir.join(DIR_SEEDS);
    fs::create_dir_all(&dir_seeds)?;

    let k = lh.k;
    let n_masks = lh.masks.len();
    let n_cpus = opt.num_cpus;

    // per-mask accumulator: k-mer -> packed locations
    let mut datas: Vec<HashMap<u64, Vec<u64>>> = (0..n_masks).map(|_| HashMap::new()).collect();
    let n_genomes;

    {
        let datas = &mut datas;
        n_genomes = thread::scope(|s| -> io::Result<usize> {
            let (tx_rec, rx_rec) = bounded::<Genome>(n_cpus);
            let (tx_wr, rx_wr) = bounded::<Genome>(n_cpus);

            // single writer: packed genomes go to disk in arrival order
            let file_genomes = dir_genomes.join(FILE_GENOMES);
            let writer = s.spawn(move || -> io::Result<usize> {
                let mut gw = genome::Writer::create(&file_genomes, batch as u32)?;
                for g in rx_wr {
                    gw.write(&g)?;
                }
                let n = gw.written();
                gw.finish()?;
                Ok(n)
            });

            // single collector: assigns reference indices in arrival order
            // and shards k-mers into the accumulator, parallel over
            // disjoint mask ranges
            let collector = s.spawn(move || {
                let mask_chunk = (n_masks + n_cpus - 1) / n_cpus;
                let mut ref_idx: u64 = 0;
                for mut g in rx_rec {
                    let kmers = g.kmers.take();
                    let locses = g.locses.take();
                    if tx_wr.send(g).is_err() {
                        break; // writer failed; its error surfaces on join
                    }
                    let (Some(kmers), Some(locses)) = (kmers, locses) else {
                        ref_idx += 1;
                        continue;
                    };

                    let value_high = (batch as u64) << 47 | ((ref_idx & 131071) << 30);
                    datas
                        .par_chunks_mut(mask_chunk)
                        .enumerate()
                        .for_each(|(ci, maps)| {
                            let begin = ci * mask_chunk;
                            for (i, map) in maps.iter_mut().enumerate() {
                                let locs = &locses[begin + i];
                                if locs.is_empty() {
                                    continue;
                                }
                                let values = map.entry(kmers[begin + i]).or_default();
                                for &loc in locs {
                                    // the location already carries the
                                    // strand in bit 0
                                    values.push(value_high | (loc & 1073741823));
                                }
                            }
                        });
                    ref_idx += 1;
                }
            });

            // ingesters, bounded by a token channel
            let (token_tx, token_rx) = bounded::<()>(n_cpus);
            for file in files {
                token_tx.send(()).expect("token channel");
                let tx = tx_rec.clone();
                let token_rx = token_rx.clone();
                let re_ref_name = opt.re_ref_name.as_ref();
                let re_seq_exclude = &opt.re_seq_exclude;
                s.spawn(move || {
                    match parse_genome_file(file, lh, k, re_ref_name, re_seq_exclude) {
                        Ok(Some(g)) => {
                            let _ = tx.send(g);
                        }
                        Ok(None) => {
                            log::warn!("skipping {}: no valid sequences", file.display());
                        }
                        Err(e) => {
                            log::warn!("skipping {}: {}", file.display(), e);
                        }
                    }
                    let _ = token_rx.recv();
                });
            }
            drop(tx_rec);

            collector.join().expect("collector thread");
            writer.join().expect("genome writer thread")
        })?;
    }

    if n_genomes == 0 {
        return Err(invalid("no genome with valid sequences to index".into()));
    }

    // seed store, one chunk of masks per file
    log::info!("writing seeds...");
    let chunks = opt.chunks;
    let chunk_size = (n_masks + chunks - 1) / chunks;
    (0..chunks)
        .into_par_iter()
        .try_for_each(|j| -> io::Result<()> {
            let begin = j * chunk_size;
            let end = (begin + chunk_size).min(n_masks);
            if begin >= end {
                return Ok(());
            }
            let file = dir_seeds.join(chunk_file(j));
            kv::write_kv_data(k as u8, begin, &datas[begin..end], &file, opt.partitions)?;
            Ok(())
        })?;

    let info = IndexInfo {
        main_version: MAIN_VERSION,
        minor_version: MINOR_VERSION,
        max_k: k as u8,
        masks: n_masks,
        rand_seed: lh.seed,
        chunks,
        index_partitions: opt.partitions,
        contig_interval: k - 1,
        genomes: n_genomes,
        genome_batch_size: opt.genome_batch_size,
        genome_batches: 1,
    };
    write_index_info(&outdir.join(FILE_INFO), &info)?;

    log::info!("finished building index for batch {}", batch);
    Ok(())
}

/// Parses one genome file: contig filtering, separator concatenation,
/// masking and 2-bit packing. Returns `None` when no valid contig remains.
fn parse_genome_file(
    file: &Path,
    lh: &LexicHash,
    k: usize,
    re_ref_name: Option<&Regex>,
    re_seq_exclude: &[Regex],
) -> io::Result<Option<Genome>> {
    let reader = fasta::Reader::new(open_seq_file(file)?);

    let mut g = Genome::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
        let seq = record.seq();
        // contigs shorter than k cannot produce a k-mer
        if seq.len() < k {
            continue;
        }
        if re_seq_exclude.iter().any(|re| re.is_match(record.id())) {
            continue;
        }

        if g.num_seqs > 0 {
            // (k-1) 'N' bytes: the widest window that cannot host a k-mer
            g.seq.extend(std::iter::repeat(b'N').take(k - 1));
            g.len += k - 1;
        }
        g.seq.extend_from_slice(seq);
        g.len += seq.len();
        g.seq_ids.push(record.id().as_bytes().to_vec());
        g.seq_sizes.push(seq.len());
        g.genome_size += seq.len();
        g.num_seqs += 1;
    }
    if g.num_seqs == 0 {
        return Ok(None);
    }

    g.id = ref_name_from_path(file, re_ref_name).into_bytes();

    // no k-mer may straddle a contig junction
    let mut skip_regions: Vec<(usize, usize)> = Vec::new();
    if g.num_seqs > 1 {
        let mut n = 0usize;
        for (i, &size) in g.seq_sizes.iter().enumerate() {
            if i > 0 {
                skip_regions.push((n, n + k - 2));
                n += k - 1;
            }
            n += size;
        }
    }
    let (kmers, locses) = lh.mask(&g.seq, Some(&skip_regions));
    g.kmers = Some(kmers);
    g.locses = Some(locses);

    g.two_bit = seq_to_two_bit(&g.seq);
    g.seq = Vec::new();

    Ok(Some(g))
}

/// Reference name: the first capture of `re_ref_name` applied to the file
/// name, or the file name with compression and format extensions dropped.
fn ref_name_from_path(path: &Path, re_ref_name: Option<&Regex>) -> String {
    let base = path
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(re) = re_ref_name {
        if let Some(caps) = re.captures(&base) {
            if let Some(m) = caps.get(1) {
                return m.as_str().to_string();
            }
        }
    }
    let base = base.strip_suffix(".gz").unwrap_or(&base);
    match base.rsplit_once('.') {
        Some((stem, _)) => stem.to_string(),
        None => base.to_string(),
    }
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg)
}
