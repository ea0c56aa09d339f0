use clap::{Parser, Subcommand};
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;

use lexicmap::index::build::{build_index, IndexBuildingOptions};
use lexicmap::index::search::{Index, IndexSearchingOptions, SearchResult};
use lexicmap::util::open_seq_file;

#[derive(Parser)]
#[command(name = "lexicmap")]
#[command(about = "LexicMap - sequence similarity search over large genome collections", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbose level: 1=error, 2=warning, 3=message, 4+=debugging
    #[arg(short = 'v', long, global = true, value_name = "INT", default_value = "3")]
    verbosity: i32,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an index from genome FASTA files
    Build {
        /// Output index directory
        #[arg(short = 'O', long, value_name = "DIR")]
        out_dir: PathBuf,

        /// Input genome FASTA file(s), optionally gzipped
        #[arg(value_name = "GENOME.FA", required = true)]
        genomes: Vec<PathBuf>,

        /// K-mer size
        #[arg(short = 'k', long, value_name = "INT", default_value = "31")]
        kmer_size: usize,

        /// Number of LexicHash masks
        #[arg(short = 'm', long, value_name = "INT", default_value = "4096")]
        masks: usize,

        /// Random seed for mask generation
        #[arg(short = 's', long, value_name = "INT", default_value = "1")]
        rand_seed: i64,

        /// Mask prefix length for the low-complexity check, 0 to disable
        #[arg(long, value_name = "INT", default_value = "0")]
        prefix_for_check_lc: usize,

        /// Number of seed chunk files
        #[arg(short = 'c', long, value_name = "INT")]
        chunks: Option<usize>,

        /// Anchor partitions per mask in the seed index
        #[arg(short = 'p', long, value_name = "INT", default_value = "512")]
        partitions: usize,

        /// Maximum number of genomes per batch
        #[arg(short = 'b', long, value_name = "INT", default_value = "131072")]
        genome_batch_size: usize,

        /// Regular expression extracting the reference name from a file
        /// name (first capture group)
        #[arg(short = 'N', long, value_name = "REGEX")]
        re_ref_name: Option<String>,

        /// Skip contigs whose names match any of these regular expressions
        #[arg(short = 'B', long, value_name = "REGEX")]
        re_seq_exclude: Vec<String>,

        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,

        /// Maximum number of open files
        #[arg(long, value_name = "INT", default_value = "512")]
        max_open_files: usize,

        /// Overwrite an existing output directory
        #[arg(long)]
        force: bool,
    },

    /// Search an index with query sequences
    Search {
        /// Index directory (built with 'build')
        #[arg(value_name = "INDEX")]
        index: PathBuf,

        /// Query FASTA file(s), optionally gzipped
        #[arg(value_name = "QUERY.FA")]
        queries: Vec<PathBuf>,

        /// A literal query sequence instead of a file
        #[arg(short = 'q', long, value_name = "SEQ")]
        seq: Option<String>,

        /// Load all seed data into memory
        #[arg(short = 'w', long)]
        in_memory_search: bool,

        /// Minimum matched prefix length of a seed
        #[arg(short = 'p', long, value_name = "INT", default_value = "15")]
        min_prefix: u8,

        /// Maximum mismatch of a matched k-mer, negative to disable
        #[arg(short = 'm', long, value_name = "INT", default_value = "-1", allow_hyphen_values = true)]
        max_mismatch: i32,

        /// Minimum matched prefix length of a single-seed target
        #[arg(short = 'P', long, value_name = "INT", default_value = "20")]
        min_single_prefix: u8,

        /// Keep only this many best-scoring targets, 0 for all
        #[arg(short = 'n', long, value_name = "INT", default_value = "500")]
        top_n: usize,

        /// Maximum gap in seed chaining
        #[arg(long, value_name = "FLOAT", default_value = "5000")]
        max_gap: f64,

        /// Maximum distance between chained seeds
        #[arg(long, value_name = "FLOAT", default_value = "10000")]
        max_distance: f64,

        /// Extra flanking bases around seed chains for alignment
        #[arg(short = 'e', long, value_name = "INT", default_value = "2000")]
        extend_length: usize,

        /// Minimum query coverage (percent) per genome
        #[arg(short = 'f', long, value_name = "FLOAT", default_value = "70")]
        min_qcov_per_genome: f64,

        /// Output matched target subsequences
        #[arg(short = 'a', long)]
        output_seq: bool,

        /// Output TSV file (default: stdout)
        #[arg(short = 'o', long, value_name = "FILE")]
        output: Option<PathBuf>,

        /// Number of threads (default: all available cores)
        #[arg(short = 't', long, value_name = "INT")]
        threads: Option<usize>,

        /// Maximum number of open files
        #[arg(long, value_name = "INT", default_value = "512")]
        max_open_files: usize,
    },
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbosity {
        v if v <= 1 => log::LevelFilter::Error,
        2 => log::LevelFilter::Warn,
        3 => log::LevelFilter::Info,
        4 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .format_timestamp(None)
        .format_target(false)
        .init();

    match cli.command {
        Commands::Build {
            out_dir,
            genomes,
            kmer_size,
            masks,
            rand_seed,
            prefix_for_check_lc,
            chunks,
            partitions,
            genome_batch_size,
            re_ref_name,
            re_seq_exclude,
            threads,
            max_open_files,
            force,
        } => {
            let num_threads = configure_threads(threads);

            let mut opt = IndexBuildingOptions {
                num_cpus: num_threads,
                max_open_files,
                force,
                k: kmer_size,
                masks,
                rand_seed,
                prefix_for_check_lc,
                partitions,
                genome_batch_size,
                ..Default::default()
            };
            opt.chunks = chunks.unwrap_or_else(|| num_threads.clamp(1, 512));

            match parse_regexes(re_ref_name.as_deref(), &re_seq_exclude) {
                Ok((re_name, re_exclude)) => {
                    opt.re_ref_name = re_name;
                    opt.re_seq_exclude = re_exclude;
                }
                Err(e) => {
                    log::error!("{}", e);
                    std::process::exit(1);
                }
            }

            log::info!(
                "building index for {} genome files -> {}",
                genomes.len(),
                out_dir.display()
            );
            if let Err(e) = build_index(&out_dir, &genomes, &opt) {
                log::error!("index building failed: {}", e);
                std::process::exit(1);
            }
            log::info!("index building completed successfully");
        }

        Commands::Search {
            index,
            queries,
            seq,
            in_memory_search,
            min_prefix,
            max_mismatch,
            min_single_prefix,
            top_n,
            max_gap,
            max_distance,
            extend_length,
            min_qcov_per_genome,
            output_seq,
            output,
            threads,
            max_open_files,
        } => {
            if queries.is_empty() && seq.is_none() {
                log::error!("no queries: give query FASTA file(s) or --seq");
                std::process::exit(1);
            }
            let num_threads = configure_threads(threads);

            let opt = IndexSearchingOptions {
                num_cpus: num_threads,
                max_open_files,
                in_memory_search,
                min_prefix,
                max_mismatch,
                min_single_prefix,
                top_n,
                max_gap,
                max_distance,
                extend_length,
                min_query_aligned_fraction_in_a_genome: min_qcov_per_genome,
                output_seq,
            };

            log::info!("opening index: {}", index.display());
            let idx = match Index::open(&index, opt) {
                Ok(idx) => idx,
                Err(e) => {
                    log::error!("failed to open index: {}", e);
                    std::process::exit(1);
                }
            };

            let mut out: Box<dyn Write> = match output {
                Some(path) => match std::fs::File::create(&path) {
                    Ok(f) => Box::new(BufWriter::new(f)),
                    Err(e) => {
                        log::error!("failed to create output file: {}", e);
                        std::process::exit(1);
                    }
                },
                None => Box::new(BufWriter::new(io::stdout())),
            };

            if let Err(e) = run_queries(&idx, &queries, seq.as_deref(), output_seq, &mut out) {
                log::error!("search failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn configure_threads(threads: Option<usize>) -> usize {
    let num_threads = threads.unwrap_or_else(num_cpus::get).max(1);
    if let Err(e) = rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build_global()
    {
        log::warn!("failed to configure thread pool: {} (may already be initialized)", e);
    }
    log::info!("using {} thread(s)", num_threads);
    num_threads
}

fn parse_regexes(
    re_ref_name: Option<&str>,
    re_seq_exclude: &[String],
) -> Result<(Option<regex::Regex>, Vec<regex::Regex>), String> {
    let re_name = match re_ref_name {
        Some(s) => Some(
            regex::Regex::new(s).map_err(|e| format!("invalid --re-ref-name regex: {}", e))?,
        ),
        None => None,
    };
    let mut re_exclude = Vec::with_capacity(re_seq_exclude.len());
    for s in re_seq_exclude {
        re_exclude
            .push(regex::Regex::new(s).map_err(|e| format!("invalid --re-seq-exclude regex: {}", e))?);
    }
    Ok((re_name, re_exclude))
}

fn run_queries(
    idx: &Index,
    query_files: &[PathBuf],
    literal_seq: Option<&str>,
    output_seq: bool,
    out: &mut dyn Write,
) -> io::Result<()> {
    write_header(out, output_seq)?;

    if let Some(seq) = literal_seq {
        let results = idx.search(seq.as_bytes())?;
        write_results(out, "query", seq.len(), &results, output_seq)?;
    }

    for file in query_files {
        let reader = bio::io::fasta::Reader::new(open_seq_file(file)?);
        for record in reader.records() {
            let record =
                record.map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
            let results = idx.search(record.seq())?;
            write_results(out, record.id(), record.seq().len(), &results, output_seq)?;
        }
    }
    out.flush()
}

fn write_header(out: &mut dyn Write, output_seq: bool) -> io::Result<()> {
    write!(
        out,
        "query\tqlen\thits\tsgenome\tsseqid\tqcovGnm\thsp\talenHSP\tpident\tslen\tqstart\tqend\tsstart\tsend\tsstr"
    )?;
    if output_seq {
        write!(out, "\tsseq")?;
    }
    writeln!(out)
}

fn write_results(
    out: &mut dyn Write,
    query_id: &str,
    query_len: usize,
    results: &[SearchResult],
    output_seq: bool,
) -> io::Result<()> {
    let hits = results.len();
    for r in results {
        for (hsp, sd) in r.similarity_details.iter().enumerate() {
            let sim = &sd.similarity;
            write!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{:.3}\t{}\t{}\t{:.3}\t{}\t{}\t{}\t{}\t{}\t{}",
                query_id,
                query_len,
                hits,
                String::from_utf8_lossy(&r.id),
                String::from_utf8_lossy(&sd.seq_id),
                r.aligned_fraction,
                hsp + 1,
                sim.aligned_bases,
                sim.chains.first().map(|c| c.pident).unwrap_or(0.0),
                sd.seq_len,
                sim.q_begin + 1,
                sim.q_end + 1,
                sim.t_begin + 1,
                sim.t_end + 1,
                if sd.rc { "-" } else { "+" },
            )?;
            if output_seq {
                let seq = sim.t_seq.as_deref().unwrap_or(b"");
                write!(out, "\t{}", String::from_utf8_lossy(seq))?;
            }
            writeln!(out)?;
        }
    }
    Ok(())
}
