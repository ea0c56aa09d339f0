//! End-to-end build + search scenarios over small synthetic genomes.

use std::fs;
use std::path::{Path, PathBuf};

use lexicmap::index::build::{build_index, IndexBuildingOptions};
use lexicmap::index::search::{Index, IndexSearchingOptions};
use lexicmap::index::{read_index_info, FILE_INFO, FILE_MASKS};
use lexicmap::util::reverse_complement;

fn lcg_seq(len: usize, mut state: u64) -> Vec<u8> {
    const BASES: [u8; 4] = [b'A', b'C', b'G', b'T'];
    let mut seq = Vec::with_capacity(len);
    for _ in 0..len {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        seq.push(BASES[(state >> 33) as usize & 3]);
    }
    seq
}

fn write_fasta(path: &Path, records: &[(&str, &[u8])]) {
    let mut text = String::new();
    for (id, seq) in records {
        text.push('>');
        text.push_str(id);
        text.push('\n');
        text.push_str(std::str::from_utf8(seq).unwrap());
        text.push('\n');
    }
    fs::write(path, text).unwrap();
}

fn build_opts(k: usize, masks: usize) -> IndexBuildingOptions {
    IndexBuildingOptions {
        num_cpus: 2,
        k,
        masks,
        rand_seed: 11,
        chunks: 2,
        partitions: 8,
        ..Default::default()
    }
}

fn search_opts() -> IndexSearchingOptions {
    IndexSearchingOptions {
        num_cpus: 2,
        ..Default::default()
    }
}

#[test]
fn exact_hit_on_a_single_genome() {
    let dir = tempfile::tempdir().unwrap();
    let genome = lcg_seq(10_000, 7);
    let fasta = dir.path().join("g1.fasta");
    write_fasta(&fasta, &[("c1", &genome)]);

    let idx_dir = dir.path().join("idx");
    build_index(&idx_dir, &[fasta.clone()], &build_opts(21, 1024)).unwrap();

    let idx = Index::open(&idx_dir, search_opts()).unwrap();
    let query = &genome[2000..3000];
    let results = idx.search(query).unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert_eq!(r.genome_batch, 0);
    assert_eq!(r.genome_index, 0);
    assert_eq!(r.id, b"g1");
    assert_eq!(r.genome_size, 10_000);
    assert!(r.aligned_fraction > 90.0, "af = {}", r.aligned_fraction);
    assert!(r.aligned_fraction <= 100.0);

    let sd = &r.similarity_details[0];
    assert!(!sd.rc);
    assert_eq!(sd.seq_id, b"c1");
    assert_eq!(sd.seq_len, 10_000);
    let sim = &sd.similarity;
    assert!(sim.q_begin <= 5, "q_begin = {}", sim.q_begin);
    assert!(sim.q_end >= 995, "q_end = {}", sim.q_end);
    assert!((sim.t_begin - 2000).abs() <= 10, "t_begin = {}", sim.t_begin);
    assert!((sim.t_end - 2999).abs() <= 10, "t_end = {}", sim.t_end);
    assert!(sim.chains[0].pident > 99.0);

    // the in-memory searcher returns the same top hit
    let idx_mem = Index::open(
        &idx_dir,
        IndexSearchingOptions {
            in_memory_search: true,
            ..search_opts()
        },
    )
    .unwrap();
    let results_mem = idx_mem.search(query).unwrap();
    assert_eq!(results_mem.len(), 1);
    assert_eq!(results_mem[0].id, b"g1");
    assert_eq!(
        results_mem[0].similarity_details[0].similarity.t_begin,
        sim.t_begin
    );
}

#[test]
fn rebuilding_with_the_same_seed_is_reproducible() {
    let dir = tempfile::tempdir().unwrap();
    let genome = lcg_seq(5_000, 19);
    let fasta = dir.path().join("g.fasta");
    write_fasta(&fasta, &[("c", &genome)]);

    let idx1 = dir.path().join("idx1");
    let idx2 = dir.path().join("idx2");
    build_index(&idx1, &[fasta.clone()], &build_opts(21, 256)).unwrap();
    build_index(&idx2, &[fasta.clone()], &build_opts(21, 256)).unwrap();

    let masks1 = fs::read(idx1.join(FILE_MASKS)).unwrap();
    let masks2 = fs::read(idx2.join(FILE_MASKS)).unwrap();
    assert_eq!(masks1, masks2);

    for chunk in ["chunk_000.bin", "chunk_001.bin"] {
        let c1 = fs::read(idx1.join("seeds").join(chunk)).unwrap();
        let c2 = fs::read(idx2.join("seeds").join(chunk)).unwrap();
        assert_eq!(c1, c2, "seed chunk {} differs", chunk);
    }
}

#[test]
fn reverse_complement_query_hits_the_negative_strand() {
    let dir = tempfile::tempdir().unwrap();
    let genome = lcg_seq(10_000, 7);
    let fasta = dir.path().join("g1.fasta");
    write_fasta(&fasta, &[("c1", &genome)]);

    let idx_dir = dir.path().join("idx");
    build_index(&idx_dir, &[fasta], &build_opts(21, 1024)).unwrap();
    let idx = Index::open(&idx_dir, search_opts()).unwrap();

    let mut query = genome[2000..3000].to_vec();
    reverse_complement(&mut query);
    let results = idx.search(&query).unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert!(r.aligned_fraction > 90.0, "af = {}", r.aligned_fraction);
    let sd = &r.similarity_details[0];
    assert!(sd.rc);
    let sim = &sd.similarity;
    // same target region, reported on forward coordinates
    assert!((sim.t_begin - 2000).abs() <= 10, "t_begin = {}", sim.t_begin);
    assert!((sim.t_end - 2999).abs() <= 10, "t_end = {}", sim.t_end);
    assert!(sim.chains[0].pident > 99.0);
}

#[test]
fn query_straddling_two_contigs_is_split_per_contig() {
    let dir = tempfile::tempdir().unwrap();
    let c1 = lcg_seq(3_000, 13);
    let c2 = lcg_seq(3_000, 17);
    let fasta = dir.path().join("g2.fasta");
    write_fasta(&fasta, &[("c1", &c1), ("c2", &c2)]);

    let idx_dir = dir.path().join("idx");
    build_index(&idx_dir, &[fasta], &build_opts(21, 1024)).unwrap();
    let idx = Index::open(&idx_dir, search_opts()).unwrap();

    // half from the end of c1, half from the start of c2
    let mut query = c1[2500..].to_vec();
    query.extend_from_slice(&c2[..500]);
    let results = idx.search(&query).unwrap();

    assert_eq!(results.len(), 1);
    let r = &results[0];
    assert!(r.aligned_fraction > 90.0, "af = {}", r.aligned_fraction);
    assert_eq!(r.similarity_details.len(), 2);

    let d1 = r
        .similarity_details
        .iter()
        .find(|sd| sd.seq_id == b"c1")
        .expect("no detail for c1");
    assert_eq!(d1.seq_len, 3_000);
    assert!(d1.similarity.t_begin >= 2490, "c1 t_begin = {}", d1.similarity.t_begin);
    assert!(d1.similarity.t_end <= 2999, "c1 t_end = {}", d1.similarity.t_end);
    assert!(d1.similarity.q_end <= 510);

    let d2 = r
        .similarity_details
        .iter()
        .find(|sd| sd.seq_id == b"c2")
        .expect("no detail for c2");
    assert!(d2.similarity.t_begin <= 10, "c2 t_begin = {}", d2.similarity.t_begin);
    assert!(d2.similarity.t_end <= 520, "c2 t_end = {}", d2.similarity.t_end);
    assert!(d2.similarity.q_begin >= 490);
}

#[test]
fn low_query_coverage_is_filtered() {
    let dir = tempfile::tempdir().unwrap();
    let genome = lcg_seq(10_000, 31);
    let fasta = dir.path().join("g3.fasta");
    write_fasta(&fasta, &[("c1", &genome)]);

    let idx_dir = dir.path().join("idx");
    build_index(&idx_dir, &[fasta], &build_opts(21, 1024)).unwrap();

    // half the query matches, half is foreign
    let mut query = genome[1000..1500].to_vec();
    query.extend_from_slice(&lcg_seq(500, 99));

    let strict = Index::open(&idx_dir, search_opts()).unwrap();
    assert!(strict.search(&query).unwrap().is_empty());

    let loose = Index::open(
        &idx_dir,
        IndexSearchingOptions {
            min_query_aligned_fraction_in_a_genome: 40.0,
            ..search_opts()
        },
    )
    .unwrap();
    let results = loose.search(&query).unwrap();
    assert_eq!(results.len(), 1);
    let af = results[0].aligned_fraction;
    assert!((40.0..60.0).contains(&af), "af = {}", af);
}

#[test]
fn top_n_truncates_the_target_list() {
    let dir = tempfile::tempdir().unwrap();
    let insert = lcg_seq(300, 41);

    let mut files: Vec<PathBuf> = Vec::new();
    for i in 0..30u64 {
        let mut genome = lcg_seq(1_000, 100 + i);
        genome.extend_from_slice(&insert);
        genome.extend_from_slice(&lcg_seq(1_000, 200 + i));
        let fasta = dir.path().join(format!("g{:02}.fa", i));
        write_fasta(&fasta, &[("c1", &genome)]);
        files.push(fasta);
    }

    let idx_dir = dir.path().join("idx");
    build_index(&idx_dir, &files, &build_opts(21, 512)).unwrap();

    let all = Index::open(&idx_dir, search_opts()).unwrap();
    let results = all.search(&insert).unwrap();
    assert_eq!(results.len(), 30);
    // ranked by the top fragment's similarity score
    for pair in results.windows(2) {
        assert!(
            pair[0].similarity_details[0].similarity_score
                >= pair[1].similarity_details[0].similarity_score
        );
    }

    let topped = Index::open(
        &idx_dir,
        IndexSearchingOptions {
            top_n: 10,
            ..search_opts()
        },
    )
    .unwrap();
    assert_eq!(topped.search(&insert).unwrap().len(), 10);
}

#[test]
fn short_contigs_are_skipped_with_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    let bad = dir.path().join("short.fa");
    write_fasta(&bad, &[("tiny", b"ACGTACGT")]);
    let good = dir.path().join("good.fa");
    let genome = lcg_seq(2_000, 5);
    write_fasta(&good, &[("c1", &genome)]);

    // a build with only unusable input fails
    let err = build_index(&dir.path().join("idx0"), &[bad.clone()], &build_opts(21, 256));
    assert!(err.is_err());

    // otherwise the unusable file is skipped and the build continues
    let idx_dir = dir.path().join("idx1");
    build_index(&idx_dir, &[bad, good], &build_opts(21, 256)).unwrap();
    let info = read_index_info(&idx_dir.join(FILE_INFO)).unwrap();
    assert_eq!(info.genomes, 1);
    assert_eq!(info.genome_batches, 1);
}

#[test]
fn contig_name_exclusion_is_applied() {
    let dir = tempfile::tempdir().unwrap();
    let keep = lcg_seq(2_000, 23);
    let drop = lcg_seq(2_000, 29);
    let fasta = dir.path().join("g.fa");
    write_fasta(&fasta, &[("chr1", &keep), ("plasmid_x", &drop)]);

    let idx_dir = dir.path().join("idx");
    let mut opt = build_opts(21, 256);
    opt.re_seq_exclude = vec![regex::Regex::new("^plasmid").unwrap()];
    build_index(&idx_dir, &[fasta], &opt).unwrap();

    let idx = Index::open(&idx_dir, search_opts()).unwrap();
    // the excluded contig is not searchable
    let hits = idx.search(&drop[200..1200]).unwrap();
    assert!(hits.is_empty());
    let hits = idx.search(&keep[200..1200]).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].similarity_details[0].seq_id, b"chr1");
}

#[test]
fn extreme_k_values_build_and_search() {
    for (k, masks) in [(3usize, 4usize), (32, 4)] {
        let dir = tempfile::tempdir().unwrap();
        let genome = lcg_seq(500, 47);
        let fasta = dir.path().join("g.fa");
        write_fasta(&fasta, &[("c", &genome)]);

        let idx_dir = dir.path().join("idx");
        let mut opt = build_opts(k, masks);
        opt.chunks = 1;
        opt.partitions = 1;
        build_index(&idx_dir, &[fasta], &opt).unwrap();

        let sopt = IndexSearchingOptions {
            min_prefix: 3,
            min_single_prefix: 3,
            min_query_aligned_fraction_in_a_genome: 0.0,
            ..search_opts()
        };
        let idx = Index::open(&idx_dir, sopt).unwrap();
        // no overflow or panic; hits are not required at these extremes
        let _ = idx.search(&genome[100..250]).unwrap();
    }
}

#[test]
fn version_mismatch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let genome = lcg_seq(2_000, 3);
    let fasta = dir.path().join("g.fa");
    write_fasta(&fasta, &[("c", &genome)]);

    let idx_dir = dir.path().join("idx");
    build_index(&idx_dir, &[fasta], &build_opts(21, 256)).unwrap();

    // bump the main version in the info file
    let info_path = idx_dir.join(FILE_INFO);
    let text = fs::read_to_string(&info_path).unwrap();
    let text = text.replace("main-version = 0", "main-version = 99");
    fs::write(&info_path, text).unwrap();

    let err = Index::open(&idx_dir, search_opts()).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
}

#[test]
fn output_seq_returns_the_matched_subsequence() {
    let dir = tempfile::tempdir().unwrap();
    let genome = lcg_seq(8_000, 53);
    let fasta = dir.path().join("g.fa");
    write_fasta(&fasta, &[("c1", &genome)]);

    let idx_dir = dir.path().join("idx");
    build_index(&idx_dir, &[fasta], &build_opts(21, 1024)).unwrap();

    let idx = Index::open(
        &idx_dir,
        IndexSearchingOptions {
            output_seq: true,
            ..search_opts()
        },
    )
    .unwrap();
    let results = idx.search(&genome[3000..4000]).unwrap();
    assert_eq!(results.len(), 1);
    let sim = &results[0].similarity_details[0].similarity;
    let t_seq = sim.t_seq.as_ref().expect("sequence output requested");
    assert_eq!(
        t_seq.as_slice(),
        &genome[sim.t_begin as usize..=sim.t_end as usize]
    );
}
