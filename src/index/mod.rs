//! Index directory layout, format versioning and the info file.
//!
//! ```text
//! masks.bin                       LexicHash masks (K, M, seed + masks)
//! genomes/batch_NNNN/genomes.bin  packed 2-bit sequences, random access
//! seeds/chunk_NNN.bin             seed-store data
//! seeds/chunk_NNN.bin.idx         seed-store anchor index
//! info.toml                       metadata
//! ```

pub mod build;
pub mod chaining;
pub mod chaining2;
pub mod search;
pub mod seq_compare;

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;

/// Bumped on incompatible on-disk format changes; opening an index with a
/// different main version is a hard error.
pub const MAIN_VERSION: u8 = 0;
pub const MINOR_VERSION: u8 = 1;

pub const FILE_MASKS: &str = "masks.bin";
pub const FILE_INFO: &str = "info.toml";
pub const FILE_GENOMES: &str = "genomes.bin";
pub const DIR_SEEDS: &str = "seeds";
pub const DIR_GENOMES: &str = "genomes";
pub const EXT_SEEDS: &str = "bin";

pub fn batch_dir(batch: usize) -> String {
    format!("batch_{:04}", batch)
}

pub fn chunk_file(chunk: usize) -> String {
    format!("chunk_{:03}.{}", chunk, EXT_SEEDS)
}

/// Index metadata, serialized as `info.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct IndexInfo {
    pub main_version: u8,
    pub minor_version: u8,

    #[serde(rename = "max-K")]
    pub max_k: u8,
    pub masks: usize,
    pub rand_seed: i64,

    pub chunks: usize,
    pub index_partitions: usize,

    pub contig_interval: usize,

    pub genomes: usize,
    pub genome_batch_size: usize,
    pub genome_batches: usize,
}

pub fn write_index_info(path: &Path, info: &IndexInfo) -> io::Result<()> {
    let data = toml::to_string(info)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e.to_string()))?;
    fs::write(path, data)
}

pub fn read_index_info(path: &Path) -> io::Result<IndexInfo> {
    let data = fs::read_to_string(path)?;
    toml::from_str(&data).map_err(|e| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("invalid info file {}: {}", path.display(), e),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn info_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(FILE_INFO);
        let info = IndexInfo {
            main_version: MAIN_VERSION,
            minor_version: MINOR_VERSION,
            max_k: 21,
            masks: 4096,
            rand_seed: 1,
            chunks: 4,
            index_partitions: 128,
            contig_interval: 20,
            genomes: 17,
            genome_batch_size: 131072,
            genome_batches: 1,
        };
        write_index_info(&path, &info).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("main-version = 0"));
        assert!(text.contains("max-K = 21"));
        assert!(text.contains("index-partitions = 128"));

        let back = read_index_info(&path).unwrap();
        assert_eq!(back.masks, 4096);
        assert_eq!(back.contig_interval, 20);
        assert_eq!(back.genome_batches, 1);
    }

    #[test]
    fn batch_and_chunk_names() {
        assert_eq!(batch_dir(0), "batch_0000");
        assert_eq!(batch_dir(42), "batch_0042");
        assert_eq!(chunk_file(7), "chunk_007.bin");
    }
}
