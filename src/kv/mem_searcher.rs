//! Fully in-memory searcher: the seed chunk file is memory-mapped and the
//! range scan runs on slice arithmetic, with no per-record syscalls.

use memmap2::Mmap;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use super::searcher::{max_kmer, search_chunk, RecordSource};
use super::{broken_file, read_kv_index, SearchResult, KV_DATA_MAGIC, KV_INDEX_FILE_EXT};

struct SliceSource {
    data: Mmap,
    pos: usize,
}

impl RecordSource for SliceSource {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        if offset as usize > self.data.len() {
            return Err(broken_file("anchor offset past end of data"));
        }
        self.pos = offset as usize;
        Ok(())
    }
    fn read_exact_buf(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(broken_file("truncated seed data"));
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
    fn skip(&mut self, n: u64) -> io::Result<()> {
        let end = self.pos + n as usize;
        if end > self.data.len() {
            return Err(broken_file("truncated seed data"));
        }
        self.pos = end;
        Ok(())
    }
}

/// In-memory variant of [`super::Searcher`]; identical framing and results.
pub struct InMemSearcher {
    pub k: u8,
    pub chunk_index: usize,
    pub chunk_size: usize,

    indexes: Vec<Vec<u64>>,
    src: SliceSource,
    max_kmer: u64,
}

impl InMemSearcher {
    pub fn open(file: &Path) -> io::Result<Self> {
        let mut index_path: PathBuf = file.as_os_str().to_owned().into();
        index_path.as_mut_os_string().push(KV_INDEX_FILE_EXT);
        let (k, chunk_index, indexes) = read_kv_index(&index_path)?;

        let fh = File::open(file)?;
        let data = unsafe { Mmap::map(&fh)? };
        if data.len() < 8 || &data[..8] != KV_DATA_MAGIC {
            return Err(broken_file(format!(
                "not a seed data file: {}",
                file.display()
            )));
        }

        Ok(InMemSearcher {
            k,
            chunk_index,
            chunk_size: indexes.len(),
            indexes,
            src: SliceSource { data, pos: 0 },
            max_kmer: max_kmer(k),
        })
    }

    /// See [`super::Searcher::search`].
    pub fn search(
        &mut self,
        kmers: &[u64],
        min_prefix: u8,
        max_mismatch: i32,
    ) -> io::Result<Vec<SearchResult>> {
        search_chunk(
            &mut self.src,
            &self.indexes,
            self.chunk_index,
            self.k,
            self.max_kmer,
            kmers,
            min_prefix,
            max_mismatch,
        )
    }
}
