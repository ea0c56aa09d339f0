//! On-disk prefix-range searcher over a seed chunk file.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::util::varint::{data_len, uint64_pair, CTRL_FLAG_LAST_PAIR, CTRL_FLAG_NO_KMER2};

use super::{
    broken_file, count_mismatch, find_anchor, kmer_scope, read_kv_index, shared_prefix_len,
    SearchResult, KV_DATA_MAGIC, KV_INDEX_FILE_EXT,
};

/// Byte source a range scan decodes records from. Implemented by the
/// buffered file reader here and by the memory-mapped variant.
pub(crate) trait RecordSource {
    fn seek_to(&mut self, offset: u64) -> io::Result<()>;
    fn read_exact_buf(&mut self, buf: &mut [u8]) -> io::Result<()>;
    fn skip(&mut self, n: u64) -> io::Result<()>;
}

struct FileSource {
    r: BufReader<File>,
}

impl RecordSource for FileSource {
    fn seek_to(&mut self, offset: u64) -> io::Result<()> {
        self.r.seek(SeekFrom::Start(offset)).map(|_| ())
    }
    fn read_exact_buf(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.r.read_exact(buf)
    }
    fn skip(&mut self, n: u64) -> io::Result<()> {
        self.r.seek_relative(n as i64)
    }
}

/// Searches one seed chunk file through its anchor index.
pub struct Searcher {
    pub k: u8,
    /// Global index of the first mask in this chunk.
    pub chunk_index: usize,
    /// Number of masks in this chunk.
    pub chunk_size: usize,

    indexes: Vec<Vec<u64>>,
    src: FileSource,
    max_kmer: u64,
}

impl Searcher {
    pub fn open(file: &Path) -> io::Result<Self> {
        let mut index_path: PathBuf = file.as_os_str().to_owned().into();
        index_path.as_mut_os_string().push(KV_INDEX_FILE_EXT);
        let (k, chunk_index, indexes) = read_kv_index(&index_path)?;

        let mut r = BufReader::new(File::open(file)?);
        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != KV_DATA_MAGIC {
            return Err(broken_file(format!(
                "not a seed data file: {}",
                file.display()
            )));
        }

        Ok(Searcher {
            k,
            chunk_index,
            chunk_size: indexes.len(),
            indexes,
            src: FileSource { r },
            max_kmer: max_kmer(k),
        })
    }

    /// Range-searches every mask of this chunk. `kmers[j]` is the query
    /// k-mer captured by mask `chunk_index + j`; results whose shared
    /// prefix is at least `min_prefix` (and, when `max_mismatch >= 0`,
    /// whose mismatch count does not exceed it) are returned tagged with
    /// the global mask index.
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

pub(crate) fn max_kmer(k: u8) -> u64 {
    if k >= 32 {
        u64::MAX
    } else {
        (1u64 << (2 * k)) - 1
    }
}

pub(crate) fn search_chunk<S: RecordSource>(
    src: &mut S,
    indexes: &[Vec<u64>],
    chunk_index: usize,
    k: u8,
    max_kmer: u64,
    kmers: &[u64],
    min_prefix: u8,
    max_mismatch: i32,
) -> io::Result<Vec<SearchResult>> {
    if kmers.len() != indexes.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!(
                "query k-mer count {} does not match chunk size {}",
                kmers.len(),
                indexes.len()
            ),
        ));
    }

    let mut results = Vec::new();
    for (j, &kmer) in kmers.iter().enumerate() {
        if kmer > max_kmer {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid k-mer for k={}: {}", k, kmer),
            ));
        }
        let m = if min_prefix < 1 || min_prefix > k {
            k
        } else {
            min_prefix
        };
        let (left, right) = kmer_scope(kmer, k, m);
        scan_mask(
            src,
            &indexes[j],
            kmer,
            k,
            left,
            right,
            max_mismatch,
            chunk_index + j,
            &mut results,
        )?;
    }
    Ok(results)
}

/// Decodes one mask's record stream from the nearest anchor until the scope
/// is exhausted, collecting in-scope records.
#[allow(clippy::too_many_arguments)]
fn scan_mask<S: RecordSource>(
    src: &mut S,
    index: &[u64],
    query: u64,
    k: u8,
    left: u64,
    right: u64,
    max_mismatch: i32,
    i_query: usize,
    out: &mut Vec<SearchResult>,
) -> io::Result<()> {
    if index.len() < 2 {
        return Ok(());
    }
    let a = find_anchor(index, left);
    let anchor_kmer = index[a];
    src.seek_to(index[a + 1])?;

    let mut first = true;
    let mut prev = 0u64;
    let mut buf = [0u8; 16];
    let mut b1 = [0u8; 1];

    loop {
        // k-mer frame
        src.read_exact_buf(&mut b1)?;
        let ctrl = b1[0];
        let last_pair = ctrl & CTRL_FLAG_LAST_PAIR != 0;
        let has_kmer2 = ctrl & CTRL_FLAG_NO_KMER2 == 0;
        let n = data_len(ctrl);
        src.read_exact_buf(&mut buf[..n])?;
        let (d1, d2, _) = uint64_pair(ctrl, &buf[..n]).ok_or_else(|| broken_file("bad k-mer frame"))?;

        // the anchor supplies the first k-mer directly
        let kmer1 = if first {
            first = false;
            anchor_kmer
        } else {
            prev.checked_add(d1)
                .ok_or_else(|| broken_file("non-monotonic k-mer stream"))?
        };
        let kmer2 = kmer1
            .checked_add(d2)
            .ok_or_else(|| broken_file("non-monotonic k-mer stream"))?;
        prev = kmer2;

        if kmer1 > right {
            break;
        }

        // value-length frame
        src.read_exact_buf(&mut b1)?;
        let ctrl2 = b1[0];
        let n2 = data_len(ctrl2);
        src.read_exact_buf(&mut buf[..n2])?;
        let (len1, len2, _) =
            uint64_pair(ctrl2, &buf[..n2]).ok_or_else(|| broken_file("bad value-length frame"))?;

        if kmer1 >= left {
            push_match(src, query, kmer1, len1, k, max_mismatch, i_query, out)?;
        } else {
            src.skip(8 * len1)?;
        }

        if kmer2 > right {
            break;
        }
        if last_pair && !has_kmer2 {
            break;
        }

        if kmer2 >= left {
            push_match(src, query, kmer2, len2, k, max_mismatch, i_query, out)?;
        } else {
            src.skip(8 * len2)?;
        }

        if last_pair {
            break;
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn push_match<S: RecordSource>(
    src: &mut S,
    query: u64,
    kmer: u64,
    n_values: u64,
    k: u8,
    max_mismatch: i32,
    i_query: usize,
    out: &mut Vec<SearchResult>,
) -> io::Result<()> {
    let mismatch = count_mismatch(query, kmer, k);
    if max_mismatch >= 0 && mismatch as i32 > max_mismatch {
        return src.skip(8 * n_values);
    }

    let mut values = Vec::with_capacity(n_values as usize);
    let mut b8 = [0u8; 8];
    for _ in 0..n_values {
        src.read_exact_buf(&mut b8)?;
        values.push(u64::from_be_bytes(b8));
    }
    out.push(SearchResult {
        i_query,
        kmer,
        len_prefix: shared_prefix_len(query, kmer, k),
        mismatch,
        values,
    });
    Ok(())
}
