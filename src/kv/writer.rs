//! Seed-store chunk writer.

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use crate::util::varint::{put_uint64_pair, CTRL_FLAG_LAST_PAIR, CTRL_FLAG_NO_KMER2};

use super::{write_kv_index, KV_DATA_HEADER_LEN, KV_DATA_MAGIC, KV_INDEX_FILE_EXT};

/// Writes the seed data of one mask chunk.
///
/// `datas[j]` holds the (k-mer → packed locations) map of mask
/// `chunk_index + j`. Per mask, records are sorted by k-mer and emitted in
/// pair frames; one anchor (absolute k-mer, absolute file offset) is
/// recorded every `ceil(pairs / partitions)` frames, which bounds the range
/// scan length regardless of key skew. The anchor index goes to the `.idx`
/// sidecar. Returns the number of data bytes written.
pub fn write_kv_data(
    k: u8,
    chunk_index: usize,
    datas: &[HashMap<u64, Vec<u64>>],
    file: &Path,
    partitions: usize,
) -> io::Result<u64> {
    let mut w = BufWriter::new(File::create(file)?);
    w.write_all(KV_DATA_MAGIC)?;
    let mut offset: u64 = KV_DATA_HEADER_LEN;

    let mut indexes: Vec<Vec<u64>> = Vec::with_capacity(datas.len());
    let mut buf = [0u8; 16];
    let mut keys: Vec<u64> = Vec::new();

    for data in datas {
        keys.clear();
        keys.extend(data.keys().copied());
        keys.sort_unstable();

        let n_pairs = (keys.len() + 1) / 2;
        let mut index: Vec<u64> = Vec::new();
        if n_pairs == 0 {
            indexes.push(index);
            continue;
        }
        let anchor_interval = ((n_pairs + partitions - 1) / partitions).max(1);

        let mut prev: u64 = 0;
        for p in 0..n_pairs {
            let k1 = keys[2 * p];
            let k2 = keys.get(2 * p + 1).copied();
            let last_pair = p == n_pairs - 1;

            if p % anchor_interval == 0 {
                index.push(k1);
                index.push(offset);
            }

            // k-mer frame: deltas against the running previous k-mer
            let (mut ctrl, n) = put_uint64_pair(&mut buf, k1 - prev, k2.map_or(0, |k2| k2 - k1));
            if last_pair {
                ctrl |= CTRL_FLAG_LAST_PAIR;
            }
            if k2.is_none() {
                ctrl |= CTRL_FLAG_NO_KMER2;
            }
            w.write_all(&[ctrl])?;
            w.write_all(&buf[..n])?;
            offset += 1 + n as u64;
            prev = k2.unwrap_or(k1);

            // value-length frame
            let values1 = &data[&k1];
            let values2 = k2.map(|k2| &data[&k2]);
            let (ctrl, n) = put_uint64_pair(
                &mut buf,
                values1.len() as u64,
                values2.map_or(0, |v| v.len() as u64),
            );
            w.write_all(&[ctrl])?;
            w.write_all(&buf[..n])?;
            offset += 1 + n as u64;

            // value payloads, big-endian
            for &v in values1 {
                w.write_all(&v.to_be_bytes())?;
            }
            offset += 8 * values1.len() as u64;
            if let Some(values2) = values2 {
                for &v in values2 {
                    w.write_all(&v.to_be_bytes())?;
                }
                offset += 8 * values2.len() as u64;
            }
        }
        indexes.push(index);
    }
    w.flush()?;

    let mut index_path = file.as_os_str().to_owned();
    index_path.push(KV_INDEX_FILE_EXT);
    write_kv_index(Path::new(&index_path), k, chunk_index, &indexes)?;

    Ok(offset)
}
