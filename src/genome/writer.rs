//! Packed genome file writer.
//!
//! File layout:
//!
//! ```text
//! [magic 8][batch u32][pad 4]          header
//! record 0, record 1, ...              self-describing, see write()
//! [offset u64] * n                     record offset table
//! [index offset u64][n u64][magic 8]   footer (fixed 24 trailing bytes)
//! ```
//!
//! All integers are big-endian. Records are written in arrival order; the
//! position in the offset table is the genome's reference index within the
//! batch.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::Genome;

pub(super) const GENOME_FILE_MAGIC: &[u8; 8] = b"lxmgnome";

pub struct Writer {
    w: BufWriter<File>,
    offsets: Vec<u64>,
    pos: u64,
}

impl Writer {
    pub fn create(path: &Path, batch: u32) -> io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        w.write_all(GENOME_FILE_MAGIC)?;
        w.write_all(&batch.to_be_bytes())?;
        w.write_all(&[0u8; 4])?;
        Ok(Writer {
            w,
            offsets: Vec::new(),
            pos: 16,
        })
    }

    /// Appends one genome record. The genome's reference index within the
    /// batch is the number of records written before it.
    pub fn write(&mut self, g: &Genome) -> io::Result<()> {
        self.offsets.push(self.pos);

        let mut n = 0u64;
        n += write_bytes(&mut self.w, &g.id)?;

        self.w.write_all(&(g.genome_size as u64).to_be_bytes())?;
        self.w.write_all(&(g.len as u64).to_be_bytes())?;
        self.w.write_all(&(g.num_seqs as u32).to_be_bytes())?;
        n += 8 + 8 + 4;

        for (sid, &size) in g.seq_ids.iter().zip(&g.seq_sizes) {
            n += write_bytes(&mut self.w, sid)?;
            self.w.write_all(&(size as u64).to_be_bytes())?;
            n += 8;
        }

        self.w.write_all(&(g.two_bit.len() as u64).to_be_bytes())?;
        self.w.write_all(&g.two_bit)?;
        n += 8 + g.two_bit.len() as u64;

        self.pos += n;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.offsets.len()
    }

    /// Writes the offset table and footer and flushes the file.
    pub fn finish(mut self) -> io::Result<()> {
        let index_offset = self.pos;
        for &off in &self.offsets {
            self.w.write_all(&off.to_be_bytes())?;
        }
        self.w.write_all(&index_offset.to_be_bytes())?;
        self.w.write_all(&(self.offsets.len() as u64).to_be_bytes())?;
        self.w.write_all(GENOME_FILE_MAGIC)?;
        self.w.flush()
    }
}

fn write_bytes(w: &mut BufWriter<File>, bytes: &[u8]) -> io::Result<u64> {
    w.write_all(&(bytes.len() as u32).to_be_bytes())?;
    w.write_all(bytes)?;
    Ok(4 + bytes.len() as u64)
}
