//! Random-access reader for packed genome files.

use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use super::writer::GENOME_FILE_MAGIC;
use super::{two_bit_to_seq, Genome};

pub struct Reader {
    r: BufReader<File>,
    pub batch: u32,
    offsets: Vec<u64>,
}

impl Reader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let mut r = BufReader::new(file);

        let mut magic = [0u8; 8];
        r.read_exact(&mut magic)?;
        if &magic != GENOME_FILE_MAGIC {
            return Err(broken(format!("not a genome file: {}", path.display())));
        }
        let mut b4 = [0u8; 4];
        r.read_exact(&mut b4)?;
        let batch = u32::from_be_bytes(b4);

        // footer: [index offset u64][n u64][magic 8]
        r.seek(SeekFrom::End(-24))?;
        let index_offset = read_u64(&mut r)?;
        let n = read_u64(&mut r)? as usize;
        r.read_exact(&mut magic)?;
        if &magic != GENOME_FILE_MAGIC {
            return Err(broken(format!("corrupt genome file footer: {}", path.display())));
        }

        r.seek(SeekFrom::Start(index_offset))?;
        let mut offsets = Vec::with_capacity(n);
        for _ in 0..n {
            offsets.push(read_u64(&mut r)?);
        }

        Ok(Reader { r, batch, offsets })
    }

    pub fn num_genomes(&self) -> usize {
        self.offsets.len()
    }

    /// Decodes bases `[begin, end]` (inclusive, coordinates on the
    /// concatenated sequence) of the genome at `ref_idx`, together with the
    /// record's metadata. `end` past the sequence is clamped.
    pub fn sub_seq(&mut self, ref_idx: usize, begin: usize, mut end: usize) -> io::Result<Genome> {
        let offset = *self
            .offsets
            .get(ref_idx)
            .ok_or_else(|| broken(format!("reference index out of range: {}", ref_idx)))?;
        self.r.seek(SeekFrom::Start(offset))?;

        let mut g = Genome::new();
        g.id = read_bytes(&mut self.r)?;
        g.genome_size = read_u64(&mut self.r)? as usize;
        g.len = read_u64(&mut self.r)? as usize;
        let mut b4 = [0u8; 4];
        self.r.read_exact(&mut b4)?;
        g.num_seqs = u32::from_be_bytes(b4) as usize;

        for _ in 0..g.num_seqs {
            g.seq_ids.push(read_bytes(&mut self.r)?);
            g.seq_sizes.push(read_u64(&mut self.r)? as usize);
        }

        let two_bit_len = read_u64(&mut self.r)? as usize;

        if g.len == 0 || begin >= g.len {
            return Err(broken(format!(
                "subsequence begin {} out of range for genome of length {}",
                begin, g.len
            )));
        }
        if end >= g.len {
            end = g.len - 1;
        }

        // only the bytes covering [begin, end] are read
        let first_byte = begin >> 2;
        let last_byte = end >> 2;
        if last_byte >= two_bit_len {
            return Err(broken("packed sequence shorter than declared".into()));
        }
        self.r.seek(SeekFrom::Current(first_byte as i64))?;
        let mut packed = vec![0u8; last_byte - first_byte + 1];
        self.r.read_exact(&mut packed)?;

        g.seq = two_bit_to_seq(&packed, begin - (first_byte << 2), end - (first_byte << 2));
        Ok(g)
    }
}

fn read_u64(r: &mut BufReader<File>) -> io::Result<u64> {
    let mut b = [0u8; 8];
    r.read_exact(&mut b)?;
    Ok(u64::from_be_bytes(b))
}

fn read_bytes(r: &mut BufReader<File>) -> io::Result<Vec<u8>> {
    let mut b4 = [0u8; 4];
    r.read_exact(&mut b4)?;
    let len = u32::from_be_bytes(b4) as usize;
    let mut bytes = vec![0u8; len];
    r.read_exact(&mut bytes)?;
    Ok(bytes)
}

fn broken(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

#[cfg(test)]
mod tests {
    use super::super::{seq_to_two_bit, Writer};
    use super::*;

    fn make_genome(id: &str, contigs: &[(&str, &[u8])], sep: usize) -> Genome {
        let mut g = Genome::new();
        g.id = id.as_bytes().to_vec();
        for (i, (cid, seq)) in contigs.iter().enumerate() {
            if i > 0 {
                g.seq.extend(std::iter::repeat(b'N').take(sep));
                g.len += sep;
            }
            g.seq.extend_from_slice(seq);
            g.len += seq.len();
            g.seq_ids.push(cid.as_bytes().to_vec());
            g.seq_sizes.push(seq.len());
            g.genome_size += seq.len();
        }
        g.num_seqs = contigs.len();
        g.two_bit = seq_to_two_bit(&g.seq);
        g
    }

    #[test]
    fn write_then_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genomes.bin");

        let g1 = make_genome("g1", &[("c1", b"ACGTACGTACGTACGT")], 4);
        let g2 = make_genome("g2", &[("c1", b"TTTTGGGGCCCCAAAA"), ("c2", b"ACACACACAC")], 4);

        let mut w = Writer::create(&path, 3).unwrap();
        w.write(&g1).unwrap();
        w.write(&g2).unwrap();
        assert_eq!(w.written(), 2);
        w.finish().unwrap();

        let mut r = Reader::open(&path).unwrap();
        assert_eq!(r.batch, 3);
        assert_eq!(r.num_genomes(), 2);

        let s = r.sub_seq(0, 0, 15).unwrap();
        assert_eq!(s.id, b"g1");
        assert_eq!(s.seq, b"ACGTACGTACGTACGT");
        assert_eq!(s.num_seqs, 1);

        let s = r.sub_seq(1, 4, 9).unwrap();
        assert_eq!(s.seq, b"GGGGCC");
        assert_eq!(s.seq_sizes, vec![16, 10]);
        assert_eq!(s.seq_ids, vec![b"c1".to_vec(), b"c2".to_vec()]);
        assert_eq!(s.genome_size, 26);
        // separators decode as 'A'
        let s = r.sub_seq(1, 16, 19).unwrap();
        assert_eq!(s.seq, b"AAAA");
    }

    #[test]
    fn end_past_sequence_is_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("genomes.bin");
        let g = make_genome("g", &[("c", b"ACGTACG")], 4);
        let mut w = Writer::create(&path, 0).unwrap();
        w.write(&g).unwrap();
        w.finish().unwrap();

        let mut r = Reader::open(&path).unwrap();
        let s = r.sub_seq(0, 4, 1000).unwrap();
        assert_eq!(s.seq, b"ACG");
        assert!(r.sub_seq(0, 7, 8).is_err());
        assert!(r.sub_seq(2, 0, 1).is_err());
    }
}
