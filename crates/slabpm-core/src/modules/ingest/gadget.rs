use super::records::{FortranRecordReader, RecordError};
use super::{ParticleFileReader, PositionBuffer, open_file};
use crate::common::constants::{GADGET_HEADER_BYTES, GADGET_SPECIES};
use crate::domain::{ParticleFileFormat, PmResult};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

/// Species index of the dark-matter particles.
const DARK_MATTER: usize = 1;

/// The fields of the 256-byte GADGET-1 header this reader uses.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GadgetHeader {
    pub npart: [u32; GADGET_SPECIES],
    pub mass: [f64; GADGET_SPECIES],
    pub time: f64,
    pub redshift: f64,
    pub num_files: i32,
    pub box_size: f64,
}

impl GadgetHeader {
    const NPART_OFFSET: usize = 0;
    const MASS_OFFSET: usize = 24;
    const TIME_OFFSET: usize = 72;
    const REDSHIFT_OFFSET: usize = 80;
    const NUM_FILES_OFFSET: usize = 124;
    const BOX_SIZE_OFFSET: usize = 128;

    pub fn read<R: Read>(reader: &mut FortranRecordReader<R>) -> Result<Self, RecordError> {
        let block = reader.read_values::<u8>(GADGET_HEADER_BYTES)?;
        let header = Self::decode(&block);
        if !(header.box_size.is_finite() && header.box_size > 0.0) {
            return Err(RecordError::Header {
                path: reader.path().to_path_buf(),
                reason: format!("BoxSize must be positive, found {}", header.box_size),
            });
        }
        Ok(header)
    }

    /// Decodes a header block of exactly `GADGET_HEADER_BYTES` bytes.
    pub fn decode(block: &[u8]) -> Self {
        let i32_at = |offset: usize| {
            let mut bytes = [0u8; 4];
            bytes.copy_from_slice(&block[offset..offset + 4]);
            i32::from_ne_bytes(bytes)
        };
        let f64_at = |offset: usize| {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&block[offset..offset + 8]);
            f64::from_ne_bytes(bytes)
        };
        let mut header = Self::default();
        for species in 0..GADGET_SPECIES {
            header.npart[species] = i32_at(Self::NPART_OFFSET + 4 * species).max(0) as u32;
            header.mass[species] = f64_at(Self::MASS_OFFSET + 8 * species);
        }
        header.time = f64_at(Self::TIME_OFFSET);
        header.redshift = f64_at(Self::REDSHIFT_OFFSET);
        header.num_files = i32_at(Self::NUM_FILES_OFFSET);
        header.box_size = f64_at(Self::BOX_SIZE_OFFSET);
        header
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut block = vec![0u8; GADGET_HEADER_BYTES];
        let mut put = |offset: usize, bytes: &[u8]| {
            block[offset..offset + bytes.len()].copy_from_slice(bytes);
        };
        for species in 0..GADGET_SPECIES {
            put(
                Self::NPART_OFFSET + 4 * species,
                &(self.npart[species] as i32).to_ne_bytes(),
            );
            put(
                Self::MASS_OFFSET + 8 * species,
                &self.mass[species].to_ne_bytes(),
            );
        }
        put(Self::TIME_OFFSET, &self.time.to_ne_bytes());
        put(Self::REDSHIFT_OFFSET, &self.redshift.to_ne_bytes());
        put(Self::NUM_FILES_OFFSET, &self.num_files.to_ne_bytes());
        put(Self::BOX_SIZE_OFFSET, &self.box_size.to_ne_bytes());
        block
    }

    pub fn total_particles(&self) -> usize {
        self.npart.iter().map(|count| *count as usize).sum()
    }
}

/// GADGET-1 snapshot files `{prefix}.{i}`, numbered from 0.
///
/// Only the dark-matter block of the position record is kept. Positions are
/// divided by the header's `BoxSize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GadgetReader {
    directory: PathBuf,
    prefix: String,
    file_count: usize,
}

impl GadgetReader {
    pub fn new(directory: impl Into<PathBuf>, prefix: impl Into<String>, file_count: usize) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.into(),
            file_count,
        }
    }

    fn open(&self, index: usize) -> PmResult<FortranRecordReader<BufReader<File>>> {
        let path = self.file_path(index);
        let file = open_file(&path)?;
        Ok(FortranRecordReader::new(file, path))
    }
}

impl ParticleFileReader for GadgetReader {
    fn format(&self) -> ParticleFileFormat {
        ParticleFileFormat::Gadget
    }

    fn file_count(&self) -> usize {
        self.file_count
    }

    fn file_path(&self, index: usize) -> PathBuf {
        self.directory.join(format!("{}.{index}", self.prefix))
    }

    fn particle_count(&self, index: usize) -> PmResult<usize> {
        let mut reader = self.open(index)?;
        Ok(GadgetHeader::read(&mut reader)?.npart[DARK_MATTER] as usize)
    }

    fn read_file(&self, index: usize) -> PmResult<PositionBuffer> {
        let mut reader = self.open(index)?;
        let header = GadgetHeader::read(&mut reader)?;
        let positions = reader.read_values::<f32>(3 * header.total_particles())?;
        let first = 3 * header.npart[0] as usize;
        let count = header.npart[DARK_MATTER] as usize;
        let scale = header.box_size.recip();
        let interleaved = positions[first..first + 3 * count]
            .iter()
            .map(|value| {
                let unit = (f64::from(*value) * scale) as f32;
                if unit >= 1.0 { unit - 1.0 } else { unit }
            })
            .collect();
        Ok(PositionBuffer::Interleaved(interleaved))
    }
}

#[cfg(test)]
mod tests {
    use super::{GadgetHeader, GadgetReader};
    use crate::common::constants::GADGET_HEADER_BYTES;
    use crate::modules::ingest::ParticleFileReader;
    use crate::modules::ingest::records::{FortranRecordReader, encode_record};
    use std::io::Cursor;

    fn header(box_size: f64) -> GadgetHeader {
        GadgetHeader {
            npart: [0, 3, 0, 0, 0, 0],
            time: 0.02,
            redshift: 49.0,
            num_files: 1,
            box_size,
            ..GadgetHeader::default()
        }
    }

    #[test]
    fn header_round_trips_through_its_block() {
        let block = header(250.0).encode();
        assert_eq!(block.len(), GADGET_HEADER_BYTES);
        let mut reader = FortranRecordReader::new(Cursor::new(encode_record(&block)), "snap.0");
        let decoded = GadgetHeader::read(&mut reader).expect("header should parse");
        assert_eq!(decoded, header(250.0));
        assert_eq!(decoded.total_particles(), 3);
    }

    #[test]
    fn zero_box_size_is_rejected() {
        let block = header(0.0).encode();
        let mut reader = FortranRecordReader::new(Cursor::new(encode_record(&block)), "snap.0");
        let error = GadgetHeader::read(&mut reader).expect_err("zero box");
        assert!(error.to_string().contains("BoxSize"));
    }

    #[test]
    fn file_names_start_at_zero() {
        let reader = GadgetReader::new("/snap", "ics", 4);
        assert_eq!(reader.file_path(0), std::path::PathBuf::from("/snap/ics.0"));
        assert_eq!(reader.file_path(3), std::path::PathBuf::from("/snap/ics.3"));
    }
}
