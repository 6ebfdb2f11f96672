use super::records::{FortranRecordReader, RecordError};
use super::{ParticleFileReader, PositionBuffer, fold_unit_interval, open_file};
use crate::domain::{ParticleFileFormat, PmResult};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::PathBuf;

/// Header records at the top of a RAMSES `part_*.out*` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RamsesHeader {
    pub ncpu: i32,
    pub ndim: i32,
    pub npart: usize,
    pub local_seed: [i32; 4],
    pub nstar_tot: i32,
    pub mstar_tot: [i32; 2],
    pub mstar_lost: [i32; 2],
    pub nsink: i32,
}

impl RamsesHeader {
    pub fn read<R: Read>(reader: &mut FortranRecordReader<R>) -> Result<Self, RecordError> {
        let ncpu = reader.read_i32()?;
        let ndim = reader.read_i32()?;
        let npart = reader.read_i32()?;
        let local_seed = read_array::<R, 4>(reader)?;
        let nstar_tot = reader.read_i32()?;
        let mstar_tot = read_array::<R, 2>(reader)?;
        let mstar_lost = read_array::<R, 2>(reader)?;
        let nsink = reader.read_i32()?;
        let npart = usize::try_from(npart).map_err(|_| RecordError::Header {
            path: reader.path().to_path_buf(),
            reason: format!("negative particle count {npart}"),
        })?;
        Ok(Self {
            ncpu,
            ndim,
            npart,
            local_seed,
            nstar_tot,
            mstar_tot,
            mstar_lost,
            nsink,
        })
    }
}

fn read_array<R: Read, const N: usize>(
    reader: &mut FortranRecordReader<R>,
) -> Result<[i32; N], RecordError> {
    let values = reader.read_values::<i32>(N)?;
    let mut array = [0; N];
    array.copy_from_slice(&values);
    Ok(array)
}

/// RAMSES particle output: header, then one record of doubles per axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RamsesReader {
    directory: PathBuf,
    output: u32,
    file_count: usize,
}

impl RamsesReader {
    pub fn new(directory: impl Into<PathBuf>, output: u32, file_count: usize) -> Self {
        Self {
            directory: directory.into(),
            output,
            file_count,
        }
    }

    fn open(&self, index: usize) -> PmResult<FortranRecordReader<BufReader<File>>> {
        let path = self.file_path(index);
        let file = open_file(&path)?;
        Ok(FortranRecordReader::new(file, path))
    }
}

impl ParticleFileReader for RamsesReader {
    fn format(&self) -> ParticleFileFormat {
        ParticleFileFormat::Ramses
    }

    fn file_count(&self) -> usize {
        self.file_count
    }

    /// `part_NNNNN.outXXXXX`, numbered from 1.
    fn file_path(&self, index: usize) -> PathBuf {
        self.directory
            .join(format!("part_{:05}.out{:05}", self.output, index + 1))
    }

    fn particle_count(&self, index: usize) -> PmResult<usize> {
        let mut reader = self.open(index)?;
        Ok(RamsesHeader::read(&mut reader)?.npart)
    }

    fn read_file(&self, index: usize) -> PmResult<PositionBuffer> {
        let mut reader = self.open(index)?;
        let header = RamsesHeader::read(&mut reader)?;
        let mut planar = Vec::with_capacity(3 * header.npart);
        for _ in 0..3 {
            planar.extend(reader.read_values::<f64>(header.npart)?);
        }
        fold_unit_interval(&mut planar);
        Ok(PositionBuffer::Planar(planar))
    }
}
