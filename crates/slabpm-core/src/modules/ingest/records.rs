//! Unformatted Fortran record framing.
//!
//! Every record is `marker | payload | marker` with both markers holding the
//! payload length in bytes as a native-endian `i32`.

use crate::common::constants::RECORD_MARKER_BYTES;
use crate::domain::PmError;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("failed to read particle file '{}': {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
    #[error("particle file '{}' ends inside record {record}", path.display())]
    Truncated { path: PathBuf, record: usize },
    #[error(
        "particle file '{}' record {record} has leading marker {leading} but trailing marker {trailing}",
        path.display()
    )]
    MarkerMismatch {
        path: PathBuf,
        record: usize,
        leading: i32,
        trailing: i32,
    },
    #[error(
        "particle file '{}' record {record} holds {found} bytes, expected {expected}",
        path.display()
    )]
    LengthMismatch {
        path: PathBuf,
        record: usize,
        expected: usize,
        found: usize,
    },
    #[error("particle file '{}' has an invalid header: {reason}", path.display())]
    Header { path: PathBuf, reason: String },
    #[error("particle file '{}' line {line}: {reason}", path.display())]
    Text {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

impl From<RecordError> for PmError {
    fn from(error: RecordError) -> Self {
        let placeholder = match &error {
            RecordError::Io { .. } => "IO.PARTICLE_FILE",
            RecordError::Truncated { .. }
            | RecordError::MarkerMismatch { .. }
            | RecordError::LengthMismatch { .. } => "IO.PARTICLE_RECORD",
            RecordError::Header { .. } => "IO.PARTICLE_HEADER",
            RecordError::Text { .. } => "IO.PARTICLE_TEXT",
        };
        PmError::io_system(placeholder, error.to_string())
    }
}

/// Sequential reader over the records of one file.
#[derive(Debug)]
pub struct FortranRecordReader<R> {
    inner: R,
    path: PathBuf,
    records_read: usize,
}

impl<R: Read> FortranRecordReader<R> {
    pub fn new(inner: R, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
            records_read: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn records_read(&self) -> usize {
        self.records_read
    }

    /// Reads the next record and checks both markers against its length.
    pub fn read_record(&mut self) -> Result<Vec<u8>, RecordError> {
        let record = self.records_read + 1;
        let leading = self.read_marker(record)?;
        let length = usize::try_from(leading).map_err(|_| RecordError::Header {
            path: self.path.clone(),
            reason: format!("record {record} announces a negative length {leading}"),
        })?;
        let mut payload = vec![0u8; length];
        self.read_exact(&mut payload, record)?;
        let trailing = self.read_marker(record)?;
        if trailing != leading {
            return Err(RecordError::MarkerMismatch {
                path: self.path.clone(),
                record,
                leading,
                trailing,
            });
        }
        self.records_read = record;
        Ok(payload)
    }

    /// Reads a record of exactly `count` values of `T`.
    pub fn read_values<T: bytemuck::Pod>(&mut self, count: usize) -> Result<Vec<T>, RecordError> {
        let payload = self.read_record()?;
        let expected = count * size_of::<T>();
        if payload.len() != expected {
            return Err(RecordError::LengthMismatch {
                path: self.path.clone(),
                record: self.records_read,
                expected,
                found: payload.len(),
            });
        }
        let mut values = vec![T::zeroed(); count];
        bytemuck::cast_slice_mut::<T, u8>(&mut values).copy_from_slice(&payload);
        Ok(values)
    }

    pub fn read_i32(&mut self) -> Result<i32, RecordError> {
        Ok(self.read_values::<i32>(1)?[0])
    }

    fn read_marker(&mut self, record: usize) -> Result<i32, RecordError> {
        let mut marker = [0u8; RECORD_MARKER_BYTES];
        self.read_exact(&mut marker, record)?;
        Ok(i32::from_ne_bytes(marker))
    }

    fn read_exact(&mut self, target: &mut [u8], record: usize) -> Result<(), RecordError> {
        self.inner.read_exact(target).map_err(|source| {
            if source.kind() == io::ErrorKind::UnexpectedEof {
                RecordError::Truncated {
                    path: self.path.clone(),
                    record,
                }
            } else {
                RecordError::Io {
                    path: self.path.clone(),
                    source,
                }
            }
        })
    }
}

/// Frames `payload` as one record.
pub fn encode_record(payload: &[u8]) -> Vec<u8> {
    let marker = (payload.len() as i32).to_ne_bytes();
    let mut record = Vec::with_capacity(payload.len() + 2 * RECORD_MARKER_BYTES);
    record.extend_from_slice(&marker);
    record.extend_from_slice(payload);
    record.extend_from_slice(&marker);
    record
}
