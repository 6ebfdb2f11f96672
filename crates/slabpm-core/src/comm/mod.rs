//! Inter-task communication seam.
//!
//! Every PM component talks to its peers through [`Communicator`]: blocking
//! paired send/receive with optional (null) peers, and all-reduce collectives.
//! [`LocalCluster`] runs the tasks as threads of one process; the `mpi` cargo
//! feature adds an rsmpi-backed implementation for one process per task.

pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi_world;

pub use local::{LocalCluster, LocalCommunicator};

use crate::domain::PmError;
use std::fmt::{Display, Formatter};

pub type CommResult<T> = Result<T, CommError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageTag {
    DensityHalo = 1,
    ForceHalo = 2,
    MigrationCount = 3,
    MigrationPayload = 4,
    Reduce = 5,
    Transpose = 6,
}

impl MessageTag {
    pub const fn code(self) -> i32 {
        self as i32
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DensityHalo => "density-halo",
            Self::ForceHalo => "force-halo",
            Self::MigrationCount => "migration-count",
            Self::MigrationPayload => "migration-payload",
            Self::Reduce => "reduce",
            Self::Transpose => "transpose",
        }
    }
}

impl Display for MessageTag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
    Min,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CommError {
    #[error("task {rank} stopped waiting: another task aborted the run")]
    Aborted { rank: usize },
    #[error("task {rank} lost its connection to task {peer}")]
    Disconnected { rank: usize, peer: usize },
    #[error("task {rank} expected a {expected} message from task {peer}, found {found}")]
    TagMismatch {
        rank: usize,
        peer: usize,
        expected: MessageTag,
        found: MessageTag,
    },
    #[error(
        "task {rank} received {found} bytes of {tag} data from task {peer}, expected {expected}"
    )]
    PayloadLength {
        rank: usize,
        peer: usize,
        tag: MessageTag,
        expected: usize,
        found: usize,
    },
    #[error("task {rank} prepared {found} {tag} blocks for a run of {expected} tasks")]
    BlockCount {
        rank: usize,
        tag: MessageTag,
        expected: usize,
        found: usize,
    },
    #[error("task {rank} addressed peer {peer} in a run of {size} tasks")]
    InvalidPeer {
        rank: usize,
        peer: usize,
        size: usize,
    },
    #[error("communication backend unavailable: {0}")]
    Unavailable(String),
}

impl From<CommError> for PmError {
    fn from(error: CommError) -> Self {
        let placeholder = match error {
            CommError::Aborted { .. } => "IO.COMM_ABORTED",
            CommError::Disconnected { .. } => "IO.COMM_DISCONNECTED",
            CommError::TagMismatch { .. }
            | CommError::PayloadLength { .. }
            | CommError::BlockCount { .. } => "IO.COMM_PROTOCOL",
            CommError::InvalidPeer { .. } => "IO.COMM_PEER",
            CommError::Unavailable(_) => "IO.COMM_UNAVAILABLE",
        };
        PmError::io_system(placeholder, error.to_string())
    }
}

/// Paired point-to-point exchange plus collectives for one task of a run.
///
/// A `None` peer is the null process: nothing is sent to it and an empty
/// payload is "received" from it. Tasks that own no slab pass `None` for both
/// peers but still enter every call, so collectives always see the full run.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Sends `payload` to `dest` and receives one message from `source`.
    fn sendrecv(
        &self,
        payload: &[u8],
        dest: Option<usize>,
        source: Option<usize>,
        tag: MessageTag,
    ) -> CommResult<Vec<u8>>;

    fn all_reduce_f64(&self, values: &mut [f64], op: ReduceOp) -> CommResult<()>;

    fn all_reduce_u64(&self, values: &mut [u64], op: ReduceOp) -> CommResult<()>;

    /// Ends the run on every task after a fatal error on this one.
    fn abort(&self, error: &PmError);

    /// Personalised exchange: `blocks[peer]` goes to `peer`, and the result
    /// holds what every task addressed to this one, indexed by rank.
    fn all_to_all(&self, mut blocks: Vec<Vec<u8>>, tag: MessageTag) -> CommResult<Vec<Vec<u8>>> {
        let size = self.size();
        let rank = self.rank();
        if blocks.len() != size {
            return Err(CommError::BlockCount {
                rank,
                tag,
                expected: size,
                found: blocks.len(),
            });
        }
        let mut received = vec![Vec::new(); size];
        received[rank] = std::mem::take(&mut blocks[rank]);
        for step in 1..size {
            let dest = (rank + step) % size;
            let source = (rank + size - step) % size;
            received[source] = self.sendrecv(&blocks[dest], Some(dest), Some(source), tag)?;
        }
        Ok(received)
    }

    /// Exchanges a single count; the null source yields zero.
    fn sendrecv_count(
        &self,
        count: u64,
        dest: Option<usize>,
        source: Option<usize>,
        tag: MessageTag,
    ) -> CommResult<u64> {
        let received = self.sendrecv(bytemuck::bytes_of(&count), dest, source, tag)?;
        match source {
            None => Ok(0),
            Some(peer) => {
                let values = decode_pod::<u64>(&received, self.rank(), peer, tag)?;
                match values.as_slice() {
                    [value] => Ok(*value),
                    _ => Err(CommError::PayloadLength {
                        rank: self.rank(),
                        peer,
                        tag,
                        expected: 8,
                        found: received.len(),
                    }),
                }
            }
        }
    }

    fn sendrecv_f64s(
        &self,
        values: &[f64],
        dest: Option<usize>,
        source: Option<usize>,
        tag: MessageTag,
    ) -> CommResult<Vec<f64>> {
        let received = self.sendrecv(bytemuck::cast_slice(values), dest, source, tag)?;
        match source {
            None => Ok(Vec::new()),
            Some(peer) => decode_pod(&received, self.rank(), peer, tag),
        }
    }
}

/// Reads a received byte block back into plain-old-data values.
pub fn decode_pod<T: bytemuck::Pod>(
    bytes: &[u8],
    rank: usize,
    peer: usize,
    tag: MessageTag,
) -> CommResult<Vec<T>> {
    let width = std::mem::size_of::<T>();
    if bytes.len() % width != 0 {
        return Err(CommError::PayloadLength {
            rank,
            peer,
            tag,
            expected: bytes.len() / width * width,
            found: bytes.len(),
        });
    }
    Ok(bytes
        .chunks_exact(width)
        .map(bytemuck::pod_read_unaligned)
        .collect())
}
