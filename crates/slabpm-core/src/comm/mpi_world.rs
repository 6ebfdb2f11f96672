//! One task per MPI process, over the rsmpi world communicator.

use super::{CommError, CommResult, Communicator, MessageTag, ReduceOp};
use crate::domain::PmError;
use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::{Communicator as _, CommunicatorCollectives, Destination, Source};
use tracing::error;

pub struct MpiCommunicator {
    world: SimpleCommunicator,
    // Declared last so the world communicator is released before finalize.
    _universe: Universe,
}

impl MpiCommunicator {
    pub fn initialize() -> CommResult<Self> {
        let universe = mpi::initialize()
            .ok_or_else(|| CommError::Unavailable("MPI was already initialised".to_string()))?;
        let world = universe.world();
        Ok(Self {
            world,
            _universe: universe,
        })
    }

    fn operation(op: ReduceOp) -> SystemOperation {
        match op {
            ReduceOp::Sum => SystemOperation::sum(),
            ReduceOp::Max => SystemOperation::max(),
            ReduceOp::Min => SystemOperation::min(),
        }
    }
}

impl Communicator for MpiCommunicator {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn sendrecv(
        &self,
        payload: &[u8],
        dest: Option<usize>,
        source: Option<usize>,
        tag: MessageTag,
    ) -> CommResult<Vec<u8>> {
        let tag = tag.code();
        let received = match (dest, source) {
            (Some(dest), Some(source)) => mpi::request::scope(|scope| {
                let request = self
                    .world
                    .process_at_rank(dest as i32)
                    .immediate_send_with_tag(scope, payload, tag);
                let (received, _status) = self
                    .world
                    .process_at_rank(source as i32)
                    .receive_vec_with_tag::<u8>(tag);
                request.wait();
                received
            }),
            (Some(dest), None) => {
                self.world
                    .process_at_rank(dest as i32)
                    .send_with_tag(payload, tag);
                Vec::new()
            }
            (None, Some(source)) => {
                self.world
                    .process_at_rank(source as i32)
                    .receive_vec_with_tag::<u8>(tag)
                    .0
            }
            (None, None) => Vec::new(),
        };
        Ok(received)
    }

    fn all_reduce_f64(&self, values: &mut [f64], op: ReduceOp) -> CommResult<()> {
        let local = values.to_vec();
        self.world
            .all_reduce_into(&local[..], values, Self::operation(op));
        Ok(())
    }

    fn all_reduce_u64(&self, values: &mut [u64], op: ReduceOp) -> CommResult<()> {
        let local = values.to_vec();
        self.world
            .all_reduce_into(&local[..], values, Self::operation(op));
        Ok(())
    }

    fn abort(&self, failure: &PmError) {
        error!(task = self.rank(), "{}", failure.diagnostic_line());
        self.world.abort(failure.exit_code())
    }
}
