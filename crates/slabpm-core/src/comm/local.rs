//! In-process task cluster: one thread per task, mailboxes over mpsc channels.

use super::{CommError, CommResult, Communicator, MessageTag, ReduceOp, decode_pod};
use crate::domain::{PmError, PmResult};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use tracing::{debug, warn};

const ABORT_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Debug)]
struct Envelope {
    source: usize,
    tag: MessageTag,
    payload: Vec<u8>,
}

/// A fixed-size group of tasks that run as scoped threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalCluster {
    size: usize,
}

impl LocalCluster {
    pub fn new(size: usize) -> PmResult<Self> {
        if size == 0 {
            return Err(PmError::input_validation(
                "INPUT.TASK_COUNT",
                "a cluster needs at least one task",
            ));
        }
        Ok(Self { size })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Builds the connected communicators, one per rank.
    pub fn communicators(&self) -> Vec<LocalCommunicator> {
        let (senders, inboxes): (Vec<Sender<Envelope>>, Vec<Receiver<Envelope>>) =
            (0..self.size).map(|_| mpsc::channel()).unzip();
        let aborted = Arc::new(AtomicBool::new(false));
        inboxes
            .into_iter()
            .enumerate()
            .map(|(rank, inbox)| LocalCommunicator {
                rank,
                size: self.size,
                peers: senders.clone(),
                inbox,
                pending: RefCell::new((0..self.size).map(|_| VecDeque::new()).collect()),
                aborted: Arc::clone(&aborted),
            })
            .collect()
    }

    /// Runs `task` once per rank and returns every task's outcome in rank order.
    ///
    /// A task that returns an error raises the shared abort flag, so peers
    /// blocked in a receive fail instead of waiting forever.
    pub fn run<T, F>(&self, task: F) -> Vec<PmResult<T>>
    where
        T: Send,
        F: Fn(&LocalCommunicator) -> PmResult<T> + Sync,
    {
        let communicators = self.communicators();
        std::thread::scope(|scope| {
            let handles: Vec<_> = communicators
                .into_iter()
                .map(|communicator| {
                    let task = &task;
                    scope.spawn(move || {
                        let outcome = task(&communicator);
                        if let Err(error) = &outcome {
                            communicator.abort(error);
                        }
                        outcome
                    })
                })
                .collect();
            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        Err(PmError::internal(
                            "SYS.TASK_PANIC",
                            format!("task {rank} panicked"),
                        ))
                    })
                })
                .collect()
        })
    }

    /// Like [`LocalCluster::run`] but collapses the outcomes into one result.
    ///
    /// When several tasks fail, the first error that is not a knock-on abort
    /// is reported.
    pub fn run_all<T, F>(&self, task: F) -> PmResult<Vec<T>>
    where
        T: Send,
        F: Fn(&LocalCommunicator) -> PmResult<T> + Sync,
    {
        let outcomes = self.run(task);
        let mut values = Vec::with_capacity(outcomes.len());
        let mut knock_on = None;
        let mut root_cause = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => values.push(value),
                Err(error) if error.placeholder() == "IO.COMM_ABORTED" => {
                    knock_on.get_or_insert(error);
                }
                Err(error) => {
                    root_cause.get_or_insert(error);
                }
            }
        }
        match root_cause.or(knock_on) {
            Some(error) => Err(error),
            None => Ok(values),
        }
    }
}

/// Communicator handed to one task of a [`LocalCluster`].
#[derive(Debug)]
pub struct LocalCommunicator {
    rank: usize,
    size: usize,
    peers: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    pending: RefCell<Vec<VecDeque<Envelope>>>,
    aborted: Arc<AtomicBool>,
}

impl LocalCommunicator {
    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    fn check_peer(&self, peer: usize) -> CommResult<()> {
        if peer >= self.size {
            return Err(CommError::InvalidPeer {
                rank: self.rank,
                peer,
                size: self.size,
            });
        }
        Ok(())
    }

    fn post(&self, dest: usize, tag: MessageTag, payload: Vec<u8>) -> CommResult<()> {
        self.check_peer(dest)?;
        self.peers[dest]
            .send(Envelope {
                source: self.rank,
                tag,
                payload,
            })
            .map_err(|_| CommError::Disconnected {
                rank: self.rank,
                peer: dest,
            })
    }

    fn receive(&self, source: usize, tag: MessageTag) -> CommResult<Vec<u8>> {
        self.check_peer(source)?;
        loop {
            let queued = self.pending.borrow_mut()[source].pop_front();
            if let Some(envelope) = queued {
                if envelope.tag != tag {
                    return Err(CommError::TagMismatch {
                        rank: self.rank,
                        peer: source,
                        expected: tag,
                        found: envelope.tag,
                    });
                }
                return Ok(envelope.payload);
            }
            match self.inbox.recv_timeout(ABORT_POLL_INTERVAL) {
                Ok(envelope) => {
                    let from = envelope.source;
                    self.pending.borrow_mut()[from].push_back(envelope);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if self.is_aborted() {
                        return Err(CommError::Aborted { rank: self.rank });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CommError::Disconnected {
                        rank: self.rank,
                        peer: source,
                    });
                }
            }
        }
    }

    fn all_reduce<T>(&self, values: &mut [T], op: ReduceOp) -> CommResult<()>
    where
        T: bytemuck::Pod + PartialOrd + std::ops::Add<Output = T>,
    {
        let payload: Vec<u8> = bytemuck::cast_slice(values).to_vec();
        for peer in (0..self.size).filter(|peer| *peer != self.rank) {
            self.post(peer, MessageTag::Reduce, payload.clone())?;
        }

        // Combine in rank order so every task computes bit-identical results.
        let mut combined: Option<Vec<T>> = None;
        for peer in 0..self.size {
            let contribution = if peer == self.rank {
                values.to_vec()
            } else {
                let bytes = self.receive(peer, MessageTag::Reduce)?;
                let decoded = decode_pod::<T>(&bytes, self.rank, peer, MessageTag::Reduce)?;
                if decoded.len() != values.len() {
                    return Err(CommError::PayloadLength {
                        rank: self.rank,
                        peer,
                        tag: MessageTag::Reduce,
                        expected: payload.len(),
                        found: bytes.len(),
                    });
                }
                decoded
            };
            combined = Some(match combined {
                None => contribution,
                Some(mut acc) => {
                    for (slot, value) in acc.iter_mut().zip(contribution) {
                        *slot = match op {
                            ReduceOp::Sum => *slot + value,
                            ReduceOp::Max if value > *slot => value,
                            ReduceOp::Min if value < *slot => value,
                            ReduceOp::Max | ReduceOp::Min => *slot,
                        };
                    }
                    acc
                }
            });
        }
        if let Some(combined) = combined {
            values.copy_from_slice(&combined);
        }
        Ok(())
    }
}

impl Communicator for LocalCommunicator {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn sendrecv(
        &self,
        payload: &[u8],
        dest: Option<usize>,
        source: Option<usize>,
        tag: MessageTag,
    ) -> CommResult<Vec<u8>> {
        if let Some(dest) = dest {
            self.post(dest, tag, payload.to_vec())?;
        }
        match source {
            Some(source) => self.receive(source, tag),
            None => Ok(Vec::new()),
        }
    }

    fn all_reduce_f64(&self, values: &mut [f64], op: ReduceOp) -> CommResult<()> {
        self.all_reduce(values, op)
    }

    fn all_reduce_u64(&self, values: &mut [u64], op: ReduceOp) -> CommResult<()> {
        self.all_reduce(values, op)
    }

    fn abort(&self, error: &PmError) {
        if !self.aborted.swap(true, Ordering::SeqCst) {
            warn!(task = self.rank, "aborting run: {}", error.diagnostic_line());
        } else {
            debug!(task = self.rank, "run already aborted: {}", error);
        }
    }
}

impl Drop for LocalCommunicator {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.aborted.store(true, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::LocalCluster;
    use crate::comm::{Communicator, MessageTag, ReduceOp};
    use crate::domain::{PmError, PmErrorCategory};

    #[test]
    fn ring_sendrecv_delivers_left_neighbour_payload() {
        let cluster = LocalCluster::new(4).expect("cluster should build");
        let received = cluster
            .run_all(|comm| {
                let size = comm.size();
                let right = (comm.rank() + 1) % size;
                let left = (comm.rank() + size - 1) % size;
                let bytes = comm.sendrecv(
                    &[comm.rank() as u8],
                    Some(right),
                    Some(left),
                    MessageTag::DensityHalo,
                )?;
                Ok(bytes)
            })
            .expect("ring exchange should succeed");
        assert_eq!(received, vec![vec![3], vec![0], vec![1], vec![2]]);
    }

    #[test]
    fn null_peers_skip_the_exchange() {
        let cluster = LocalCluster::new(2).expect("cluster should build");
        let received = cluster
            .run_all(|comm| {
                let count = comm.sendrecv_count(5, None, None, MessageTag::MigrationCount)?;
                Ok(count)
            })
            .expect("null exchange should succeed");
        assert_eq!(received, vec![0, 0]);
    }

    #[test]
    fn reductions_agree_on_every_task() {
        let cluster = LocalCluster::new(3).expect("cluster should build");
        let results = cluster
            .run_all(|comm| {
                let mut sums = [comm.rank() as f64, 1.0];
                comm.all_reduce_f64(&mut sums, ReduceOp::Sum)?;
                let mut extremes = [comm.rank() as u64 * 10];
                comm.all_reduce_u64(&mut extremes, ReduceOp::Max)?;
                let mut lows = [comm.rank() as f64 - 1.0];
                comm.all_reduce_f64(&mut lows, ReduceOp::Min)?;
                Ok((sums, extremes[0], lows[0]))
            })
            .expect("reductions should succeed");
        for (sums, max, min) in results {
            assert_eq!(sums, [3.0, 3.0]);
            assert_eq!(max, 20);
            assert_eq!(min, -1.0);
        }
    }

    #[test]
    fn all_to_all_delivers_each_block_to_its_peer() {
        let cluster = LocalCluster::new(3).expect("cluster should build");
        let results = cluster
            .run_all(|comm| {
                let blocks = (0..comm.size())
                    .map(|peer| vec![(10 * comm.rank() + peer) as u8; peer + 1])
                    .collect();
                Ok(comm.all_to_all(blocks, MessageTag::Transpose)?)
            })
            .expect("exchange should succeed");
        for (rank, received) in results.into_iter().enumerate() {
            let expected: Vec<Vec<u8>> = (0..3)
                .map(|source| vec![(10 * source + rank) as u8; rank + 1])
                .collect();
            assert_eq!(received, expected);
        }
    }

    #[test]
    fn all_to_all_rejects_a_short_block_list() {
        let error = LocalCluster::new(2)
            .expect("cluster should build")
            .run_all(|comm| Ok(comm.all_to_all(vec![Vec::new()], MessageTag::Transpose)?))
            .expect_err("two tasks need two blocks");
        assert_eq!(error.placeholder(), "IO.COMM_PROTOCOL");
    }

    #[test]
    fn failing_task_aborts_blocked_peers() {
        let cluster = LocalCluster::new(3).expect("cluster should build");
        let error = cluster
            .run_all(|comm| -> Result<(), PmError> {
                if comm.rank() == 1 {
                    return Err(PmError::sizing(
                        "RUN.MIGRATE_RECV_OVERFLOW",
                        "task 1 ran out of particle slots",
                    ));
                }
                let mut values = [1.0];
                comm.all_reduce_f64(&mut values, ReduceOp::Sum)?;
                Ok(())
            })
            .expect_err("run should fail");
        assert_eq!(error.placeholder(), "RUN.MIGRATE_RECV_OVERFLOW");
        assert_eq!(error.category(), PmErrorCategory::ConfigurationSizingError);
    }

    #[test]
    fn mismatched_tags_are_protocol_errors() {
        let cluster = LocalCluster::new(2).expect("cluster should build");
        let outcomes = cluster.run(|comm| {
            let other = 1 - comm.rank();
            let tag = if comm.rank() == 0 {
                MessageTag::ForceHalo
            } else {
                MessageTag::DensityHalo
            };
            comm.sendrecv(&[0], Some(other), Some(other), tag)?;
            Ok(())
        });
        assert!(outcomes.iter().all(|outcome| {
            outcome
                .as_ref()
                .is_err_and(|error| error.placeholder() == "IO.COMM_PROTOCOL")
        }));
    }

    #[test]
    fn empty_cluster_is_rejected() {
        assert!(LocalCluster::new(0).is_err());
    }
}
