//! Multi-hop particle migration between slab owners.
//!
//! Phase one classifies every particle by destination task and direction,
//! ships the one-hop migrants and agrees on the largest hop count. Phase two
//! runs one round per further hop distance, moving exactly the particles of
//! that distance straight to a task that many non-empty steps away.

use crate::comm::{CommError, Communicator, MessageTag, ReduceOp, decode_pod};
use crate::domain::{ForceStage, LocalDomain, LocalParticles, Particle, PmError, PmResult};
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrationReport {
    /// Exchange rounds run, phase one included.
    pub rounds: usize,
    pub sent_left: usize,
    pub sent_right: usize,
    pub received: usize,
}

#[derive(Debug, Default)]
struct RoundBatch {
    left: Vec<Particle>,
    right: Vec<Particle>,
    max_hops: usize,
}

pub fn migrate_particles<C: Communicator + ?Sized>(
    domain: &LocalDomain,
    particles: &mut LocalParticles,
    comm: &C,
) -> PmResult<MigrationReport> {
    if domain.is_root() {
        info!(stage = %ForceStage::Migrate, "moving particles to their slab owners");
    }
    if !domain.owns_slices() && !particles.is_empty() {
        return Err(PmError::input_validation(
            "INPUT.PARTICLES_ON_EMPTY_TASK",
            format!(
                "task {} owns no slab but holds {} particles",
                domain.rank(),
                particles.len()
            ),
        ));
    }

    let mut report = MigrationReport::default();
    let first = classify(domain, particles, 1)?;
    let mut max_hops = [first.max_hops as u64];
    comm.all_reduce_u64(&mut max_hops, ReduceOp::Max)?;
    exchange_round(domain, particles, comm, 1, first, &mut report)?;

    for round in 2..=max_hops[0] as usize {
        let batch = classify(domain, particles, round)?;
        exchange_round(domain, particles, comm, round, batch, &mut report)?;
    }

    report.rounds = (max_hops[0] as usize).max(1);
    debug!(
        task = domain.rank(),
        rounds = report.rounds,
        sent_left = report.sent_left,
        sent_right = report.sent_right,
        received = report.received,
        held = particles.len(),
        "migration finished"
    );
    Ok(report)
}

/// Removes the particles whose shorter hop distance equals `round`.
fn classify(
    domain: &LocalDomain,
    particles: &mut LocalParticles,
    round: usize,
) -> PmResult<RoundBatch> {
    let mesh = domain.mesh();
    let rank = domain.rank();
    let box_size = domain.config().box_size;
    let send_capacity = domain.send_capacity();
    let mut batch = RoundBatch::default();

    let mut index = 0;
    while index < particles.len() {
        let particle = particles.as_slice()[index];
        let dest = mesh.owner_of_position(particle.pos[0], box_size);
        if dest == rank {
            index += 1;
            continue;
        }
        let Some((left_hops, right_hops)) = mesh.hop_counts(rank, dest) else {
            return Err(PmError::internal(
                "SYS.MIGRATE_ROUTE",
                format!("task {rank} found no route to task {dest}"),
            ));
        };
        let (go_left, hops) = if left_hops <= right_hops {
            (true, left_hops)
        } else {
            (false, right_hops)
        };
        batch.max_hops = batch.max_hops.max(hops);
        if hops != round {
            index += 1;
            continue;
        }

        let moved = particles.swap_remove(index);
        let (outgoing, side) = if go_left {
            (&mut batch.left, "left")
        } else {
            (&mut batch.right, "right")
        };
        outgoing.push(moved);
        if outgoing.len() > send_capacity {
            return Err(PmError::sizing(
                "RUN.MIGRATE_SEND_OVERFLOW",
                format!(
                    "task {rank} needs to send more than {send_capacity} particles {side} in round {round}; increase the buffer factor"
                ),
            ));
        }
    }
    Ok(batch)
}

fn exchange_round<C: Communicator + ?Sized>(
    domain: &LocalDomain,
    particles: &mut LocalParticles,
    comm: &C,
    round: usize,
    batch: RoundBatch,
    report: &mut MigrationReport,
) -> PmResult<()> {
    let rank = domain.rank();
    let (left, right) = domain.mesh().neighbours(rank, round);

    let from_right = comm.sendrecv_count(
        batch.left.len() as u64,
        left,
        right,
        MessageTag::MigrationCount,
    )? as usize;
    let from_left = comm.sendrecv_count(
        batch.right.len() as u64,
        right,
        left,
        MessageTag::MigrationCount,
    )? as usize;

    if particles.len() + from_left + from_right > particles.capacity() {
        return Err(PmError::sizing(
            "RUN.MIGRATE_RECV_OVERFLOW",
            format!(
                "task {rank} holds {} particles and would receive {} more in round {round}, over its capacity of {}; increase the buffer factor",
                particles.len(),
                from_left + from_right,
                particles.capacity()
            ),
        ));
    }

    let payload = comm.sendrecv(
        bytemuck::cast_slice(&batch.left),
        left,
        right,
        MessageTag::MigrationPayload,
    )?;
    let arrived = decode_particles(&payload, from_right, rank, right)?;
    particles.extend_from_slice(&arrived)?;

    let payload = comm.sendrecv(
        bytemuck::cast_slice(&batch.right),
        right,
        left,
        MessageTag::MigrationPayload,
    )?;
    let arrived = decode_particles(&payload, from_left, rank, left)?;
    particles.extend_from_slice(&arrived)?;

    report.sent_left += batch.left.len();
    report.sent_right += batch.right.len();
    report.received += from_left + from_right;
    Ok(())
}

fn decode_particles(
    payload: &[u8],
    announced: usize,
    rank: usize,
    source: Option<usize>,
) -> PmResult<Vec<Particle>> {
    let Some(peer) = source else {
        return Ok(Vec::new());
    };
    if payload.len() != announced * Particle::BYTES {
        return Err(CommError::PayloadLength {
            rank,
            peer,
            tag: MessageTag::MigrationPayload,
            expected: announced * Particle::BYTES,
            found: payload.len(),
        }
        .into());
    }
    decode_pod(payload, rank, peer, MessageTag::MigrationPayload).map_err(PmError::from)
}

#[cfg(test)]
mod tests {
    use super::{decode_particles, migrate_particles};
    use crate::comm::{Communicator, LocalCluster};
    use crate::common::config::SolverConfig;
    use crate::domain::{LocalDomain, LocalParticles, Particle, PmErrorCategory};

    fn config(nmesh: usize, nsample: usize, buffer: f64) -> SolverConfig {
        SolverConfig {
            nmesh,
            nsample,
            box_size: 1.0,
            buffer,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn particles_reach_owner_on_two_tasks() {
        let outcomes = LocalCluster::new(2)
            .expect("cluster should build")
            .run_all(|comm| {
                let domain = LocalDomain::new(comm.rank(), 2, config(4, 4, 2.0))?;
                let mut particles = domain.empty_particles();
                if comm.rank() == 0 {
                    particles.push(Particle::at(1, [0.1, 0.0, 0.0]))?;
                    particles.push(Particle::at(2, [0.75, 0.0, 0.0]))?;
                    particles.push(Particle::at(3, [0.9, 0.5, 0.5]))?;
                }
                let report = migrate_particles(&domain, &mut particles, comm)?;
                let mut ids: Vec<u64> = particles.iter().map(|particle| particle.id).collect();
                ids.sort_unstable();
                Ok((report, ids))
            })
            .expect("migration should succeed");
        assert_eq!(outcomes[0].1, vec![1]);
        assert_eq!(outcomes[1].1, vec![2, 3]);
        assert_eq!(outcomes[0].0.rounds, 1);
        assert_eq!(outcomes[0].0.sent_left, 2);
        assert_eq!(outcomes[1].0.received, 2);
    }

    #[test]
    fn send_overflow_is_a_sizing_error() {
        let error = LocalCluster::new(2)
            .expect("cluster should build")
            .run_all(|comm| {
                // One mesh slice holds four nominal particles, so buffer 1.25 leaves one send slot.
                let domain = LocalDomain::new(comm.rank(), 2, config(2, 2, 1.25))?;
                let mut particles = LocalParticles::with_capacity(16);
                if comm.rank() == 0 {
                    particles.push(Particle::at(1, [0.6, 0.0, 0.0]))?;
                    particles.push(Particle::at(2, [0.7, 0.0, 0.0]))?;
                }
                migrate_particles(&domain, &mut particles, comm)?;
                Ok(())
            })
            .expect_err("two migrants should overflow a one-slot send buffer");
        assert_eq!(error.placeholder(), "RUN.MIGRATE_SEND_OVERFLOW");
        assert_eq!(error.category(), PmErrorCategory::ConfigurationSizingError);
    }

    #[test]
    fn receive_overflow_is_a_sizing_error() {
        let error = LocalCluster::new(2)
            .expect("cluster should build")
            .run_all(|comm| {
                let domain = LocalDomain::new(comm.rank(), 2, config(2, 2, 4.0))?;
                let mut particles = LocalParticles::with_capacity(2);
                if comm.rank() == 0 {
                    particles.push(Particle::at(1, [0.6, 0.0, 0.0]))?;
                    particles.push(Particle::at(2, [0.7, 0.0, 0.0]))?;
                } else {
                    particles.push(Particle::at(3, [0.8, 0.0, 0.0]))?;
                }
                migrate_particles(&domain, &mut particles, comm)?;
                Ok(())
            })
            .expect_err("task 1 should run out of slots");
        assert_eq!(error.placeholder(), "RUN.MIGRATE_RECV_OVERFLOW");
    }

    #[test]
    fn particles_on_empty_task_are_rejected() {
        let error = LocalCluster::new(3)
            .expect("cluster should build")
            .run_all(|comm| {
                let domain = LocalDomain::new(comm.rank(), 3, config(2, 2, 2.0))?;
                let mut particles = domain.empty_particles();
                if comm.rank() == 2 {
                    particles = LocalParticles::with_capacity(1);
                    particles.push(Particle::at(1, [0.1, 0.0, 0.0]))?;
                }
                migrate_particles(&domain, &mut particles, comm)?;
                Ok(())
            })
            .expect_err("a slab-less task holding particles should fail");
        assert_eq!(error.placeholder(), "INPUT.PARTICLES_ON_EMPTY_TASK");
    }

    #[test]
    fn short_payload_is_a_protocol_error() {
        let error = decode_particles(&[0u8; 10], 1, 0, Some(1))
            .expect_err("ten bytes cannot hold one particle");
        assert_eq!(error.placeholder(), "IO.COMM_PROTOCOL");
        assert!(
            decode_particles(&[], 0, 0, None)
                .expect("null peer yields nothing")
                .is_empty()
        );
    }
}
