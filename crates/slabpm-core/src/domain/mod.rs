pub mod errors;

pub use errors::{ExitStatus, PmError, PmErrorCategory, PmResult};

use crate::common::config::SolverConfig;
use crate::mesh::grid::SlabLayout;
use crate::numerics::geometry::SlabDecomposition;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::warn;

/// One simulation particle.
///
/// The record is plain old data so migration can ship raw byte blocks between
/// tasks without a serialisation step.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Particle {
    /// Zero when the run carries no explicit identifiers.
    pub id: u64,
    /// Position in `[0, BoxSize)`.
    pub pos: [f64; 3],
    pub vel: [f64; 3],
    /// First-order LPT displacement.
    pub dz: [f64; 3],
    /// Second-order LPT displacement.
    pub d2: [f64; 3],
}

impl Particle {
    pub const BYTES: usize = std::mem::size_of::<Particle>();

    pub fn at(id: u64, pos: [f64; 3]) -> Self {
        Self {
            id,
            pos,
            ..Self::default()
        }
    }
}

/// Unordered particle array with a fixed capacity.
///
/// The capacity is decided once from the nominal particle load and the
/// configured buffer factor; the set never grows past it.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalParticles {
    particles: Vec<Particle>,
    capacity: usize,
}

impl LocalParticles {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            particles: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn from_particles(particles: Vec<Particle>, capacity: usize) -> PmResult<Self> {
        if particles.len() > capacity {
            return Err(PmError::sizing(
                "RUN.PARTICLE_CAPACITY",
                format!(
                    "{} particles exceed the local capacity of {}",
                    particles.len(),
                    capacity
                ),
            ));
        }
        let mut set = Self::with_capacity(capacity);
        set.particles.extend(particles);
        Ok(set)
    }

    /// `ceil(nominal * factor)`, the sizing rule shared by particle and send buffers.
    pub fn capacity_for(nominal: usize, factor: f64) -> usize {
        (nominal as f64 * factor).ceil() as usize
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn free_capacity(&self) -> usize {
        self.capacity - self.particles.len()
    }

    pub fn as_slice(&self) -> &[Particle] {
        &self.particles
    }

    pub fn as_mut_slice(&mut self) -> &mut [Particle] {
        &mut self.particles
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Particle> {
        self.particles.iter()
    }

    pub fn push(&mut self, particle: Particle) -> PmResult<()> {
        if self.particles.len() == self.capacity {
            return Err(PmError::sizing(
                "RUN.PARTICLE_CAPACITY",
                format!("local particle capacity of {} exhausted", self.capacity),
            ));
        }
        self.particles.push(particle);
        Ok(())
    }

    pub fn extend_from_slice(&mut self, incoming: &[Particle]) -> PmResult<()> {
        if incoming.len() > self.free_capacity() {
            return Err(PmError::sizing(
                "RUN.PARTICLE_CAPACITY",
                format!(
                    "{} incoming particles exceed the {} free slots of the local array",
                    incoming.len(),
                    self.free_capacity()
                ),
            ));
        }
        self.particles.extend_from_slice(incoming);
        Ok(())
    }

    /// Removes the particle at `index` by moving the last one into its slot.
    pub fn swap_remove(&mut self, index: usize) -> Particle {
        self.particles.swap_remove(index)
    }

    pub fn into_vec(self) -> Vec<Particle> {
        self.particles
    }
}

impl<'a> IntoIterator for &'a LocalParticles {
    type Item = &'a Particle;
    type IntoIter = std::slice::Iter<'a, Particle>;

    fn into_iter(self) -> Self::IntoIter {
        self.particles.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForceStage {
    Migrate,
    Deposit,
    FifthForce,
    ForwardTransform,
    Solve,
    InverseTransform,
    HaloExchange,
    Interpolate,
    Ingest,
}

impl ForceStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Migrate => "MIGRATE",
            Self::Deposit => "DEPOSIT",
            Self::FifthForce => "FIFTH_FORCE",
            Self::ForwardTransform => "FFT_FORWARD",
            Self::Solve => "SOLVE",
            Self::InverseTransform => "FFT_INVERSE",
            Self::HaloExchange => "HALO",
            Self::Interpolate => "INTERPOLATE",
            Self::Ingest => "INGEST",
        }
    }
}

impl Display for ForceStage {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParticleFileFormat {
    Ramses,
    Ascii,
    Gadget,
}

impl ParticleFileFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ramses => "RAMSES",
            Self::Ascii => "ASCII",
            Self::Gadget => "GADGET",
        }
    }
}

impl Display for ParticleFileFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str((*self).as_str())
    }
}

/// Everything a task knows about its place in the decomposition.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalDomain {
    rank: usize,
    task_count: usize,
    mesh: SlabDecomposition,
    lattice: SlabDecomposition,
    config: SolverConfig,
}

impl LocalDomain {
    pub fn new(rank: usize, task_count: usize, config: SolverConfig) -> PmResult<Self> {
        config.validate().map_err(PmError::from)?;
        if rank >= task_count {
            return Err(PmError::input_validation(
                "INPUT.TASK_RANK",
                format!("rank {rank} is outside a run of {task_count} tasks"),
            ));
        }
        let mesh = SlabDecomposition::new(config.nmesh, task_count)?;
        let lattice = SlabDecomposition::new(config.nsample, task_count)?;
        let idle = task_count - mesh.active_task_count();
        if rank == 0 && idle > 0 {
            warn!(
                idle,
                nmesh = config.nmesh,
                tasks = task_count,
                "some tasks own no mesh slices and sit out the deposit"
            );
        }
        Ok(Self {
            rank,
            task_count,
            mesh,
            lattice,
            config,
        })
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn task_count(&self) -> usize {
        self.task_count
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    pub fn mesh(&self) -> &SlabDecomposition {
        &self.mesh
    }

    pub fn lattice(&self) -> &SlabDecomposition {
        &self.lattice
    }

    pub fn config(&self) -> &SolverConfig {
        &self.config
    }

    pub fn layout(&self) -> SlabLayout {
        SlabLayout::from_decomposition(&self.mesh, self.rank)
    }

    pub fn owns_slices(&self) -> bool {
        self.mesh.count(self.rank) > 0
    }

    /// Mean particle load of this task's mesh slab, `count * Nsample^3 / Nmesh`
    /// rounded up.
    ///
    /// Particles live on the slab that owns their mesh slices, so the load
    /// follows the mesh decomposition even when the lattice splits differently.
    pub fn nominal_particles(&self) -> usize {
        let nsample = self.config.nsample;
        (self.mesh.count(self.rank) * nsample * nsample * nsample).div_ceil(self.config.nmesh)
    }

    pub fn particle_capacity(&self) -> usize {
        LocalParticles::capacity_for(self.nominal_particles(), self.config.buffer)
    }

    /// Per-direction, per-round migration send bound.
    pub fn send_capacity(&self) -> usize {
        LocalParticles::capacity_for(self.nominal_particles(), self.config.buffer - 1.0)
    }

    pub fn empty_particles(&self) -> LocalParticles {
        LocalParticles::with_capacity(self.particle_capacity())
    }

    /// Mesh cells per unit length.
    pub fn cells_per_length(&self) -> f64 {
        self.config.nmesh as f64 / self.config.box_size
    }
}

#[cfg(test)]
mod tests {
    use super::{LocalDomain, LocalParticles, Particle};
    use crate::common::config::SolverConfig;
    use crate::domain::PmErrorCategory;

    #[test]
    fn particle_record_has_no_padding() {
        assert_eq!(Particle::BYTES, 13 * 8);
        let particle = Particle::at(7, [1.0, 2.0, 3.0]);
        let bytes: &[u8] = bytemuck::bytes_of(&particle);
        let decoded: Particle = bytemuck::pod_read_unaligned(bytes);
        assert_eq!(decoded, particle);
    }

    #[test]
    fn swap_remove_moves_last_particle_into_slot() {
        let mut set = LocalParticles::from_particles(
            (0..4).map(|id| Particle::at(id, [0.0; 3])).collect(),
            8,
        )
        .expect("four particles should fit in eight slots");
        let removed = set.swap_remove(1);
        assert_eq!(removed.id, 1);
        let ids: Vec<u64> = set.iter().map(|particle| particle.id).collect();
        assert_eq!(ids, vec![0, 3, 2]);
    }

    #[test]
    fn capacity_overflow_is_a_sizing_error() {
        let mut set = LocalParticles::with_capacity(1);
        set.push(Particle::default())
            .expect("first particle should fit");
        let error = set
            .push(Particle::default())
            .expect_err("second particle should overflow");
        assert_eq!(error.category(), PmErrorCategory::ConfigurationSizingError);
        let error = set
            .extend_from_slice(&[Particle::default()])
            .expect_err("extension should overflow");
        assert_eq!(error.placeholder(), "RUN.PARTICLE_CAPACITY");
    }

    #[test]
    fn domain_capacities_follow_buffer_factor() {
        let config = SolverConfig {
            nmesh: 8,
            nsample: 4,
            box_size: 100.0,
            buffer: 1.5,
            ..SolverConfig::default()
        };
        let domain = LocalDomain::new(0, 2, config).expect("domain should build");
        assert_eq!(domain.nominal_particles(), 2 * 16);
        assert_eq!(domain.particle_capacity(), 48);
        assert_eq!(domain.send_capacity(), 16);
        assert!(domain.owns_slices());
        assert_eq!(domain.layout().local_nx(), 4);
    }

    #[test]
    fn capacities_follow_the_mesh_slab_when_the_lattice_is_coarser() {
        let config = SolverConfig {
            nmesh: 8,
            nsample: 2,
            box_size: 1.0,
            buffer: 10.0,
            ..SolverConfig::default()
        };
        for rank in 0..4 {
            let domain = LocalDomain::new(rank, 4, config).expect("domain should build");
            assert_eq!(domain.lattice().count(rank), usize::from(rank < 2));
            assert_eq!(domain.nominal_particles(), 2);
            assert_eq!(domain.particle_capacity(), 20);
            assert_eq!(domain.send_capacity(), 18);
        }
    }

    #[test]
    fn rank_outside_task_count_is_rejected() {
        let error = LocalDomain::new(3, 2, SolverConfig::default())
            .expect_err("rank 3 of 2 should fail");
        assert_eq!(error.placeholder(), "INPUT.TASK_RANK");
    }
}
