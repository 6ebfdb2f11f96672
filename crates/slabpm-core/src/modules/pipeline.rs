//! One force evaluation: migrate, deposit, solve, interpolate.

use super::deposition::{deposit_particles, merge_density_halo};
use super::interpolation::{InterpolatedForces, interpolate_forces};
use super::migration::{MigrationReport, migrate_particles};
use super::solver::{SpectralSolver, exchange_force_halo};
use super::traits::FifthForce;
use crate::comm::Communicator;
use crate::common::config::GridResidency;
use crate::common::constants::EMPTY_CELL_CONTRAST;
use crate::domain::{ForceStage, LocalDomain, LocalParticles, PmResult};
use crate::mesh::fft::SlabFftPlan;
use crate::mesh::grid::{ComplexGrid, RealGrid, SlabLayout};
use tracing::{debug, info};

/// Grid buffers kept between force evaluations in persistent residency.
#[derive(Debug, Default)]
struct GridPool {
    residency: GridResidency,
    spare: Vec<Vec<f64>>,
}

impl GridPool {
    fn new(residency: GridResidency) -> Self {
        Self {
            residency,
            spare: Vec::new(),
        }
    }

    fn real(&mut self, layout: SlabLayout, value: f64) -> RealGrid {
        match self.spare.pop() {
            Some(buffer) => RealGrid::from_buffer(layout, buffer, value),
            None => RealGrid::filled(layout, value),
        }
    }

    fn complex(&mut self, layout: SlabLayout) -> ComplexGrid {
        match self.spare.pop() {
            Some(buffer) => ComplexGrid::from_buffer(layout, buffer),
            None => ComplexGrid::zeros(layout),
        }
    }

    fn recycle(&mut self, buffer: Vec<f64>) {
        if self.residency == GridResidency::Persistent {
            self.spare.push(buffer);
        }
    }

    fn held(&self) -> usize {
        self.spare.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForceOutcome {
    pub migration: MigrationReport,
    pub forces: InterpolatedForces,
}

/// Per-task force pipeline. Owns the FFT plan for its lifetime.
pub struct ForcePipeline<'a, C: Communicator + ?Sized> {
    domain: &'a LocalDomain,
    comm: &'a C,
    plan: SlabFftPlan,
    solver: SpectralSolver,
    pool: GridPool,
}

impl<'a, C: Communicator + ?Sized> ForcePipeline<'a, C> {
    pub fn new(domain: &'a LocalDomain, comm: &'a C) -> Self {
        let config = domain.config();
        Self {
            domain,
            comm,
            plan: SlabFftPlan::for_domain(domain),
            solver: SpectralSolver::new(config),
            pool: GridPool::new(config.grid_residency),
        }
    }

    pub fn domain(&self) -> &LocalDomain {
        self.domain
    }

    /// Buffers currently parked in the pool; always zero in per-step residency.
    pub fn pooled_buffers(&self) -> usize {
        self.pool.held()
    }

    /// Runs every stage of one force evaluation and returns the displacement
    /// of each local particle, in the particle array's order after migration.
    pub fn compute_displacements(
        &mut self,
        particles: &mut LocalParticles,
        fifth_force: Option<&mut dyn FifthForce>,
    ) -> PmResult<ForceOutcome> {
        let domain = self.domain;
        let comm = self.comm;
        let layout = domain.layout();
        let root = domain.is_root();

        let migration = migrate_particles(domain, particles, comm)?;

        if root {
            info!(stage = %ForceStage::Deposit, "assigning mass to the mesh");
        }
        let mut density = self.pool.real(layout, EMPTY_CELL_CONTRAST);
        deposit_particles(domain, particles.as_slice(), &mut density)?;
        merge_density_halo(domain, &mut density, comm)?;

        let density_copy = fifth_force.is_some().then(|| density.clone());

        if root {
            info!(stage = %ForceStage::ForwardTransform, "transforming density");
        }
        let density_k = self.plan.forward(density, comm)?;

        let source = match (fifth_force, density_copy) {
            (Some(step), Some(density_copy)) => {
                if root {
                    info!(stage = %ForceStage::FifthForce, "computing fifth-force source");
                }
                let source = step.potential_source(&density_copy, &density_k)?;
                self.pool.recycle(density_copy.into_buffer());
                Some(source)
            }
            _ => None,
        };

        if root {
            info!(stage = %ForceStage::Solve, "solving Poisson equation");
        }
        let mut forces_k = [
            self.pool.complex(layout),
            self.pool.complex(layout),
            self.pool.complex(layout),
        ];
        self.solver.solve(&density_k, source.as_ref(), &mut forces_k)?;
        self.pool.recycle(density_k.into_buffer());
        if let Some(source) = source {
            self.pool.recycle(source.into_buffer());
        }

        if root {
            info!(stage = %ForceStage::InverseTransform, "transforming forces back");
        }
        let [fx, fy, fz] = forces_k;
        let mut forces = [
            self.plan.inverse(fx, comm)?,
            self.plan.inverse(fy, comm)?,
            self.plan.inverse(fz, comm)?,
        ];
        for grid in &mut forces {
            exchange_force_halo(domain, grid, comm)?;
        }

        let interpolated = interpolate_forces(domain, particles.as_slice(), &forces, comm)?;
        for grid in forces {
            self.pool.recycle(grid.into_buffer());
        }
        debug!(
            task = domain.rank(),
            pooled = self.pool.held(),
            "force evaluation finished"
        );

        Ok(ForceOutcome {
            migration,
            forces: interpolated,
        })
    }
}
