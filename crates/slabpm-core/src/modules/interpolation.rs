//! CIC gather of the mesh forces back to particle positions.

use crate::comm::{Communicator, ReduceOp};
use crate::domain::{ForceStage, LocalDomain, Particle, PmError, PmResult};
use crate::mesh::grid::RealGrid;
use crate::numerics::cic::CicStencil;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedForces {
    /// One entry per local particle, in particle-array order.
    pub displacements: Vec<[f64; 3]>,
    /// Mean displacement over every particle of the run.
    pub mean_displacement: [f64; 3],
    pub total_particles: u64,
}

/// Gathers the three force components at one point in mesh-cell units.
pub fn interpolate_point(forces: &[RealGrid; 3], cell_coordinates: [f64; 3]) -> Option<[f64; 3]> {
    let layout = forces[0].layout();
    let stencil = CicStencil::locate(
        cell_coordinates,
        layout.nmesh(),
        layout.local_x_start(),
        layout.local_nx(),
    )?;
    let mut value = [0.0; 3];
    for ([ix, iy, iz], weight) in stencil.corners() {
        for (component, grid) in value.iter_mut().zip(forces) {
            *component += weight * grid.get(ix, iy, iz);
        }
    }
    Some(value)
}

/// Interpolates the force grids (halos filled) to every local particle and
/// computes the run-wide mean.
///
/// An empty run is rejected on every task alike, after the reductions.
pub fn interpolate_forces<C: Communicator + ?Sized>(
    domain: &LocalDomain,
    particles: &[Particle],
    forces: &[RealGrid; 3],
    comm: &C,
) -> PmResult<InterpolatedForces> {
    if domain.is_root() {
        info!(stage = %ForceStage::Interpolate, "interpolating mesh forces to particles");
    }
    let scale = domain.cells_per_length();
    let mut displacements = Vec::with_capacity(particles.len());
    let mut sums = [0.0f64; 3];
    for particle in particles {
        let cells = particle.pos.map(|coordinate| coordinate * scale);
        let Some(value) = interpolate_point(forces, cells) else {
            return Err(PmError::computation(
                "RUN.INTERPOLATE_OFF_SLAB",
                format!(
                    "task {} cannot interpolate particle {} at x={} outside its slab",
                    domain.rank(),
                    particle.id,
                    particle.pos[0]
                ),
            ));
        };
        for (sum, component) in sums.iter_mut().zip(value) {
            *sum += component;
        }
        displacements.push(value);
    }

    comm.all_reduce_f64(&mut sums, ReduceOp::Sum)?;
    let mut total = [particles.len() as u64];
    comm.all_reduce_u64(&mut total, ReduceOp::Sum)?;
    let total_particles = total[0];
    if total_particles == 0 {
        return Err(PmError::input_validation(
            "INPUT.EMPTY_PARTICLE_SET",
            "no particles in the run; the mean displacement is undefined",
        ));
    }

    let mean_displacement = sums.map(|sum| sum / total_particles as f64);
    if domain.is_root() {
        info!(
            particles = total_particles,
            mean_x = mean_displacement[0],
            mean_y = mean_displacement[1],
            mean_z = mean_displacement[2],
            "mean displacement"
        );
    }
    Ok(InterpolatedForces {
        displacements,
        mean_displacement,
        total_particles,
    })
}
