//! CIC mass deposition onto the local slab and the density halo merge.

use crate::comm::{Communicator, MessageTag};
use crate::common::constants::EMPTY_CELL_CONTRAST;
use crate::domain::{LocalDomain, Particle, PmError, PmResult};
use crate::mesh::grid::RealGrid;
use crate::numerics::cic::CicStencil;
use tracing::debug;

/// Mass of one particle in units of the mean mass per cell.
pub fn particle_weight(nmesh: usize, nsample: usize) -> f64 {
    (nmesh as f64 / nsample as f64).powi(3)
}

/// Adds `weight` to the eight cells around `cell_coordinates`.
///
/// Returns `false`, leaving the grid untouched, when the point is not on this
/// task's slab.
pub fn deposit_point(grid: &mut RealGrid, cell_coordinates: [f64; 3], weight: f64) -> bool {
    let layout = grid.layout();
    let Some(stencil) = CicStencil::locate(
        cell_coordinates,
        layout.nmesh(),
        layout.local_x_start(),
        layout.local_nx(),
    ) else {
        return false;
    };
    for ([ix, iy, iz], corner_weight) in stencil.corners() {
        grid.add(ix, iy, iz, weight * corner_weight);
    }
    true
}

/// Builds the local density contrast from the task's particles.
///
/// The grid, halo and padding included, starts at `-1` and receives every
/// particle with weight `(Nmesh/Nsample)^3`. A particle off the local slab
/// means migration did not run and is a computation error.
pub fn deposit_particles(
    domain: &LocalDomain,
    particles: &[Particle],
    grid: &mut RealGrid,
) -> PmResult<()> {
    let config = domain.config();
    let scale = domain.cells_per_length();
    let weight = particle_weight(config.nmesh, config.nsample);
    grid.fill(EMPTY_CELL_CONTRAST);
    for particle in particles {
        let cells = particle.pos.map(|coordinate| coordinate * scale);
        if !deposit_point(grid, cells, weight) {
            return Err(PmError::computation(
                "RUN.DEPOSIT_OFF_SLAB",
                format!(
                    "task {} holds particle {} at x={} outside its slab [{}, {})",
                    domain.rank(),
                    particle.id,
                    particle.pos[0],
                    domain.mesh().start(domain.rank()),
                    domain.mesh().start(domain.rank()) + domain.mesh().count(domain.rank())
                ),
            ));
        }
    }
    debug!(task = domain.rank(), particles = particles.len(), "deposited particles");
    Ok(())
}

/// Hands the halo slice to the right neighbour and folds the slice received
/// from the left neighbour into the first owned slice.
///
/// Both slices started at `-1`, so the incoming values are shifted by `+1`
/// before being added. The shift applies on every task with a left
/// neighbour, including tasks that hold no particles of their own; the mass
/// spilled into their first slice still has to land on a `-1` baseline.
pub fn merge_density_halo<C: Communicator + ?Sized>(
    domain: &LocalDomain,
    grid: &mut RealGrid,
    comm: &C,
) -> PmResult<()> {
    let (left, right) = domain.mesh().neighbours(domain.rank(), 1);
    let received = comm.sendrecv_f64s(grid.halo(), right, left, MessageTag::DensityHalo)?;
    if let Some(left) = left {
        let first = grid.slice_mut(0);
        if received.len() != first.len() {
            return Err(PmError::io_system(
                "IO.COMM_PROTOCOL",
                format!(
                    "task {} received a density halo of {} values from task {left}, expected {}",
                    domain.rank(),
                    received.len(),
                    first.len()
                ),
            ));
        }
        for (cell, incoming) in first.iter_mut().zip(received) {
            *cell += incoming + 1.0;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{deposit_particles, deposit_point, merge_density_halo, particle_weight};
    use crate::comm::{Communicator, LocalCluster};
    use crate::common::config::SolverConfig;
    use crate::domain::{LocalDomain, Particle, PmErrorCategory};
    use crate::mesh::grid::{RealGrid, SlabLayout};

    fn config(nmesh: usize, nsample: usize) -> SolverConfig {
        SolverConfig {
            nmesh,
            nsample,
            box_size: nmesh as f64,
            ..SolverConfig::default()
        }
    }

    #[test]
    fn weight_scales_with_lattice_ratio() {
        assert_eq!(particle_weight(8, 4), 8.0);
        assert_eq!(particle_weight(4, 4), 1.0);
    }

    #[test]
    fn cell_centred_particle_loads_one_cell() {
        let domain = LocalDomain::new(0, 1, config(4, 2)).expect("domain should build");
        let mut grid = RealGrid::zeros(domain.layout());
        deposit_particles(&domain, &[Particle::at(0, [1.0, 2.0, 3.0])], &mut grid)
            .expect("deposit should succeed");
        assert_eq!(grid.get(1, 2, 3), -1.0 + 8.0);
        let loaded = grid.owned_cells().filter(|value| *value != -1.0).count();
        assert_eq!(loaded, 1);
    }

    #[test]
    fn off_slab_particle_is_a_computation_error() {
        let domain = LocalDomain::new(0, 2, config(4, 4)).expect("domain should build");
        let mut grid = RealGrid::zeros(domain.layout());
        let error = deposit_particles(&domain, &[Particle::at(9, [3.0, 0.0, 0.0])], &mut grid)
            .expect_err("particle on the other slab should fail");
        assert_eq!(error.category(), PmErrorCategory::ComputationError);
        assert!(error.message().contains("particle 9"));
    }

    #[test]
    fn points_off_the_slab_leave_grid_untouched() {
        let layout = SlabLayout::new(4, 2, 2);
        let mut grid = RealGrid::zeros(layout);
        assert!(!deposit_point(&mut grid, [0.5, 0.0, 0.0], 1.0));
        assert!(grid.as_slice().iter().all(|value| *value == 0.0));
    }

    #[test]
    fn halo_merge_restores_single_task_density() {
        let particles = [
            Particle::at(0, [1.5, 0.25, 3.75]),
            Particle::at(1, [3.5, 2.0, 0.5]),
        ];
        let serial = LocalCluster::new(1)
            .expect("cluster should build")
            .run_all(|comm| {
                let domain = LocalDomain::new(0, 1, config(4, 4))?;
                let mut grid = RealGrid::zeros(domain.layout());
                deposit_particles(&domain, &particles, &mut grid)?;
                merge_density_halo(&domain, &mut grid, comm)?;
                Ok(grid.owned_cells().collect::<Vec<_>>())
            })
            .expect("serial deposit should succeed")
            .remove(0);

        let split = LocalCluster::new(2)
            .expect("cluster should build")
            .run_all(|comm| {
                let rank = comm.rank();
                let domain = LocalDomain::new(rank, 2, config(4, 4))?;
                let mut grid = RealGrid::zeros(domain.layout());
                let owned: Vec<Particle> = particles
                    .iter()
                    .copied()
                    .filter(|particle| domain.mesh().owner_of_position(particle.pos[0], 4.0) == rank)
                    .collect();
                deposit_particles(&domain, &owned, &mut grid)?;
                merge_density_halo(&domain, &mut grid, comm)?;
                Ok(grid.owned_cells().collect::<Vec<_>>())
            })
            .expect("split deposit should succeed");

        let stitched: Vec<f64> = split.into_iter().flatten().collect();
        assert_eq!(stitched.len(), serial.len());
        for (a, b) in stitched.iter().zip(&serial) {
            assert!((a - b).abs() < 1.0e-12);
        }
        let total: f64 = serial.iter().sum();
        assert!((total - (2.0 - 64.0)).abs() < 1.0e-9);
    }

    #[test]
    fn halo_merge_keeps_mass_on_a_task_without_particles() {
        let totals = LocalCluster::new(2)
            .expect("cluster should build")
            .run_all(|comm| {
                let domain = LocalDomain::new(comm.rank(), 2, config(4, 4))?;
                let mut grid = RealGrid::zeros(domain.layout());
                let owned = if comm.rank() == 0 {
                    vec![Particle::at(0, [1.5, 0.5, 0.5])]
                } else {
                    Vec::new()
                };
                deposit_particles(&domain, &owned, &mut grid)?;
                merge_density_halo(&domain, &mut grid, comm)?;
                Ok(grid.owned_cells().sum::<f64>())
            })
            .expect("deposit should succeed");
        // Task 1 receives part of the particle over its halo but deposits nothing.
        assert!(totals[1] > -32.0 + 1.0e-9);
        assert!((totals[0] + totals[1] - (1.0 - 64.0)).abs() < 1.0e-9);
    }
}
