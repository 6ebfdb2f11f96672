//! First-order displacement field from a density contrast, and the particle
//! lattice displaced by it.

use crate::comm::Communicator;
use crate::domain::{LocalDomain, LocalParticles, Particle, PmError, PmResult};
use crate::mesh::fft::SlabFftPlan;
use crate::mesh::grid::{ComplexGrid, RealGrid};
use crate::modules::interpolation::interpolate_point;
use crate::modules::solver::exchange_force_halo;
use crate::numerics::geometry::periodic_wrap;
use crate::numerics::growth::GrowthHistory;
use crate::numerics::kspace::local_modes;
use crate::numerics::window::WindowDeconvolution;
use num_complex::Complex64;
use std::f64::consts::TAU;
use tracing::debug;

/// How initial velocities are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VelocityFrame {
    /// `vel = Psi * dD/dy`.
    #[default]
    Comoving,
    /// Velocities relative to the LPT trajectory, which start at zero.
    Cola,
}

/// `Psi(k) = i k / |k|^2 * delta(k)` per axis, deconvolved by one CIC
/// window and rescaled by the square root of the growth history's power
/// ratio at `|k|`. The DC mode is zero.
pub fn displacement_fields(
    density: &ComplexGrid,
    box_size: f64,
    growth: &dyn GrowthHistory,
) -> [ComplexGrid; 3] {
    let layout = density.layout();
    let nmesh = layout.nmesh();
    let fundamental = TAU / box_size;
    let window = WindowDeconvolution::SINGLE_ASSIGNMENT;
    let mut fields = [
        ComplexGrid::zeros(layout),
        ComplexGrid::zeros(layout),
        ComplexGrid::zeros(layout),
    ];
    let delta = density.values();
    for mode in local_modes(&layout) {
        if mode.is_dc() {
            continue;
        }
        let k = mode.wavenumber.map(|component| component as f64 * fundamental);
        let k_squared = k.iter().map(|component| component * component).sum::<f64>();
        let rescale = growth.power_ratio(k_squared.sqrt()).sqrt();
        let amplitude = delta[mode.index] * window.factor(mode.wavenumber, nmesh) * rescale;
        for (field, component) in fields.iter_mut().zip(k) {
            field.values_mut()[mode.index] =
                Complex64::new(0.0, component / k_squared) * amplitude;
        }
    }
    fields
}

/// Real-space displacement grids with filled halos.
pub fn reconstruct_displacements<C: Communicator + ?Sized>(
    domain: &LocalDomain,
    density: &ComplexGrid,
    growth: &dyn GrowthHistory,
    comm: &C,
) -> PmResult<[RealGrid; 3]> {
    let plan = SlabFftPlan::for_domain(domain);
    let [psi_x, psi_y, psi_z] = displacement_fields(density, domain.config().box_size, growth);
    let mut grids = [
        plan.inverse(psi_x, comm)?,
        plan.inverse(psi_y, comm)?,
        plan.inverse(psi_z, comm)?,
    ];
    for grid in &mut grids {
        exchange_force_halo(domain, grid, comm)?;
    }
    Ok(grids)
}

/// Builds the particles of every lattice plane that lies on this task's mesh
/// slab, displaced to `a_init`.
///
/// Particle IDs are `(i * Nsample + j) * Nsample + k` over the global lattice.
pub fn lattice_particles(
    domain: &LocalDomain,
    displacements: &[RealGrid; 3],
    growth: &dyn GrowthHistory,
    initial_scale_factor: f64,
    frame: VelocityFrame,
) -> PmResult<LocalParticles> {
    let config = domain.config();
    let nsample = config.nsample;
    let box_size = config.box_size;
    let spacing = box_size / nsample as f64;
    let cells = domain.cells_per_length();
    let mesh = domain.mesh();

    let planes: Vec<usize> = (0..nsample)
        .filter(|plane| mesh.owner_of_position(*plane as f64 * spacing, box_size) == domain.rank())
        .collect();
    let nominal = planes.len() * nsample * nsample;
    let capacity = LocalParticles::capacity_for(nominal, config.buffer).max(domain.particle_capacity());
    let mut particles = LocalParticles::with_capacity(capacity);

    let position_growth = growth.growth(initial_scale_factor);
    let velocity_growth = match frame {
        VelocityFrame::Comoving => growth.growth_rate(initial_scale_factor),
        VelocityFrame::Cola => 0.0,
    };
    for &i in &planes {
        for j in 0..nsample {
            for k in 0..nsample {
                let lattice = [i, j, k].map(|index| index as f64 * spacing);
                let Some(psi) = interpolate_point(displacements, lattice.map(|q| q * cells)) else {
                    return Err(PmError::internal(
                        "SYS.LATTICE_OFF_SLAB",
                        format!(
                            "task {} cannot reach lattice plane {i} on its displacement slab",
                            domain.rank()
                        ),
                    ));
                };
                let mut particle = Particle::at(
                    ((i * nsample + j) * nsample + k) as u64,
                    [0.0; 3],
                );
                for axis in 0..3 {
                    particle.pos[axis] =
                        periodic_wrap(lattice[axis] + psi[axis] * position_growth, box_size);
                    particle.vel[axis] = psi[axis] * velocity_growth;
                    particle.dz[axis] = psi[axis];
                }
                particles.push(particle)?;
            }
        }
    }
    debug!(
        task = domain.rank(),
        planes = planes.len(),
        particles = particles.len(),
        "assigned lattice particles"
    );
    Ok(particles)
}

/// Rescales the stored LPT displacements of particles built from a
/// `reference` growth history to the `model` history at `scale_factor`, so
/// the COLA trajectory follows the model. Returns the factor applied.
///
/// Positions and velocities are left alone; they already match the field the
/// files were written for.
pub fn rescale_lpt_displacements(
    particles: &mut LocalParticles,
    reference: &dyn GrowthHistory,
    model: &dyn GrowthHistory,
    scale_factor: f64,
) -> f64 {
    let factor = reference.growth(scale_factor) / model.growth(scale_factor);
    for particle in particles.as_mut_slice() {
        for component in &mut particle.dz {
            *component *= factor;
        }
    }
    factor
}

#[cfg(test)]
mod tests {
    use super::{
        VelocityFrame, displacement_fields, lattice_particles, rescale_lpt_displacements,
    };
    use crate::comm::{Communicator, LocalCluster};
    use crate::common::config::SolverConfig;
    use crate::domain::LocalDomain;
    use crate::mesh::grid::{ComplexGrid, RealGrid, SlabLayout};
    use crate::numerics::growth::{EinsteinDeSitter, GrowthHistory};
    use crate::numerics::window::sinc_window;
    use num_complex::Complex64;

    struct Boosted;

    struct Halved;

    impl GrowthHistory for Halved {
        fn growth(&self, scale_factor: f64) -> f64 {
            0.5 * scale_factor
        }

        fn growth_rate(&self, scale_factor: f64) -> f64 {
            0.5 * scale_factor
        }
    }

    impl GrowthHistory for Boosted {
        fn growth(&self, scale_factor: f64) -> f64 {
            scale_factor
        }

        fn growth_rate(&self, scale_factor: f64) -> f64 {
            scale_factor
        }

        fn power_ratio(&self, _wavenumber: f64) -> f64 {
            4.0
        }
    }

    #[test]
    fn single_mode_gives_imaginary_displacement_along_k() {
        let layout = SlabLayout::new(8, 8, 0);
        let mut density = ComplexGrid::zeros(layout);
        density.set(0, 0, 1, Complex64::new(1.0, 0.0));
        density.set(0, 0, 0, Complex64::new(3.0, 0.0));
        let box_size = std::f64::consts::TAU;
        let fields = displacement_fields(&density, box_size, &EinsteinDeSitter);
        let expected = sinc_window([0, 0, 1], 8).powi(-2);
        let psi_z = fields[2].get(0, 0, 1);
        assert!(psi_z.re.abs() < 1.0e-15);
        assert!((psi_z.im - expected).abs() < 1.0e-12);
        assert_eq!(fields[0].get(0, 0, 1), Complex64::new(0.0, 0.0));
        for field in &fields {
            assert_eq!(field.get(0, 0, 0), Complex64::new(0.0, 0.0));
        }

        let boosted = displacement_fields(&density, box_size, &Boosted);
        assert!((boosted[2].get(0, 0, 1).im - 2.0 * expected).abs() < 1.0e-12);
    }

    #[test]
    fn mirror_row_negates_y_displacement() {
        let layout = SlabLayout::new(8, 8, 0);
        let mut density = ComplexGrid::zeros(layout);
        density.set(1, 2, 0, Complex64::new(1.0, 0.0));
        density.set(1, 6, 0, Complex64::new(1.0, 0.0));
        let fields = displacement_fields(&density, 1.0, &EinsteinDeSitter);
        assert_eq!(fields[1].get(1, 2, 0), -fields[1].get(1, 6, 0));
        assert_eq!(fields[0].get(1, 2, 0), fields[0].get(1, 6, 0));
    }

    #[test]
    fn uniform_displacement_shifts_the_lattice() {
        let config = SolverConfig {
            nmesh: 4,
            nsample: 2,
            box_size: 1.0,
            buffer: 2.0,
            ..SolverConfig::default()
        };
        let particles = LocalCluster::new(2)
            .expect("cluster should build")
            .run_all(|comm| {
                let domain = LocalDomain::new(comm.rank(), 2, config)?;
                let grids = [
                    RealGrid::filled(domain.layout(), 0.1),
                    RealGrid::zeros(domain.layout()),
                    RealGrid::filled(domain.layout(), -0.2),
                ];
                let comoving = lattice_particles(&domain, &grids, &EinsteinDeSitter, 0.5, VelocityFrame::Comoving)?;
                let cola = lattice_particles(&domain, &grids, &EinsteinDeSitter, 0.5, VelocityFrame::Cola)?;
                Ok((comoving.into_vec(), cola.into_vec()))
            })
            .expect("lattice assignment should succeed");

        let (comoving, cola) = &particles[1];
        assert_eq!(comoving.len(), 4);
        let first = comoving[0];
        assert_eq!(first.id, 4);
        assert!((first.pos[0] - 0.55).abs() < 1.0e-12);
        assert!((first.pos[2] - 0.9).abs() < 1.0e-12);
        assert!((first.vel[0] - 0.05).abs() < 1.0e-12);
        assert!((first.dz[2] + 0.2).abs() < 1.0e-12);
        assert!(cola.iter().all(|particle| particle.vel == [0.0; 3]));
        assert_eq!(particles[0].0.len(), 4);
    }

    #[test]
    fn cola_displacements_follow_the_model_growth() {
        let config = SolverConfig {
            nmesh: 4,
            nsample: 2,
            box_size: 1.0,
            buffer: 2.0,
            ..SolverConfig::default()
        };
        let particles = LocalCluster::new(1)
            .expect("cluster should build")
            .run_all(|comm| {
                let domain = LocalDomain::new(comm.rank(), 1, config)?;
                let grids = [
                    RealGrid::filled(domain.layout(), 0.1),
                    RealGrid::zeros(domain.layout()),
                    RealGrid::zeros(domain.layout()),
                ];
                let mut particles =
                    lattice_particles(&domain, &grids, &EinsteinDeSitter, 0.5, VelocityFrame::Cola)?;
                let factor = rescale_lpt_displacements(&mut particles, &EinsteinDeSitter, &Halved, 0.5);
                Ok((factor, particles.into_vec()))
            })
            .expect("lattice assignment should succeed")
            .remove(0);

        let (factor, particles) = particles;
        assert!((factor - 2.0).abs() < 1.0e-12);
        for particle in &particles {
            assert!((particle.dz[0] - 0.2).abs() < 1.0e-12);
            assert_eq!(particle.vel, [0.0; 3]);
        }
        assert!((particles[0].pos[0] - 0.05).abs() < 1.0e-12);
    }
}
