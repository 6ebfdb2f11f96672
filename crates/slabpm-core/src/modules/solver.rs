//! Fourier-space Poisson solve and the force halo exchange.

use crate::comm::{Communicator, MessageTag};
use crate::common::config::SolverConfig;
use crate::domain::{LocalDomain, PmError, PmResult};
use crate::mesh::grid::{ComplexGrid, RealGrid};
use crate::numerics::kspace::local_modes;
use crate::numerics::window::WindowDeconvolution;
use num_complex::Complex64;
use std::f64::consts::TAU;

/// Turns the transformed density contrast into the three force components.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpectralSolver {
    box_size: f64,
    window: WindowDeconvolution,
}

impl SpectralSolver {
    pub fn new(config: &SolverConfig) -> Self {
        Self {
            box_size: config.box_size,
            window: config.force_window,
        }
    }

    pub fn with_window(mut self, window: WindowDeconvolution) -> Self {
        self.window = window;
        self
    }

    /// Fundamental wavenumber `2 pi / BoxSize`.
    pub fn scale(&self) -> f64 {
        TAU / self.box_size
    }

    /// Fills `forces` with `i d / Scale * phi(k)` per axis, where
    /// `phi = -(delta + source) W(d) / |d|^2 / Nmesh^3`.
    ///
    /// Every owned complex entry of the three targets is written; the DC mode
    /// is zero.
    pub fn solve(
        &self,
        density: &ComplexGrid,
        fifth_force: Option<&ComplexGrid>,
        forces: &mut [ComplexGrid; 3],
    ) -> PmResult<()> {
        let layout = density.layout();
        let grids_match = fifth_force.is_none_or(|source| source.layout() == layout)
            && forces.iter().all(|force| force.layout() == layout);
        if !grids_match {
            return Err(PmError::internal(
                "SYS.SOLVER_LAYOUT",
                "density, fifth-force source and force grids must share one layout",
            ));
        }

        let nmesh = layout.nmesh();
        let cells = (nmesh * nmesh * nmesh) as f64;
        let scale = self.scale();
        let delta = density.values();
        let source = fifth_force.map(ComplexGrid::values);
        let [fx, fy, fz] = forces;
        let (fx, fy, fz) = (fx.values_mut(), fy.values_mut(), fz.values_mut());

        for mode in local_modes(&layout) {
            let index = mode.index;
            if mode.is_dc() {
                fx[index] = Complex64::new(0.0, 0.0);
                fy[index] = Complex64::new(0.0, 0.0);
                fz[index] = Complex64::new(0.0, 0.0);
                continue;
            }
            let kernel = -self.window.factor(mode.wavenumber, nmesh) / mode.squared_norm() / cells;
            let mut potential = delta[index] * kernel;
            if let Some(source) = source {
                potential += source[index] * kernel;
            }
            let [dx, dy, dz] = mode.wavenumber.map(|component| component as f64 / scale);
            fx[index] = Complex64::new(0.0, dx) * potential;
            fy[index] = Complex64::new(0.0, dy) * potential;
            fz[index] = Complex64::new(0.0, dz) * potential;
        }
        Ok(())
    }
}

/// Copies the right neighbour's first owned slice into this task's halo.
///
/// The halo is zeroed first and the incoming slice added, so a task whose
/// right neighbour is itself ends with a copy of its own first slice.
pub fn exchange_force_halo<C: Communicator + ?Sized>(
    domain: &LocalDomain,
    grid: &mut RealGrid,
    comm: &C,
) -> PmResult<()> {
    let (left, right) = domain.mesh().neighbours(domain.rank(), 1);
    let outgoing: &[f64] = if domain.owns_slices() {
        grid.slice(0)
    } else {
        &[]
    };
    let received = comm.sendrecv_f64s(outgoing, left, right, MessageTag::ForceHalo)?;
    let halo = grid.halo_mut();
    halo.fill(0.0);
    if let Some(right) = right {
        if received.len() != halo.len() {
            return Err(PmError::io_system(
                "IO.COMM_PROTOCOL",
                format!(
                    "task {} received a force halo of {} values from task {right}, expected {}",
                    domain.rank(),
                    received.len(),
                    halo.len()
                ),
            ));
        }
        for (cell, incoming) in halo.iter_mut().zip(received) {
            *cell += incoming;
        }
    }
    Ok(())
}
