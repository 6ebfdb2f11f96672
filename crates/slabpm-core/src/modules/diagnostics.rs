//! Run-wide grid statistics and the binned power spectrum.

use crate::comm::{Communicator, ReduceOp};
use crate::domain::PmResult;
use crate::mesh::grid::{ComplexGrid, RealGrid};
use crate::numerics::kspace::local_modes;
use crate::numerics::window::WindowDeconvolution;
use serde::Serialize;
use std::f64::consts::TAU;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GridSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub rms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ComplexGridSummary {
    #[serde(rename = "realMin")]
    pub real_min: f64,
    #[serde(rename = "realMax")]
    pub real_max: f64,
    #[serde(rename = "imagMin")]
    pub imag_min: f64,
    #[serde(rename = "imagMax")]
    pub imag_max: f64,
}

/// Min, max, mean and rms over the owned cells of every task.
pub fn summarize_real_grid<C: Communicator + ?Sized>(
    grid: &RealGrid,
    comm: &C,
) -> PmResult<GridSummary> {
    let mut min = [f64::INFINITY];
    let mut max = [f64::NEG_INFINITY];
    let mut sums = [0.0f64; 3];
    for value in grid.owned_cells() {
        min[0] = min[0].min(value);
        max[0] = max[0].max(value);
        sums[0] += value;
        sums[1] += value * value;
        sums[2] += 1.0;
    }
    comm.all_reduce_f64(&mut min, ReduceOp::Min)?;
    comm.all_reduce_f64(&mut max, ReduceOp::Max)?;
    comm.all_reduce_f64(&mut sums, ReduceOp::Sum)?;
    let count = sums[2].max(1.0);
    Ok(GridSummary {
        min: min[0],
        max: max[0],
        mean: sums[0] / count,
        rms: (sums[1] / count).sqrt(),
    })
}

pub fn summarize_complex_grid<C: Communicator + ?Sized>(
    grid: &ComplexGrid,
    comm: &C,
) -> PmResult<ComplexGridSummary> {
    let mut lows = [f64::INFINITY; 2];
    let mut highs = [f64::NEG_INFINITY; 2];
    for value in grid.owned_values() {
        lows[0] = lows[0].min(value.re);
        lows[1] = lows[1].min(value.im);
        highs[0] = highs[0].max(value.re);
        highs[1] = highs[1].max(value.im);
    }
    comm.all_reduce_f64(&mut lows, ReduceOp::Min)?;
    comm.all_reduce_f64(&mut highs, ReduceOp::Max)?;
    Ok(ComplexGridSummary {
        real_min: lows[0],
        real_max: highs[0],
        imag_min: lows[1],
        imag_max: highs[1],
    })
}

/// How the transformed density was normalised before binning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpectrumInput {
    /// Straight out of the forward FFT; `|delta|^2` is divided by `Nmesh^6`.
    RawTransform,
    /// Already divided by `Nmesh^3`.
    Normalized,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PowerSpectrumBin {
    pub k: f64,
    pub power: f64,
    pub modes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PowerSpectrum {
    pub bins: Vec<PowerSpectrumBin>,
}

impl PowerSpectrum {
    /// Two-column `k P(k)` table.
    pub fn to_table(&self) -> String {
        let mut table = String::new();
        for bin in &self.bins {
            let _ = writeln!(table, "{:.10e} {:.10e}", bin.k, bin.power);
        }
        table
    }
}

/// Spherically averaged power spectrum in integer `|k|` bins.
///
/// Each mode is deconvolved with `W^-4` for the CIC assignment, bins are
/// combined across tasks, shot noise `1/Nsample^3` is subtracted and the
/// result is scaled by `BoxSize^3`. Empty bins are dropped.
pub fn power_spectrum<C: Communicator + ?Sized>(
    density: &ComplexGrid,
    box_size: f64,
    nsample: usize,
    input: SpectrumInput,
    comm: &C,
) -> PmResult<PowerSpectrum> {
    let layout = density.layout();
    let nmesh = layout.nmesh();
    let nbins = nmesh;
    let normalization = match input {
        SpectrumInput::RawTransform => (nmesh as f64).powi(6).recip(),
        SpectrumInput::Normalized => 1.0,
    };
    let window = WindowDeconvolution::ASSIGN_AND_INTERPOLATE;

    let mut power = vec![0.0f64; nbins];
    let mut counts = vec![0u64; nbins];
    let values = density.values();
    for mode in local_modes(&layout) {
        let bin = (mode.squared_norm().sqrt() + 0.5) as usize;
        if bin == 0 || bin >= nbins {
            continue;
        }
        power[bin] += values[mode.index].norm_sqr()
            * normalization
            * window.factor(mode.wavenumber, nmesh);
        counts[bin] += 1;
    }
    comm.all_reduce_f64(&mut power, ReduceOp::Sum)?;
    comm.all_reduce_u64(&mut counts, ReduceOp::Sum)?;

    let shot_noise = (nsample as f64).powi(3).recip();
    let volume = box_size.powi(3);
    let bins = power
        .into_iter()
        .zip(counts)
        .enumerate()
        .filter(|(_, (_, modes))| *modes > 0)
        .map(|(index, (sum, modes))| PowerSpectrumBin {
            k: index as f64 * TAU / box_size,
            power: (sum / modes as f64 - shot_noise) * volume,
            modes,
        })
        .collect();
    Ok(PowerSpectrum { bins })
}
