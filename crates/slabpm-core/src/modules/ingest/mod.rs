//! Ingestion of external particle snapshots.
//!
//! Every task reads every file and keeps what falls on its own slab, either
//! as mass on the density grid or as particles.

pub mod ascii;
pub mod displacement;
pub mod gadget;
pub mod ramses;
pub mod records;

pub use ascii::{AsciiReader, write_ascii_particles};
pub use displacement::{
    VelocityFrame, displacement_fields, lattice_particles, reconstruct_displacements,
    rescale_lpt_displacements,
};
pub use gadget::{GadgetHeader, GadgetReader};
pub use ramses::{RamsesHeader, RamsesReader};
pub use records::{FortranRecordReader, RecordError, encode_record};

use super::deposition::{deposit_point, merge_density_halo, particle_weight};
use super::diagnostics::{summarize_complex_grid, summarize_real_grid};
use crate::comm::{Communicator, ReduceOp};
use crate::common::config::ParticleFileSet;
use crate::common::constants::EMPTY_CELL_CONTRAST;
use crate::domain::{
    ForceStage, LocalDomain, LocalParticles, Particle, ParticleFileFormat, PmError, PmResult,
};
use crate::mesh::fft::SlabFftPlan;
use crate::mesh::grid::{ComplexGrid, RealGrid};
use crate::numerics::growth::GrowthHistory;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Positions of one file in units of the box, in `[0, 1)`.
#[derive(Debug, Clone, PartialEq)]
pub enum PositionBuffer {
    /// `[x0 x1 .. y0 y1 .. z0 z1 ..]`
    Planar(Vec<f64>),
    /// `[x0 y0 z0 x1 y1 z1 ..]`
    Interleaved(Vec<f32>),
}

impl PositionBuffer {
    pub fn len(&self) -> usize {
        match self {
            Self::Planar(values) => values.len() / 3,
            Self::Interleaved(values) => values.len() / 3,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn x(&self, index: usize) -> f64 {
        match self {
            Self::Planar(values) => values[index],
            Self::Interleaved(values) => f64::from(values[3 * index]),
        }
    }

    pub fn position(&self, index: usize) -> [f64; 3] {
        match self {
            Self::Planar(values) => {
                let count = values.len() / 3;
                [
                    values[index],
                    values[index + count],
                    values[index + 2 * count],
                ]
            }
            Self::Interleaved(values) => [
                f64::from(values[3 * index]),
                f64::from(values[3 * index + 1]),
                f64::from(values[3 * index + 2]),
            ],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = [f64; 3]> + '_ {
        (0..self.len()).map(|index| self.position(index))
    }

    /// Smallest and largest coordinate over all axes.
    pub fn bounds(&self) -> Option<(f64, f64)> {
        let coordinates: Box<dyn Iterator<Item = f64> + '_> = match self {
            Self::Planar(values) => Box::new(values.iter().copied()),
            Self::Interleaved(values) => Box::new(values.iter().map(|value| f64::from(*value))),
        };
        coordinates.fold(None, |bounds, value| match bounds {
            None => Some((value, value)),
            Some((low, high)) => Some((low.min(value), high.max(value))),
        })
    }
}

/// One particle-file format.
pub trait ParticleFileReader {
    fn format(&self) -> ParticleFileFormat;

    fn file_count(&self) -> usize;

    /// Path of file `index`, counted from 0 whatever the on-disk numbering.
    fn file_path(&self, index: usize) -> PathBuf;

    /// Particle count announced by the header of file `index`.
    fn particle_count(&self, index: usize) -> PmResult<usize>;

    /// Reads file `index` into a normalised position buffer.
    fn read_file(&self, index: usize) -> PmResult<PositionBuffer>;

    /// Largest per-file particle count, from the headers alone.
    fn max_particles(&self) -> PmResult<usize> {
        let mut largest = 0;
        for index in 0..self.file_count() {
            largest = largest.max(self.particle_count(index)?);
        }
        Ok(largest)
    }
}

pub fn open_reader(files: &ParticleFileSet) -> Box<dyn ParticleFileReader + Send + Sync> {
    match files.format {
        ParticleFileFormat::Ramses => Box::new(RamsesReader::new(
            &files.directory,
            files.ramses_output,
            files.file_count,
        )),
        ParticleFileFormat::Ascii => Box::new(AsciiReader::new(
            &files.directory,
            files.prefix.clone(),
            files.file_count,
        )),
        ParticleFileFormat::Gadget => Box::new(GadgetReader::new(
            &files.directory,
            files.prefix.clone(),
            files.file_count,
        )),
    }
}

pub(crate) fn open_file(path: &Path) -> PmResult<BufReader<File>> {
    File::open(path).map(BufReader::new).map_err(|source| {
        PmError::from(RecordError::Io {
            path: path.to_path_buf(),
            source,
        })
    })
}

/// Folds coordinates that reached 1 back by one box length.
pub(crate) fn fold_unit_interval(values: &mut [f64]) {
    for value in values {
        if *value >= 1.0 {
            *value -= 1.0;
        }
    }
}

/// Density contrast in Fourier space rebuilt from particle files.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestedDensity {
    /// `delta(k)` scaled to `z = 0` and divided by `Nmesh^3`.
    pub density: ComplexGrid,
    pub local_particles: usize,
    pub total_particles: u64,
    /// Smallest and largest normalised coordinate seen in the files.
    pub bounds: Option<(f64, f64)>,
}

/// Deposits every file onto a fresh density grid and returns its transform.
///
/// Particles outside the local slab are skipped; each task reads every file.
/// The transform is divided by `Nmesh^3` and scaled by `D(1) / D(a_init)`.
pub fn build_density_from_files<C: Communicator + ?Sized>(
    domain: &LocalDomain,
    reader: &dyn ParticleFileReader,
    growth: &dyn GrowthHistory,
    initial_scale_factor: f64,
    comm: &C,
) -> PmResult<IngestedDensity> {
    let root = domain.is_root();
    let config = domain.config();
    let nmesh = config.nmesh as f64;
    if root {
        info!(
            stage = %ForceStage::Ingest,
            format = %reader.format(),
            files = reader.file_count(),
            max_particles = reader.max_particles()?,
            "reading particle files"
        );
    }

    let weight = particle_weight(config.nmesh, config.nsample);
    let mut grid = RealGrid::filled(domain.layout(), EMPTY_CELL_CONTRAST);
    let mut local_particles = 0usize;
    let mut read_particles = 0usize;
    let mut bounds: Option<(f64, f64)> = None;
    for index in 0..reader.file_count() {
        let buffer = reader.read_file(index)?;
        for position in buffer.iter() {
            if deposit_point(&mut grid, position.map(|unit| unit * nmesh), weight) {
                local_particles += 1;
            }
        }
        read_particles += buffer.len();
        bounds = match (bounds, buffer.bounds()) {
            (Some((low, high)), Some((file_low, file_high))) => {
                Some((low.min(file_low), high.max(file_high)))
            }
            (seen, file) => seen.or(file),
        };
        if root {
            debug!(
                file = %reader.file_path(index).display(),
                particles = buffer.len(),
                read_so_far = read_particles,
                "read particle file"
            );
        }
    }
    if let (true, Some((low, high))) = (root, bounds) {
        info!(min = low, max = high, "particle coordinate range");
    }

    merge_density_halo(domain, &mut grid, comm)?;
    let summary = summarize_real_grid(&grid, comm)?;
    let mut total = [local_particles as u64];
    comm.all_reduce_u64(&mut total, ReduceOp::Sum)?;
    if root {
        info!(
            particles = total[0],
            min = summary.min,
            max = summary.max,
            mean = summary.mean,
            rms = summary.rms,
            "density from particle files"
        );
    }

    let plan = SlabFftPlan::for_domain(domain);
    let mut density = plan.forward(grid, comm)?;
    let normalization =
        nmesh.powi(3).recip() * growth.back_scaling(initial_scale_factor);
    density.scale(normalization);
    let summary = summarize_complex_grid(&density, comm)?;
    if root {
        info!(
            real_min = summary.real_min,
            real_max = summary.real_max,
            imag_min = summary.imag_min,
            imag_max = summary.imag_max,
            "density contrast in Fourier space"
        );
    }

    Ok(IngestedDensity {
        density,
        local_particles,
        total_particles: total[0],
        bounds,
    })
}

/// Reads the files into this task's particle set.
///
/// Positions are scaled by `BoxSize`, only particles on the local slab are
/// kept and IDs count particles in file order across all files.
pub fn load_particles(
    domain: &LocalDomain,
    reader: &dyn ParticleFileReader,
) -> PmResult<LocalParticles> {
    let box_size = domain.config().box_size;
    let mesh = domain.mesh();
    let mut particles = domain.empty_particles();
    let mut next_id = 0u64;
    for index in 0..reader.file_count() {
        let buffer = reader.read_file(index)?;
        for position in buffer.iter() {
            let id = next_id;
            next_id += 1;
            let pos = position.map(|unit| unit * box_size);
            if mesh.owner_of_position(pos[0], box_size) == domain.rank() {
                particles.push(Particle::at(id, pos))?;
            }
        }
    }
    debug!(
        task = domain.rank(),
        kept = particles.len(),
        read = next_id,
        "loaded particles from files"
    );
    Ok(particles)
}

#[cfg(test)]
mod tests {
    use super::{PositionBuffer, fold_unit_interval};

    #[test]
    fn layouts_agree_on_positions() {
        let planar = PositionBuffer::Planar(vec![0.1, 0.4, 0.2, 0.5, 0.3, 0.6]);
        let interleaved = PositionBuffer::Interleaved(vec![0.5, 0.25, 0.75, 0.0, 0.5, 1.0]);
        assert_eq!(planar.len(), 2);
        assert_eq!(planar.position(1), [0.4, 0.5, 0.6]);
        assert_eq!(planar.x(0), 0.1);
        assert_eq!(interleaved.position(0), [0.5, 0.25, 0.75]);
        assert_eq!(interleaved.bounds(), Some((0.0, 1.0)));
        assert!(PositionBuffer::Planar(Vec::new()).bounds().is_none());
    }

    #[test]
    fn unit_interval_folds_the_upper_edge() {
        let mut values = vec![0.0, 0.999, 1.0, 1.25];
        fold_unit_interval(&mut values);
        assert_eq!(values, vec![0.0, 0.999, 0.0, 0.25]);
    }
}
