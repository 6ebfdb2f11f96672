//! JSON run configuration and its validation rules.

use crate::domain::{ParticleFileFormat, PmError};
use crate::numerics::growth::{EinsteinDeSitter, GrowthHistory, TabulatedGrowth};
use crate::numerics::window::WindowDeconvolution;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use super::constants::DEFAULT_BUFFER;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum GridResidency {
    /// Grids are allocated at the start of every force computation and
    /// released before it returns.
    #[serde(rename = "perStep")]
    PerStep,
    /// Grid buffers are kept between calls and reused.
    #[default]
    #[serde(rename = "persistent")]
    Persistent,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct SolverConfig {
    pub nmesh: usize,
    pub nsample: usize,
    #[serde(rename = "boxSize")]
    pub box_size: f64,
    #[serde(default = "default_buffer")]
    pub buffer: f64,
    #[serde(rename = "gridResidency", default)]
    pub grid_residency: GridResidency,
    #[serde(rename = "forceWindow", default)]
    pub force_window: WindowDeconvolution,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            nmesh: 64,
            nsample: 64,
            box_size: 100.0,
            buffer: DEFAULT_BUFFER,
            grid_residency: GridResidency::default(),
            force_window: WindowDeconvolution::default(),
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), RunConfigError> {
        if self.nmesh < 2 || self.nmesh % 2 != 0 {
            return Err(RunConfigError::Invalid {
                field: "solver.nmesh",
                reason: format!("must be an even number >= 2, found {}", self.nmesh),
            });
        }
        if self.nsample == 0 {
            return Err(RunConfigError::Invalid {
                field: "solver.nsample",
                reason: "must be >= 1".to_string(),
            });
        }
        if !(self.box_size.is_finite() && self.box_size > 0.0) {
            return Err(RunConfigError::Invalid {
                field: "solver.boxSize",
                reason: format!("must be a positive length, found {}", self.box_size),
            });
        }
        if !(self.buffer.is_finite() && self.buffer >= 1.0) {
            return Err(RunConfigError::Invalid {
                field: "solver.buffer",
                reason: format!("must be >= 1, found {}", self.buffer),
            });
        }
        Ok(())
    }
}

fn default_buffer() -> f64 {
    DEFAULT_BUFFER
}

fn default_tasks() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ParticleFileSet {
    pub format: ParticleFileFormat,
    pub directory: PathBuf,
    /// File stem for ASCII and GADGET sets.
    #[serde(default)]
    pub prefix: String,
    /// Output number `NNNNN` in `part_NNNNN.outXXXXX` for RAMSES sets.
    #[serde(rename = "ramsesOutput", default)]
    pub ramses_output: u32,
    #[serde(rename = "fileCount")]
    pub file_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum ParticleSource {
    /// Unperturbed particle lattice of `Nsample^3` particles.
    #[default]
    #[serde(rename = "lattice")]
    Lattice,
    #[serde(rename = "files")]
    Files(ParticleFileSet),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum GrowthConfig {
    #[default]
    #[serde(rename = "einsteinDeSitter")]
    EinsteinDeSitter,
    #[serde(rename = "tabulated")]
    Tabulated {
        #[serde(rename = "scaleFactors")]
        scale_factors: Vec<f64>,
        growth: Vec<f64>,
    },
}

impl GrowthConfig {
    pub fn build(&self) -> Result<Box<dyn GrowthHistory + Send + Sync>, RunConfigError> {
        match self {
            Self::EinsteinDeSitter => Ok(Box::new(EinsteinDeSitter)),
            Self::Tabulated {
                scale_factors,
                growth,
            } => TabulatedGrowth::new(scale_factors.clone(), growth.clone())
                .map(|table| Box::new(table) as Box<dyn GrowthHistory + Send + Sync>)
                .map_err(|reason| RunConfigError::Invalid {
                    field: "growth",
                    reason,
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub report: Option<PathBuf>,
    #[serde(rename = "powerSpectrum", default)]
    pub power_spectrum: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RunConfig {
    pub solver: SolverConfig,
    #[serde(default = "default_tasks")]
    pub tasks: usize,
    #[serde(default)]
    pub particles: ParticleSource,
    #[serde(rename = "initialRedshift", default)]
    pub initial_redshift: f64,
    #[serde(default)]
    pub growth: GrowthConfig,
    /// Growth history the particle files were generated for; `growth` when
    /// absent.
    #[serde(rename = "referenceGrowth", default)]
    pub reference_growth: Option<GrowthConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), RunConfigError> {
        self.solver.validate()?;
        if self.tasks == 0 {
            return Err(RunConfigError::Invalid {
                field: "tasks",
                reason: "must be >= 1".to_string(),
            });
        }
        if !(self.initial_redshift.is_finite() && self.initial_redshift > -1.0) {
            return Err(RunConfigError::Invalid {
                field: "initialRedshift",
                reason: format!("must be > -1, found {}", self.initial_redshift),
            });
        }
        if let ParticleSource::Files(files) = &self.particles
            && files.file_count == 0
        {
            return Err(RunConfigError::Invalid {
                field: "particles.fileCount",
                reason: "must be >= 1".to_string(),
            });
        }
        self.growth.build()?;
        if let Some(reference) = &self.reference_growth {
            reference.build().map_err(|error| match error {
                RunConfigError::Invalid { reason, .. } => RunConfigError::Invalid {
                    field: "referenceGrowth",
                    reason,
                },
                other => other,
            })?;
        }
        Ok(())
    }

    pub fn reference_growth(&self) -> &GrowthConfig {
        self.reference_growth.as_ref().unwrap_or(&self.growth)
    }

    pub fn initial_scale_factor(&self) -> f64 {
        1.0 / (1.0 + self.initial_redshift)
    }

    /// Resolves relative paths in the file set and outputs against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        if let ParticleSource::Files(files) = &mut self.particles
            && files.directory.is_relative()
        {
            files.directory = base.join(&files.directory);
        }
        for path in [&mut self.output.report, &mut self.output.power_spectrum]
            .into_iter()
            .flatten()
        {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RunConfigError {
    #[error("failed to read run configuration '{}': {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse run configuration '{}': {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("invalid run configuration field '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl From<RunConfigError> for PmError {
    fn from(error: RunConfigError) -> Self {
        match error {
            RunConfigError::Read { .. } => PmError::io_system("IO.CONFIG_READ", error.to_string()),
            RunConfigError::Parse { .. } => {
                PmError::input_validation("INPUT.CONFIG_PARSE", error.to_string())
            }
            RunConfigError::Invalid { .. } => {
                PmError::input_validation("INPUT.CONFIG_FIELD", error.to_string())
            }
        }
    }
}

pub fn load_run_config(config_path: impl AsRef<Path>) -> Result<RunConfig, RunConfigError> {
    let config_path = config_path.as_ref();
    let source = fs::read_to_string(config_path).map_err(|source| RunConfigError::Read {
        path: config_path.to_path_buf(),
        source,
    })?;
    let config: RunConfig =
        serde_json::from_str(&source).map_err(|source| RunConfigError::Parse {
            path: config_path.to_path_buf(),
            source,
        })?;
    config.validate()?;
    Ok(config)
}
