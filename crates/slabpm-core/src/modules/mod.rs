pub mod deposition;
pub mod diagnostics;
pub mod ingest;
pub mod interpolation;
pub mod migration;
pub mod pipeline;
pub mod solver;

mod traits;

pub use deposition::{deposit_particles, deposit_point, merge_density_halo, particle_weight};
pub use diagnostics::{
    ComplexGridSummary, GridSummary, PowerSpectrum, PowerSpectrumBin, SpectrumInput,
    power_spectrum, summarize_complex_grid, summarize_real_grid,
};
pub use interpolation::{InterpolatedForces, interpolate_forces, interpolate_point};
pub use migration::{MigrationReport, migrate_particles};
pub use pipeline::{ForceOutcome, ForcePipeline};
pub use solver::{SpectralSolver, exchange_force_halo};
pub use traits::FifthForce;
