pub mod fft;
pub mod grid;

pub use fft::SlabFftPlan;
pub use grid::{ComplexGrid, RealGrid, SlabLayout};
