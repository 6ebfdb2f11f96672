pub mod cic;
pub mod geometry;
pub mod growth;
pub mod kspace;
pub mod window;

pub use cic::CicStencil;
pub use geometry::{SlabDecomposition, periodic_wrap, slice_index};
pub use growth::{EinsteinDeSitter, GrowthHistory, TabulatedGrowth};
pub use kspace::{FourierMode, folded_wavenumber, local_modes};
pub use window::{WindowDeconvolution, sinc_window};
