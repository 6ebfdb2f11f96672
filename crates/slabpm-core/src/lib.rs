//! Slab-decomposed particle-mesh gravity.
//!
//! Particles are spread over tasks by X slab. Each force evaluation migrates
//! particles to their slab owner, deposits mass with cloud-in-cell weights,
//! solves the Poisson equation on a distributed FFT and interpolates the force
//! back to the particles.

pub mod comm;
pub mod common;
pub mod domain;
pub mod mesh;
pub mod modules;
pub mod numerics;

pub use domain::{PmError, PmErrorCategory, PmResult};
