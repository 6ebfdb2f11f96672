use crate::domain::PmResult;
use crate::mesh::grid::{ComplexGrid, RealGrid};

/// External modified-gravity step.
///
/// Receives a copy of the real-space density contrast (halo merged) and the
/// forward-transformed density, and returns an extra potential source in the
/// same complex layout. The solver adds it to the density with the Poisson
/// kernel applied.
pub trait FifthForce {
    fn potential_source(
        &mut self,
        density: &RealGrid,
        density_k: &ComplexGrid,
    ) -> PmResult<ComplexGrid>;
}

impl<F> FifthForce for F
where
    F: FnMut(&RealGrid, &ComplexGrid) -> PmResult<ComplexGrid>,
{
    fn potential_source(
        &mut self,
        density: &RealGrid,
        density_k: &ComplexGrid,
    ) -> PmResult<ComplexGrid> {
        self(density, density_k)
    }
}
