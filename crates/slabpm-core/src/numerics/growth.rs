//! Linear growth histories consumed by ingestion and displacement assignment.

/// Linear growth factor `D(a)` and its time derivative.
///
/// `growth_rate` is `dD/dy` with `y = ln a`, the velocity factor of the
/// Zel'dovich approximation in the same time variable.
pub trait GrowthHistory {
    fn growth(&self, scale_factor: f64) -> f64;

    fn growth_rate(&self, scale_factor: f64) -> f64;

    /// Scale-dependent power ratio against the reference cosmology at
    /// wavenumber `k` (in `h/Mpc` or whatever unit the box uses).
    fn power_ratio(&self, _wavenumber: f64) -> f64 {
        1.0
    }

    /// `D(1) / D(a)`, the factor that brings a present-day field back to `a`.
    fn back_scaling(&self, scale_factor: f64) -> f64 {
        self.growth(1.0) / self.growth(scale_factor)
    }
}

/// Matter-only universe: `D(a) = a`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EinsteinDeSitter;

impl GrowthHistory for EinsteinDeSitter {
    fn growth(&self, scale_factor: f64) -> f64 {
        scale_factor
    }

    fn growth_rate(&self, scale_factor: f64) -> f64 {
        scale_factor
    }
}

/// Growth factor tabulated on increasing scale factors, linearly interpolated
/// and clamped to the end points outside the table.
#[derive(Debug, Clone, PartialEq)]
pub struct TabulatedGrowth {
    scale_factors: Vec<f64>,
    growth: Vec<f64>,
}

impl TabulatedGrowth {
    pub fn new(scale_factors: Vec<f64>, growth: Vec<f64>) -> Result<Self, String> {
        if scale_factors.len() != growth.len() {
            return Err(format!(
                "{} scale factors but {} growth values",
                scale_factors.len(),
                growth.len()
            ));
        }
        if scale_factors.len() < 2 {
            return Err("at least two tabulated points are required".to_string());
        }
        if scale_factors
            .windows(2)
            .any(|pair| !(pair[1] > pair[0]) || pair[0] <= 0.0)
        {
            return Err("scale factors must be positive and strictly increasing".to_string());
        }
        if growth.iter().any(|value| !(value.is_finite() && *value > 0.0)) {
            return Err("growth values must be finite and positive".to_string());
        }
        Ok(Self {
            scale_factors,
            growth,
        })
    }

    fn bracket(&self, scale_factor: f64) -> usize {
        let upper = self
            .scale_factors
            .partition_point(|candidate| *candidate <= scale_factor);
        upper.clamp(1, self.scale_factors.len() - 1) - 1
    }
}

impl GrowthHistory for TabulatedGrowth {
    fn growth(&self, scale_factor: f64) -> f64 {
        let last = self.scale_factors.len() - 1;
        if scale_factor <= self.scale_factors[0] {
            return self.growth[0];
        }
        if scale_factor >= self.scale_factors[last] {
            return self.growth[last];
        }
        let lower = self.bracket(scale_factor);
        let (a0, a1) = (self.scale_factors[lower], self.scale_factors[lower + 1]);
        let (d0, d1) = (self.growth[lower], self.growth[lower + 1]);
        d0 + (d1 - d0) * (scale_factor - a0) / (a1 - a0)
    }

    fn growth_rate(&self, scale_factor: f64) -> f64 {
        let lower = self.bracket(scale_factor);
        let (a0, a1) = (self.scale_factors[lower], self.scale_factors[lower + 1]);
        let (d0, d1) = (self.growth[lower], self.growth[lower + 1]);
        (d1 - d0) / (a1.ln() - a0.ln())
    }
}
