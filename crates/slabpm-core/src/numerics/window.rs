//! Mass-assignment window deconvolution.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Fourier-space correction for the smoothing of a CIC mass assignment.
///
/// `Sinc { exponent }` multiplies each mode by `W(k)^-exponent`, where `W` is
/// the product over axes of `sin(pi d / N) / (pi d / N)`. One CIC pass
/// smooths by `W^2`, so deposit plus interpolation is undone by exponent 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(tag = "kind")]
pub enum WindowDeconvolution {
    #[default]
    #[serde(rename = "disabled")]
    Disabled,
    #[serde(rename = "sinc")]
    Sinc { exponent: i32 },
}

impl WindowDeconvolution {
    /// Undoes a single CIC assignment.
    pub const SINGLE_ASSIGNMENT: Self = Self::Sinc { exponent: 2 };
    /// Undoes a CIC assignment followed by a CIC interpolation.
    pub const ASSIGN_AND_INTERPOLATE: Self = Self::Sinc { exponent: 4 };

    pub fn factor(&self, wavenumber: [i64; 3], nmesh: usize) -> f64 {
        match *self {
            Self::Disabled => 1.0,
            Self::Sinc { exponent } => sinc_window(wavenumber, nmesh).powi(-exponent),
        }
    }
}

/// Product of `sin(x) / x` over the three axes with `x = pi d / nmesh`.
pub fn sinc_window(wavenumber: [i64; 3], nmesh: usize) -> f64 {
    wavenumber
        .into_iter()
        .filter(|component| *component != 0)
        .map(|component| {
            let x = PI * component as f64 / nmesh as f64;
            x.sin() / x
        })
        .product()
}

#[cfg(test)]
mod tests {
    use super::{WindowDeconvolution, sinc_window};

    #[test]
    fn disabled_window_is_identity() {
        assert_eq!(WindowDeconvolution::Disabled.factor([3, -2, 1], 16), 1.0);
    }

    #[test]
    fn dc_mode_has_unit_window() {
        assert_eq!(sinc_window([0, 0, 0], 16), 1.0);
        assert_eq!(
            WindowDeconvolution::ASSIGN_AND_INTERPOLATE.factor([0, 0, 0], 16),
            1.0
        );
    }

    #[test]
    fn nyquist_window_matches_two_over_pi() {
        let window = sinc_window([8, 0, 0], 16);
        assert!((window - 2.0 / std::f64::consts::PI).abs() < 1.0e-14);
        let factor = WindowDeconvolution::SINGLE_ASSIGNMENT.factor([8, 0, 0], 16);
        assert!((factor - window.powi(-2)).abs() < 1.0e-12);
    }

    #[test]
    fn window_is_even_in_each_component() {
        assert_eq!(sinc_window([3, -2, 1], 16), sinc_window([-3, 2, -1], 16));
    }
}
