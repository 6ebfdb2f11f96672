//! Enumeration of the locally stored Fourier modes of a slab grid.

use crate::mesh::grid::SlabLayout;

/// Signed wavenumber of FFT index `index` on an axis of `nmesh` points.
pub fn folded_wavenumber(index: usize, nmesh: usize) -> i64 {
    if index > nmesh / 2 {
        index as i64 - nmesh as i64
    } else {
        index as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourierMode {
    /// Offset into the complex view of the grid.
    pub index: usize,
    pub wavenumber: [i64; 3],
    /// Set for the `Nmesh - j` rows filled from their `j` partner.
    pub is_mirror: bool,
}

impl FourierMode {
    pub fn is_dc(&self) -> bool {
        self.wavenumber == [0, 0, 0]
    }

    pub fn squared_norm(&self) -> f64 {
        self.wavenumber
            .iter()
            .map(|component| (component * component) as f64)
            .sum()
    }
}

/// Every locally stored mode, visiting rows `j <= Nmesh/2` and, for
/// `0 < j < Nmesh/2`, the mirror row `Nmesh - j` with the Y wavenumber negated.
///
/// With an even `Nmesh` the two passes together cover every stored row once.
pub fn local_modes(layout: &SlabLayout) -> impl Iterator<Item = FourierMode> + use<> {
    let layout = *layout;
    let nmesh = layout.nmesh();
    let half = nmesh / 2;
    let nz = layout.complex_nz();
    (0..layout.local_nx()).flat_map(move |ix| {
        let kx = folded_wavenumber(ix + layout.local_x_start(), nmesh);
        (0..=half).flat_map(move |j| {
            let mirrored = (j > 0 && j < half).then_some(nmesh - j);
            (0..nz).flat_map(move |kz| {
                let direct = FourierMode {
                    index: layout.complex_index(ix, j, kz),
                    wavenumber: [kx, j as i64, kz as i64],
                    is_mirror: false,
                };
                let mirror = mirrored.map(|row| FourierMode {
                    index: layout.complex_index(ix, row, kz),
                    wavenumber: [kx, -(j as i64), kz as i64],
                    is_mirror: true,
                });
                std::iter::once(direct).chain(mirror)
            })
        })
    })
}

#[cfg(test)]
mod tests {
    use super::{folded_wavenumber, local_modes};
    use crate::mesh::grid::SlabLayout;
    use std::collections::BTreeSet;

    #[test]
    fn folding_keeps_nyquist_positive() {
        let folded: Vec<i64> = (0..8).map(|index| folded_wavenumber(index, 8)).collect();
        assert_eq!(folded, vec![0, 1, 2, 3, 4, -3, -2, -1]);
    }

    #[test]
    fn modes_cover_every_stored_entry_once() {
        let layout = SlabLayout::new(8, 2, 3);
        let indices: Vec<usize> = local_modes(&layout).map(|mode| mode.index).collect();
        let unique: BTreeSet<usize> = indices.iter().copied().collect();
        assert_eq!(indices.len(), unique.len());
        assert_eq!(unique.len(), 2 * 8 * layout.complex_nz());
        assert_eq!(unique.last().copied(), Some(2 * 8 * layout.complex_nz() - 1));
    }

    #[test]
    fn mirror_rows_negate_y_and_match_folding() {
        let layout = SlabLayout::new(8, 1, 5);
        for mode in local_modes(&layout) {
            assert_eq!(mode.wavenumber[0], -3);
            let row = (mode.index / layout.complex_nz()) % 8;
            assert_eq!(mode.wavenumber[1], folded_wavenumber(row, 8));
            assert_eq!(mode.is_mirror, row > 4);
        }
    }
}
