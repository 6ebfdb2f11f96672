//! Cloud-in-cell stencil on a slab-local mesh.

/// The 2x2x2 neighbourhood of a point and its trilinear weights.
///
/// X indices are local to the slab and the upper X index may point at the
/// halo slice (`local_nx`). Y and Z indices are global and already wrapped.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CicStencil {
    pub cells: [[usize; 2]; 3],
    pub weights: [[f64; 2]; 3],
}

impl CicStencil {
    /// Locates `cell_coordinates` (position in mesh-cell units) on the slab
    /// `[local_x_start, local_x_start + local_nx)`.
    ///
    /// Returns `None` when the point's lower X cell is not owned locally.
    pub fn locate(
        cell_coordinates: [f64; 3],
        nmesh: usize,
        local_x_start: usize,
        local_nx: usize,
    ) -> Option<Self> {
        let mut cells = [[0usize; 2]; 3];
        let mut weights = [[0.0f64; 2]; 3];
        for (axis, coordinate) in cell_coordinates.into_iter().enumerate() {
            let mut lower = coordinate as usize;
            let upper_weight = coordinate - lower as f64;
            if lower >= nmesh {
                lower -= nmesh;
            }
            weights[axis] = [1.0 - upper_weight, upper_weight];
            cells[axis] = if axis == 0 {
                let local = lower.checked_sub(local_x_start)?;
                if local >= local_nx {
                    return None;
                }
                [local, local + 1]
            } else {
                [lower, (lower + 1) % nmesh]
            };
        }
        Some(Self { cells, weights })
    }

    /// The eight corner cells `[x, y, z]` with their combined weights.
    pub fn corners(&self) -> impl Iterator<Item = ([usize; 3], f64)> + '_ {
        (0..8usize).map(move |corner| {
            let (ox, oy, oz) = ((corner >> 2) & 1, (corner >> 1) & 1, corner & 1);
            (
                [self.cells[0][ox], self.cells[1][oy], self.cells[2][oz]],
                self.weights[0][ox] * self.weights[1][oy] * self.weights[2][oz],
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::CicStencil;

    #[test]
    fn cell_centre_point_puts_all_weight_on_one_corner() {
        let stencil =
            CicStencil::locate([2.0, 3.0, 4.0], 8, 0, 8).expect("point should be local");
        let loaded: Vec<_> = stencil
            .corners()
            .filter(|(_, weight)| *weight > 0.0)
            .collect();
        assert_eq!(loaded, vec![([2, 3, 4], 1.0)]);
    }

    #[test]
    fn weights_sum_to_one_and_wrap_y_z() {
        let stencil =
            CicStencil::locate([4.25, 7.5, 7.75], 8, 4, 4).expect("point should be local");
        assert_eq!(stencil.cells[0], [0, 1]);
        assert_eq!(stencil.cells[1], [7, 0]);
        assert_eq!(stencil.cells[2], [7, 0]);
        let total: f64 = stencil.corners().map(|(_, weight)| weight).sum();
        assert!((total - 1.0).abs() < 1.0e-14);
    }

    #[test]
    fn last_owned_slice_spills_into_halo() {
        let stencil =
            CicStencil::locate([3.5, 0.0, 0.0], 8, 0, 4).expect("point should be local");
        assert_eq!(stencil.cells[0], [3, 4]);
        assert_eq!(stencil.weights[0], [0.5, 0.5]);
    }

    #[test]
    fn top_edge_coordinate_wraps_to_zero() {
        let stencil =
            CicStencil::locate([8.0, 8.0, 8.0], 8, 0, 2).expect("edge point should wrap");
        assert_eq!(stencil.cells, [[0, 1], [0, 1], [0, 1]]);
        assert_eq!(stencil.weights[0], [1.0, 0.0]);
    }

    #[test]
    fn points_outside_the_slab_are_rejected() {
        assert!(CicStencil::locate([1.0, 0.0, 0.0], 8, 2, 2).is_none());
        assert!(CicStencil::locate([4.0, 0.0, 0.0], 8, 2, 2).is_none());
        assert!(CicStencil::locate([1.0, 0.0, 0.0], 8, 8, 0).is_none());
    }
}
