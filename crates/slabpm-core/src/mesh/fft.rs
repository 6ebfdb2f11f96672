//! Distributed 3-D real-to-complex FFT over X slabs.
//!
//! Z and Y are transformed locally, slice by slice. The X axis spans tasks, so
//! the partially transformed slabs are transposed: each task receives full X
//! lines for its own block of `(y, kz)` columns, transforms them and sends the
//! results back. No task holds more than its share of the grid. Both
//! directions are unnormalised: a forward transform followed by an inverse one
//! multiplies by `Nmesh^3`.

use super::grid::{ComplexGrid, RealGrid, SlabLayout};
use crate::comm::{CommError, Communicator, MessageTag, decode_pod};
use crate::domain::{LocalDomain, PmError, PmResult};
use crate::numerics::geometry::SlabDecomposition;
use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

pub struct SlabFftPlan {
    layout: SlabLayout,
    x_starts: Vec<usize>,
    x_counts: Vec<usize>,
    column_starts: Vec<usize>,
    column_counts: Vec<usize>,
    forward: Arc<dyn Fft<f64>>,
    inverse: Arc<dyn Fft<f64>>,
}

impl std::fmt::Debug for SlabFftPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlabFftPlan")
            .field("layout", &self.layout)
            .field("x_counts", &self.x_counts)
            .field("column_counts", &self.column_counts)
            .finish_non_exhaustive()
    }
}

impl SlabFftPlan {
    pub fn new(decomposition: &SlabDecomposition, rank: usize) -> Self {
        let nmesh = decomposition.extent();
        let layout = SlabLayout::from_decomposition(decomposition, rank);
        let columns = nmesh * layout.complex_nz();
        let tasks = decomposition.task_count();
        let block = columns.div_ceil(tasks);
        let column_starts: Vec<usize> = (0..tasks).map(|task| (task * block).min(columns)).collect();
        let column_counts = column_starts
            .iter()
            .map(|start| block.min(columns - start))
            .collect();
        let mut planner = FftPlanner::<f64>::new();
        Self {
            layout,
            x_starts: decomposition.starts().to_vec(),
            x_counts: decomposition.counts().to_vec(),
            column_starts,
            column_counts,
            forward: planner.plan_fft_forward(nmesh),
            inverse: planner.plan_fft_inverse(nmesh),
        }
    }

    pub fn for_domain(domain: &LocalDomain) -> Self {
        Self::new(domain.mesh(), domain.rank())
    }

    pub fn layout(&self) -> SlabLayout {
        self.layout
    }

    pub fn forward<C: Communicator + ?Sized>(
        &self,
        grid: RealGrid,
        comm: &C,
    ) -> PmResult<ComplexGrid> {
        self.check_layout(grid.layout())?;
        let mut grid = grid;
        self.real_rows_to_complex(grid.as_mut_slice());
        let mut complex = grid.into_complex_view();
        self.transform_y(complex.values_mut(), self.forward.as_ref());
        self.transform_x(&mut complex, self.forward.as_ref(), comm)?;
        Ok(complex)
    }

    pub fn inverse<C: Communicator + ?Sized>(
        &self,
        grid: ComplexGrid,
        comm: &C,
    ) -> PmResult<RealGrid> {
        self.check_layout(grid.layout())?;
        let mut grid = grid;
        self.transform_x(&mut grid, self.inverse.as_ref(), comm)?;
        self.transform_y(grid.values_mut(), self.inverse.as_ref());
        let mut real = grid.into_real_view();
        self.complex_rows_to_real(real.as_mut_slice());
        Ok(real)
    }

    fn check_layout(&self, layout: SlabLayout) -> PmResult<()> {
        if layout != self.layout {
            return Err(PmError::internal(
                "SYS.FFT_LAYOUT",
                format!(
                    "grid layout {layout:?} does not match the FFT plan layout {:?}",
                    self.layout
                ),
            ));
        }
        Ok(())
    }

    fn scratch(&self, fft: &dyn Fft<f64>) -> Vec<Complex64> {
        vec![Complex64::default(); fft.get_inplace_scratch_len()]
    }

    /// Z axis, real input: each row's `Nmesh` reals become `Nmesh/2 + 1`
    /// complex values written over the same (padded) row.
    fn real_rows_to_complex(&self, data: &mut [f64]) {
        let nmesh = self.layout.nmesh();
        let rows = self.layout.local_nx() * nmesh;
        let mut line = vec![Complex64::default(); nmesh];
        let mut scratch = self.scratch(self.forward.as_ref());
        for row in data.chunks_exact_mut(self.layout.padded_nz()).take(rows) {
            for (slot, value) in line.iter_mut().zip(&row[..nmesh]) {
                *slot = Complex64::new(*value, 0.0);
            }
            self.forward.process_with_scratch(&mut line, &mut scratch);
            for (pair, value) in row.chunks_exact_mut(2).zip(&line) {
                pair[0] = value.re;
                pair[1] = value.im;
            }
        }
    }

    /// Z axis, real output: rebuilds the full line by Hermitian symmetry.
    fn complex_rows_to_real(&self, data: &mut [f64]) {
        let nmesh = self.layout.nmesh();
        let nz = self.layout.complex_nz();
        let rows = self.layout.local_nx() * nmesh;
        let mut line = vec![Complex64::default(); nmesh];
        let mut scratch = self.scratch(self.inverse.as_ref());
        for row in data.chunks_exact_mut(self.layout.padded_nz()).take(rows) {
            for (slot, pair) in line.iter_mut().zip(row.chunks_exact(2)) {
                *slot = Complex64::new(pair[0], pair[1]);
            }
            for kz in nz..nmesh {
                line[kz] = line[nmesh - kz].conj();
            }
            self.inverse.process_with_scratch(&mut line, &mut scratch);
            for (cell, value) in row.iter_mut().zip(&line) {
                *cell = value.re;
            }
            row[nmesh..].fill(0.0);
        }
    }

    fn transform_y(&self, values: &mut [Complex64], fft: &dyn Fft<f64>) {
        let nmesh = self.layout.nmesh();
        let mut line = vec![Complex64::default(); nmesh];
        let mut scratch = self.scratch(fft);
        for ix in 0..self.layout.local_nx() {
            for kz in 0..self.layout.complex_nz() {
                for (iy, slot) in line.iter_mut().enumerate() {
                    *slot = values[self.layout.complex_index(ix, iy, kz)];
                }
                fft.process_with_scratch(&mut line, &mut scratch);
                for (iy, value) in line.iter().enumerate() {
                    values[self.layout.complex_index(ix, iy, kz)] = *value;
                }
            }
        }
    }

    fn transform_x<C: Communicator + ?Sized>(
        &self,
        grid: &mut ComplexGrid,
        fft: &dyn Fft<f64>,
        comm: &C,
    ) -> PmResult<()> {
        let nmesh = self.layout.nmesh();
        let plane_len = nmesh * self.layout.complex_nz();
        let local_nx = self.layout.local_nx();
        let rank = comm.rank();
        let tasks = self.column_counts.len();

        // Slab rows out, full X lines of this task's columns in.
        let owned = grid.owned_values();
        let outgoing = (0..tasks)
            .map(|peer| {
                let columns = self.columns(peer);
                let mut block = Vec::with_capacity(local_nx * columns.len());
                for ix in 0..local_nx {
                    let row = ix * plane_len;
                    block.extend_from_slice(&owned[row + columns.start..row + columns.end]);
                }
                bytemuck::cast_slice::<Complex64, u8>(&block).to_vec()
            })
            .collect();
        let incoming = comm.all_to_all(outgoing, MessageTag::Transpose)?;

        let own = self.columns(rank);
        let width = own.len();
        let mut lines = vec![Complex64::default(); nmesh * width];
        for (peer, bytes) in incoming.iter().enumerate() {
            let values = self.decode_block(bytes, rank, peer, self.x_counts[peer] * width)?;
            let offset = self.x_starts[peer] * width;
            lines[offset..offset + values.len()].copy_from_slice(&values);
        }

        let mut line = vec![Complex64::default(); nmesh];
        let mut scratch = self.scratch(fft);
        for column in 0..width {
            for (gx, slot) in line.iter_mut().enumerate() {
                *slot = lines[gx * width + column];
            }
            fft.process_with_scratch(&mut line, &mut scratch);
            for (gx, value) in line.iter().enumerate() {
                lines[gx * width + column] = *value;
            }
        }

        // Transformed lines back to their slab owners.
        let outgoing = (0..tasks)
            .map(|peer| {
                let start = self.x_starts[peer] * width;
                let end = start + self.x_counts[peer] * width;
                bytemuck::cast_slice::<Complex64, u8>(&lines[start..end]).to_vec()
            })
            .collect();
        drop(lines);
        let incoming = comm.all_to_all(outgoing, MessageTag::Transpose)?;

        let owned = grid.owned_values_mut();
        for (peer, bytes) in incoming.iter().enumerate() {
            let columns = self.columns(peer);
            let values = self.decode_block(bytes, rank, peer, local_nx * columns.len())?;
            if columns.is_empty() {
                continue;
            }
            for (ix, chunk) in values.chunks_exact(columns.len()).enumerate() {
                let row = ix * plane_len;
                owned[row + columns.start..row + columns.end].copy_from_slice(chunk);
            }
        }
        Ok(())
    }

    /// `(y, kz)` columns, flattened as `y * complex_nz + kz`, held by `task`
    /// while the X lines are transformed.
    fn columns(&self, task: usize) -> std::ops::Range<usize> {
        let start = self.column_starts[task];
        start..start + self.column_counts[task]
    }

    fn decode_block(
        &self,
        bytes: &[u8],
        rank: usize,
        peer: usize,
        expected: usize,
    ) -> PmResult<Vec<Complex64>> {
        let values = decode_pod::<Complex64>(bytes, rank, peer, MessageTag::Transpose)?;
        if values.len() != expected {
            return Err(CommError::PayloadLength {
                rank,
                peer,
                tag: MessageTag::Transpose,
                expected: expected * std::mem::size_of::<Complex64>(),
                found: bytes.len(),
            }
            .into());
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::SlabFftPlan;
    use crate::comm::{Communicator, LocalCluster};
    use crate::mesh::grid::{RealGrid, SlabLayout};
    use crate::numerics::geometry::SlabDecomposition;
    use num_complex::Complex64;

    fn sample_field(layout: SlabLayout) -> RealGrid {
        let mut grid = RealGrid::zeros(layout);
        let nmesh = layout.nmesh();
        for ix in 0..layout.local_nx() {
            let gx = (ix + layout.local_x_start()) as f64;
            for iy in 0..nmesh {
                for iz in 0..nmesh {
                    let value = (0.3 * gx).sin() + 0.1 * iy as f64 - 0.05 * (iz * iz) as f64;
                    grid.set(ix, iy, iz, value);
                }
            }
        }
        grid
    }

    #[test]
    fn delta_at_origin_transforms_to_constant() {
        let cluster = LocalCluster::new(1).expect("cluster should build");
        let values = cluster
            .run_all(|comm| {
                let decomposition = SlabDecomposition::new(4, 1)?;
                let plan = SlabFftPlan::new(&decomposition, comm.rank());
                let mut grid = RealGrid::zeros(plan.layout());
                grid.set(0, 0, 0, 1.0);
                let complex = plan.forward(grid, comm)?;
                Ok(complex.owned_values().to_vec())
            })
            .expect("transform should succeed");
        assert!(
            values[0]
                .iter()
                .all(|value| (*value - Complex64::new(1.0, 0.0)).norm() < 1.0e-12)
        );
    }

    #[test]
    fn round_trip_scales_by_cell_count() {
        let cluster = LocalCluster::new(3).expect("cluster should build");
        let outcomes = cluster
            .run_all(|comm| {
                let decomposition = SlabDecomposition::new(8, comm.size())?;
                let plan = SlabFftPlan::new(&decomposition, comm.rank());
                let original = sample_field(plan.layout());
                let complex = plan.forward(original.clone(), comm)?;
                let restored = plan.inverse(complex, comm)?;
                Ok((original, restored))
            })
            .expect("round trip should succeed");
        for (original, restored) in outcomes {
            for (before, after) in original.owned_cells().zip(restored.owned_cells()) {
                assert!((after / 512.0 - before).abs() < 1.0e-10);
            }
        }
    }

    #[test]
    fn transpose_columns_split_the_plane_evenly() {
        let decomposition = SlabDecomposition::new(8, 3).expect("decomposition should build");
        let plans: Vec<SlabFftPlan> = (0..3)
            .map(|rank| SlabFftPlan::new(&decomposition, rank))
            .collect();
        // Eight Y rows of five kz values each.
        let mut covered = Vec::new();
        for task in 0..3 {
            let columns = plans[0].columns(task);
            assert!(columns.len() <= 14);
            for plan in &plans[1..] {
                assert_eq!(plan.columns(task), columns);
            }
            covered.extend(columns);
        }
        assert_eq!(covered, (0..40).collect::<Vec<usize>>());
    }

    #[test]
    fn distributed_transform_matches_single_task() {
        let serial = LocalCluster::new(1)
            .expect("cluster should build")
            .run_all(|comm| {
                let decomposition = SlabDecomposition::new(8, 1)?;
                let plan = SlabFftPlan::new(&decomposition, comm.rank());
                let complex = plan.forward(sample_field(plan.layout()), comm)?;
                Ok(complex.owned_values().to_vec())
            })
            .expect("serial transform should succeed")
            .remove(0);

        // Five tasks over eight slices leaves the last task without a slab.
        let parallel = LocalCluster::new(5)
            .expect("cluster should build")
            .run_all(|comm| {
                let decomposition = SlabDecomposition::new(8, comm.size())?;
                let plan = SlabFftPlan::new(&decomposition, comm.rank());
                let complex = plan.forward(sample_field(plan.layout()), comm)?;
                Ok(complex.owned_values().to_vec())
            })
            .expect("parallel transform should succeed");

        let stitched: Vec<Complex64> = parallel.into_iter().flatten().collect();
        assert_eq!(stitched.len(), serial.len());
        for (a, b) in stitched.iter().zip(&serial) {
            assert!((a - b).norm() < 1.0e-9);
        }
    }
}
