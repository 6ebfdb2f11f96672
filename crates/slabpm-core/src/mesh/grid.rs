//! Slab-local mesh storage shared by the real and complex views.
//!
//! A grid owns one `Vec<f64>` of `(local_nx + 1) * Nmesh * 2 * (Nmesh/2 + 1)`
//! values: the owned X slices plus one halo slice, each row padded to hold
//! `Nmesh/2 + 1` complex numbers. [`RealGrid`] and [`ComplexGrid`] are two
//! typed views of that buffer and convert into each other without copying.

use crate::numerics::geometry::SlabDecomposition;
use num_complex::Complex64;
use std::ops::Range;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlabLayout {
    nmesh: usize,
    local_nx: usize,
    local_x_start: usize,
}

impl SlabLayout {
    pub fn new(nmesh: usize, local_nx: usize, local_x_start: usize) -> Self {
        Self {
            nmesh,
            local_nx,
            local_x_start,
        }
    }

    pub fn from_decomposition(decomposition: &SlabDecomposition, rank: usize) -> Self {
        Self::new(
            decomposition.extent(),
            decomposition.count(rank),
            decomposition.start(rank),
        )
    }

    pub fn nmesh(&self) -> usize {
        self.nmesh
    }

    pub fn local_nx(&self) -> usize {
        self.local_nx
    }

    pub fn local_x_start(&self) -> usize {
        self.local_x_start
    }

    pub fn owns_slices(&self) -> bool {
        self.local_nx > 0
    }

    /// Complex entries per row.
    pub fn complex_nz(&self) -> usize {
        self.nmesh / 2 + 1
    }

    /// Real entries per row, padding included.
    pub fn padded_nz(&self) -> usize {
        2 * self.complex_nz()
    }

    pub fn slice_len(&self) -> usize {
        self.nmesh * self.padded_nz()
    }

    pub fn buffer_len(&self) -> usize {
        (self.local_nx + 1) * self.slice_len()
    }

    pub fn real_index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.nmesh + iy) * self.padded_nz() + iz
    }

    pub fn complex_index(&self, ix: usize, iy: usize, kz: usize) -> usize {
        (ix * self.nmesh + iy) * self.complex_nz() + kz
    }

    /// Real-view range of local slice `ix`; `ix == local_nx` is the halo.
    pub fn slice_range(&self, ix: usize) -> Range<usize> {
        ix * self.slice_len()..(ix + 1) * self.slice_len()
    }

    pub fn halo_range(&self) -> Range<usize> {
        self.slice_range(self.local_nx)
    }

    /// Complex entries held by the owned slices.
    pub fn owned_complex_len(&self) -> usize {
        self.local_nx * self.nmesh * self.complex_nz()
    }
}

/// Real view: `f64` cells, rows padded to `2 * (Nmesh/2 + 1)`.
#[derive(Debug, Clone, PartialEq)]
pub struct RealGrid {
    layout: SlabLayout,
    data: Vec<f64>,
}

impl RealGrid {
    pub fn filled(layout: SlabLayout, value: f64) -> Self {
        Self {
            layout,
            data: vec![value; layout.buffer_len()],
        }
    }

    pub fn zeros(layout: SlabLayout) -> Self {
        Self::filled(layout, 0.0)
    }

    /// Reuses `buffer`'s allocation for a grid filled with `value`.
    pub fn from_buffer(layout: SlabLayout, mut buffer: Vec<f64>, value: f64) -> Self {
        buffer.clear();
        buffer.resize(layout.buffer_len(), value);
        Self {
            layout,
            data: buffer,
        }
    }

    pub fn layout(&self) -> SlabLayout {
        self.layout
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [f64] {
        &mut self.data
    }

    pub fn fill(&mut self, value: f64) {
        self.data.fill(value);
    }

    pub fn get(&self, ix: usize, iy: usize, iz: usize) -> f64 {
        self.data[self.layout.real_index(ix, iy, iz)]
    }

    pub fn set(&mut self, ix: usize, iy: usize, iz: usize, value: f64) {
        let index = self.layout.real_index(ix, iy, iz);
        self.data[index] = value;
    }

    pub fn add(&mut self, ix: usize, iy: usize, iz: usize, value: f64) {
        let index = self.layout.real_index(ix, iy, iz);
        self.data[index] += value;
    }

    pub fn slice(&self, ix: usize) -> &[f64] {
        &self.data[self.layout.slice_range(ix)]
    }

    pub fn slice_mut(&mut self, ix: usize) -> &mut [f64] {
        let range = self.layout.slice_range(ix);
        &mut self.data[range]
    }

    pub fn halo(&self) -> &[f64] {
        &self.data[self.layout.halo_range()]
    }

    pub fn halo_mut(&mut self) -> &mut [f64] {
        let range = self.layout.halo_range();
        &mut self.data[range]
    }

    /// Values of the owned cells, padding and halo excluded.
    pub fn owned_cells(&self) -> impl Iterator<Item = f64> + '_ {
        let nmesh = self.layout.nmesh;
        self.data
            .chunks_exact(self.layout.padded_nz())
            .take(self.layout.local_nx * nmesh)
            .flat_map(move |row| row[..nmesh].iter().copied())
    }

    pub fn into_buffer(self) -> Vec<f64> {
        self.data
    }

    /// Reinterprets the buffer as complex values without transforming it.
    pub(crate) fn into_complex_view(self) -> ComplexGrid {
        ComplexGrid {
            layout: self.layout,
            data: self.data,
        }
    }
}

/// Complex view: `Nmesh/2 + 1` complex entries per row.
#[derive(Debug, Clone, PartialEq)]
pub struct ComplexGrid {
    layout: SlabLayout,
    data: Vec<f64>,
}

impl ComplexGrid {
    pub fn zeros(layout: SlabLayout) -> Self {
        RealGrid::zeros(layout).into_complex_view()
    }

    pub fn from_buffer(layout: SlabLayout, buffer: Vec<f64>) -> Self {
        RealGrid::from_buffer(layout, buffer, 0.0).into_complex_view()
    }

    pub fn layout(&self) -> SlabLayout {
        self.layout
    }

    pub fn values(&self) -> &[Complex64] {
        bytemuck::cast_slice(&self.data)
    }

    pub fn values_mut(&mut self) -> &mut [Complex64] {
        bytemuck::cast_slice_mut(&mut self.data)
    }

    /// Complex entries of the owned slices, halo excluded.
    pub fn owned_values(&self) -> &[Complex64] {
        &self.values()[..self.layout.owned_complex_len()]
    }

    pub fn owned_values_mut(&mut self) -> &mut [Complex64] {
        let len = self.layout.owned_complex_len();
        &mut self.values_mut()[..len]
    }

    pub fn get(&self, ix: usize, iy: usize, kz: usize) -> Complex64 {
        self.values()[self.layout.complex_index(ix, iy, kz)]
    }

    pub fn set(&mut self, ix: usize, iy: usize, kz: usize, value: Complex64) {
        let index = self.layout.complex_index(ix, iy, kz);
        self.values_mut()[index] = value;
    }

    pub fn scale(&mut self, factor: f64) {
        for value in self.owned_values_mut() {
            *value *= factor;
        }
    }

    pub fn into_buffer(self) -> Vec<f64> {
        self.data
    }

    pub(crate) fn into_real_view(self) -> RealGrid {
        RealGrid {
            layout: self.layout,
            data: self.data,
        }
    }
}
