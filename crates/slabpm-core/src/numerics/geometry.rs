//! Slab decomposition of a periodic axis across tasks.

use crate::domain::{PmError, PmResult};

/// Task ownership of the X slices of a periodic axis of `extent` slices.
///
/// Slices are handed out in contiguous blocks of `ceil(extent / tasks)`, the
/// rule used by slab-parallel FFT libraries, so trailing tasks may own fewer
/// slices or none at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlabDecomposition {
    extent: usize,
    counts: Vec<usize>,
    starts: Vec<usize>,
    owners: Vec<usize>,
}

impl SlabDecomposition {
    pub fn new(extent: usize, task_count: usize) -> PmResult<Self> {
        if task_count == 0 {
            return Err(PmError::input_validation(
                "INPUT.TASK_COUNT",
                "slab decomposition needs at least one task",
            ));
        }
        if extent == 0 {
            return Err(PmError::input_validation(
                "INPUT.SLAB_EXTENT",
                "slab decomposition needs at least one slice",
            ));
        }

        let block = extent.div_ceil(task_count);
        let mut counts = Vec::with_capacity(task_count);
        let mut starts = Vec::with_capacity(task_count);
        let mut owners = Vec::with_capacity(extent);
        for rank in 0..task_count {
            let start = (rank * block).min(extent);
            let count = block.min(extent - start);
            starts.push(start);
            counts.push(count);
            owners.extend(std::iter::repeat_n(rank, count));
        }

        Ok(Self {
            extent,
            counts,
            starts,
            owners,
        })
    }

    pub fn extent(&self) -> usize {
        self.extent
    }

    pub fn task_count(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, rank: usize) -> usize {
        self.counts.get(rank).copied().unwrap_or(0)
    }

    pub fn start(&self, rank: usize) -> usize {
        self.starts.get(rank).copied().unwrap_or(self.extent)
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    pub fn starts(&self) -> &[usize] {
        &self.starts
    }

    pub fn is_active(&self, rank: usize) -> bool {
        self.count(rank) > 0
    }

    pub fn active_task_count(&self) -> usize {
        self.counts.iter().filter(|count| **count > 0).count()
    }

    /// Owner of a global slice index; indices wrap periodically.
    pub fn owner_of_slice(&self, slice: usize) -> usize {
        self.owners[slice % self.extent]
    }

    /// Owner of the slice containing coordinate `x` of a box of `box_size`.
    pub fn owner_of_position(&self, x: f64, box_size: f64) -> usize {
        self.owner_of_slice(slice_index(x * self.extent as f64 / box_size, self.extent))
    }

    /// The tasks `hops` non-empty steps to the left and right of `rank`.
    ///
    /// Tasks without slices have no neighbours and get `(None, None)`.
    pub fn neighbours(&self, rank: usize, hops: usize) -> (Option<usize>, Option<usize>) {
        if !self.is_active(rank) {
            return (None, None);
        }
        let size = self.task_count();
        (
            Some(self.walk(rank, hops, |task| (task + size - 1) % size)),
            Some(self.walk(rank, hops, |task| (task + 1) % size)),
        )
    }

    fn walk(&self, rank: usize, hops: usize, step: impl Fn(usize) -> usize) -> usize {
        let mut task = rank;
        let mut taken = 0;
        while taken < hops {
            task = step(task);
            if self.is_active(task) {
                taken += 1;
            }
        }
        task
    }

    /// Non-empty hops needed to reach `to` from `from`, going left and right.
    ///
    /// `None` when either end owns no slices.
    pub fn hop_counts(&self, from: usize, to: usize) -> Option<(usize, usize)> {
        if !self.is_active(from) || !self.is_active(to) {
            return None;
        }
        if from == to {
            return Some((0, 0));
        }
        let size = self.task_count();
        let count_hops = |step: &dyn Fn(usize) -> usize| {
            let mut task = from;
            let mut hops = 0;
            loop {
                task = step(task);
                if self.is_active(task) {
                    hops += 1;
                }
                if task == to {
                    return hops;
                }
            }
        };
        let left = count_hops(&|task| (task + size - 1) % size);
        let right = count_hops(&|task| (task + 1) % size);
        Some((left, right))
    }
}

/// Integer cell index of a coordinate already scaled to cell units.
///
/// A coordinate that rounds up to exactly `extent` wraps to cell 0.
pub fn slice_index(scaled: f64, extent: usize) -> usize {
    let index = scaled as usize;
    if index >= extent { index % extent } else { index }
}

/// Brings `x` back into `[0, box_size)`.
pub fn periodic_wrap(x: f64, box_size: f64) -> f64 {
    let wrapped = x.rem_euclid(box_size);
    if wrapped >= box_size { 0.0 } else { wrapped }
}
