//! Sizing and file-format constants shared across the PM core.

/// Default particle-array head room over the nominal load.
pub const DEFAULT_BUFFER: f64 = 1.25;

/// Width of a Fortran unformatted record length marker.
pub const RECORD_MARKER_BYTES: usize = 4;

/// Size of the GADGET-1 header record payload.
pub const GADGET_HEADER_BYTES: usize = 256;

/// Number of GADGET particle species slots in the header.
pub const GADGET_SPECIES: usize = 6;

/// Mean of the density contrast grid before deposition: every cell starts at
/// `-1` so a uniform distribution of unit-weight particles sums to zero.
pub const EMPTY_CELL_CONTRAST: f64 = -1.0;

#[cfg(test)]
mod tests {
    use super::{DEFAULT_BUFFER, GADGET_HEADER_BYTES, GADGET_SPECIES, RECORD_MARKER_BYTES};

    #[test]
    fn gadget_header_layout_fits_its_record() {
        let populated = GADGET_SPECIES * 4 + GADGET_SPECIES * 8 + 8 + 8 + 4 + 4;
        assert!(populated < GADGET_HEADER_BYTES);
        assert_eq!(RECORD_MARKER_BYTES, std::mem::size_of::<i32>());
        assert!(DEFAULT_BUFFER > 1.0);
    }
}
