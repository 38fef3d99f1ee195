//! Image geometry and raster operations for the derivative pipeline.
//!
//! Split the same way the work splits: [`calculations`] is pure dimension
//! math (unit-testable with plain numbers), [`operations`] does the actual
//! pixel work with the `image` crate.

pub mod calculations;
pub mod operations;

pub use calculations::{center_offset, exceeds, fit_within};
pub use operations::{
    ImagingError, OPAQUE_WHITE, TRANSPARENT, encode_png, fit_and_pad, load_from_bytes,
    pre_normalize, save_png,
};
