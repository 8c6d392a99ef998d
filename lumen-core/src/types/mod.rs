//! Core data types shared across the lumen stack.

pub mod geometry;

pub use geometry::{Size, SizeBounds};
