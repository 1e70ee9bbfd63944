//! Small utilities shared across the crate and its tests.

pub mod det_rng;

pub use det_rng::DetRng;
