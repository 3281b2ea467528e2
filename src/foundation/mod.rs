/// Pixel buffers shared across the pipeline.
pub mod core;
/// Crate error type.
pub mod error;
