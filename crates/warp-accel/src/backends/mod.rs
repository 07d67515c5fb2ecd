//! Accelerator device implementations
//!
//! Contains concrete implementations of the `AccelDevice` trait.

#[cfg(feature = "stub")]
pub mod stub;

#[cfg(feature = "stub")]
pub use stub::{Fault, StubDevice};
