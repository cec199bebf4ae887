//! Shared foundational types used across the Tessera placement workspace.
//!
//! This crate provides the common result and internal error types, XXH3
//! content hashing, and the planar geometry primitives every stage of the
//! placer exchanges.

#![warn(missing_docs)]

pub mod geometry;
pub mod hash;
pub mod result;

pub use geometry::{Point, Rect};
pub use hash::ContentHash;
pub use result::{InternalError, TesseraResult};
