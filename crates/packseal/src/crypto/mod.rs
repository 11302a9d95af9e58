//! Canonicalization and digest helpers shared by the signing engine.

pub mod hash;
pub mod jcs;

pub use hash::HashAlgorithm;
