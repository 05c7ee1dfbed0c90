//! Testing utilities and mock implementations
//!
//! Lets the session and pipeline run without a broker or real certificates.

pub mod mocks;

pub use mocks::*;
