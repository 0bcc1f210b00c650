//! Intermediate Representation (IR) for SPIR-V translation.
//!
//! This module defines a structured SSA IR that SPIR-V functions are lowered
//! into. Control flow is a tree of blocks, ifs and loops; memory is reached
//! through explicit deref chains or, after offset lowering, through block
//! index + byte offset intrinsics.

mod types;
pub use types::*;

pub mod builder;
pub mod display;
pub mod fold;
pub mod repair;
pub mod utils;

pub use builder::FunctionBuilder;
