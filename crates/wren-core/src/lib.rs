//! # wren-core
//!
//! Tensor storage and typed access for the Wren reference interpreter.
//!
//! This crate provides:
//! - [`Tensor`] — owning, row-major storage of one [`ElemKind`]
//! - [`Handle`] / [`HandleMut`] — typed views with flat and coordinate access,
//!   transpose and sub-tensor insert/extract
//! - [`Shape`] / [`ShapeNHWC`] / [`flatten_cdr`] — the two shape readings
//!   kernels use
//! - [`Layout`] — strides and offset, used to drive permuted/windowed copies
//! - [`WeightInit`] — parameter initialization schemes
//! - [`Error`] / [`Result`] — the single error type shared by all Wren crates

pub mod dtype;
pub mod error;
pub mod handle;
pub mod init;
pub mod layout;
pub mod shape;
pub mod tensor;

pub use dtype::{ElemKind, Element, Float, Index};
pub use error::{Error, Result};
pub use handle::{Handle, HandleMut};
pub use init::WeightInit;
pub use layout::Layout;
pub use shape::{flatten_cdr, inverse_permutation, window_output_size, Shape, ShapeNHWC};
pub use tensor::{Storage, Tensor};
