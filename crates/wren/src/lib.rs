//! # Wren
//!
//! A reference interpreter for a neural-network instruction IR.
//!
//! Every primitive has a forward kernel and a backward kernel written as
//! plain scalar loops in a fixed reduction order, so other backends can be
//! checked against it bit for bit.
//!
//! ## Usage
//!
//! ```rust
//! use wren::prelude::*;
//!
//! # fn main() -> wren::Result<()> {
//! let mut b = ModuleBuilder::new();
//! let x = b.create_input("x", ElemKind::Float, (4, 3));
//! let y = b.create_input("y", ElemKind::Float, (4, 1));
//! let fc = b.create_fully_connected("fc", x, 1)?;
//! b.create_regression("loss", fc, y)?;
//! let module = b.build()?;
//!
//! let mut interp = Interpreter::new(module, InterpreterConfig::default().with_seed(1))?;
//! interp.load(x, Tensor::full(1.0, (4, 3)))?;
//! interp.train_step()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! | Crate | Purpose |
//! |-------|---------|
//! | `wren-core` | Tensor, Shape, ShapeNHWC, Layout, typed handles, WeightInit, Error |
//! | `wren-ir` | Values, instruction records, Module, ModuleBuilder, verifier |
//! | `wren` | Context, kernels, Interpreter, SGD |
//!
//! ## Modules
//!
//! - [`context`] — value → tensor bindings, in-place update helpers
//! - [`kernels`] — forward / backward dispatch and the kernels themselves
//! - [`interpreter`] — program-order sweeps and the training step
//! - [`train`] — SGD with momentum and L1/L2 decay
//! - [`config`] — interpreter and training configuration

pub mod config;
pub mod context;
pub mod interpreter;
pub mod kernels;
pub mod train;

pub use config::{FilterGradSource, GradientPolicy, InterpreterConfig, TrainingConfig};
pub use context::Context;
pub use interpreter::Interpreter;
pub use train::Sgd;

/// Re-export core types.
pub use wren_core::{
    ElemKind, Element, Error, Float, Handle, HandleMut, Index, Result, Shape, ShapeNHWC, Tensor,
    WeightInit,
};

/// Re-export the IR.
pub mod ir {
    pub use wren_ir::*;
}

/// Prelude: import this for the most common types.
pub mod prelude {
    pub use crate::ir::{ArithmeticKind, Instruction, Module, ModuleBuilder, PoolKind, ValueId};
    pub use crate::{
        Context, ElemKind, FilterGradSource, Float, GradientPolicy, Index, Interpreter,
        InterpreterConfig, Shape, Tensor, TrainingConfig, WeightInit,
    };
}
