//! # wren-ir
//!
//! The instruction-level IR consumed by the Wren interpreter.
//!
//! A [`Module`] is a table of declared [`Value`]s plus a linear list of
//! [`Instruction`]s. Modules are usually assembled with [`ModuleBuilder`],
//! which sizes outputs, creates parameters with their initializers and emits
//! the activation lifecycle instructions. [`Module::verify`] re-checks every
//! instruction's operand kinds and shapes.

pub mod builder;
pub mod instr;
pub mod module;
pub mod value;
mod verify;

pub use builder::{output_spatial_dims, ModuleBuilder, DEFAULT_BIAS};
pub use instr::{
    Access, AllocActivationInst, ArithmeticInst, ArithmeticKind, BatchNormalizationInst,
    ConcatInst, ConvolutionInst, CopyInst, DeallocActivationInst, FullyConnectedInst, Instruction,
    LocalResponseNormalizationInst, PoolInst, PoolKind, RegressionInst, ReluInst, ReshapeInst,
    SigmoidInst, SoftMaxInst, TanhInst, TransposeInst,
};
pub use module::Module;
pub use value::{Value, ValueId, ValueRole};
pub use wren_core::{Error, Result};
