// =============================================================================
// Kernels — Forward and backward routines for every instruction
// =============================================================================
//
// One entry point per direction. Each dispatches on the instruction variant
// exactly once and hands the record to the kernel:
//
//   forward(ctx, is_train, inst, config)   is_train only matters for batch norm
//   backward(ctx, inst, config)
//
// CONVENTIONS:
//
//   src / dest     input and output weights of the instruction
//   in_g / out_g   their gradients
//   n, h, w, c     NHWC axes; K = kernel, S = stride, P = pad
//
// Every kernel validates the shapes it indexes with before touching data and
// returns the first violated invariant as an error. Backward kernels
// accumulate into input gradients, except the sites listed on
// `GradientPolicy`, which overwrite under the reference policy.
//
// All loops run in the reference reduction order so results are
// bit-identical to other backends that follow it.

mod activation;
mod arithmetic;
mod batchnorm;
mod conv;
mod fully_connected;
mod lifecycle;
mod loss;
mod lrn;
mod pool;
mod shape_ops;
mod window;

use wren_core::{Error, Float, Handle, HandleMut, Result, Shape};
use wren_ir::Instruction;

use crate::config::{GradientPolicy, InterpreterConfig};
use crate::context::Context;

/// Run the forward kernel of `inst`.
pub fn forward(
    ctx: &mut Context,
    is_train: bool,
    inst: &Instruction,
    _config: &InterpreterConfig,
) -> Result<()> {
    match inst {
        Instruction::Copy(i) => shape_ops::forward_copy(ctx, i),
        Instruction::Convolution(i) => conv::forward(ctx, i),
        Instruction::Pool(i) => pool::forward(ctx, i),
        Instruction::FullyConnected(i) => fully_connected::forward(ctx, i),
        Instruction::Relu(i) => activation::forward_relu(ctx, i),
        Instruction::Sigmoid(i) => activation::forward_sigmoid(ctx, i),
        Instruction::Tanh(i) => activation::forward_tanh(ctx, i),
        Instruction::SoftMax(i) => loss::forward_softmax(ctx, i),
        Instruction::Regression(i) => loss::forward_regression(ctx, i),
        Instruction::Transpose(i) => shape_ops::forward_transpose(ctx, i),
        Instruction::Reshape(i) => shape_ops::forward_reshape(ctx, i),
        Instruction::Concat(i) => shape_ops::forward_concat(ctx, i),
        Instruction::BatchNormalization(i) => batchnorm::forward(ctx, is_train, i),
        Instruction::LocalResponseNormalization(i) => lrn::forward(ctx, i),
        Instruction::Arithmetic(i) => arithmetic::forward(ctx, i),
        Instruction::AllocActivation(i) => lifecycle::forward_alloc(ctx, i),
        Instruction::DeallocActivation(_) => Ok(()),
    }
}

/// Run the backward kernel of `inst`.
pub fn backward(ctx: &mut Context, inst: &Instruction, config: &InterpreterConfig) -> Result<()> {
    let policy = config.gradient_policy;
    match inst {
        Instruction::Copy(i) => shape_ops::backward_copy(ctx, i),
        Instruction::Convolution(i) => conv::backward(ctx, i, config.filter_grad_source),
        Instruction::Pool(i) => pool::backward(ctx, i),
        Instruction::FullyConnected(i) => fully_connected::backward(ctx, i),
        Instruction::Relu(i) => activation::backward_relu(ctx, i),
        Instruction::Sigmoid(i) => activation::backward_sigmoid(ctx, i),
        Instruction::Tanh(i) => activation::backward_tanh(ctx, i),
        Instruction::SoftMax(i) => loss::backward_softmax(ctx, i),
        Instruction::Regression(i) => loss::backward_regression(ctx, i),
        Instruction::Transpose(i) => shape_ops::backward_transpose(ctx, i, policy),
        Instruction::Reshape(i) => shape_ops::backward_reshape(ctx, i),
        Instruction::Concat(i) => shape_ops::backward_concat(ctx, i, policy),
        Instruction::BatchNormalization(i) => batchnorm::backward(ctx, i),
        Instruction::LocalResponseNormalization(i) => lrn::backward(ctx, i, policy),
        Instruction::Arithmetic(i) => arithmetic::backward(ctx, i, policy),
        Instruction::AllocActivation(_) | Instruction::DeallocActivation(_) => Ok(()),
    }
}

/// Write a gradient contribution at one of the policy-controlled sites.
#[inline]
pub(crate) fn store(policy: GradientPolicy, slot: &mut Float, value: Float) {
    match policy {
        GradientPolicy::Reference => *slot = value,
        GradientPolicy::Accumulate => *slot += value,
    }
}

/// `dst[i] += src[i]` over the flat index.
pub(crate) fn accumulate(dst: &mut HandleMut<'_, Float>, src: &Handle<'_, Float>) -> Result<()> {
    expect_same_size("accumulate", dst.shape(), src.shape())?;
    for (d, s) in dst.as_mut_slice().iter_mut().zip(src.iter()) {
        *d += s;
    }
    Ok(())
}

pub(crate) fn expect_same_shape(
    context: &'static str,
    expected: &Shape,
    got: &Shape,
) -> Result<()> {
    if expected != got {
        return Err(Error::shape_mismatch(context, expected, got));
    }
    Ok(())
}

pub(crate) fn expect_same_size(context: &'static str, expected: &Shape, got: &Shape) -> Result<()> {
    if expected.elem_count() != got.elem_count() {
        return Err(Error::shape_mismatch(context, expected, got));
    }
    Ok(())
}

pub(crate) fn expect_rank(context: &'static str, shape: &Shape, rank: usize) -> Result<()> {
    if shape.rank() != rank {
        return Err(Error::RankMismatch {
            context,
            expected: rank,
            got: shape.rank(),
        });
    }
    Ok(())
}
