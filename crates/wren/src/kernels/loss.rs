// Loss — SoftMax with fused cross-entropy gradient, and L2 regression
//
// SOFTMAX over rows of an (N, M) tensor:
//   forward:  E(n, i) = exp(src(n, i) - max_n) / Σⱼ exp(src(n, j) - max_n)
//             dest = E
//   backward: in_g(n, i) += E(n, i) - [selected(n, 0) == i]
//
// REGRESSION:
//   forward:  dest = src
//   backward: in_g(n, i) += src(n, i) - expected(n, i)
//
// Neither backward reads the output gradient: both are the gradient of the
// loss the instruction terminates.

use wren_core::{bail, Error, Float, Index, Result, Shape};
use wren_ir::{RegressionInst, SoftMaxInst};

use super::{expect_rank, expect_same_shape};
use crate::context::Context;

fn softmax_dims(ctx: &Context, inst: &SoftMaxInst) -> Result<(usize, usize)> {
    let src = ctx.weight(inst.src)?.shape();
    expect_rank("softmax", src, 2)?;
    expect_same_shape("softmax output", src, ctx.weight(inst.dest)?.shape())?;
    expect_same_shape("softmax saved exponentials", src, ctx.weight(inst.e)?.shape())?;
    let dims = src.dims();
    if dims[1] == 0 {
        bail!("softmax over an empty row");
    }
    Ok((dims[0], dims[1]))
}

pub(crate) fn forward_softmax(ctx: &mut Context, inst: &SoftMaxInst) -> Result<()> {
    let (batch, m) = softmax_dims(ctx, inst)?;

    ctx.update_weight_pair(inst.dest, inst.e, |ctx, dest, e| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let mut out = dest.handle_mut::<Float>()?;
        let mut e = e.handle_mut::<Float>()?;

        for n in 0..batch {
            // A NaN seed stays the max, so it reaches every output of the row.
            let mut max = src.at(&[n, 0]);
            for i in 1..m {
                let v = src.at(&[n, i]);
                if v > max {
                    max = v;
                }
            }

            let mut sum: Float = 0.0;
            for i in 0..m {
                let v = (src.at(&[n, i]) - max).exp();
                sum += v;
                *e.at_mut(&[n, i]) = v;
            }

            for i in 0..m {
                let v = e.at(&[n, i]) / sum;
                *e.at_mut(&[n, i]) = v;
                *out.at_mut(&[n, i]) = v;
            }
        }
        Ok(())
    })
}

pub(crate) fn backward_softmax(ctx: &mut Context, inst: &SoftMaxInst) -> Result<()> {
    let (batch, m) = softmax_dims(ctx, inst)?;
    expect_same_shape(
        "softmax selected labels",
        &Shape::from((batch, 1)),
        ctx.weight(inst.selected)?.shape(),
    )?;

    ctx.update_grad(inst.src, |ctx, in_g| {
        let e = ctx.weight_handle::<Float>(inst.e)?;
        let selected = ctx.weight_handle::<Index>(inst.selected)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        for n in 0..batch {
            let y = selected.at(&[n, 0]);
            for i in 0..m {
                let delta: Float = if y == i { 1.0 } else { 0.0 };
                *ig.at_mut(&[n, i]) += e.at(&[n, i]) - delta;
            }
        }
        Ok(())
    })
}

pub(crate) fn forward_regression(ctx: &mut Context, inst: &RegressionInst) -> Result<()> {
    expect_same_shape(
        "regression output",
        ctx.weight(inst.src)?.shape(),
        ctx.weight(inst.dest)?.shape(),
    )?;
    ctx.update_weight(inst.dest, |ctx, dest| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        dest.handle_mut::<Float>()?.as_mut_slice().copy_from_slice(src.as_slice());
        Ok(())
    })
}

pub(crate) fn backward_regression(ctx: &mut Context, inst: &RegressionInst) -> Result<()> {
    let shape = ctx.weight(inst.src)?.shape();
    expect_rank("regression", shape, 2)?;
    expect_same_shape("regression expected", shape, ctx.weight(inst.expected)?.shape())?;
    let (batch, m) = (shape.dims()[0], shape.dims()[1]);

    ctx.update_grad(inst.src, |ctx, in_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let expected = ctx.weight_handle::<Float>(inst.expected)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        for n in 0..batch {
            for i in 0..m {
                *ig.at_mut(&[n, i]) += src.at(&[n, i]) - expected.at(&[n, i]);
            }
        }
        Ok(())
    })
}
