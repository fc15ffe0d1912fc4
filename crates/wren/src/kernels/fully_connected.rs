// Fully connected — dest(n, i) = Σⱼ src(n, j) · filter(i, j) + bias(i)
//
// src and dest are read flatten-cdr: (N, M_in) and (N, M_out). filter is
// (M_out, M_in), bias is (M_out). The row of batch n starts at
// `src.element_ptr([n])`.

use wren_core::{flatten_cdr, Error, Float, Result, Shape};
use wren_ir::FullyConnectedInst;

use super::expect_same_shape;
use crate::context::Context;

#[derive(Clone, Copy)]
struct Dims {
    batch: usize,
    m_in: usize,
    m_out: usize,
}

fn dims(ctx: &Context, inst: &FullyConnectedInst) -> Result<Dims> {
    let src = ctx.weight(inst.src)?;
    let dest = ctx.weight(inst.dest)?;
    let (batch, m_in) = flatten_cdr(src.dims())?;
    let (out_batch, m_out) = flatten_cdr(dest.dims())?;
    if batch != out_batch {
        return Err(Error::shape_mismatch("fully connected batch", src.shape(), dest.shape()));
    }
    expect_same_shape(
        "fully connected filter",
        &Shape::from((m_out, m_in)),
        ctx.weight(inst.filter)?.shape(),
    )?;
    expect_same_shape(
        "fully connected bias",
        &Shape::from(m_out),
        ctx.weight(inst.bias)?.shape(),
    )?;
    Ok(Dims { batch, m_in, m_out })
}

pub(crate) fn forward(ctx: &mut Context, inst: &FullyConnectedInst) -> Result<()> {
    let Dims { batch, m_in, m_out } = dims(ctx, inst)?;

    ctx.update_weight(inst.dest, |ctx, dest| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let filter = ctx.weight_handle::<Float>(inst.filter)?;
        let bias = ctx.weight_handle::<Float>(inst.bias)?;
        let mut out = dest.handle_mut::<Float>()?;

        for n in 0..batch {
            let base = src.element_ptr(&[n]);
            let out_base = out.element_ptr(&[n]);
            for i in 0..m_out {
                let mut sum: Float = 0.0;
                for j in 0..m_in {
                    sum += src.raw(base + j) * filter.at(&[i, j]);
                }
                sum += bias.at(&[i]);
                *out.raw_mut(out_base + i) = sum;
            }
        }
        Ok(())
    })
}

pub(crate) fn backward(ctx: &mut Context, inst: &FullyConnectedInst) -> Result<()> {
    let Dims { batch, m_in, m_out } = dims(ctx, inst)?;
    ctx.ensure_grad(inst.dest)?;

    ctx.update_grad(inst.src, |ctx, in_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let filter = ctx.weight_handle::<Float>(inst.filter)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        for n in 0..batch {
            let base = src.element_ptr(&[n]);
            let out_base = out_g.element_ptr(&[n]);
            for i in 0..m_out {
                let g = out_g.raw(out_base + i);
                for j in 0..m_in {
                    *ig.raw_mut(base + j) += filter.at(&[i, j]) * g;
                }
            }
        }
        Ok(())
    })?;

    ctx.update_grad(inst.filter, |ctx, filter_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut fg = filter_g.handle_mut::<Float>()?;

        for n in 0..batch {
            let base = src.element_ptr(&[n]);
            let out_base = out_g.element_ptr(&[n]);
            for i in 0..m_out {
                let g = out_g.raw(out_base + i);
                for j in 0..m_in {
                    *fg.at_mut(&[i, j]) += src.raw(base + j) * g;
                }
            }
        }
        Ok(())
    })?;

    ctx.update_grad(inst.bias, |ctx, bias_g| {
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut bg = bias_g.handle_mut::<Float>()?;

        for n in 0..batch {
            let out_base = out_g.element_ptr(&[n]);
            for i in 0..m_out {
                *bg.at_mut(&[i]) += out_g.raw(out_base + i);
            }
        }
        Ok(())
    })
}
