// Convolution — NHWC, square K×K filter, implicit zero padding
//
// filter: (depth, K, K, C_in), read as filter(d, fx, fy, fd)
// bias:   (depth)
// dest:   (N, H_out, W_out, depth), sized by the caller
//
// Forward, per (n, d, anchor):
//   dest(n, ax, ay, d) = Σ_{fy, fx, fd} filter(d, fx, fy, fd) · src(n, ox, oy, fd) + bias(d)
//
// Backward, with g = out_g(n, ax, ay, d):
//   filter_g(d, fx, fy, fd) += src(b, ox, oy, fd) · g     b = 0 or n, see FilterGradSource
//   in_g(n, ox, oy, fd)     += filter(d, fx, fy, fd) · g
//   bias_g(d)               += g
//
// The three gradients are written in separate passes over the same loop
// nest, which keeps the summation order of each buffer unchanged.

use wren_core::{Error, Float, Handle, Result, Shape, ShapeNHWC};
use wren_ir::ConvolutionInst;

use super::expect_same_shape;
use super::window::{Anchor, Window};
use crate::config::FilterGradSource;
use crate::context::Context;

struct Geometry {
    idim: ShapeNHWC,
    odim: ShapeNHWC,
    window: Window,
}

fn geometry(ctx: &Context, inst: &ConvolutionInst) -> Result<Geometry> {
    let idim = ShapeNHWC::from_dims(ctx.weight(inst.src)?.dims())?;
    let odim = ShapeNHWC::from_dims(ctx.weight(inst.dest)?.dims())?;
    if idim.n != odim.n {
        return Err(Error::shape_mismatch(
            "convolution batch",
            &idim.to_shape(),
            &odim.to_shape(),
        ));
    }
    let k = inst.kernel;
    expect_same_shape(
        "convolution filter",
        &Shape::from([odim.c, k, k, idim.c]),
        ctx.weight(inst.filter)?.shape(),
    )?;
    expect_same_shape(
        "convolution bias",
        &Shape::from(odim.c),
        ctx.weight(inst.bias)?.shape(),
    )?;
    Ok(Geometry {
        idim,
        odim,
        window: Window::new(inst.kernel, inst.stride, inst.pad),
    })
}

/// Visit every (n, d, anchor) in kernel loop order.
fn for_each_output(odim: ShapeNHWC, window: Window, mut f: impl FnMut(usize, usize, Anchor)) {
    for n in 0..odim.n {
        for d in 0..odim.c {
            for anchor in window.anchors(odim) {
                f(n, d, anchor);
            }
        }
    }
}

#[inline]
fn chain_grad(out_g: &Handle<'_, Float>, n: usize, d: usize, a: Anchor) -> Float {
    out_g.at(&[n, a.ax, a.ay, d])
}

pub(crate) fn forward(ctx: &mut Context, inst: &ConvolutionInst) -> Result<()> {
    let Geometry { idim, odim, window } = geometry(ctx, inst)?;

    ctx.update_weight(inst.dest, |ctx, dest| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let filter = ctx.weight_handle::<Float>(inst.filter)?;
        let bias = ctx.weight_handle::<Float>(inst.bias)?;
        let mut out = dest.handle_mut::<Float>()?;

        for_each_output(odim, window, |n, d, a| {
            let mut sum: Float = 0.0;
            for t in window.taps(a, idim) {
                for fd in 0..idim.c {
                    sum += filter.at(&[d, t.fx, t.fy, fd]) * src.at(&[n, t.ox, t.oy, fd]);
                }
            }
            sum += bias.at(&[d]);
            *out.at_mut(&[n, a.ax, a.ay, d]) = sum;
        });
        Ok(())
    })
}

pub(crate) fn backward(
    ctx: &mut Context,
    inst: &ConvolutionInst,
    source: FilterGradSource,
) -> Result<()> {
    let Geometry { idim, odim, window } = geometry(ctx, inst)?;
    ctx.ensure_grad(inst.dest)?;
    expect_same_shape(
        "convolution output gradient",
        &odim.to_shape(),
        ctx.grad(inst.dest)?.shape(),
    )?;

    ctx.update_grad(inst.filter, |ctx, filter_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut fg = filter_g.handle_mut::<Float>()?;

        for_each_output(odim, window, |n, d, a| {
            let g = chain_grad(&out_g, n, d, a);
            let b = match source {
                FilterGradSource::FirstBatch => 0,
                FilterGradSource::CurrentBatch => n,
            };
            for t in window.taps(a, idim) {
                for fd in 0..idim.c {
                    *fg.at_mut(&[d, t.fx, t.fy, fd]) += src.at(&[b, t.ox, t.oy, fd]) * g;
                }
            }
        });
        Ok(())
    })?;

    ctx.update_grad(inst.src, |ctx, in_g| {
        let filter = ctx.weight_handle::<Float>(inst.filter)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        for_each_output(odim, window, |n, d, a| {
            let g = chain_grad(&out_g, n, d, a);
            for t in window.taps(a, idim) {
                for fd in 0..idim.c {
                    *ig.at_mut(&[n, t.ox, t.oy, fd]) += filter.at(&[d, t.fx, t.fy, fd]) * g;
                }
            }
        });
        Ok(())
    })?;

    ctx.update_grad(inst.bias, |ctx, bias_g| {
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut bg = bias_g.handle_mut::<Float>()?;

        for_each_output(odim, window, |n, d, a| {
            *bg.at_mut(&[d]) += chain_grad(&out_g, n, d, a);
        });
        Ok(())
    })
}
