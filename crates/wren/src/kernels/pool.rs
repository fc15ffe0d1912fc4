// Pooling — Max and average over K×K windows, NHWC
//
// MAX
//   forward:  the largest in-range value of the window; ties go to the later
//             tap (`val >= max`). Its coordinate (ox, oy) is saved in
//             src_xy(n, ax, ay, z, 0..2). A window with no in-range tap is an
//             error.
//   backward: in_g(n, mx, my, z) += out_g(n, ax, ay, z)
//
// AVG
//   forward:  (Σ in-range values) / K². Padded taps count toward the divisor.
//   backward: every in-range tap receives out_g / K²

use wren_core::{bail, Error, Float, Index, Result, Shape, ShapeNHWC};
use wren_ir::{PoolInst, PoolKind, ValueId};

use super::expect_same_shape;
use super::window::Window;
use crate::context::Context;

struct Geometry {
    idim: ShapeNHWC,
    odim: ShapeNHWC,
    window: Window,
}

fn geometry(ctx: &Context, inst: &PoolInst) -> Result<Geometry> {
    let idim = ShapeNHWC::from_dims(ctx.weight(inst.src)?.dims())?;
    let odim = ShapeNHWC::from_dims(ctx.weight(inst.dest)?.dims())?;
    if idim.n != odim.n || idim.c != odim.c {
        return Err(Error::shape_mismatch(
            "pool batch/channels",
            &idim.to_shape(),
            &odim.to_shape(),
        ));
    }
    Ok(Geometry {
        idim,
        odim,
        window: Window::new(inst.kernel, inst.stride, inst.pad),
    })
}

fn saved_coordinates(ctx: &Context, inst: &PoolInst, odim: ShapeNHWC) -> Result<ValueId> {
    let xy = inst
        .src_xy
        .ok_or_else(|| Error::msg("max pooling has no saved-coordinate value"))?;
    expect_same_shape(
        "max pool coordinates",
        &Shape::from([odim.n, odim.h, odim.w, odim.c, 2]),
        ctx.weight(xy)?.shape(),
    )?;
    Ok(xy)
}

pub(crate) fn forward(ctx: &mut Context, inst: &PoolInst) -> Result<()> {
    match inst.kind {
        PoolKind::Max => forward_max(ctx, inst),
        PoolKind::Avg => forward_avg(ctx, inst),
    }
}

pub(crate) fn backward(ctx: &mut Context, inst: &PoolInst) -> Result<()> {
    match inst.kind {
        PoolKind::Max => backward_max(ctx, inst),
        PoolKind::Avg => backward_avg(ctx, inst),
    }
}

fn forward_max(ctx: &mut Context, inst: &PoolInst) -> Result<()> {
    let Geometry { idim, odim, window } = geometry(ctx, inst)?;
    let xy = saved_coordinates(ctx, inst, odim)?;

    ctx.update_weight_pair(inst.dest, xy, |ctx, dest, saved| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let mut out = dest.handle_mut::<Float>()?;
        let mut sxy = saved.handle_mut::<Index>()?;

        for n in 0..odim.n {
            for z in 0..idim.c {
                for a in window.anchors(odim) {
                    let mut best: Option<(Float, usize, usize)> = None;
                    for t in window.taps(a, idim) {
                        let val = src.at(&[n, t.ox, t.oy, z]);
                        if best.map_or(true, |(max, _, _)| val >= max) {
                            best = Some((val, t.ox, t.oy));
                        }
                    }
                    let (max, mx, my) =
                        best.ok_or(Error::EmptyPoolingWindow { x: a.x, y: a.y })?;
                    *sxy.at_mut(&[n, a.ax, a.ay, z, 0]) = mx;
                    *sxy.at_mut(&[n, a.ax, a.ay, z, 1]) = my;
                    *out.at_mut(&[n, a.ax, a.ay, z]) = max;
                }
            }
        }
        Ok(())
    })
}

fn backward_max(ctx: &mut Context, inst: &PoolInst) -> Result<()> {
    let Geometry { idim, odim, .. } = geometry(ctx, inst)?;
    let xy = saved_coordinates(ctx, inst, odim)?;
    ctx.ensure_grad(inst.dest)?;

    ctx.update_grad(inst.src, |ctx, in_g| {
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let sxy = ctx.weight_handle::<Index>(xy)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        for n in 0..odim.n {
            for z in 0..odim.c {
                for ay in 0..odim.w {
                    for ax in 0..odim.h {
                        let g = out_g.at(&[n, ax, ay, z]);
                        let mx = sxy.at(&[n, ax, ay, z, 0]);
                        let my = sxy.at(&[n, ax, ay, z, 1]);
                        if mx >= idim.h || my >= idim.w {
                            bail!(
                                "saved max-pool coordinate ({mx}, {my}) is outside {idim}"
                            );
                        }
                        *ig.at_mut(&[n, mx, my, z]) += g;
                    }
                }
            }
        }
        Ok(())
    })
}

fn forward_avg(ctx: &mut Context, inst: &PoolInst) -> Result<()> {
    let Geometry { idim, odim, window } = geometry(ctx, inst)?;
    let filter_area = (inst.kernel * inst.kernel) as Float;

    ctx.update_weight(inst.dest, |ctx, dest| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let mut out = dest.handle_mut::<Float>()?;

        for n in 0..odim.n {
            for z in 0..idim.c {
                for a in window.anchors(odim) {
                    let mut sum: Float = 0.0;
                    for t in window.taps(a, idim) {
                        sum += src.at(&[n, t.ox, t.oy, z]);
                    }
                    *out.at_mut(&[n, a.ax, a.ay, z]) = sum / filter_area;
                }
            }
        }
        Ok(())
    })
}

fn backward_avg(ctx: &mut Context, inst: &PoolInst) -> Result<()> {
    let Geometry { idim, odim, window } = geometry(ctx, inst)?;
    let filter_area = (inst.kernel * inst.kernel) as Float;
    ctx.ensure_grad(inst.dest)?;

    ctx.update_grad(inst.src, |ctx, in_g| {
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        for n in 0..odim.n {
            for z in 0..odim.c {
                for a in window.anchors(odim) {
                    let dy = out_g.at(&[n, a.ax, a.ay, z]) / filter_area;
                    for t in window.taps(a, idim) {
                        *ig.at_mut(&[n, t.ox, t.oy, z]) += dy;
                    }
                }
            }
        }
        Ok(())
    })
}
