// Local response normalization — Cross-channel normalization, NHWC
//
// For every (n, h, w) a running window sum slides along the channel axis.
// It is seeded with channels 1..=W, then for channel c:
//
//   scale(c) = k + α/(2W+1) · squareSum
//   dest(c)  = src(c) · scale(c)^-β
//   squareSum -= src(c-W)²   when c ≥ W
//   squareSum += src(c+W+1)² when c+W+1 < C
//
// The scale of every element is cached for the backward pass, which slides
// s = Σ out_g · dest / scale over the same window:
//
//   in_g(c) = out_g(c) · scale(c)^-β - 2 · α/(2W+1) · β · src(c) · s

use wren_core::{bail, Float, Result, ShapeNHWC};
use wren_ir::LocalResponseNormalizationInst;

use super::{expect_same_shape, store};
use crate::config::GradientPolicy;
use crate::context::Context;

fn geometry(ctx: &Context, inst: &LocalResponseNormalizationInst) -> Result<ShapeNHWC> {
    let src = ctx.weight(inst.src)?.shape();
    expect_same_shape("lrn output", src, ctx.weight(inst.dest)?.shape())?;
    expect_same_shape("lrn scale cache", src, ctx.weight(inst.scale)?.shape())?;
    let idim = ShapeNHWC::from_dims(src.dims())?;
    if idim.c == 0 {
        bail!("lrn input needs at least one channel");
    }
    Ok(idim)
}

fn normed_alpha(inst: &LocalResponseNormalizationInst) -> Float {
    inst.alpha / (2 * inst.half_window_size + 1) as Float
}

pub(crate) fn forward(ctx: &mut Context, inst: &LocalResponseNormalizationInst) -> Result<()> {
    let idim = geometry(ctx, inst)?;
    let half = inst.half_window_size;
    let alpha = normed_alpha(inst);

    ctx.update_weight_pair(inst.dest, inst.scale, |ctx, dest, scale_cache| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let mut out = dest.handle_mut::<Float>()?;
        let mut cache = scale_cache.handle_mut::<Float>()?;

        for n in 0..idim.n {
            for h in 0..idim.h {
                for w in 0..idim.w {
                    let mut square_sum: Float = 0.0;
                    for c in (1..=half).take_while(|&c| c < idim.c) {
                        let v = src.at(&[n, h, w, c]);
                        square_sum += v * v;
                    }

                    for c in 0..idim.c {
                        let scale = inst.k + alpha * square_sum;
                        *cache.at_mut(&[n, h, w, c]) = scale;
                        *out.at_mut(&[n, h, w, c]) = src.at(&[n, h, w, c]) * scale.powf(-inst.beta);

                        let sub = if c >= half { src.at(&[n, h, w, c - half]) } else { 0.0 };
                        let add = if c + half + 1 < idim.c {
                            src.at(&[n, h, w, c + half + 1])
                        } else {
                            0.0
                        };
                        square_sum = square_sum - sub * sub + add * add;
                    }
                }
            }
        }
        Ok(())
    })
}

pub(crate) fn backward(
    ctx: &mut Context,
    inst: &LocalResponseNormalizationInst,
    policy: GradientPolicy,
) -> Result<()> {
    let odim = geometry(ctx, inst)?;
    let half = inst.half_window_size;
    let alpha = normed_alpha(inst);
    ctx.ensure_grad(inst.dest)?;

    ctx.update_grad(inst.src, |ctx, in_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let out_w = ctx.weight_handle::<Float>(inst.dest)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let cache = ctx.weight_handle::<Float>(inst.scale)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        let term = |n: usize, h: usize, w: usize, c: usize| {
            let coord = [n, h, w, c];
            out_g.at(&coord) * (out_w.at(&coord) / cache.at(&coord))
        };

        for n in 0..odim.n {
            for h in 0..odim.h {
                for w in 0..odim.w {
                    let mut sum: Float = 0.0;
                    for c in (1..=half).take_while(|&c| c < odim.c) {
                        sum += term(n, h, w, c);
                    }

                    for c in 0..odim.c {
                        let coord = [n, h, w, c];
                        let g = out_g.at(&coord) * cache.at(&coord).powf(-inst.beta)
                            - 2.0 * alpha * inst.beta * src.at(&coord) * sum;
                        store(policy, ig.at_mut(&coord), g);

                        if c >= half {
                            sum -= term(n, h, w, c - half);
                        }
                        if c + half + 1 < odim.c {
                            sum += term(n, h, w, c + half + 1);
                        }
                    }
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use wren_core::Tensor;
    use wren_ir::ValueId;

    fn setup(src: Tensor, half_window_size: usize) -> (Context, LocalResponseNormalizationInst) {
        let shape = src.shape().clone();
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), src).unwrap();
        ctx.insert(ValueId(1), Tensor::full(0.0, shape.clone())).unwrap();
        ctx.insert(ValueId(2), Tensor::full(0.0, shape)).unwrap();
        let inst = LocalResponseNormalizationInst {
            dest: ValueId(1),
            src: ValueId(0),
            scale: ValueId(2),
            half_window_size,
            alpha: 3.0,
            beta: 0.75,
            k: 2.0,
        };
        (ctx, inst)
    }

    #[test]
    fn test_window_seed_skips_channel_zero() {
        // C = 2, W = 1: the seed holds channel 1 only, and nothing slides in
        // or out before channel 1, so both channels share one scale.
        let src = Tensor::from_vec(vec![1.0f32, 2.0], [1, 1, 1, 2]).unwrap();
        let (mut ctx, inst) = setup(src, 1);
        forward(&mut ctx, &inst).unwrap();
        let scale = ctx.weight(ValueId(2)).unwrap().to_vec::<Float>().unwrap();
        assert_relative_eq!(scale[0], 2.0 + 1.0 * 4.0);
        assert_relative_eq!(scale[1], 2.0 + 1.0 * 4.0);
    }

    #[test]
    fn test_backward_policy() {
        let src = Tensor::from_vec(vec![0.5f32, -1.0, 2.0], [1, 1, 1, 3]).unwrap();
        let (mut ctx, inst) = setup(src, 1);
        forward(&mut ctx, &inst).unwrap();
        ctx.ensure_grad(ValueId(1)).unwrap().handle_mut::<Float>().unwrap().fill(1.0);

        backward(&mut ctx, &inst, GradientPolicy::Reference).unwrap();
        let once = ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap();
        backward(&mut ctx, &inst, GradientPolicy::Reference).unwrap();
        assert_eq!(ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap(), once);

        backward(&mut ctx, &inst, GradientPolicy::Accumulate).unwrap();
        let twice = ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap();
        for (a, b) in twice.iter().zip(&once) {
            assert_relative_eq!(*a, 2.0 * b);
        }
    }

    #[test]
    fn test_zero_channels() {
        let (mut ctx, inst) = setup(Tensor::full(0.0, [1, 1, 1, 0]), 1);
        assert!(forward(&mut ctx, &inst).is_err());
    }
}
