// Batch normalization — Per-channel affine normalization with running stats
//
// The channel of flat element i is `src.dim_for_ptr(channel_idx, i)`;
// N is the number of elements per channel.
//
// INFERENCE:
//   y = (x - mean[c]) · γ[c] · (var[c] + ε)^-½ + β[c]
//
// TRAINING:
//   μ_local, σ²_local over the current input (divide by N)
//   mean ← P·μ_local + (1 - P)·mean,  var ← P·σ²_local + (1 - P)·var
//   then the inference formula with the blended running statistics
//
// BACKWARD (μ, σ² are the running statistics):
//   in_g += (1/N)·γ·(σ²+ε)^-½·(N·dy - Σdy - (x-μ)·(σ²+ε)^-1·Σ dy·(x-μ))
//   β_g  += dy
//   γ_g  += (x-μ)·(σ²+ε)^-½·dy

use wren_core::{bail, Float, Result, Shape};
use wren_ir::BatchNormalizationInst;

use super::expect_same_shape;
use crate::context::Context;

#[derive(Clone, Copy)]
struct Channels {
    count: usize,
    samples: usize,
}

fn channels(ctx: &Context, inst: &BatchNormalizationInst) -> Result<Channels> {
    let src = ctx.weight(inst.src)?;
    expect_same_shape("batch norm output", src.shape(), ctx.weight(inst.dest)?.shape())?;
    let count = src.shape().dim(inst.channel_idx)?;
    if count == 0 {
        bail!("batch norm over zero channels");
    }
    let per_channel = Shape::from(count);
    for (what, id) in [
        ("batch norm scale", inst.scale),
        ("batch norm bias", inst.bias),
        ("batch norm mean", inst.mean),
        ("batch norm variance", inst.var),
    ] {
        expect_same_shape(what, &per_channel, ctx.weight(id)?.shape())?;
    }
    Ok(Channels {
        count,
        samples: src.size() / count,
    })
}

pub(crate) fn forward(
    ctx: &mut Context,
    is_train: bool,
    inst: &BatchNormalizationInst,
) -> Result<()> {
    let channels = channels(ctx, inst)?;
    if is_train {
        update_running_stats(ctx, inst, channels)?;
    }
    forward_infer(ctx, inst)
}

fn forward_infer(ctx: &mut Context, inst: &BatchNormalizationInst) -> Result<()> {
    let epsilon = inst.epsilon;
    ctx.update_weight(inst.dest, |ctx, dest| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let gamma = ctx.weight_handle::<Float>(inst.scale)?;
        let beta = ctx.weight_handle::<Float>(inst.bias)?;
        let mean = ctx.weight_handle::<Float>(inst.mean)?;
        let var = ctx.weight_handle::<Float>(inst.var)?;
        let mut out = dest.handle_mut::<Float>()?;

        for i in 0..src.size() {
            let c = src.dim_for_ptr(inst.channel_idx, i);
            let stdvar = 1.0 / (var.at(&[c]) + epsilon).sqrt();
            *out.raw_mut(i) =
                (src.raw(i) - mean.at(&[c])) * gamma.at(&[c]) * stdvar + beta.at(&[c]);
        }
        Ok(())
    })
}

fn update_running_stats(
    ctx: &mut Context,
    inst: &BatchNormalizationInst,
    Channels { count, samples }: Channels,
) -> Result<()> {
    let src = ctx.weight_handle::<Float>(inst.src)?;
    let n = samples as Float;

    let mut local_mean = vec![0.0; count];
    for i in 0..src.size() {
        local_mean[src.dim_for_ptr(inst.channel_idx, i)] += src.raw(i);
    }
    for m in &mut local_mean {
        *m /= n;
    }

    let mut local_var = vec![0.0; count];
    for i in 0..src.size() {
        let c = src.dim_for_ptr(inst.channel_idx, i);
        let v = src.raw(i) - local_mean[c];
        local_var[c] += v * v;
    }
    for v in &mut local_var {
        *v /= n;
    }

    let p = inst.momentum;
    ctx.update_weight_pair(inst.mean, inst.var, |_, mean, var| {
        let mut mean = mean.handle_mut::<Float>()?;
        let mut var = var.handle_mut::<Float>()?;
        for c in 0..count {
            *mean.at_mut(&[c]) = p * local_mean[c] + (1.0 - p) * mean.at(&[c]);
            *var.at_mut(&[c]) = p * local_var[c] + (1.0 - p) * var.at(&[c]);
        }
        Ok(())
    })
}

pub(crate) fn backward(ctx: &mut Context, inst: &BatchNormalizationInst) -> Result<()> {
    let Channels { count, samples } = channels(ctx, inst)?;
    let epsilon = inst.epsilon;
    let axis = inst.channel_idx;
    ctx.ensure_grad(inst.dest)?;

    let (sum_dy_hmu, sum_dy) = {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let mean = ctx.weight_handle::<Float>(inst.mean)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;

        let mut sum_dy_hmu = vec![0.0; count];
        for i in 0..src.size() {
            let c = src.dim_for_ptr(axis, i);
            sum_dy_hmu[c] += out_g.raw(i) * (src.raw(i) - mean.at(&[c]));
        }
        let mut sum_dy = vec![0.0; count];
        for i in 0..src.size() {
            sum_dy[src.dim_for_ptr(axis, i)] += out_g.raw(i);
        }
        (sum_dy_hmu, sum_dy)
    };

    ctx.update_grad(inst.src, |ctx, in_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let gamma = ctx.weight_handle::<Float>(inst.scale)?;
        let mean = ctx.weight_handle::<Float>(inst.mean)?;
        let var = ctx.weight_handle::<Float>(inst.var)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut ig = in_g.handle_mut::<Float>()?;

        let n = samples as Float;
        let inv_n = 1.0 / n;
        for i in 0..src.size() {
            let c = src.dim_for_ptr(axis, i);
            let inv_var_sqrt = 1.0 / (var.at(&[c]) + epsilon).sqrt();
            let inv_var = 1.0 / (var.at(&[c]) + epsilon);
            let dy = out_g.raw(i);
            let hmu = src.raw(i) - mean.at(&[c]);
            *ig.raw_mut(i) += inv_n
                * gamma.at(&[c])
                * inv_var_sqrt
                * (n * dy - sum_dy[c] - hmu * inv_var * sum_dy_hmu[c]);
        }
        Ok(())
    })?;

    ctx.update_grad(inst.bias, |ctx, beta_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut bg = beta_g.handle_mut::<Float>()?;
        for i in 0..src.size() {
            *bg.at_mut(&[src.dim_for_ptr(axis, i)]) += out_g.raw(i);
        }
        Ok(())
    })?;

    ctx.update_grad(inst.scale, |ctx, gamma_g| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        let mean = ctx.weight_handle::<Float>(inst.mean)?;
        let var = ctx.weight_handle::<Float>(inst.var)?;
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let mut gg = gamma_g.handle_mut::<Float>()?;
        for i in 0..src.size() {
            let c = src.dim_for_ptr(axis, i);
            let inv_var_sqrt = 1.0 / (var.at(&[c]) + epsilon).sqrt();
            *gg.at_mut(&[c]) += (src.raw(i) - mean.at(&[c])) * inv_var_sqrt * out_g.raw(i);
        }
        Ok(())
    })
}
