// Activations — Pointwise ReLU, Sigmoid and Tanh
//
//   ReLU      y = max(0, x)                    dx += y > 0 ? dy : 0
//   Sigmoid   y = 1 / (1 + e^-x)               dx += y·(1 - y)·dy
//   Tanh      y = (e^x - e^-x) / (e^x + e^-x)  dx += (1 - y²)·dy
//
// All three backward rules read the forward output, never the input.

use wren_core::{Float, Result};
use wren_ir::{ReluInst, SigmoidInst, TanhInst, ValueId};

use super::expect_same_shape;
use crate::context::Context;

fn map_forward(
    ctx: &mut Context,
    dest: ValueId,
    src: ValueId,
    f: impl Fn(Float) -> Float,
) -> Result<()> {
    expect_same_shape("activation", ctx.weight(src)?.shape(), ctx.weight(dest)?.shape())?;
    ctx.update_weight(dest, |ctx, out| {
        let src = ctx.weight_handle::<Float>(src)?;
        let mut out = out.handle_mut::<Float>()?;
        for (o, x) in out.as_mut_slice().iter_mut().zip(src.iter()) {
            *o = f(x);
        }
        Ok(())
    })
}

/// `in_g[i] += f(y[i], dy[i])`
fn map_backward(
    ctx: &mut Context,
    dest: ValueId,
    src: ValueId,
    f: impl Fn(Float, Float) -> Float,
) -> Result<()> {
    expect_same_shape("activation", ctx.weight(src)?.shape(), ctx.weight(dest)?.shape())?;
    ctx.ensure_grad(dest)?;
    ctx.update_grad(src, |ctx, in_g| {
        let out_w = ctx.weight_handle::<Float>(dest)?;
        let out_g = ctx.grad_handle::<Float>(dest)?;
        let mut ig = in_g.handle_mut::<Float>()?;
        for (i, d) in ig.as_mut_slice().iter_mut().enumerate() {
            *d += f(out_w.raw(i), out_g.raw(i));
        }
        Ok(())
    })
}

pub(crate) fn forward_relu(ctx: &mut Context, inst: &ReluInst) -> Result<()> {
    map_forward(ctx, inst.dest, inst.src, |x| if x < 0.0 { 0.0 } else { x })
}

pub(crate) fn backward_relu(ctx: &mut Context, inst: &ReluInst) -> Result<()> {
    map_backward(ctx, inst.dest, inst.src, |y, dy| if y <= 0.0 { 0.0 } else { dy })
}

pub(crate) fn forward_sigmoid(ctx: &mut Context, inst: &SigmoidInst) -> Result<()> {
    map_forward(ctx, inst.dest, inst.src, |x| 1.0 / (1.0 + (-x).exp()))
}

pub(crate) fn backward_sigmoid(ctx: &mut Context, inst: &SigmoidInst) -> Result<()> {
    map_backward(ctx, inst.dest, inst.src, |y, dy| y * (1.0 - y) * dy)
}

pub(crate) fn forward_tanh(ctx: &mut Context, inst: &TanhInst) -> Result<()> {
    map_forward(ctx, inst.dest, inst.src, |x| {
        let (ep, en) = (x.exp(), (-x).exp());
        (ep - en) / (ep + en)
    })
}

pub(crate) fn backward_tanh(ctx: &mut Context, inst: &TanhInst) -> Result<()> {
    map_backward(ctx, inst.dest, inst.src, |y, dy| (1.0 - y * y) * dy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use wren_core::Tensor;

    fn setup(values: Vec<Float>) -> Context {
        let n = values.len();
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), Tensor::from_vec(values, n).unwrap()).unwrap();
        ctx.insert(ValueId(1), Tensor::full(0.0, n)).unwrap();
        ctx
    }

    #[test]
    fn test_sigmoid_backward_uses_output() {
        let mut ctx = setup(vec![0.0, 2.0]);
        let inst = SigmoidInst { dest: ValueId(1), src: ValueId(0) };
        forward_sigmoid(&mut ctx, &inst).unwrap();
        let y = ctx.weight(ValueId(1)).unwrap().to_vec::<Float>().unwrap();
        assert_relative_eq!(y[0], 0.5);
        ctx.ensure_grad(ValueId(1)).unwrap().handle_mut::<Float>().unwrap().fill(1.0);
        backward_sigmoid(&mut ctx, &inst).unwrap();
        let g = ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap();
        assert_relative_eq!(g[0], 0.25);
        assert_relative_eq!(g[1], y[1] * (1.0 - y[1]));
    }

    #[test]
    fn test_tanh_is_odd() {
        let mut ctx = setup(vec![-1.5, 0.0, 1.5]);
        forward_tanh(&mut ctx, &TanhInst { dest: ValueId(1), src: ValueId(0) }).unwrap();
        let y = ctx.weight(ValueId(1)).unwrap().to_vec::<Float>().unwrap();
        assert_relative_eq!(y[0], -y[2], epsilon = 1e-6);
        assert_relative_eq!(y[2], (1.5f32).tanh(), epsilon = 1e-6);
        assert_eq!(y[1], 0.0);
    }

    #[test]
    fn test_relu_zero_output_blocks_gradient() {
        let mut ctx = setup(vec![-1.0, 0.0, 3.0]);
        let inst = ReluInst { dest: ValueId(1), src: ValueId(0) };
        forward_relu(&mut ctx, &inst).unwrap();
        ctx.ensure_grad(ValueId(1)).unwrap().handle_mut::<Float>().unwrap().fill(2.0);
        backward_relu(&mut ctx, &inst).unwrap();
        assert_eq!(
            ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap(),
            vec![0.0, 0.0, 2.0]
        );
    }

    #[test]
    fn test_shape_mismatch() {
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), Tensor::full(1.0, 3)).unwrap();
        ctx.insert(ValueId(1), Tensor::full(0.0, 4)).unwrap();
        assert!(forward_relu(&mut ctx, &ReluInst { dest: ValueId(1), src: ValueId(0) }).is_err());
    }
}
