// Arithmetic — Elementwise Add and Mul over identical shapes
//
//   Add   dest = lhs + rhs    lhs_g ← out_g         rhs_g ← out_g
//   Mul   dest = lhs · rhs    lhs_g ← rhs · out_g   rhs_g ← lhs · out_g
//
// `←` is a policy site: overwrite under Reference, add under Accumulate.
// The lhs gradient is written before the rhs gradient, so an instruction
// whose operands are the same value ends with the rhs rule applied last.

use wren_core::{Float, Result};
use wren_ir::{ArithmeticInst, ArithmeticKind, ValueId};

use super::{expect_same_shape, store};
use crate::config::GradientPolicy;
use crate::context::Context;

fn check_shapes(ctx: &Context, inst: &ArithmeticInst) -> Result<()> {
    let dest = ctx.weight(inst.dest)?.shape();
    expect_same_shape("arithmetic lhs", dest, ctx.weight(inst.lhs)?.shape())?;
    expect_same_shape("arithmetic rhs", dest, ctx.weight(inst.rhs)?.shape())
}

pub(crate) fn forward(ctx: &mut Context, inst: &ArithmeticInst) -> Result<()> {
    check_shapes(ctx, inst)?;
    let op: fn(Float, Float) -> Float = match inst.kind {
        ArithmeticKind::Add => |a, b| a + b,
        ArithmeticKind::Mul => |a, b| a * b,
    };

    ctx.update_weight(inst.dest, |ctx, dest| {
        let lhs = ctx.weight_handle::<Float>(inst.lhs)?;
        let rhs = ctx.weight_handle::<Float>(inst.rhs)?;
        let mut out = dest.handle_mut::<Float>()?;
        for (i, o) in out.as_mut_slice().iter_mut().enumerate() {
            *o = op(lhs.raw(i), rhs.raw(i));
        }
        Ok(())
    })
}

pub(crate) fn backward(
    ctx: &mut Context,
    inst: &ArithmeticInst,
    policy: GradientPolicy,
) -> Result<()> {
    check_shapes(ctx, inst)?;
    ctx.ensure_grad(inst.dest)?;

    // (operand whose gradient is written, the other operand)
    for (target, other) in [(inst.lhs, inst.rhs), (inst.rhs, inst.lhs)] {
        operand_backward(ctx, inst, target, other, policy)?;
    }
    Ok(())
}

fn operand_backward(
    ctx: &mut Context,
    inst: &ArithmeticInst,
    target: ValueId,
    other: ValueId,
    policy: GradientPolicy,
) -> Result<()> {
    ctx.update_grad(target, |ctx, grad| {
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        let other = ctx.weight_handle::<Float>(other)?;
        let mut g = grad.handle_mut::<Float>()?;
        for i in 0..out_g.size() {
            let v = match inst.kind {
                ArithmeticKind::Add => out_g.raw(i),
                ArithmeticKind::Mul => other.raw(i) * out_g.raw(i),
            };
            store(policy, g.raw_mut(i), v);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use wren_core::Tensor;

    fn setup(kind: ArithmeticKind, lhs: Vec<Float>, rhs: Vec<Float>) -> (Context, ArithmeticInst) {
        let n = lhs.len();
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), Tensor::from_vec(lhs, n).unwrap()).unwrap();
        ctx.insert(ValueId(1), Tensor::from_vec(rhs, n).unwrap()).unwrap();
        ctx.insert(ValueId(2), Tensor::full(0.0, n)).unwrap();
        let inst = ArithmeticInst {
            kind,
            dest: ValueId(2),
            lhs: ValueId(0),
            rhs: ValueId(1),
        };
        (ctx, inst)
    }

    #[test]
    fn test_add_forward_and_backward() {
        let (mut ctx, inst) = setup(ArithmeticKind::Add, vec![1.0, 2.0], vec![10.0, 20.0]);
        forward(&mut ctx, &inst).unwrap();
        assert_eq!(ctx.weight(ValueId(2)).unwrap().to_vec::<Float>().unwrap(), vec![11.0, 22.0]);
        ctx.ensure_grad(ValueId(2)).unwrap().handle_mut::<Float>().unwrap().fill(3.0);
        backward(&mut ctx, &inst, GradientPolicy::Accumulate).unwrap();
        backward(&mut ctx, &inst, GradientPolicy::Accumulate).unwrap();
        assert_eq!(ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap(), vec![6.0, 6.0]);
        assert_eq!(ctx.grad(ValueId(1)).unwrap().to_vec::<Float>().unwrap(), vec![6.0, 6.0]);
    }

    #[test]
    fn test_squared_operand_shares_gradient() {
        // dest = x · x with lhs == rhs: under Reference the rhs write wins,
        // under Accumulate both contributions land.
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), Tensor::from_vec(vec![3.0f32], 1).unwrap()).unwrap();
        ctx.insert(ValueId(1), Tensor::full(0.0, 1)).unwrap();
        let inst = ArithmeticInst {
            kind: ArithmeticKind::Mul,
            dest: ValueId(1),
            lhs: ValueId(0),
            rhs: ValueId(0),
        };
        forward(&mut ctx, &inst).unwrap();
        assert_eq!(ctx.weight(ValueId(1)).unwrap().to_vec::<Float>().unwrap(), vec![9.0]);
        ctx.ensure_grad(ValueId(1)).unwrap().handle_mut::<Float>().unwrap().fill(1.0);

        backward(&mut ctx, &inst, GradientPolicy::Reference).unwrap();
        assert_eq!(ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap(), vec![3.0]);

        ctx.grad_mut(ValueId(0)).unwrap().zero();
        backward(&mut ctx, &inst, GradientPolicy::Accumulate).unwrap();
        assert_eq!(ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap(), vec![6.0]);
    }

    #[test]
    fn test_shape_mismatch() {
        let (mut ctx, inst) = setup(ArithmeticKind::Mul, vec![1.0, 2.0], vec![1.0, 2.0]);
        ctx.insert(ValueId(1), Tensor::full(1.0, 3)).unwrap();
        assert!(forward(&mut ctx, &inst).is_err());
    }
}
