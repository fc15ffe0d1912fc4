// Shape ops — Copy, Reshape, Transpose, Concat
//
// None of these compute anything; they move elements between layouts.
//
//   copy       dest[i] = src[i]                 in_g[i] += out_g[i]
//   reshape    flat copy, any equal-size shape  in_g[i] += out_g[i]
//   transpose  dest = permute(src, π)           in_g ← permute(out_g, π⁻¹)
//   concat     blocks laid along `dim`          in_g_k ← block k of out_g
//
// The transpose and concat backward rules overwrite the input gradient under
// `GradientPolicy::Reference` and add to it under `Accumulate`.

use wren_core::{bail, inverse_permutation, Error, Float, Result, Tensor};
use wren_ir::{ConcatInst, CopyInst, ReshapeInst, TransposeInst, ValueId};

use super::{accumulate, expect_same_shape, expect_same_size};
use crate::config::GradientPolicy;
use crate::context::Context;

fn flat_forward(ctx: &mut Context, dest: ValueId, src: ValueId) -> Result<()> {
    ctx.update_weight(dest, |ctx, out| {
        let src = ctx.weight_handle::<Float>(src)?;
        out.handle_mut::<Float>()?.as_mut_slice().copy_from_slice(src.as_slice());
        Ok(())
    })
}

fn flat_backward(ctx: &mut Context, dest: ValueId, src: ValueId) -> Result<()> {
    ctx.ensure_grad(dest)?;
    ctx.update_grad(src, |ctx, in_g| {
        let out_g = ctx.grad_handle::<Float>(dest)?;
        accumulate(&mut in_g.handle_mut::<Float>()?, &out_g)
    })
}

pub(crate) fn forward_copy(ctx: &mut Context, inst: &CopyInst) -> Result<()> {
    expect_same_shape("copy", ctx.weight(inst.src)?.shape(), ctx.weight(inst.dest)?.shape())?;
    flat_forward(ctx, inst.dest, inst.src)
}

pub(crate) fn backward_copy(ctx: &mut Context, inst: &CopyInst) -> Result<()> {
    expect_same_shape("copy", ctx.weight(inst.src)?.shape(), ctx.weight(inst.dest)?.shape())?;
    flat_backward(ctx, inst.dest, inst.src)
}

pub(crate) fn forward_reshape(ctx: &mut Context, inst: &ReshapeInst) -> Result<()> {
    expect_same_size("reshape", ctx.weight(inst.src)?.shape(), ctx.weight(inst.dest)?.shape())?;
    flat_forward(ctx, inst.dest, inst.src)
}

pub(crate) fn backward_reshape(ctx: &mut Context, inst: &ReshapeInst) -> Result<()> {
    expect_same_size("reshape", ctx.weight(inst.src)?.shape(), ctx.weight(inst.dest)?.shape())?;
    flat_backward(ctx, inst.dest, inst.src)
}

pub(crate) fn forward_transpose(ctx: &mut Context, inst: &TransposeInst) -> Result<()> {
    ctx.update_weight(inst.dest, |ctx, dest| {
        let src = ctx.weight_handle::<Float>(inst.src)?;
        src.transpose(&mut dest.handle_mut::<Float>()?, &inst.shuffle)
    })
}

pub(crate) fn backward_transpose(
    ctx: &mut Context,
    inst: &TransposeInst,
    policy: GradientPolicy,
) -> Result<()> {
    let inverse = inverse_permutation(&inst.shuffle)?;
    ctx.ensure_grad(inst.dest)?;

    ctx.update_grad(inst.src, |ctx, in_g| {
        let out_g = ctx.grad_handle::<Float>(inst.dest)?;
        match policy {
            GradientPolicy::Reference => {
                out_g.transpose(&mut in_g.handle_mut::<Float>()?, &inverse)
            }
            GradientPolicy::Accumulate => {
                let mut tmp = Tensor::zeros_like(in_g);
                out_g.transpose(&mut tmp.handle_mut::<Float>()?, &inverse)?;
                accumulate(&mut in_g.handle_mut::<Float>()?, &tmp.handle::<Float>()?)
            }
        }
    })
}

/// The offset of every operand along `inst.dim`, after checking the operands
/// tile the output exactly.
fn concat_offsets(ctx: &Context, inst: &ConcatInst) -> Result<Vec<Vec<usize>>> {
    let dest = ctx.weight(inst.dest)?.shape();
    let rank = dest.rank();
    if inst.dim >= rank {
        return Err(Error::DimOutOfRange { dim: inst.dim, rank });
    }

    let mut offset = vec![0; rank];
    let mut offsets = Vec::with_capacity(inst.srcs.len());
    for &src in &inst.srcs {
        let shape = ctx.weight(src)?.shape();
        let fits = shape.rank() == rank
            && shape
                .dims()
                .iter()
                .zip(dest.dims())
                .enumerate()
                .all(|(d, (a, b))| d == inst.dim || a == b);
        if !fits {
            return Err(Error::shape_mismatch("concat operand", dest, shape));
        }
        offsets.push(offset.clone());
        offset[inst.dim] += shape.dims()[inst.dim];
    }
    if offset[inst.dim] != dest.dims()[inst.dim] {
        bail!(
            "concat operands cover {} of {} along dim {}",
            offset[inst.dim],
            dest.dims()[inst.dim],
            inst.dim
        );
    }
    Ok(offsets)
}

pub(crate) fn forward_concat(ctx: &mut Context, inst: &ConcatInst) -> Result<()> {
    let offsets = concat_offsets(ctx, inst)?;
    ctx.update_weight(inst.dest, |ctx, dest| {
        let mut out = dest.handle_mut::<Float>()?;
        for (&src, offset) in inst.srcs.iter().zip(&offsets) {
            out.insert_tensors(&ctx.weight_handle::<Float>(src)?, offset)?;
        }
        Ok(())
    })
}

pub(crate) fn backward_concat(
    ctx: &mut Context,
    inst: &ConcatInst,
    policy: GradientPolicy,
) -> Result<()> {
    let offsets = concat_offsets(ctx, inst)?;
    ctx.ensure_grad(inst.dest)?;

    for (&src, offset) in inst.srcs.iter().zip(&offsets) {
        ctx.update_grad(src, |ctx, in_g| {
            let out_g = ctx.grad_handle::<Float>(inst.dest)?;
            match policy {
                GradientPolicy::Reference => {
                    out_g.extract_tensors(&mut in_g.handle_mut::<Float>()?, offset)
                }
                GradientPolicy::Accumulate => {
                    let mut tmp = Tensor::zeros_like(in_g);
                    out_g.extract_tensors(&mut tmp.handle_mut::<Float>()?, offset)?;
                    accumulate(&mut in_g.handle_mut::<Float>()?, &tmp.handle::<Float>()?)
                }
            }
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iota(shape: &[usize]) -> Tensor {
        let n: usize = shape.iter().product();
        Tensor::from_vec((0..n).map(|v| v as Float).collect(), shape).unwrap()
    }

    #[test]
    fn test_reshape_accepts_equal_size() {
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), iota(&[2, 3])).unwrap();
        ctx.insert(ValueId(1), Tensor::full(0.0, (3, 2))).unwrap();
        let inst = ReshapeInst { dest: ValueId(1), src: ValueId(0) };
        forward_reshape(&mut ctx, &inst).unwrap();
        assert_eq!(
            ctx.weight(ValueId(1)).unwrap().to_vec::<Float>().unwrap(),
            vec![0.0, 1.0, 2.0, 3.0, 4.0, 5.0]
        );
        // Copy insists on identical shapes.
        let copy = CopyInst { dest: ValueId(1), src: ValueId(0) };
        assert!(forward_copy(&mut ctx, &copy).is_err());
    }

    #[test]
    fn test_transpose_backward_overwrites_by_default() {
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), iota(&[2, 3])).unwrap();
        ctx.insert(ValueId(1), Tensor::full(0.0, (3, 2))).unwrap();
        let inst = TransposeInst {
            dest: ValueId(1),
            src: ValueId(0),
            shuffle: vec![1, 0],
        };
        forward_transpose(&mut ctx, &inst).unwrap();
        assert_eq!(
            ctx.weight(ValueId(1)).unwrap().to_vec::<Float>().unwrap(),
            vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]
        );

        ctx.ensure_grad(ValueId(0)).unwrap().handle_mut::<Float>().unwrap().fill(9.0);
        ctx.ensure_grad(ValueId(1)).unwrap().handle_mut::<Float>().unwrap().fill(1.0);
        backward_transpose(&mut ctx, &inst, GradientPolicy::Reference).unwrap();
        assert_eq!(ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap(), vec![1.0; 6]);

        backward_transpose(&mut ctx, &inst, GradientPolicy::Accumulate).unwrap();
        assert_eq!(ctx.grad(ValueId(0)).unwrap().to_vec::<Float>().unwrap(), vec![2.0; 6]);
    }

    #[test]
    fn test_concat_middle_dim() {
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), iota(&[2, 1, 2])).unwrap();
        ctx.insert(ValueId(1), Tensor::full(7.0, [2, 2, 2])).unwrap();
        ctx.insert(ValueId(2), Tensor::full(0.0, [2, 3, 2])).unwrap();
        let inst = ConcatInst {
            dest: ValueId(2),
            srcs: vec![ValueId(0), ValueId(1)],
            dim: 1,
        };
        forward_concat(&mut ctx, &inst).unwrap();
        assert_eq!(
            ctx.weight(ValueId(2)).unwrap().to_vec::<Float>().unwrap(),
            vec![0.0, 1.0, 7.0, 7.0, 7.0, 7.0, 2.0, 3.0, 7.0, 7.0, 7.0, 7.0]
        );
    }

    #[test]
    fn test_concat_rejects_short_cover() {
        let mut ctx = Context::new();
        ctx.insert(ValueId(0), Tensor::full(1.0, (2, 2))).unwrap();
        ctx.insert(ValueId(1), Tensor::full(0.0, (2, 5))).unwrap();
        let inst = ConcatInst {
            dest: ValueId(1),
            srcs: vec![ValueId(0)],
            dim: 1,
        };
        assert!(forward_concat(&mut ctx, &inst).is_err());
        let bad_dim = ConcatInst { dim: 2, ..inst };
        assert!(matches!(
            forward_concat(&mut ctx, &bad_dim),
            Err(Error::DimOutOfRange { dim: 2, rank: 2 })
        ));
    }
}
