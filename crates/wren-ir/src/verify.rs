// Verifier — Static checks over a module
//
// Kernels validate their operands at entry, but a module built by hand can
// be wrong long before it runs. The verifier walks every instruction and
// checks, against the declared value table:
//
//   1. every operand id is declared
//   2. element kinds (Index only for pool coordinates and softmax labels)
//   3. shape relations each kernel relies on (NHWC geometry, flatten-cdr
//      agreement, permutation validity, concat partition)
//   4. lifecycle: AllocActivation / DeallocActivation name activations,
//      and an activation is allocated before any other instruction uses it
//
// The first violation is returned as an error naming the instruction.

use std::collections::HashSet;

use wren_core::{bail, flatten_cdr, ElemKind, Error, Result, Shape, ShapeNHWC};

use crate::builder::output_spatial_dims;
use crate::instr::{Instruction, PoolKind};
use crate::module::Module;
use crate::value::{ValueId, ValueRole};

pub(crate) fn verify(module: &Module) -> Result<()> {
    let mut allocated: HashSet<ValueId> = HashSet::new();

    for (idx, inst) in module.instructions().iter().enumerate() {
        for (id, _) in inst.operands() {
            let value = module.value(id)?;
            let is_lifecycle = matches!(
                inst,
                Instruction::AllocActivation(_) | Instruction::DeallocActivation(_)
            );
            if value.role == ValueRole::Activation && !is_lifecycle && !allocated.contains(&id) {
                bail!(
                    "instruction {idx} ({}) uses activation {} before it is allocated",
                    inst.name(),
                    value.name
                );
            }
        }

        verify_instruction(module, inst).map_err(|e| {
            Error::msg(format!("instruction {idx} ({}): {e}", inst.name()))
        })?;

        if let Instruction::AllocActivation(a) = inst {
            allocated.insert(a.dest);
        }
    }
    Ok(())
}

fn shape(module: &Module, id: ValueId) -> Result<&Shape> {
    Ok(&module.value(id)?.shape)
}

fn expect_kind(module: &Module, id: ValueId, kind: ElemKind) -> Result<()> {
    let got = module.value(id)?.kind;
    if got != kind {
        return Err(Error::KindMismatch {
            expected: kind,
            got,
        });
    }
    Ok(())
}

fn expect_floats(module: &Module, ids: &[ValueId]) -> Result<()> {
    ids.iter()
        .try_for_each(|&id| expect_kind(module, id, ElemKind::Float))
}

fn expect_shape(
    module: &Module,
    id: ValueId,
    context: &'static str,
    expected: &Shape,
) -> Result<()> {
    let got = shape(module, id)?;
    if got != expected {
        return Err(Error::shape_mismatch(context, expected, got));
    }
    Ok(())
}

fn nhwc(module: &Module, id: ValueId) -> Result<ShapeNHWC> {
    ShapeNHWC::from_dims(shape(module, id)?.dims())
}

fn verify_instruction(module: &Module, inst: &Instruction) -> Result<()> {
    match inst {
        Instruction::Copy(i) => {
            expect_floats(module, &[i.dest, i.src])?;
            expect_shape(module, i.dest, "copy", shape(module, i.src)?)
        }

        Instruction::Convolution(i) => {
            expect_floats(module, &[i.dest, i.src, i.filter, i.bias])?;
            let idim = nhwc(module, i.src)?;
            let odim = nhwc(module, i.dest)?;
            let (oh, ow) = output_spatial_dims(idim, i.kernel, i.stride, i.pad)?;
            let expected = ShapeNHWC::new(idim.n, oh, ow, odim.c).to_shape();
            expect_shape(module, i.dest, "convolution output", &expected)?;
            let filter = Shape::from([odim.c, i.kernel, i.kernel, idim.c]);
            expect_shape(module, i.filter, "convolution filter", &filter)?;
            expect_shape(module, i.bias, "convolution bias", &Shape::from(odim.c))
        }

        Instruction::Pool(i) => {
            expect_floats(module, &[i.dest, i.src])?;
            let idim = nhwc(module, i.src)?;
            let (oh, ow) = output_spatial_dims(idim, i.kernel, i.stride, i.pad)?;
            let odim = ShapeNHWC::new(idim.n, oh, ow, idim.c);
            expect_shape(module, i.dest, "pool output", &odim.to_shape())?;
            match (i.kind, i.src_xy) {
                (PoolKind::Max, Some(xy)) => {
                    expect_kind(module, xy, ElemKind::Index)?;
                    let saved = Shape::from([idim.n, oh, ow, idim.c, 2]);
                    expect_shape(module, xy, "max pool coordinates", &saved)
                }
                (PoolKind::Max, None) => {
                    Err(Error::msg("max pooling needs a coordinate value"))
                }
                (PoolKind::Avg, _) => Ok(()),
            }
        }

        Instruction::FullyConnected(i) => {
            expect_floats(module, &[i.dest, i.src, i.filter, i.bias])?;
            let (n, m_in) = flatten_cdr(shape(module, i.src)?.dims())?;
            let (on, m_out) = flatten_cdr(shape(module, i.dest)?.dims())?;
            if on != n {
                return Err(Error::shape_mismatch(
                    "fully connected batch",
                    shape(module, i.src)?,
                    shape(module, i.dest)?,
                ));
            }
            expect_shape(module, i.filter, "fully connected filter", &Shape::from((m_out, m_in)))?;
            expect_shape(module, i.bias, "fully connected bias", &Shape::from(m_out))
        }

        Instruction::Relu(i) => same_float_shape(module, i.dest, i.src, "relu"),
        Instruction::Sigmoid(i) => same_float_shape(module, i.dest, i.src, "sigmoid"),
        Instruction::Tanh(i) => same_float_shape(module, i.dest, i.src, "tanh"),

        Instruction::SoftMax(i) => {
            expect_floats(module, &[i.dest, i.src, i.e])?;
            expect_kind(module, i.selected, ElemKind::Index)?;
            let src = shape(module, i.src)?;
            expect_rank(src, 2, "softmax")?;
            expect_shape(module, i.dest, "softmax output", src)?;
            expect_shape(module, i.e, "softmax saved probabilities", src)?;
            expect_shape(module, i.selected, "softmax labels", &Shape::from((src.dims()[0], 1)))
        }

        Instruction::Regression(i) => {
            expect_floats(module, &[i.dest, i.src, i.expected])?;
            let src = shape(module, i.src)?;
            expect_rank(src, 2, "regression")?;
            expect_shape(module, i.dest, "regression output", src)?;
            expect_shape(module, i.expected, "regression expected", src)
        }

        Instruction::Transpose(i) => {
            expect_floats(module, &[i.dest, i.src])?;
            let permuted = shape(module, i.src)?.permute(&i.shuffle)?;
            expect_shape(module, i.dest, "transpose output", &permuted)
        }

        Instruction::Reshape(i) => {
            expect_floats(module, &[i.dest, i.src])?;
            let src = shape(module, i.src)?;
            let dest = shape(module, i.dest)?;
            if src.elem_count() != dest.elem_count() {
                return Err(Error::shape_mismatch("reshape element count", src, dest));
            }
            Ok(())
        }

        Instruction::Concat(i) => {
            expect_floats(module, &[i.dest])?;
            expect_floats(module, &i.srcs)?;
            let dest = shape(module, i.dest)?;
            if i.dim >= dest.rank() {
                return Err(Error::DimOutOfRange {
                    dim: i.dim,
                    rank: dest.rank(),
                });
            }
            if i.srcs.is_empty() {
                bail!("concat needs at least one operand");
            }
            let mut along = 0;
            for &src in &i.srcs {
                let s = shape(module, src)?;
                let agrees = s.rank() == dest.rank()
                    && s.dims()
                        .iter()
                        .zip(dest.dims())
                        .enumerate()
                        .all(|(d, (a, b))| d == i.dim || a == b);
                if !agrees {
                    return Err(Error::shape_mismatch("concat operand", dest, s));
                }
                along += s.dims()[i.dim];
            }
            if along != dest.dims()[i.dim] {
                bail!(
                    "concat operands cover {along} of {} along dim {}",
                    dest.dims()[i.dim],
                    i.dim
                );
            }
            Ok(())
        }

        Instruction::BatchNormalization(i) => {
            expect_floats(module, &[i.dest, i.src, i.scale, i.bias, i.mean, i.var])?;
            let src = shape(module, i.src)?;
            expect_shape(module, i.dest, "batch norm output", src)?;
            let channels = Shape::from(src.dim(i.channel_idx)?);
            for (id, what) in [
                (i.scale, "batch norm scale"),
                (i.bias, "batch norm bias"),
                (i.mean, "batch norm mean"),
                (i.var, "batch norm variance"),
            ] {
                expect_shape(module, id, what, &channels)?;
            }
            Ok(())
        }

        Instruction::LocalResponseNormalization(i) => {
            expect_floats(module, &[i.dest, i.src, i.scale])?;
            let idim = nhwc(module, i.src)?;
            if idim.c == 0 {
                bail!("local response normalization needs at least one channel");
            }
            let src = idim.to_shape();
            expect_shape(module, i.dest, "lrn output", &src)?;
            expect_shape(module, i.scale, "lrn scale cache", &src)
        }

        Instruction::Arithmetic(i) => {
            expect_floats(module, &[i.dest, i.lhs, i.rhs])?;
            let lhs = shape(module, i.lhs)?;
            expect_shape(module, i.rhs, "arithmetic rhs", lhs)?;
            expect_shape(module, i.dest, "arithmetic output", lhs)
        }

        Instruction::AllocActivation(i) => expect_activation(module, i.dest),
        Instruction::DeallocActivation(i) => expect_activation(module, i.src),
    }
}

fn same_float_shape(
    module: &Module,
    dest: ValueId,
    src: ValueId,
    context: &'static str,
) -> Result<()> {
    expect_floats(module, &[dest, src])?;
    expect_shape(module, dest, context, shape(module, src)?)
}

fn expect_rank(shape: &Shape, rank: usize, context: &'static str) -> Result<()> {
    if shape.rank() != rank {
        return Err(Error::RankMismatch {
            context,
            expected: rank,
            got: shape.rank(),
        });
    }
    Ok(())
}

fn expect_activation(module: &Module, id: ValueId) -> Result<()> {
    let value = module.value(id)?;
    if !value.is_activation() {
        bail!(
            "{} is a weight, not an activation",
            value.name
        );
    }
    Ok(())
}
