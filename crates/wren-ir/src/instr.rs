// Instructions — One record per kernel
//
// An instruction names the values its kernel reads and writes plus the scalar
// attributes the kernel needs. Kernels with closed variants (pooling,
// arithmetic) carry a kind tag and are dispatched once at entry.
//
// OPERAND ACCESS:
//
//   In     — read by the forward kernel
//   Out    — written by the forward kernel
//   InOut  — read and updated in place (batch-norm running statistics)
//
// Saved forward state (max-pool coordinates, softmax probabilities, LRN scale
// cache) is an ordinary value named by the instruction, written as an Out
// operand of the forward kernel and read back by its backward.

use std::fmt;

use crate::value::ValueId;

/// How an instruction's forward kernel touches an operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    In,
    Out,
    InOut,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Access::In => write!(f, "@in"),
            Access::Out => write!(f, "@out"),
            Access::InOut => write!(f, "@inout"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolKind {
    Max,
    Avg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticKind {
    Add,
    Mul,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CopyInst {
    pub dest: ValueId,
    pub src: ValueId,
}

/// NHWC convolution. `filter` is (depth, K, K, C_in), `bias` is (depth).
#[derive(Debug, Clone, PartialEq)]
pub struct ConvolutionInst {
    pub dest: ValueId,
    pub src: ValueId,
    pub filter: ValueId,
    pub bias: ValueId,
    pub kernel: usize,
    pub stride: usize,
    pub pad: usize,
}

/// NHWC pooling. `src_xy` holds the argmax coordinates of a max pool and is
/// `None` for average pooling.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolInst {
    pub kind: PoolKind,
    pub dest: ValueId,
    pub src: ValueId,
    pub src_xy: Option<ValueId>,
    pub kernel: usize,
    pub stride: usize,
    pub pad: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FullyConnectedInst {
    pub dest: ValueId,
    pub src: ValueId,
    pub filter: ValueId,
    pub bias: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReluInst {
    pub dest: ValueId,
    pub src: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SigmoidInst {
    pub dest: ValueId,
    pub src: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TanhInst {
    pub dest: ValueId,
    pub src: ValueId,
}

/// Softmax fused with cross-entropy against the `selected` labels.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftMaxInst {
    pub dest: ValueId,
    pub src: ValueId,
    /// Saved probabilities, same shape as `src`.
    pub e: ValueId,
    /// (N, 1) index tensor of the true class per row.
    pub selected: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RegressionInst {
    pub dest: ValueId,
    pub src: ValueId,
    pub expected: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransposeInst {
    pub dest: ValueId,
    pub src: ValueId,
    pub shuffle: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReshapeInst {
    pub dest: ValueId,
    pub src: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConcatInst {
    pub dest: ValueId,
    pub srcs: Vec<ValueId>,
    pub dim: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchNormalizationInst {
    pub dest: ValueId,
    pub src: ValueId,
    pub scale: ValueId,
    pub bias: ValueId,
    pub mean: ValueId,
    pub var: ValueId,
    pub channel_idx: usize,
    pub epsilon: f32,
    pub momentum: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalResponseNormalizationInst {
    pub dest: ValueId,
    pub src: ValueId,
    /// Scale cache, same shape as `src`.
    pub scale: ValueId,
    pub half_window_size: usize,
    pub alpha: f32,
    pub beta: f32,
    pub k: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArithmeticInst {
    pub kind: ArithmeticKind,
    pub dest: ValueId,
    pub lhs: ValueId,
    pub rhs: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AllocActivationInst {
    pub dest: ValueId,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeallocActivationInst {
    pub src: ValueId,
}

/// A single IR instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instruction {
    Copy(CopyInst),
    Convolution(ConvolutionInst),
    Pool(PoolInst),
    FullyConnected(FullyConnectedInst),
    Relu(ReluInst),
    Sigmoid(SigmoidInst),
    Tanh(TanhInst),
    SoftMax(SoftMaxInst),
    Regression(RegressionInst),
    Transpose(TransposeInst),
    Reshape(ReshapeInst),
    Concat(ConcatInst),
    BatchNormalization(BatchNormalizationInst),
    LocalResponseNormalization(LocalResponseNormalizationInst),
    Arithmetic(ArithmeticInst),
    AllocActivation(AllocActivationInst),
    DeallocActivation(DeallocActivationInst),
}

impl Instruction {
    /// Short mnemonic used in logs and the module printer.
    pub fn name(&self) -> &'static str {
        match self {
            Instruction::Copy(_) => "copy",
            Instruction::Convolution(_) => "convolution",
            Instruction::Pool(p) => match p.kind {
                PoolKind::Max => "pool.max",
                PoolKind::Avg => "pool.avg",
            },
            Instruction::FullyConnected(_) => "fullyconnected",
            Instruction::Relu(_) => "relu",
            Instruction::Sigmoid(_) => "sigmoid",
            Instruction::Tanh(_) => "tanh",
            Instruction::SoftMax(_) => "softmax",
            Instruction::Regression(_) => "regression",
            Instruction::Transpose(_) => "transpose",
            Instruction::Reshape(_) => "reshape",
            Instruction::Concat(_) => "concat",
            Instruction::BatchNormalization(_) => "batchnormalization",
            Instruction::LocalResponseNormalization(_) => "localresponsenormalization",
            Instruction::Arithmetic(a) => match a.kind {
                ArithmeticKind::Add => "arithmetic.add",
                ArithmeticKind::Mul => "arithmetic.mul",
            },
            Instruction::AllocActivation(_) => "allocactivation",
            Instruction::DeallocActivation(_) => "deallocactivation",
        }
    }

    /// Every value the instruction names, output operands first.
    pub fn operands(&self) -> Vec<(ValueId, Access)> {
        use Access::*;
        match self {
            Instruction::Copy(i) => vec![(i.dest, Out), (i.src, In)],
            Instruction::Convolution(i) => vec![
                (i.dest, Out),
                (i.src, In),
                (i.filter, In),
                (i.bias, In),
            ],
            Instruction::Pool(i) => {
                let mut ops = vec![(i.dest, Out), (i.src, In)];
                if let Some(xy) = i.src_xy {
                    ops.push((xy, Out));
                }
                ops
            }
            Instruction::FullyConnected(i) => vec![
                (i.dest, Out),
                (i.src, In),
                (i.filter, In),
                (i.bias, In),
            ],
            Instruction::Relu(i) => vec![(i.dest, Out), (i.src, In)],
            Instruction::Sigmoid(i) => vec![(i.dest, Out), (i.src, In)],
            Instruction::Tanh(i) => vec![(i.dest, Out), (i.src, In)],
            Instruction::SoftMax(i) => vec![
                (i.dest, Out),
                (i.src, In),
                (i.e, Out),
                (i.selected, In),
            ],
            Instruction::Regression(i) => {
                vec![(i.dest, Out), (i.src, In), (i.expected, In)]
            }
            Instruction::Transpose(i) => vec![(i.dest, Out), (i.src, In)],
            Instruction::Reshape(i) => vec![(i.dest, Out), (i.src, In)],
            Instruction::Concat(i) => std::iter::once((i.dest, Out))
                .chain(i.srcs.iter().map(|&s| (s, In)))
                .collect(),
            Instruction::BatchNormalization(i) => vec![
                (i.dest, Out),
                (i.src, In),
                (i.scale, In),
                (i.bias, In),
                (i.mean, InOut),
                (i.var, InOut),
            ],
            Instruction::LocalResponseNormalization(i) => {
                vec![(i.dest, Out), (i.src, In), (i.scale, Out)]
            }
            Instruction::Arithmetic(i) => {
                vec![(i.dest, Out), (i.lhs, In), (i.rhs, In)]
            }
            Instruction::AllocActivation(i) => vec![(i.dest, Out)],
            Instruction::DeallocActivation(i) => vec![(i.src, Out)],
        }
    }

    /// Scalar attributes as `key: value` pairs, in printing order.
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        match self {
            Instruction::Convolution(i) => vec![
                ("kernel", i.kernel.to_string()),
                ("stride", i.stride.to_string()),
                ("pad", i.pad.to_string()),
            ],
            Instruction::Pool(i) => vec![
                ("kernel", i.kernel.to_string()),
                ("stride", i.stride.to_string()),
                ("pad", i.pad.to_string()),
            ],
            Instruction::Transpose(i) => vec![("shuffle", format!("{:?}", i.shuffle))],
            Instruction::Concat(i) => vec![("dim", i.dim.to_string())],
            Instruction::BatchNormalization(i) => vec![
                ("channel", i.channel_idx.to_string()),
                ("epsilon", i.epsilon.to_string()),
                ("momentum", i.momentum.to_string()),
            ],
            Instruction::LocalResponseNormalization(i) => vec![
                ("half_window", i.half_window_size.to_string()),
                ("alpha", i.alpha.to_string()),
                ("beta", i.beta.to_string()),
                ("k", i.k.to_string()),
            ],
            _ => Vec::new(),
        }
    }
}

macro_rules! impl_from_record {
    ($($record:ident => $variant:ident),* $(,)?) => {
        $(
            impl From<$record> for Instruction {
                fn from(inst: $record) -> Self {
                    Instruction::$variant(inst)
                }
            }
        )*
    };
}

impl_from_record! {
    CopyInst => Copy,
    ConvolutionInst => Convolution,
    PoolInst => Pool,
    FullyConnectedInst => FullyConnected,
    ReluInst => Relu,
    SigmoidInst => Sigmoid,
    TanhInst => Tanh,
    SoftMaxInst => SoftMax,
    RegressionInst => Regression,
    TransposeInst => Transpose,
    ReshapeInst => Reshape,
    ConcatInst => Concat,
    BatchNormalizationInst => BatchNormalization,
    LocalResponseNormalizationInst => LocalResponseNormalization,
    ArithmeticInst => Arithmetic,
    AllocActivationInst => AllocActivation,
    DeallocActivationInst => DeallocActivation,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_follow_kind() {
        let max = Instruction::Pool(PoolInst {
            kind: PoolKind::Max,
            dest: ValueId(1),
            src: ValueId(0),
            src_xy: Some(ValueId(2)),
            kernel: 2,
            stride: 2,
            pad: 0,
        });
        assert_eq!(max.name(), "pool.max");
        assert_eq!(max.operands().len(), 3);

        let mul: Instruction = ArithmeticInst {
            kind: ArithmeticKind::Mul,
            dest: ValueId(2),
            lhs: ValueId(0),
            rhs: ValueId(1),
        }
        .into();
        assert_eq!(mul.name(), "arithmetic.mul");
        assert!(mul.attributes().is_empty());
    }

    #[test]
    fn test_concat_operands() {
        let c = Instruction::Concat(ConcatInst {
            dest: ValueId(9),
            srcs: vec![ValueId(1), ValueId(2), ValueId(3)],
            dim: 1,
        });
        let ops = c.operands();
        assert_eq!(ops[0], (ValueId(9), Access::Out));
        assert_eq!(ops.len(), 4);
        assert!(ops[1..].iter().all(|&(_, a)| a == Access::In));
    }
}
