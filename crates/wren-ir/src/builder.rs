// ModuleBuilder — Construct modules one layer at a time
//
// Each `create_*` method declares the values a kernel needs, sizes the output
// from the input shapes and appends the instruction. Outputs and saved state
// are activations: the builder emits their AllocActivation immediately before
// the instruction that first writes them. Parameters are trainable weights
// with an initializer chosen per layer:
//
//   convolution filter      Xavier, fan_in = K·K·C_in
//   fully connected filter  Xavier, fan_in = M_in
//   biases                  0.1
//   batch norm              scale 1, bias 0, running mean 0, running var 1
//
// Values are named after the layer: a convolution called "conv1" creates
// "conv1" (output), "conv1.filter" and "conv1.bias".
//
// USAGE:
//   let mut b = ModuleBuilder::new();
//   let x = b.create_input("input", ElemKind::Float, [1, 28, 28, 1]);
//   let c = b.create_convolution("conv1", x, 8, 5, 1, 2)?;
//   let r = b.create_relu("relu1", c)?;
//   b.deallocate_active();
//   let module = b.build()?;

use tracing::debug;

use wren_core::{
    flatten_cdr, window_output_size, ElemKind, Error, Result, Shape, ShapeNHWC, WeightInit,
};

use crate::instr::{
    AllocActivationInst, ArithmeticInst, ArithmeticKind, BatchNormalizationInst, ConcatInst,
    ConvolutionInst, CopyInst, DeallocActivationInst, FullyConnectedInst, Instruction,
    LocalResponseNormalizationInst, PoolInst, PoolKind, RegressionInst, ReluInst, ReshapeInst,
    SigmoidInst, SoftMaxInst, TanhInst, TransposeInst,
};
use crate::module::Module;
use crate::value::{Value, ValueId, ValueRole};

/// Default bias value for convolution and fully connected layers.
pub const DEFAULT_BIAS: f32 = 0.1;

/// Spatial output extents `(H_out, W_out)` of a K×K window with stride and
/// padding sliding over an NHWC input.
pub fn output_spatial_dims(
    idim: ShapeNHWC,
    kernel: usize,
    stride: usize,
    pad: usize,
) -> Result<(usize, usize)> {
    Ok((
        window_output_size(idim.h, kernel, stride, pad)?,
        window_output_size(idim.w, kernel, stride, pad)?,
    ))
}

/// Incrementally builds a [`Module`].
#[derive(Debug, Default)]
pub struct ModuleBuilder {
    module: Module,
    /// Activations allocated and not yet deallocated, in allocation order.
    live: Vec<ValueId>,
}

impl ModuleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The module built so far.
    pub fn module(&self) -> &Module {
        &self.module
    }

    /// Declared shape of a value.
    pub fn shape_of(&self, id: ValueId) -> Result<Shape> {
        Ok(self.module.value(id)?.shape.clone())
    }

    fn add_value(
        &mut self,
        name: String,
        kind: ElemKind,
        shape: Shape,
        role: ValueRole,
        trainable: bool,
        init: WeightInit,
    ) -> ValueId {
        let id = ValueId(self.module.values.len());
        self.module.values.push(Value {
            id,
            name,
            kind,
            shape,
            role,
            trainable,
            init,
        });
        id
    }

    fn push(&mut self, inst: impl Into<Instruction>) {
        self.module.instrs.push(inst.into());
    }

    /// Declare a session-lived value filled by the caller: graph inputs,
    /// labels, regression targets.
    pub fn create_input(&mut self, name: &str, kind: ElemKind, shape: impl Into<Shape>) -> ValueId {
        self.add_value(
            name.to_string(),
            kind,
            shape.into(),
            ValueRole::Weight,
            false,
            WeightInit::Zero,
        )
    }

    /// Declare a trainable Float parameter.
    pub fn create_weight(
        &mut self,
        name: &str,
        shape: impl Into<Shape>,
        init: WeightInit,
    ) -> ValueId {
        self.add_value(
            name.to_string(),
            ElemKind::Float,
            shape.into(),
            ValueRole::Weight,
            true,
            init,
        )
    }

    fn create_constant(&mut self, name: String, shape: Shape, init: WeightInit) -> ValueId {
        self.add_value(name, ElemKind::Float, shape, ValueRole::Weight, false, init)
    }

    /// Declare an activation and emit its AllocActivation.
    fn create_activation(&mut self, name: String, kind: ElemKind, shape: Shape) -> ValueId {
        let id = self.add_value(name, kind, shape, ValueRole::Activation, false, WeightInit::Zero);
        self.push(AllocActivationInst { dest: id });
        self.live.push(id);
        id
    }

    fn float_activation(&mut self, name: &str, shape: Shape) -> ValueId {
        self.create_activation(name.to_string(), ElemKind::Float, shape)
    }

    pub fn create_copy(&mut self, name: &str, src: ValueId) -> Result<ValueId> {
        let shape = self.shape_of(src)?;
        let dest = self.float_activation(name, shape);
        self.push(CopyInst { dest, src });
        Ok(dest)
    }

    /// `depth` output channels, K×K filter.
    pub fn create_convolution(
        &mut self,
        name: &str,
        src: ValueId,
        depth: usize,
        kernel: usize,
        stride: usize,
        pad: usize,
    ) -> Result<ValueId> {
        let idim = ShapeNHWC::from_dims(self.shape_of(src)?.dims())?;
        let (oh, ow) = output_spatial_dims(idim, kernel, stride, pad)?;

        let filter = self.create_weight(
            &format!("{name}.filter"),
            [depth, kernel, kernel, idim.c],
            WeightInit::Xavier {
                fan_in: kernel * kernel * idim.c,
            },
        );
        let bias_init = WeightInit::Broadcast(DEFAULT_BIAS);
        let bias = self.create_weight(&format!("{name}.bias"), depth, bias_init);
        let dest = self.float_activation(name, ShapeNHWC::new(idim.n, oh, ow, depth).to_shape());

        self.push(ConvolutionInst {
            dest,
            src,
            filter,
            bias,
            kernel,
            stride,
            pad,
        });
        Ok(dest)
    }

    pub fn create_pool(
        &mut self,
        name: &str,
        kind: PoolKind,
        src: ValueId,
        kernel: usize,
        stride: usize,
        pad: usize,
    ) -> Result<ValueId> {
        let idim = ShapeNHWC::from_dims(self.shape_of(src)?.dims())?;
        let (oh, ow) = output_spatial_dims(idim, kernel, stride, pad)?;

        let dest = self.float_activation(name, ShapeNHWC::new(idim.n, oh, ow, idim.c).to_shape());
        let src_xy = match kind {
            PoolKind::Max => Some(self.create_activation(
                format!("{name}.xy"),
                ElemKind::Index,
                Shape::from([idim.n, oh, ow, idim.c, 2]),
            )),
            PoolKind::Avg => None,
        };

        self.push(PoolInst {
            kind,
            dest,
            src,
            src_xy,
            kernel,
            stride,
            pad,
        });
        Ok(dest)
    }

    /// `depth` output features; `src` is read flatten-cdr as (N, M_in).
    pub fn create_fully_connected(
        &mut self,
        name: &str,
        src: ValueId,
        depth: usize,
    ) -> Result<ValueId> {
        let (n, m_in) = flatten_cdr(self.shape_of(src)?.dims())?;

        let filter = self.create_weight(
            &format!("{name}.filter"),
            (depth, m_in),
            WeightInit::Xavier { fan_in: m_in },
        );
        let bias_init = WeightInit::Broadcast(DEFAULT_BIAS);
        let bias = self.create_weight(&format!("{name}.bias"), depth, bias_init);
        let dest = self.float_activation(name, Shape::from((n, depth)));

        self.push(FullyConnectedInst {
            dest,
            src,
            filter,
            bias,
        });
        Ok(dest)
    }

    pub fn create_relu(&mut self, name: &str, src: ValueId) -> Result<ValueId> {
        let shape = self.shape_of(src)?;
        let dest = self.float_activation(name, shape);
        self.push(ReluInst { dest, src });
        Ok(dest)
    }

    pub fn create_sigmoid(&mut self, name: &str, src: ValueId) -> Result<ValueId> {
        let shape = self.shape_of(src)?;
        let dest = self.float_activation(name, shape);
        self.push(SigmoidInst { dest, src });
        Ok(dest)
    }

    pub fn create_tanh(&mut self, name: &str, src: ValueId) -> Result<ValueId> {
        let shape = self.shape_of(src)?;
        let dest = self.float_activation(name, shape);
        self.push(TanhInst { dest, src });
        Ok(dest)
    }

    /// Softmax over rows of a rank-2 `src`; `selected` is an (N, 1) Index value.
    pub fn create_softmax(
        &mut self,
        name: &str,
        src: ValueId,
        selected: ValueId,
    ) -> Result<ValueId> {
        let shape = self.shape_of(src)?;
        let dest = self.float_activation(name, shape.clone());
        let e = self.float_activation(&format!("{name}.e"), shape);
        self.push(SoftMaxInst {
            dest,
            src,
            e,
            selected,
        });
        Ok(dest)
    }

    pub fn create_regression(
        &mut self,
        name: &str,
        src: ValueId,
        expected: ValueId,
    ) -> Result<ValueId> {
        let shape = self.shape_of(src)?;
        let dest = self.float_activation(name, shape);
        self.push(RegressionInst {
            dest,
            src,
            expected,
        });
        Ok(dest)
    }

    /// Output dim `i` is input dim `shuffle[i]`.
    pub fn create_transpose(
        &mut self,
        name: &str,
        src: ValueId,
        shuffle: &[usize],
    ) -> Result<ValueId> {
        let shape = self.shape_of(src)?.permute(shuffle)?;
        let dest = self.float_activation(name, shape);
        self.push(TransposeInst {
            dest,
            src,
            shuffle: shuffle.to_vec(),
        });
        Ok(dest)
    }

    pub fn create_reshape(
        &mut self,
        name: &str,
        src: ValueId,
        shape: impl Into<Shape>,
    ) -> Result<ValueId> {
        let shape = shape.into();
        let src_shape = self.shape_of(src)?;
        if src_shape.elem_count() != shape.elem_count() {
            return Err(Error::shape_mismatch("reshape element count", &src_shape, &shape));
        }
        let dest = self.float_activation(name, shape);
        self.push(ReshapeInst { dest, src });
        Ok(dest)
    }

    /// Join `srcs` along `dim`; every other extent must agree.
    pub fn create_concat(&mut self, name: &str, srcs: &[ValueId], dim: usize) -> Result<ValueId> {
        let (&first, rest) = srcs
            .split_first()
            .ok_or_else(|| Error::msg("concat needs at least one operand"))?;
        let mut dims = self.shape_of(first)?.dims().to_vec();
        if dim >= dims.len() {
            return Err(Error::DimOutOfRange {
                dim,
                rank: dims.len(),
            });
        }
        for &src in rest {
            dims[dim] += self.shape_of(src)?.dim(dim)?;
        }
        let dest = self.float_activation(name, Shape::new(dims));
        self.push(ConcatInst {
            dest,
            srcs: srcs.to_vec(),
            dim,
        });
        Ok(dest)
    }

    pub fn create_batch_normalization(
        &mut self,
        name: &str,
        src: ValueId,
        channel_idx: usize,
        epsilon: f32,
        momentum: f32,
    ) -> Result<ValueId> {
        let shape = self.shape_of(src)?;
        let channels = Shape::from(shape.dim(channel_idx)?);

        let scale = self.create_weight(
            &format!("{name}.scale"),
            channels.clone(),
            WeightInit::Broadcast(1.0),
        );
        let bias = self.create_weight(&format!("{name}.bias"), channels.clone(), WeightInit::Zero);
        let mean = self.create_constant(format!("{name}.mean"), channels.clone(), WeightInit::Zero);
        let var = self.create_constant(format!("{name}.var"), channels, WeightInit::Broadcast(1.0));
        let dest = self.float_activation(name, shape);

        self.push(BatchNormalizationInst {
            dest,
            src,
            scale,
            bias,
            mean,
            var,
            channel_idx,
            epsilon,
            momentum,
        });
        Ok(dest)
    }

    pub fn create_local_response_normalization(
        &mut self,
        name: &str,
        src: ValueId,
        half_window_size: usize,
        alpha: f32,
        beta: f32,
        k: f32,
    ) -> Result<ValueId> {
        let shape = ShapeNHWC::from_dims(self.shape_of(src)?.dims())?.to_shape();
        let dest = self.float_activation(name, shape.clone());
        let scale = self.float_activation(&format!("{name}.scale"), shape);
        self.push(LocalResponseNormalizationInst {
            dest,
            src,
            scale,
            half_window_size,
            alpha,
            beta,
            k,
        });
        Ok(dest)
    }

    pub fn create_arithmetic(
        &mut self,
        name: &str,
        kind: ArithmeticKind,
        lhs: ValueId,
        rhs: ValueId,
    ) -> Result<ValueId> {
        let shape = self.shape_of(lhs)?;
        let rhs_shape = self.shape_of(rhs)?;
        if shape != rhs_shape {
            return Err(Error::shape_mismatch("arithmetic operands", &shape, &rhs_shape));
        }
        let dest = self.float_activation(name, shape);
        self.push(ArithmeticInst {
            kind,
            dest,
            lhs,
            rhs,
        });
        Ok(dest)
    }

    /// Emit a DeallocActivation for every live activation, most recent first.
    pub fn deallocate_active(&mut self) {
        while let Some(src) = self.live.pop() {
            self.push(DeallocActivationInst { src });
        }
    }

    /// Verify and return the module.
    pub fn build(self) -> Result<Module> {
        self.module.verify()?;
        debug!(
            values = self.module.values.len(),
            instructions = self.module.instrs.len(),
            "built module"
        );
        Ok(self.module)
    }
}
