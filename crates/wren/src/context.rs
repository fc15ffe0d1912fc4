// Context — Binds IR values to live tensors
//
// For every value the context can hold two tensors:
//
//   weight    the value itself
//   gradient  same kind and shape, created zero-filled on first access
//
// Kernels read through shared borrows of the context. A kernel's output is
// updated in place by taking the tensor out of its map for the duration of
// the update and putting it back afterwards:
//
//   ctx.update_grad(inst.src, |ctx, in_g| {
//       let out_g = ctx.grad_handle::<Float>(inst.dest)?;
//       ...
//   })?;
//
// While an output is taken out, the closure cannot see it through `ctx`, so
// an instruction that names the same value as both input and output fails
// with `MissingTensor` rather than reading half-written data.

use std::collections::HashMap;

use tracing::debug;

use wren_core::{ElemKind, Element, Error, Handle, Result, Shape, Tensor};
use wren_ir::ValueId;

/// Per-run mapping from IR values to their weight and gradient tensors.
#[derive(Debug, Default)]
pub struct Context {
    declared: HashMap<ValueId, (ElemKind, Shape)>,
    weights: HashMap<ValueId, Tensor>,
    grads: HashMap<ValueId, Tensor>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the kind and shape `id` is allocated with.
    pub fn declare(&mut self, id: ValueId, kind: ElemKind, shape: Shape) {
        self.declared.insert(id, (kind, shape));
    }

    /// The declared kind and shape of `id`.
    pub fn declaration(&self, id: ValueId) -> Result<(ElemKind, &Shape)> {
        self.declared
            .get(&id)
            .map(|(kind, shape)| (*kind, shape))
            .ok_or(Error::UndeclaredValue(id.0))
    }

    /// Create the weight tensor of `id` from its declaration, zero-filled.
    /// An existing tensor of the declared kind and shape is kept as is.
    pub fn allocate(&mut self, id: ValueId) -> Result<&mut Tensor> {
        let (kind, shape) = self.declaration(id)?;
        let fits = self
            .weights
            .get(&id)
            .is_some_and(|t| t.kind() == kind && t.shape() == shape);
        if !fits {
            debug!(value = id.0, kind = %kind, shape = %shape, "allocating tensor");
            let tensor = Tensor::zeros(kind, shape.clone());
            self.weights.insert(id, tensor);
        }
        self.weight_mut(id)
    }

    /// Bind `tensor` as the weight of `id`. A declared value only accepts a
    /// tensor of its declared kind and shape.
    pub fn insert(&mut self, id: ValueId, tensor: Tensor) -> Result<()> {
        if let Some((kind, shape)) = self.declared.get(&id) {
            if tensor.kind() != *kind {
                return Err(Error::KindMismatch {
                    expected: *kind,
                    got: tensor.kind(),
                });
            }
            if tensor.shape() != shape {
                return Err(Error::shape_mismatch("bound tensor", shape, tensor.shape()));
            }
        }
        self.weights.insert(id, tensor);
        Ok(())
    }

    /// Drop the weight and gradient of `id`.
    pub fn remove(&mut self, id: ValueId) -> Option<Tensor> {
        self.grads.remove(&id);
        self.weights.remove(&id)
    }

    pub fn contains(&self, id: ValueId) -> bool {
        self.weights.contains_key(&id)
    }

    pub fn weight(&self, id: ValueId) -> Result<&Tensor> {
        self.weights.get(&id).ok_or(Error::MissingTensor {
            id: id.0,
            slot: "weight",
        })
    }

    pub fn weight_mut(&mut self, id: ValueId) -> Result<&mut Tensor> {
        self.weights.get_mut(&id).ok_or(Error::MissingTensor {
            id: id.0,
            slot: "weight",
        })
    }

    pub fn grad(&self, id: ValueId) -> Result<&Tensor> {
        self.grads.get(&id).ok_or(Error::MissingTensor {
            id: id.0,
            slot: "gradient",
        })
    }

    pub fn grad_mut(&mut self, id: ValueId) -> Result<&mut Tensor> {
        self.grads.get_mut(&id).ok_or(Error::MissingTensor {
            id: id.0,
            slot: "gradient",
        })
    }

    pub fn has_grad(&self, id: ValueId) -> bool {
        self.grads.contains_key(&id)
    }

    /// Typed read-only view of a weight.
    pub fn weight_handle<T: Element>(&self, id: ValueId) -> Result<Handle<'_, T>> {
        self.weight(id)?.handle::<T>()
    }

    /// Typed read-only view of a gradient.
    pub fn grad_handle<T: Element>(&self, id: ValueId) -> Result<Handle<'_, T>> {
        self.grad(id)?.handle::<T>()
    }

    /// The gradient of `id`, created zero-filled if missing. It takes the
    /// kind and shape of the bound weight, or of the declaration when no
    /// weight is bound.
    pub fn ensure_grad(&mut self, id: ValueId) -> Result<&mut Tensor> {
        if !self.grads.contains_key(&id) {
            let grad = match self.weights.get(&id) {
                Some(w) => Tensor::zeros_like(w),
                None => {
                    let (kind, shape) = self.declaration(id)?;
                    Tensor::zeros(kind, shape.clone())
                }
            };
            self.grads.insert(id, grad);
        }
        self.grad_mut(id)
    }

    /// Make sure every id in `ids` has a gradient.
    pub fn ensure_grads(&mut self, ids: &[ValueId]) -> Result<()> {
        for &id in ids {
            self.ensure_grad(id)?;
        }
        Ok(())
    }

    /// Update the weight of `id` in place while reading the rest of the
    /// context. The tensor is restored even when `f` fails.
    pub fn update_weight<R>(
        &mut self,
        id: ValueId,
        f: impl FnOnce(&Context, &mut Tensor) -> Result<R>,
    ) -> Result<R> {
        let mut tensor = self.weights.remove(&id).ok_or(Error::MissingTensor {
            id: id.0,
            slot: "weight",
        })?;
        let result = f(self, &mut tensor);
        self.weights.insert(id, tensor);
        result
    }

    /// Update two distinct weights in place together, for kernels that write
    /// an output and its saved state in the same loop.
    pub fn update_weight_pair<R>(
        &mut self,
        a: ValueId,
        b: ValueId,
        f: impl FnOnce(&Context, &mut Tensor, &mut Tensor) -> Result<R>,
    ) -> Result<R> {
        let mut first = self.weights.remove(&a).ok_or(Error::MissingTensor {
            id: a.0,
            slot: "weight",
        })?;
        let Some(mut second) = self.weights.remove(&b) else {
            self.weights.insert(a, first);
            return Err(Error::MissingTensor {
                id: b.0,
                slot: "weight",
            });
        };
        let result = f(self, &mut first, &mut second);
        self.weights.insert(a, first);
        self.weights.insert(b, second);
        result
    }

    /// Update the gradient of `id` in place, creating it first if needed.
    pub fn update_grad<R>(
        &mut self,
        id: ValueId,
        f: impl FnOnce(&Context, &mut Tensor) -> Result<R>,
    ) -> Result<R> {
        self.ensure_grad(id)?;
        let mut tensor = self.grads.remove(&id).ok_or(Error::MissingTensor {
            id: id.0,
            slot: "gradient",
        })?;
        let result = f(self, &mut tensor);
        self.grads.insert(id, tensor);
        result
    }

    /// Ids of every bound gradient, in ascending order.
    pub fn grad_ids(&self) -> Vec<ValueId> {
        let mut ids: Vec<ValueId> = self.grads.keys().copied().collect();
        ids.sort();
        ids
    }
}
