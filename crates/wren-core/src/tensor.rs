use crate::dtype::{ElemKind, Element, Float, Index};
use crate::error::{Error, Result};
use crate::handle::{Handle, HandleMut};
use crate::layout::Layout;
use crate::shape::Shape;

// Tensor — Owning storage for one element kind and one shape
//
// A Tensor is the only thing in Wren that owns element memory. Everything the
// kernels do goes through a typed Handle borrowed from it:
//
//   let h = tensor.handle::<Float>()?;         // read-only view
//   let mut h = tensor.handle_mut::<Float>()?; // read-write view
//
// The storage is a closed enum over the two element kinds, so asking for the
// wrong kind is caught when the handle is created rather than deep inside a
// kernel loop.

/// The element buffer of a tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    Float(Vec<Float>),
    Index(Vec<Index>),
}

impl Storage {
    /// A zero-filled buffer of `len` elements of `kind`.
    pub fn zeros(kind: ElemKind, len: usize) -> Self {
        match kind {
            ElemKind::Float => Storage::Float(vec![0.0; len]),
            ElemKind::Index => Storage::Index(vec![0; len]),
        }
    }

    pub fn kind(&self) -> ElemKind {
        match self {
            Storage::Float(_) => ElemKind::Float,
            Storage::Index(_) => ElemKind::Index,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Storage::Float(v) => v.len(),
            Storage::Index(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An n-dimensional, row-major array of one element kind.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    layout: Layout,
    storage: Storage,
}

impl Tensor {
    /// Create a zero-filled tensor.
    pub fn zeros(kind: ElemKind, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        let storage = Storage::zeros(kind, shape.elem_count());
        Tensor {
            layout: Layout::contiguous(shape),
            storage,
        }
    }

    /// Create a zero-filled tensor with the same kind and shape as `other`.
    pub fn zeros_like(other: &Tensor) -> Self {
        Tensor::zeros(other.kind(), other.shape().clone())
    }

    /// Create a Float tensor with every element set to `value`.
    pub fn full(value: Float, shape: impl Into<Shape>) -> Self {
        let shape = shape.into();
        Tensor {
            storage: Storage::Float(vec![value; shape.elem_count()]),
            layout: Layout::contiguous(shape),
        }
    }

    /// Create a tensor from a row-major buffer.
    pub fn from_vec<T: Element>(data: Vec<T>, shape: impl Into<Shape>) -> Result<Self> {
        let shape = shape.into();
        if data.len() != shape.elem_count() {
            return Err(Error::ElementCountMismatch {
                expected: shape.elem_count(),
                got: data.len(),
                shape,
            });
        }
        Ok(Tensor {
            layout: Layout::contiguous(shape),
            storage: T::into_storage(data),
        })
    }

    pub fn kind(&self) -> ElemKind {
        self.storage.kind()
    }

    pub fn shape(&self) -> &Shape {
        self.layout.shape()
    }

    pub fn dims(&self) -> &[usize] {
        self.layout.dims()
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.layout.elem_count()
    }

    /// Reset every element to zero.
    pub fn zero(&mut self) {
        self.storage = Storage::zeros(self.kind(), self.size());
    }

    /// Borrow a read-only typed view.
    pub fn handle<T: Element>(&self) -> Result<Handle<'_, T>> {
        let data = T::slice(&self.storage).ok_or(Error::KindMismatch {
            expected: T::KIND,
            got: self.kind(),
        })?;
        Ok(Handle::new(&self.layout, data))
    }

    /// Borrow a read-write typed view.
    pub fn handle_mut<T: Element>(&mut self) -> Result<HandleMut<'_, T>> {
        let got = self.kind();
        let data = T::slice_mut(&mut self.storage).ok_or(Error::KindMismatch {
            expected: T::KIND,
            got,
        })?;
        Ok(HandleMut::new(&self.layout, data))
    }

    /// Copy the elements out as a flat row-major vector.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        Ok(self.handle::<T>()?.as_slice().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let t = Tensor::zeros(ElemKind::Float, (2, 3));
        assert_eq!(t.dims(), &[2, 3]);
        assert_eq!(t.size(), 6);
        assert_eq!(t.to_vec::<Float>().unwrap(), vec![0.0; 6]);
    }

    #[test]
    fn test_from_vec_count_mismatch() {
        let r = Tensor::from_vec(vec![1.0f32, 2.0], (3, 1));
        assert!(matches!(r, Err(Error::ElementCountMismatch { .. })));
    }

    #[test]
    fn test_kind_mismatch() {
        let t = Tensor::zeros(ElemKind::Index, 4);
        assert!(t.handle::<Float>().is_err());
        assert!(t.handle::<Index>().is_ok());
    }

    #[test]
    fn test_zero_resets() {
        let mut t = Tensor::full(3.0, 4);
        t.zero();
        assert_eq!(t.to_vec::<Float>().unwrap(), vec![0.0; 4]);
        assert_eq!(t.kind(), ElemKind::Float);
    }
}
