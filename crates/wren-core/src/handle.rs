use crate::dtype::Element;
use crate::error::{Error, Result};
use crate::layout::Layout;
use crate::shape::Shape;

// Handle — Typed, non-owning views over a tensor's storage
//
// Kernels never touch Storage directly. They borrow a Handle (read) or a
// HandleMut (read-write) of a specific element type and address elements
// either by flat index (`raw`) or by coordinate (`at`).
//
// STRUCTURAL HELPERS:
//
//   transpose(dst, shuffle)        — dst.dims[i] = src.dims[shuffle[i]]
//   insert_tensors(src, offset)    — write src into self at `offset`
//   extract_tensors(dst, offset)   — read the dst-shaped block at `offset`
//   element_ptr(prefix)            — flat index of a coordinate prefix
//   dim_for_ptr(axis, flat)        — coordinate of a flat index along `axis`
//
// The transpose and sub-tensor copies are driven by permuted / windowed
// Layout views, so they work for any rank.

/// Read-only typed view over a tensor.
#[derive(Debug, Clone, Copy)]
pub struct Handle<'a, T> {
    layout: &'a Layout,
    data: &'a [T],
}

impl<'a, T: Element> Handle<'a, T> {
    pub(crate) fn new(layout: &'a Layout, data: &'a [T]) -> Self {
        Handle { layout, data }
    }

    pub fn dims(&self) -> &'a [usize] {
        self.layout.dims()
    }

    pub fn shape(&self) -> &'a Shape {
        self.layout.shape()
    }

    /// Total number of elements.
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Element at flat index `i`.
    #[inline]
    pub fn raw(&self, i: usize) -> T {
        self.data[i]
    }

    /// Element at coordinate `coord`.
    #[inline]
    pub fn at(&self, coord: &[usize]) -> T {
        debug_assert_eq!(coord.len(), self.layout.rank(), "coordinate rank");
        self.data[self.layout.flat_index(coord)]
    }

    /// Flat index of the first element of the sub-tensor at `prefix`.
    pub fn element_ptr(&self, prefix: &[usize]) -> usize {
        self.layout.flat_index(prefix)
    }

    /// Coordinate along `axis` of the element at flat index `flat`.
    pub fn dim_for_ptr(&self, axis: usize, flat: usize) -> usize {
        self.layout.dim_for_ptr(axis, flat)
    }

    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }

    pub fn iter(&self) -> std::iter::Copied<std::slice::Iter<'a, T>> {
        self.data.iter().copied()
    }

    /// Write the permutation of this tensor into `dst`.
    ///
    /// `dst` must already have dims `self.dims()` permuted by `shuffle`.
    pub fn transpose(&self, dst: &mut HandleMut<'_, T>, shuffle: &[usize]) -> Result<()> {
        let view = self.layout.permute(shuffle)?;
        if view.dims() != dst.dims() {
            return Err(Error::shape_mismatch("transpose", view.shape(), dst.shape()));
        }
        for (d, s) in dst.data.iter_mut().zip(view.strided_indices()) {
            *d = self.data[s];
        }
        Ok(())
    }

    /// Copy the `dst`-shaped block starting at coordinate `offset` into `dst`.
    pub fn extract_tensors(&self, dst: &mut HandleMut<'_, T>, offset: &[usize]) -> Result<()> {
        let window = self.layout.window(dst.shape(), offset)?;
        for (d, s) in dst.data.iter_mut().zip(window.strided_indices()) {
            *d = self.data[s];
        }
        Ok(())
    }
}

/// Read-write typed view over a tensor.
#[derive(Debug)]
pub struct HandleMut<'a, T> {
    layout: &'a Layout,
    data: &'a mut [T],
}

impl<'a, T: Element> HandleMut<'a, T> {
    pub(crate) fn new(layout: &'a Layout, data: &'a mut [T]) -> Self {
        HandleMut { layout, data }
    }

    pub fn dims(&self) -> &'a [usize] {
        self.layout.dims()
    }

    pub fn shape(&self) -> &'a Shape {
        self.layout.shape()
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    #[inline]
    pub fn raw(&self, i: usize) -> T {
        self.data[i]
    }

    #[inline]
    pub fn raw_mut(&mut self, i: usize) -> &mut T {
        &mut self.data[i]
    }

    #[inline]
    pub fn at(&self, coord: &[usize]) -> T {
        debug_assert_eq!(coord.len(), self.layout.rank(), "coordinate rank");
        self.data[self.layout.flat_index(coord)]
    }

    #[inline]
    pub fn at_mut(&mut self, coord: &[usize]) -> &mut T {
        debug_assert_eq!(coord.len(), self.layout.rank(), "coordinate rank");
        let i = self.layout.flat_index(coord);
        &mut self.data[i]
    }

    pub fn element_ptr(&self, prefix: &[usize]) -> usize {
        self.layout.flat_index(prefix)
    }

    pub fn as_slice(&self) -> &[T] {
        &*self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut *self.data
    }

    /// Reborrow as a read-only handle.
    pub fn as_handle(&self) -> Handle<'_, T> {
        Handle::new(self.layout, &*self.data)
    }

    /// Set every element to `value`.
    pub fn fill(&mut self, value: T) {
        self.data.iter_mut().for_each(|d| *d = value);
    }

    pub fn zero(&mut self) {
        self.fill(T::zero());
    }

    /// Write `src` into this tensor with its origin at coordinate `offset`.
    pub fn insert_tensors(&mut self, src: &Handle<'_, T>, offset: &[usize]) -> Result<()> {
        let window = self.layout.window(src.shape(), offset)?;
        for (s, d) in src.iter().zip(window.strided_indices()) {
            self.data[d] = s;
        }
        Ok(())
    }
}
