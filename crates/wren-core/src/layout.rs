use crate::error::{Error, Result};
use crate::shape::{check_permutation, Shape};

// Layout — Shape + strides + offset over a flat buffer
//
// Tensors in Wren are always stored contiguously in row-major order, but the
// structural helpers on handles (transpose, insert/extract of sub-tensors)
// are easiest to express as *views* over that buffer:
//
// 1. **Permuted view**: reorder shape and strides together. Walking the view
//    in row-major order yields the source flat index of every element of the
//    transposed tensor, in destination order.
//
// 2. **Window view**: keep the outer strides, shrink the shape to the inner
//    tensor and move the offset to the insertion point. Walking it yields the
//    outer flat index of every inner element.
//
// Both are walked with StridedIter, so the copy loops in the handle code stay
// a single zip.

/// Layout describes how a logical shape maps to flat storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    shape: Shape,
    strides: Vec<usize>,
    /// Offset into the storage buffer where this view's data starts.
    offset: usize,
}

impl Layout {
    /// Create a new contiguous (row-major) layout for the given shape.
    pub fn contiguous(shape: Shape) -> Self {
        let strides = shape.stride_contiguous();
        Layout {
            shape,
            strides,
            offset: 0,
        }
    }

    /// Create a layout with explicit strides and offset (for views).
    pub fn new(shape: Shape, strides: Vec<usize>, offset: usize) -> Self {
        Layout {
            shape,
            strides,
            offset,
        }
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn dims(&self) -> &[usize] {
        self.shape.dims()
    }

    pub fn elem_count(&self) -> usize {
        self.shape.elem_count()
    }

    /// Reorder dimensions: view dim `i` is this layout's dim `shuffle[i]`.
    ///
    /// Example: [2, 3, 4] permute([2, 0, 1]) → [4, 2, 3]
    ///          strides [12, 4, 1]           → [1, 12, 4]
    pub fn permute(&self, shuffle: &[usize]) -> Result<Layout> {
        check_permutation(shuffle, self.rank())?;
        let dims = shuffle.iter().map(|&s| self.dims()[s]).collect();
        let strides = shuffle.iter().map(|&s| self.strides[s]).collect();
        Ok(Layout::new(Shape::new(dims), strides, self.offset))
    }

    /// A view of `inner` elements placed at coordinate `offset` of this layout.
    ///
    /// The inner shape must have the same rank and fit entirely inside.
    pub fn window(&self, inner: &Shape, offset: &[usize]) -> Result<Layout> {
        let fits = inner.rank() == self.rank()
            && offset.len() == self.rank()
            && inner
                .dims()
                .iter()
                .zip(offset)
                .zip(self.dims())
                .all(|((&len, &start), &outer)| start + len <= outer);
        if !fits {
            return Err(Error::SubTensorOutOfBounds {
                inner: inner.clone(),
                outer: self.shape.clone(),
                offset: offset.to_vec(),
            });
        }
        // An empty window may start one past the end of an axis.
        let start = if inner.elem_count() == 0 {
            self.offset
        } else {
            self.flat_index(offset)
        };
        Ok(Layout::new(inner.clone(), self.strides.clone(), start))
    }

    /// Flat storage index of a coordinate: offset + Σ index[i] * stride[i].
    ///
    /// A shorter coordinate addresses the start of the sub-tensor it prefixes.
    ///
    /// # Panics
    ///
    /// Panics if the coordinate has more axes than the layout or any axis is
    /// out of range, the same way slice indexing does.
    pub fn flat_index(&self, index: &[usize]) -> usize {
        assert!(index.len() <= self.rank(), "coordinate rank too large");
        assert!(
            index.iter().zip(self.dims()).all(|(&i, &d)| i < d),
            "coordinate {:?} out of range for {}",
            index,
            self.shape
        );
        let mut flat = self.offset;
        for (i, &idx) in index.iter().enumerate() {
            flat += idx * self.strides[i];
        }
        flat
    }

    /// The coordinate along `axis` of the element at contiguous position `flat`.
    pub fn dim_for_ptr(&self, axis: usize, flat: usize) -> usize {
        debug_assert!(axis < self.rank(), "axis out of range");
        (flat / self.strides[axis]) % self.dims()[axis]
    }

    /// Iterator over all flat indices of this layout, in logical order.
    pub fn strided_indices(&self) -> StridedIter {
        StridedIter::new(self)
    }
}

// StridedIter — Iterates over flat storage indices respecting strides
//
// For a contiguous layout this just counts 0, 1, 2, ... For a permuted or
// windowed view it jumps around the underlying buffer following the strides.

/// Iterator that yields flat storage indices for each element of a Layout.
pub struct StridedIter {
    current: Vec<usize>,
    dims: Vec<usize>,
    strides: Vec<usize>,
    offset: usize,
    remaining: usize,
    started: bool,
}

impl StridedIter {
    fn new(layout: &Layout) -> Self {
        StridedIter {
            current: vec![0; layout.rank()],
            dims: layout.dims().to_vec(),
            strides: layout.strides().to_vec(),
            offset: layout.offset(),
            remaining: layout.elem_count(),
            started: false,
        }
    }

    fn flat_index(&self) -> usize {
        self.current
            .iter()
            .zip(&self.strides)
            .fold(self.offset, |acc, (&i, &s)| acc + i * s)
    }

    /// Advance the multi-dimensional index by one (rightmost dimension first).
    fn advance(&mut self) {
        for i in (0..self.dims.len()).rev() {
            self.current[i] += 1;
            if self.current[i] < self.dims[i] {
                return;
            }
            self.current[i] = 0;
        }
    }
}

impl Iterator for StridedIter {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        if self.remaining == 0 {
            return None;
        }
        if self.started {
            self.advance();
        }
        self.started = true;
        self.remaining -= 1;
        Some(self.flat_index())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl ExactSizeIterator for StridedIter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contiguous_indices() {
        let layout = Layout::contiguous(Shape::from((2, 3)));
        assert_eq!(layout.strides(), &[3, 1]);
        let indices: Vec<usize> = layout.strided_indices().collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_permute_indices() {
        // [[0, 1, 2], [3, 4, 5]] read as its transpose [[0, 3], [1, 4], [2, 5]]
        let layout = Layout::contiguous(Shape::from((2, 3)));
        let t = layout.permute(&[1, 0]).unwrap();
        assert_eq!(t.dims(), &[3, 2]);
        assert_eq!(t.strides(), &[1, 3]);
        let indices: Vec<usize> = t.strided_indices().collect();
        assert_eq!(indices, vec![0, 3, 1, 4, 2, 5]);
    }

    #[test]
    fn test_window_indices() {
        // 2x2 block at (1, 1) of a 3x4 matrix
        let layout = Layout::contiguous(Shape::from((3, 4)));
        let w = layout.window(&Shape::from((2, 2)), &[1, 1]).unwrap();
        assert_eq!(w.offset(), 5);
        let indices: Vec<usize> = w.strided_indices().collect();
        assert_eq!(indices, vec![5, 6, 9, 10]);
    }

    #[test]
    fn test_window_out_of_bounds() {
        let layout = Layout::contiguous(Shape::from((3, 4)));
        assert!(layout.window(&Shape::from((2, 2)), &[2, 0]).is_err());
        assert!(layout.window(&Shape::from(4), &[0]).is_err());
    }

    #[test]
    fn test_flat_index_and_prefix() {
        let layout = Layout::contiguous(Shape::from((2, 3, 4)));
        assert_eq!(layout.flat_index(&[1, 2, 3]), 23);
        assert_eq!(layout.flat_index(&[1]), 12);
        assert_eq!(layout.flat_index(&[]), 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_flat_index_rejects_inner_overflow() {
        // [0, 4] would alias [1, 0] if only the total were bounds-checked.
        let layout = Layout::contiguous(Shape::from((2, 4)));
        layout.flat_index(&[0, 4]);
    }

    #[test]
    fn test_dim_for_ptr() {
        let layout = Layout::contiguous(Shape::from((2, 3, 4)));
        // flat 23 = [1, 2, 3]
        assert_eq!(layout.dim_for_ptr(0, 23), 1);
        assert_eq!(layout.dim_for_ptr(1, 23), 2);
        assert_eq!(layout.dim_for_ptr(2, 23), 3);
    }
}
