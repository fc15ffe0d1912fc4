use std::fmt;

use crate::bail;
use crate::error::{Error, Result};

// Shape — N-dimensional shape representation
//
// A Shape is the ordered tuple of extents of a tensor. Kernels read it in one
// of two ways:
//
//   NHWC         — rank-4 (batch, height, width, channels), used by
//                  convolution, pooling and local response normalization
//   flatten-cdr  — any rank collapsed to (first extent, product of the rest),
//                  used by the fully connected layer
//
// Storage is always row-major over the plain tuple; the interpretations never
// change where an element lives.

/// N-dimensional shape of a tensor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Shape(Vec<usize>);

impl Shape {
    /// Create a new shape from a vector of dimension sizes.
    pub fn new(dims: Vec<usize>) -> Self {
        Shape(dims)
    }

    /// The dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.0
    }

    /// Number of dimensions.
    pub fn rank(&self) -> usize {
        self.0.len()
    }

    /// Total number of elements. A rank-0 shape holds one element.
    pub fn elem_count(&self) -> usize {
        self.0.iter().product::<usize>()
    }

    /// Row-major strides for this shape.
    ///
    /// For shape [2, 3, 4] the strides are [12, 4, 1].
    pub fn stride_contiguous(&self) -> Vec<usize> {
        let mut strides = vec![0usize; self.rank()];
        if self.rank() > 0 {
            strides[self.rank() - 1] = 1;
            for i in (0..self.rank() - 1).rev() {
                strides[i] = strides[i + 1] * self.0[i + 1];
            }
        }
        strides
    }

    /// Size of a specific dimension.
    pub fn dim(&self, d: usize) -> Result<usize> {
        self.0.get(d).copied().ok_or(Error::DimOutOfRange {
            dim: d,
            rank: self.rank(),
        })
    }

    /// Shape with the extents reordered by `shuffle`: `out[i] = self[shuffle[i]]`.
    pub fn permute(&self, shuffle: &[usize]) -> Result<Shape> {
        check_permutation(shuffle, self.rank())?;
        Ok(Shape(shuffle.iter().map(|&s| self.0[s]).collect()))
    }
}

/// Validate that `shuffle` is a permutation of `0..rank`.
pub fn check_permutation(shuffle: &[usize], rank: usize) -> Result<()> {
    let mut seen = vec![false; rank];
    let valid = shuffle.len() == rank
        && shuffle.iter().all(|&s| {
            if s >= rank || seen[s] {
                return false;
            }
            seen[s] = true;
            true
        });
    if !valid {
        return Err(Error::InvalidPermutation {
            shuffle: shuffle.to_vec(),
            rank,
        });
    }
    Ok(())
}

/// The inverse permutation: `inverse[shuffle[i]] = i`.
pub fn inverse_permutation(shuffle: &[usize]) -> Result<Vec<usize>> {
    check_permutation(shuffle, shuffle.len())?;
    let mut reverse = vec![0; shuffle.len()];
    for (i, &s) in shuffle.iter().enumerate() {
        reverse[s] = i;
    }
    Ok(reverse)
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", d)?;
        }
        write!(f, "]")
    }
}

impl From<usize> for Shape {
    fn from(d: usize) -> Self {
        Shape(vec![d])
    }
}

impl From<(usize, usize)> for Shape {
    fn from((d0, d1): (usize, usize)) -> Self {
        Shape(vec![d0, d1])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((d0, d1, d2): (usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2])
    }
}

impl From<(usize, usize, usize, usize)> for Shape {
    fn from((d0, d1, d2, d3): (usize, usize, usize, usize)) -> Self {
        Shape(vec![d0, d1, d2, d3])
    }
}

impl From<Vec<usize>> for Shape {
    fn from(v: Vec<usize>) -> Self {
        Shape(v)
    }
}

impl From<&[usize]> for Shape {
    fn from(s: &[usize]) -> Self {
        Shape(s.to_vec())
    }
}

impl<const N: usize> From<[usize; N]> for Shape {
    fn from(s: [usize; N]) -> Self {
        Shape(s.to_vec())
    }
}

// ShapeNHWC

/// A rank-4 shape read as (batch, height, width, channels).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShapeNHWC {
    pub n: usize,
    pub h: usize,
    pub w: usize,
    pub c: usize,
}

impl ShapeNHWC {
    pub fn new(n: usize, h: usize, w: usize, c: usize) -> Self {
        ShapeNHWC { n, h, w, c }
    }

    /// Interpret `dims` as NHWC. Fails unless the rank is exactly 4.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match *dims {
            [n, h, w, c] => Ok(ShapeNHWC { n, h, w, c }),
            _ => Err(Error::RankMismatch {
                context: "NHWC shape",
                expected: 4,
                got: dims.len(),
            }),
        }
    }

    pub fn to_shape(self) -> Shape {
        Shape(vec![self.n, self.h, self.w, self.c])
    }
}

impl fmt::Display for ShapeNHWC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NHWC[{}, {}, {}, {}]", self.n, self.h, self.w, self.c)
    }
}

/// Collapse `dims` into `(first extent, product of the remaining extents)`.
///
/// A rank-1 shape `[n]` becomes `(n, 1)`.
pub fn flatten_cdr(dims: &[usize]) -> Result<(usize, usize)> {
    match dims.split_first() {
        Some((&first, rest)) => Ok((first, rest.iter().product())),
        None => Err(Error::RankMismatch {
            context: "flatten-cdr",
            expected: 1,
            got: 0,
        }),
    }
}

/// Output extent of a sliding window: `(input + 2*pad - kernel) / stride + 1`.
pub fn window_output_size(input: usize, kernel: usize, stride: usize, pad: usize) -> Result<usize> {
    if stride == 0 {
        bail!("window stride must be non-zero");
    }
    let padded = input + 2 * pad;
    if kernel == 0 || padded < kernel {
        bail!(
            "window of size {} does not fit input extent {} with padding {}",
            kernel, input, pad
        );
    }
    Ok((padded - kernel) / stride + 1)
}
