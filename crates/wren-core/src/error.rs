use crate::dtype::ElemKind;
use crate::shape::Shape;

/// All errors that can occur within Wren.
///
/// Every failure the interpreter can observe is a programming error: a value
/// wired to the wrong shape, a handle requested with the wrong element kind,
/// saved state that was never written. Kernels check these at entry and
/// report the violated invariant; nothing here is meant to be recovered from.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Two tensors that must agree in shape do not.
    #[error("shape mismatch in {context}: expected {expected}, got {got}")]
    ShapeMismatch {
        context: &'static str,
        expected: Shape,
        got: Shape,
    },

    /// Operation requires a specific rank (number of dimensions).
    #[error("rank mismatch in {context}: expected rank {expected}, got {got}")]
    RankMismatch {
        context: &'static str,
        expected: usize,
        got: usize,
    },

    /// A typed handle was requested over storage of another element kind.
    #[error("element kind mismatch: expected {expected}, got {got}")]
    KindMismatch { expected: ElemKind, got: ElemKind },

    /// Dimension index out of range for the tensor's rank.
    #[error("dimension out of range: dim {dim} for tensor with {rank} dimensions")]
    DimOutOfRange { dim: usize, rank: usize },

    /// Element count mismatch when creating a tensor from a vec.
    #[error("element count mismatch: shape {shape} requires {expected} elements, got {got}")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        got: usize,
    },

    /// A permutation vector is not a permutation of `0..rank`.
    #[error("invalid permutation {shuffle:?} for rank {rank}")]
    InvalidPermutation { shuffle: Vec<usize>, rank: usize },

    /// A sub-tensor placed at `offset` does not fit inside the outer tensor.
    #[error("sub-tensor {inner} at offset {offset:?} does not fit in {outer}")]
    SubTensorOutOfBounds {
        inner: Shape,
        outer: Shape,
        offset: Vec<usize>,
    },

    /// A pooling window contained no in-range element.
    #[error("pooling window at ({x}, {y}) has no valid position")]
    EmptyPoolingWindow { x: isize, y: isize },

    /// A value has no tensor bound in the execution context.
    #[error("no {slot} tensor bound for value %{id}")]
    MissingTensor { id: usize, slot: &'static str },

    /// A value id that the module never declared.
    #[error("value %{0} is not declared")]
    UndeclaredValue(usize),

    /// Generic message for cases not covered above.
    #[error("{0}")]
    Msg(String),
}

impl Error {
    /// Create an error from any string message.
    pub fn msg(s: impl Into<String>) -> Self {
        Error::Msg(s.into())
    }

    /// Shape mismatch with a short description of where it was detected.
    pub fn shape_mismatch(context: &'static str, expected: &Shape, got: &Shape) -> Self {
        Error::ShapeMismatch {
            context,
            expected: expected.clone(),
            got: got.clone(),
        }
    }
}

/// Convenience Result type used throughout Wren.
pub type Result<T> = std::result::Result<T, Error>;

/// Macro for early return with a formatted error message.
/// Usage: `bail!("window {} is empty", idx)`
#[macro_export]
macro_rules! bail {
    ($($arg:tt)*) => {
        return Err($crate::Error::Msg(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::window_output_size;

    #[test]
    fn test_bail_formats_message() {
        match window_output_size(2, 5, 1, 1) {
            Err(Error::Msg(msg)) => {
                assert_eq!(msg, "window of size 5 does not fit input extent 2 with padding 1")
            }
            other => panic!("expected a message error, got {other:?}"),
        }
    }

    #[test]
    fn test_shape_mismatch_display() {
        let e = Error::shape_mismatch("copy", &Shape::from(3), &Shape::from(4));
        assert!(e.to_string().contains("copy"));
    }
}
