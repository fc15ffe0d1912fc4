use std::fmt;

use crate::tensor::Storage;

// ElemKind — The element kinds a tensor can hold
//
// The interpreter works on exactly two kinds of data:
//
//   Float — f32, the reference format for weights, activations and gradients
//   Index — usize, for saved pooling coordinates and selected class labels
//
// They are kept apart on purpose. A kernel that asks for a Float handle over
// Index storage gets an error, never a silent cast.

/// The reference floating-point element type.
pub type Float = f32;

/// The index element type.
pub type Index = usize;

/// Enum of all supported element kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElemKind {
    Float,
    Index,
}

impl fmt::Display for ElemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ElemKind::Float => "float",
            ElemKind::Index => "index",
        };
        write!(f, "{}", s)
    }
}

// Element — Connects Rust element types to ElemKind
//
// Handles are generic over the element type. This trait tells a handle which
// storage variant to borrow, so `tensor.handle::<Float>()` and
// `tensor.handle::<Index>()` resolve to the right buffer or fail.

/// Trait implemented by the Rust types that can be stored in a tensor.
pub trait Element: Copy + PartialEq + fmt::Debug + num_traits::Zero + 'static {
    /// The corresponding ElemKind variant.
    const KIND: ElemKind;

    /// Borrow the typed buffer, if `storage` holds this kind.
    fn slice(storage: &Storage) -> Option<&[Self]>;

    /// Mutably borrow the typed buffer, if `storage` holds this kind.
    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]>;

    /// Wrap an owned buffer into storage.
    fn into_storage(data: Vec<Self>) -> Storage;
}

impl Element for Float {
    const KIND: ElemKind = ElemKind::Float;

    fn slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::Float(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]> {
        match storage {
            Storage::Float(v) => Some(v.as_mut_slice()),
            _ => None,
        }
    }

    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::Float(data)
    }
}

impl Element for Index {
    const KIND: ElemKind = ElemKind::Index;

    fn slice(storage: &Storage) -> Option<&[Self]> {
        match storage {
            Storage::Index(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn slice_mut(storage: &mut Storage) -> Option<&mut [Self]> {
        match storage {
            Storage::Index(v) => Some(v.as_mut_slice()),
            _ => None,
        }
    }

    fn into_storage(data: Vec<Self>) -> Storage {
        Storage::Index(data)
    }
}
