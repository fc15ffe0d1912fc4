// Value — Symbolic IR values
//
// Every tensor an instruction reads or writes is named by a ValueId. The
// module keeps one Value record per id with the declared element kind and
// shape; the interpreter's context binds each id to live storage.
//
// ROLES:
//
//   Weight      — lives for the whole session. Model parameters, graph inputs,
//                 labels, running statistics. Allocated and initialized when
//                 the interpreter is created.
//   Activation  — created by an AllocActivation instruction at its position in
//                 the program. Intermediate results and saved forward state.

use std::fmt;

use wren_core::{ElemKind, Shape, WeightInit};

/// Identifier of a value inside one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(pub usize);

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Storage class of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueRole {
    Weight,
    Activation,
}

/// A declared IR value.
#[derive(Debug, Clone, PartialEq)]
pub struct Value {
    pub id: ValueId,
    pub name: String,
    pub kind: ElemKind,
    pub shape: Shape,
    pub role: ValueRole,
    /// Updated by the SGD step after each backward sweep.
    pub trainable: bool,
    /// Applied once when the interpreter allocates the weight.
    pub init: WeightInit,
}

impl Value {
    pub fn is_weight(&self) -> bool {
        self.role == ValueRole::Weight
    }

    pub fn is_activation(&self) -> bool {
        self.role == ValueRole::Activation
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let role = match self.role {
            ValueRole::Weight if self.trainable => "weight",
            ValueRole::Weight => "const",
            ValueRole::Activation => "activation",
        };
        write!(
            f,
            "{} {} : {}{} = {}",
            role, self.name, self.kind, self.shape, self.id
        )
    }
}
