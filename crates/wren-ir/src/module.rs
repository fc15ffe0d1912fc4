// Module — A linear instruction program plus its value table
//
// The module owns every declared value and the instruction list in program
// order. The interpreter runs the list front-to-back for the forward sweep
// and back-to-front for the backward sweep.
//
// Printing a module gives one line per value followed by one line per
// instruction:
//
//   weight conv.filter : float[4, 3, 3, 1] = %1
//   ...
//   0: allocactivation @out %3
//   1: convolution @out %3, @in %0, @in %1, @in %2 {kernel: 3, stride: 1, pad: 1}

use std::fmt;

use wren_core::{bail, Error, Result};

use crate::instr::Instruction;
use crate::value::{Value, ValueId};

/// An IR program ready for interpretation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Module {
    pub(crate) values: Vec<Value>,
    pub(crate) instrs: Vec<Instruction>,
}

impl Module {
    /// Assemble a module by hand. Value `i` must carry `ValueId(i)`; nothing
    /// else is checked until [`Module::verify`].
    pub fn from_parts(values: Vec<Value>, instrs: Vec<Instruction>) -> Result<Self> {
        if let Some(v) = values.iter().enumerate().find(|(i, v)| v.id.0 != *i) {
            bail!(
                "value {} declared at position {} carries id {}",
                v.1.name, v.0, v.1.id
            );
        }
        Ok(Module { values, instrs })
    }

    /// Look up a value record.
    pub fn value(&self, id: ValueId) -> Result<&Value> {
        self.values.get(id.0).ok_or(Error::UndeclaredValue(id.0))
    }

    /// All values in declaration order.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// The instruction list in program order.
    pub fn instructions(&self) -> &[Instruction] {
        &self.instrs
    }

    /// Find a value by name.
    pub fn find(&self, name: &str) -> Option<ValueId> {
        self.values.iter().find(|v| v.name == name).map(|v| v.id)
    }

    /// Values that live for the whole session.
    pub fn weights(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().filter(|v| v.is_weight())
    }

    /// Weights updated by the SGD step.
    pub fn trainable(&self) -> impl Iterator<Item = &Value> {
        self.values.iter().filter(|v| v.is_weight() && v.trainable)
    }

    /// Check every instruction's operands against the declared value table.
    pub fn verify(&self) -> Result<()> {
        crate::verify::verify(self)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for v in &self.values {
            writeln!(f, "{v}")?;
        }
        for (idx, inst) in self.instrs.iter().enumerate() {
            write!(f, "{idx}: {}", inst.name())?;
            for (i, (id, access)) in inst.operands().into_iter().enumerate() {
                let sep = if i == 0 { " " } else { ", " };
                write!(f, "{sep}{access} {id}")?;
            }
            let attrs = inst.attributes();
            if !attrs.is_empty() {
                let body: Vec<String> = attrs.iter().map(|(k, v)| format!("{k}: {v}")).collect();
                write!(f, " {{{}}}", body.join(", "))?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
