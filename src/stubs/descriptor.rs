//! Stub descriptors: the calling contract of one pre-generated routine.

use std::fmt;

use super::StubKey;
use crate::core::location::KillSet;
use crate::target::CpuFeatureSet;

/// Machine-level kind of a stub argument or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Void,
    Int,
    Long,
    Float,
    Double,
    /// Address of an array or buffer.
    Pointer,
}

impl ValueKind {
    pub fn is_float(self) -> bool {
        matches!(self, ValueKind::Float | ValueKind::Double)
    }

    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Void => "void",
            ValueKind::Int => "int",
            ValueKind::Long => "long",
            ValueKind::Float => "float",
            ValueKind::Double => "double",
            ValueKind::Pointer => "ptr",
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One pre-generated stub variant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubDescriptor {
    pub(super) name: String,
    pub(super) key: StubKey,
    pub(super) result: ValueKind,
    pub(super) args: Vec<ValueKind>,
    pub(super) kill_set: KillSet,
    pub(super) required: CpuFeatureSet,
    pub(super) additional: CpuFeatureSet,
}

impl StubDescriptor {
    /// Link name of the stub.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn key(&self) -> &StubKey {
        &self.key
    }

    pub fn result(&self) -> ValueKind {
        self.result
    }

    pub fn args(&self) -> &[ValueKind] {
        &self.args
    }

    /// Memory the stub may write.
    pub fn kill_set(&self) -> &KillSet {
        &self.kill_set
    }

    /// Every feature the stub body was compiled for.
    pub fn required(&self) -> &CpuFeatureSet {
        &self.required
    }

    /// Features beyond the target's static minimum; empty for default stubs.
    pub fn additional(&self) -> &CpuFeatureSet {
        &self.additional
    }

    pub fn is_default(&self) -> bool {
        self.additional.is_empty()
    }
}

impl fmt::Display for StubDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.result, self.name)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        write!(f, ") [+{}]", self.additional)
    }
}
