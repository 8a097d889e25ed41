//! AES block cipher nodes.
//!
//! Cipher nodes are memory writers: every mode stores into the destination
//! byte array, so the node kills byte-array contents. The CTR stub is shared
//! with callers whose buffers are not byte arrays and therefore kills any
//! location. Cipher nodes never fold and always lower to a stub call.

use std::fmt;

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::element::ElementKind;
use crate::core::error::{guarantee, IntrinsicResult};
use crate::core::graph::{Graph, NodeId};
use crate::core::location::{KillSet, LocationIdentity, MemoryAccess, MemoryKill};
use crate::core::stamp::Stamp;
use crate::lowering::{Lowerable, LoweringBackend, LoweringContext};
use crate::nodes::replace;
use crate::stubs::{StubKey, ValueKind};
use crate::target::CpuFeatureSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CipherMode {
    EncryptBlock,
    DecryptBlock,
    CbcEncrypt,
    CbcDecrypt,
    Ctr,
}

const BLOCK_ARGS: &[ValueKind] = &[ValueKind::Pointer, ValueKind::Pointer, ValueKind::Pointer];

const STREAM_ARGS: &[ValueKind] = &[
    ValueKind::Pointer,
    ValueKind::Pointer,
    ValueKind::Pointer,
    ValueKind::Pointer,
    ValueKind::Int,
];

impl CipherMode {
    pub const ALL: &'static [CipherMode] = &[
        CipherMode::EncryptBlock,
        CipherMode::DecryptBlock,
        CipherMode::CbcEncrypt,
        CipherMode::CbcDecrypt,
        CipherMode::Ctr,
    ];

    pub fn name(self) -> &'static str {
        match self {
            CipherMode::EncryptBlock => "EncryptBlock",
            CipherMode::DecryptBlock => "DecryptBlock",
            CipherMode::CbcEncrypt => "CbcEncrypt",
            CipherMode::CbcDecrypt => "CbcDecrypt",
            CipherMode::Ctr => "Ctr",
        }
    }

    /// Stub arguments: `(from, to, key)` for single blocks,
    /// `(from, to, key, iv_or_counter, length)` otherwise.
    pub fn arg_kinds(self) -> &'static [ValueKind] {
        match self {
            CipherMode::EncryptBlock | CipherMode::DecryptBlock => BLOCK_ARGS,
            CipherMode::CbcEncrypt | CipherMode::CbcDecrypt | CipherMode::Ctr => STREAM_ARGS,
        }
    }

    /// Single blocks return nothing; the other modes return the processed length.
    pub fn result_kind(self) -> ValueKind {
        match self {
            CipherMode::EncryptBlock | CipherMode::DecryptBlock => ValueKind::Void,
            _ => ValueKind::Int,
        }
    }

    pub fn kill_set(self) -> KillSet {
        match self {
            CipherMode::Ctr => KillSet::Single(LocationIdentity::Any),
            _ => KillSet::Single(LocationIdentity::Array(ElementKind::Byte)),
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AesNode {
    mode: CipherMode,
    runtime_checked: Option<CpuFeatureSet>,
    inputs: Vec<NodeId>,
}

impl AesNode {
    pub fn new(mode: CipherMode, inputs: Vec<NodeId>) -> IntrinsicResult<Self> {
        let expected = mode.arg_kinds().len();
        guarantee(inputs.len() == expected, "aes-arity", || {
            format!("{mode} takes {expected} inputs, got {}", inputs.len())
        })?;
        Ok(Self {
            mode,
            runtime_checked: None,
            inputs,
        })
    }

    pub fn with_runtime_checked(mut self, features: CpuFeatureSet) -> Self {
        self.runtime_checked = Some(features);
        self
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        self.runtime_checked.as_ref()
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        self.inputs.clone()
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        for input in &mut self.inputs {
            replace(input, old, new);
        }
    }

    pub fn stamp(&self, _graph: &Graph<'_>) -> Stamp {
        match self.mode.result_kind() {
            ValueKind::Void => Stamp::Void,
            _ => Stamp::int(),
        }
    }
}

// The expanded key schedule is an int array while data is bytes.
impl MemoryAccess for AesNode {
    fn location_identity(&self) -> LocationIdentity {
        LocationIdentity::Any
    }
}

impl MemoryKill for AesNode {
    fn kill_set(&self) -> KillSet {
        self.mode.kill_set()
    }
}

impl Canonicalizable for AesNode {
    fn canonical(&self, _this: NodeId, _tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        Ok(Canonical::Unchanged)
    }
}

impl Lowerable for AesNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        let args = ctx.operands(&self.inputs)?;
        ctx.call_stub(this, StubKey::Aes { mode: self.mode }, self.runtime_checked.as_ref(), &args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_follows_mode() {
        let n = NodeId::from_index(0);
        assert!(AesNode::new(CipherMode::EncryptBlock, vec![n, n, n]).is_ok());
        assert!(AesNode::new(CipherMode::CbcDecrypt, vec![n, n, n]).is_err());
        assert!(AesNode::new(CipherMode::Ctr, vec![n; 5]).is_ok());
    }

    #[test]
    fn ctr_kills_any_location() {
        let n = NodeId::from_index(0);
        let ctr = AesNode::new(CipherMode::Ctr, vec![n; 5]).unwrap();
        assert_eq!(ctr.kill_set(), KillSet::Single(LocationIdentity::Any));
        let block = AesNode::new(CipherMode::EncryptBlock, vec![n; 3]).unwrap();
        assert!(block.kill_set().overlaps(&LocationIdentity::Array(ElementKind::Byte)));
        assert!(!block.kill_set().overlaps(&LocationIdentity::Array(ElementKind::Char)));
    }
}
