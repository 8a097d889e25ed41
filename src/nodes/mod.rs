// This module gathers the intrinsic node families into one closed enum. Every family owns its
// static parameters, its data inputs (as node ids), its folding and simplification logic and
// its lowering request; the enum only dispatches. The shared machinery around nodes (memory
// linking in the graph, the canonicalizer worklist, the lowering driver) talks to families
// through the Canonicalizable and Lowerable traits and through the MemoryAccess/MemoryKill
// traits for nodes that touch memory. Constructors validate arity and parameter invariants and
// return an error naming the violated invariant, so an invalid node never enters the graph.

//! Intrinsic node families and their shared dispatch.

pub mod bits;
pub mod cipher;
pub mod compare;
pub mod conversion;
pub mod equals;
pub mod index_of;
pub mod math;
pub mod string_attributes;
pub mod unsigned_compare;

pub use bits::{BitOp, BitOpNode};
pub use cipher::{AesNode, CipherMode};
pub use compare::ArrayRegionCompareToNode;
pub use conversion::{HalfFloatNode, HalfFloatOp};
pub use equals::{ArrayEqualsNode, ArrayRegionEqualsNode};
pub use index_of::{ArrayIndexOfNode, SearchVariant};
pub use math::{BinaryMathNode, BinaryMathOp, UnaryMathNode, UnaryMathOp};
pub use string_attributes::{CalcStringAttributesNode, CodeRange, StringEncoding};
pub use unsigned_compare::UnsignedBelowNode;

use crate::canonicalize::{Canonical, Canonicalizable, CanonicalizerTool};
use crate::core::error::IntrinsicResult;
use crate::core::graph::{Graph, NodeId};
use crate::core::location::{KillSet, LocationIdentity, MemoryAccess, MemoryKill};
use crate::core::stamp::Stamp;
use crate::lowering::{Lowerable, LoweringBackend, LoweringContext};
use crate::target::CpuFeatureSet;

/// Start of an array region: the array and a byte offset into it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayRegion {
    pub array: NodeId,
    pub offset: NodeId,
}

impl ArrayRegion {
    pub fn new(array: NodeId, offset: NodeId) -> Self {
        Self { array, offset }
    }

    /// Whether both regions provably start at the same address.
    pub(crate) fn same_start(&self, other: &ArrayRegion, graph: &Graph<'_>) -> bool {
        graph.same_object(self.array, other.array) && graph.same_value(self.offset, other.offset)
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        replace(&mut self.array, old, new);
        replace(&mut self.offset, old, new);
    }
}

pub(crate) fn replace(input: &mut NodeId, old: NodeId, new: NodeId) {
    if *input == old {
        *input = new;
    }
}

/// Constant length of a region, if non-negative and known.
pub(crate) fn constant_length(graph: &Graph<'_>, length: NodeId) -> Option<usize> {
    graph.int_constant(length).and_then(|len| usize::try_from(len).ok())
}

/// Bytes covered by `length` elements of `width` bytes each, unless that overflows.
pub(crate) fn region_bytes(length: usize, width: usize) -> Option<usize> {
    length.checked_mul(width)
}

/// Every intrinsic node family.
#[derive(Debug, Clone, PartialEq)]
pub enum IntrinsicNode {
    ArrayIndexOf(ArrayIndexOfNode),
    ArrayRegionCompareTo(ArrayRegionCompareToNode),
    ArrayEquals(ArrayEqualsNode),
    ArrayRegionEquals(ArrayRegionEqualsNode),
    CalcStringAttributes(CalcStringAttributesNode),
    Aes(AesNode),
    UnaryMath(UnaryMathNode),
    BinaryMath(BinaryMathNode),
    BitOp(BitOpNode),
    HalfFloat(HalfFloatNode),
    UnsignedBelow(UnsignedBelowNode),
}

macro_rules! dispatch {
    ($self:expr, $node:ident => $body:expr) => {
        match $self {
            IntrinsicNode::ArrayIndexOf($node) => $body,
            IntrinsicNode::ArrayRegionCompareTo($node) => $body,
            IntrinsicNode::ArrayEquals($node) => $body,
            IntrinsicNode::ArrayRegionEquals($node) => $body,
            IntrinsicNode::CalcStringAttributes($node) => $body,
            IntrinsicNode::Aes($node) => $body,
            IntrinsicNode::UnaryMath($node) => $body,
            IntrinsicNode::BinaryMath($node) => $body,
            IntrinsicNode::BitOp($node) => $body,
            IntrinsicNode::HalfFloat($node) => $body,
            IntrinsicNode::UnsignedBelow($node) => $body,
        }
    };
}

macro_rules! impl_from {
    ($($variant:ident($ty:ty)),* $(,)?) => {
        $(
            impl From<$ty> for IntrinsicNode {
                fn from(node: $ty) -> Self {
                    IntrinsicNode::$variant(node)
                }
            }
        )*
    };
}

impl_from!(
    ArrayIndexOf(ArrayIndexOfNode),
    ArrayRegionCompareTo(ArrayRegionCompareToNode),
    ArrayEquals(ArrayEqualsNode),
    ArrayRegionEquals(ArrayRegionEqualsNode),
    CalcStringAttributes(CalcStringAttributesNode),
    Aes(AesNode),
    UnaryMath(UnaryMathNode),
    BinaryMath(BinaryMathNode),
    BitOp(BitOpNode),
    HalfFloat(HalfFloatNode),
    UnsignedBelow(UnsignedBelowNode),
);

impl IntrinsicNode {
    pub fn name(&self) -> &'static str {
        match self {
            IntrinsicNode::ArrayIndexOf(_) => "ArrayIndexOf",
            IntrinsicNode::ArrayRegionCompareTo(_) => "ArrayRegionCompareTo",
            IntrinsicNode::ArrayEquals(_) => "ArrayEquals",
            IntrinsicNode::ArrayRegionEquals(_) => "ArrayRegionEquals",
            IntrinsicNode::CalcStringAttributes(_) => "CalcStringAttributes",
            IntrinsicNode::Aes(_) => "Aes",
            IntrinsicNode::UnaryMath(node) => node.op().name(),
            IntrinsicNode::BinaryMath(node) => node.op().name(),
            IntrinsicNode::BitOp(node) => node.op().name(),
            IntrinsicNode::HalfFloat(node) => node.op().name(),
            IntrinsicNode::UnsignedBelow(_) => "UnsignedBelow",
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        dispatch!(self, node => node.inputs())
    }

    pub(crate) fn replace_input(&mut self, old: NodeId, new: NodeId) {
        dispatch!(self, node => node.replace_input(old, new))
    }

    /// Location read, for nodes that access memory.
    pub fn location_identity(&self) -> Option<LocationIdentity> {
        match self {
            IntrinsicNode::ArrayIndexOf(node) => Some(node.location_identity()),
            IntrinsicNode::ArrayRegionCompareTo(node) => Some(node.location_identity()),
            IntrinsicNode::ArrayEquals(node) => Some(node.location_identity()),
            IntrinsicNode::ArrayRegionEquals(node) => Some(node.location_identity()),
            IntrinsicNode::CalcStringAttributes(node) => Some(node.location_identity()),
            IntrinsicNode::Aes(node) => Some(node.location_identity()),
            IntrinsicNode::UnaryMath(_)
            | IntrinsicNode::BinaryMath(_)
            | IntrinsicNode::BitOp(_)
            | IntrinsicNode::HalfFloat(_)
            | IntrinsicNode::UnsignedBelow(_) => None,
        }
    }

    /// Locations the node may write.
    pub fn kill_set(&self) -> KillSet {
        match self {
            IntrinsicNode::Aes(node) => node.kill_set(),
            _ => KillSet::None,
        }
    }

    pub fn stamp(&self, graph: &Graph<'_>) -> Stamp {
        dispatch!(self, node => node.stamp(graph))
    }

    /// Capabilities verified by the caller before this node executes.
    pub fn runtime_checked(&self) -> Option<&CpuFeatureSet> {
        match self {
            IntrinsicNode::ArrayIndexOf(node) => node.runtime_checked(),
            IntrinsicNode::ArrayRegionCompareTo(node) => node.runtime_checked(),
            IntrinsicNode::ArrayEquals(node) => node.runtime_checked(),
            IntrinsicNode::ArrayRegionEquals(node) => node.runtime_checked(),
            IntrinsicNode::CalcStringAttributes(node) => node.runtime_checked(),
            IntrinsicNode::Aes(node) => node.runtime_checked(),
            IntrinsicNode::UnaryMath(node) => node.runtime_checked(),
            IntrinsicNode::BinaryMath(node) => node.runtime_checked(),
            IntrinsicNode::HalfFloat(node) => node.runtime_checked(),
            IntrinsicNode::BitOp(_) | IntrinsicNode::UnsignedBelow(_) => None,
        }
    }
}

impl Canonicalizable for IntrinsicNode {
    fn canonical(&self, this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        dispatch!(self, node => node.canonical(this, tool))
    }
}

impl Lowerable for IntrinsicNode {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value> {
        dispatch!(self, node => node.generate(this, ctx))
    }
}
