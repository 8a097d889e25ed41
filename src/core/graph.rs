// This module holds the node arena the intrinsic layer operates on. It is a deliberately small
// stand-in for the surrounding compiler's IR: nodes live in a Vec and are addressed by index,
// inputs are plain indices, and replacing a node rewires every usage to the replacement and
// marks the old slot dead. Besides value edges the arena tracks the memory chain. When a node
// that reads or writes memory is added it is linked after the most recent live accessor whose
// effects overlap its own (a prior write to a location it reads, a prior read of a location it
// writes, or two overlapping writes); reads never order against reads. When a memory node is
// replaced its dependents are forwarded to the node it was itself chained after, so the chain
// stays intact. Constant nodes for scalars are de-duplicated through a hashbrown map so that
// folds producing the same value share a node.

//! Node arena, value edges and the memory-dependency chain.

use hashbrown::HashMap;
use std::borrow::Cow;
use std::fmt;

use super::config::IntrinsicsConfig;
use super::constant::{Constant, ScalarKey};
use super::element::{ElementKind, Stride};
use super::error::{guarantee, IntrinsicError, IntrinsicResult};
use super::location::{KillSet, LocationIdentity};
use super::session::CompilationSession;
use super::stamp::{FloatStamp, IntegerStamp, RangeAnalysis, Stamp};
use crate::nodes::IntrinsicNode;

/// Index of a node in the graph arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub(crate) fn from_index(index: usize) -> Self {
        NodeId(index as u32)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Plain double-precision arithmetic produced by simplifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Mul,
    Div,
    Sqrt,
}

impl ArithOp {
    pub fn name(self) -> &'static str {
        match self {
            ArithOp::Mul => "FloatMul",
            ArithOp::Div => "FloatDiv",
            ArithOp::Sqrt => "Sqrt",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArithNode {
    pub op: ArithOp,
    pub x: NodeId,
    pub y: Option<NodeId>,
}

impl ArithNode {
    pub fn mul(x: NodeId, y: NodeId) -> Self {
        Self { op: ArithOp::Mul, x, y: Some(y) }
    }

    pub fn div(x: NodeId, y: NodeId) -> Self {
        Self { op: ArithOp::Div, x, y: Some(y) }
    }

    pub fn sqrt(x: NodeId) -> Self {
        Self { op: ArithOp::Sqrt, x, y: None }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        std::iter::once(self.x).chain(self.y).collect()
    }

    /// Evaluate on constant operands.
    pub fn evaluate(&self, x: f64, y: Option<f64>) -> Option<f64> {
        match (self.op, y) {
            (ArithOp::Mul, Some(y)) => Some(x * y),
            (ArithOp::Div, Some(y)) => Some(x / y),
            (ArithOp::Sqrt, None) => Some(x.sqrt()),
            _ => None,
        }
    }
}

/// What a node computes.
#[derive(Debug, Clone)]
pub enum NodeKind<'arena> {
    /// Incoming argument of the compiled method.
    Parameter { index: u32, stamp: Stamp },
    Constant(Constant<'arena>),
    /// Refines the stamp of `value` without changing its identity.
    Pi { value: NodeId, stamp: Stamp },
    /// Array allocated by the compiled method and not (yet) materialized.
    VirtualArray { kind: ElementKind, entries: Vec<NodeId> },
    Arith(ArithNode),
    Intrinsic(IntrinsicNode),
}

impl NodeKind<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Parameter { .. } => "Parameter",
            NodeKind::Constant(_) => "Constant",
            NodeKind::Pi { .. } => "Pi",
            NodeKind::VirtualArray { .. } => "VirtualArray",
            NodeKind::Arith(arith) => arith.op.name(),
            NodeKind::Intrinsic(node) => node.name(),
        }
    }

    pub fn inputs(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Parameter { .. } | NodeKind::Constant(_) => Vec::new(),
            NodeKind::Pi { value, .. } => vec![*value],
            NodeKind::VirtualArray { entries, .. } => entries.clone(),
            NodeKind::Arith(arith) => arith.inputs(),
            NodeKind::Intrinsic(node) => node.inputs(),
        }
    }

    fn replace_input(&mut self, old: NodeId, new: NodeId) {
        let swap = |input: &mut NodeId| {
            if *input == old {
                *input = new;
            }
        };
        match self {
            NodeKind::Parameter { .. } | NodeKind::Constant(_) => {}
            NodeKind::Pi { value, .. } => swap(value),
            NodeKind::VirtualArray { entries, .. } => entries.iter_mut().for_each(swap),
            NodeKind::Arith(arith) => {
                swap(&mut arith.x);
                if let Some(y) = arith.y.as_mut() {
                    swap(y);
                }
            }
            NodeKind::Intrinsic(node) => node.replace_input(old, new),
        }
    }

    /// Location read and locations killed, for memory nodes.
    fn memory_effects(&self) -> Option<(LocationIdentity, KillSet)> {
        match self {
            NodeKind::Intrinsic(node) => node
                .location_identity()
                .map(|location| (location, node.kill_set())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct Node<'arena> {
    kind: NodeKind<'arena>,
    last_location_access: Option<NodeId>,
    live: bool,
}

/// Contents of an array whose every element is known at compile time.
#[derive(Debug, Clone)]
pub struct ArrayContents<'arena> {
    pub kind: ElementKind,
    pub bytes: Cow<'arena, [u8]>,
}

impl ArrayContents<'_> {
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }

    /// Bytes `[byte_offset, byte_offset + len)`, if they are all inside the array.
    pub fn region(&self, byte_offset: i64, len: usize) -> Option<&[u8]> {
        let start = usize::try_from(byte_offset).ok()?;
        let end = start.checked_add(len)?;
        self.bytes.get(start..end)
    }

    /// Element at `byte_index` read through `stride`, zero-extended.
    pub fn read(&self, stride: Stride, byte_index: usize) -> Option<u64> {
        stride.read(&self.bytes, byte_index)
    }
}

/// Arena of nodes for one compilation.
pub struct Graph<'arena> {
    session: &'arena CompilationSession<'arena>,
    nodes: Vec<Node<'arena>>,
    scalar_constants: HashMap<ScalarKey, NodeId>,
    memory_accessors: Vec<NodeId>,
}

impl<'arena> Graph<'arena> {
    pub fn new(session: &'arena CompilationSession<'arena>) -> Self {
        Self {
            session,
            nodes: Vec::new(),
            scalar_constants: HashMap::new(),
            memory_accessors: Vec::new(),
        }
    }

    pub fn session(&self) -> &'arena CompilationSession<'arena> {
        self.session
    }

    pub fn config(&self) -> &'arena IntrinsicsConfig {
        self.session.config()
    }

    fn push(&mut self, kind: NodeKind<'arena>) -> NodeId {
        let id = NodeId::from_index(self.nodes.len());
        self.nodes.push(Node {
            kind,
            last_location_access: None,
            live: true,
        });
        id
    }

    fn check_inputs(&self, kind: &NodeKind<'_>) -> IntrinsicResult<()> {
        for input in kind.inputs() {
            if !self.is_live(input) {
                return Err(IntrinsicError::UnknownNode(input));
            }
        }
        Ok(())
    }

    pub fn add_parameter(&mut self, index: u32, stamp: Stamp) -> NodeId {
        self.push(NodeKind::Parameter { index, stamp })
    }

    /// Add a constant; scalar constants are shared.
    pub fn add_constant(&mut self, constant: Constant<'arena>) -> NodeId {
        match constant.scalar_key() {
            Some(key) => {
                if let Some(&id) = self.scalar_constants.get(&key) {
                    return id;
                }
                let id = self.push(NodeKind::Constant(constant));
                self.scalar_constants.insert(key, id);
                id
            }
            None => self.push(NodeKind::Constant(constant)),
        }
    }

    /// Add a constant array whose contents are copied into the session arena.
    pub fn add_array(&mut self, kind: ElementKind, data: &[u8], stable: bool) -> IntrinsicResult<NodeId> {
        let array = self.session.alloc_array(kind, data, stable)?;
        Ok(self.push(NodeKind::Constant(Constant::Array(array))))
    }

    pub fn add_pi(&mut self, value: NodeId, stamp: Stamp) -> IntrinsicResult<NodeId> {
        let kind = NodeKind::Pi { value, stamp };
        self.check_inputs(&kind)?;
        Ok(self.push(kind))
    }

    pub fn add_virtual_array(&mut self, kind: ElementKind, entries: Vec<NodeId>) -> IntrinsicResult<NodeId> {
        let kind = NodeKind::VirtualArray { kind, entries };
        self.check_inputs(&kind)?;
        Ok(self.push(kind))
    }

    pub fn add_arith(&mut self, arith: ArithNode) -> IntrinsicResult<NodeId> {
        let kind = NodeKind::Arith(arith);
        self.check_inputs(&kind)?;
        Ok(self.push(kind))
    }

    /// Add an intrinsic node and link it into the memory chain.
    pub fn add_intrinsic(&mut self, node: impl Into<IntrinsicNode>) -> IntrinsicResult<NodeId> {
        let kind = NodeKind::Intrinsic(node.into());
        self.check_inputs(&kind)?;
        let effects = kind.memory_effects();
        let id = self.push(kind);
        if let Some((location, kill)) = effects {
            let previous = self.find_memory_predecessor(&location, &kill);
            self.nodes[id.index()].last_location_access = previous;
            self.memory_accessors.push(id);
            log::trace!(
                "{id} ({}) reads {location} kills {kill}, ordered after {previous:?}",
                self.nodes[id.index()].kind.name()
            );
        }
        Ok(id)
    }

    fn find_memory_predecessor(&self, location: &LocationIdentity, kill: &KillSet) -> Option<NodeId> {
        self.memory_accessors.iter().rev().copied().find(|&prior| {
            match self.nodes[prior.index()].kind.memory_effects() {
                Some((prior_location, prior_kill)) => {
                    prior_kill.overlaps(location)
                        || kill.overlaps(&prior_location)
                        || kill.overlaps_kill(&prior_kill)
                }
                None => false,
            }
        })
    }

    pub fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id.index()).is_some_and(|node| node.live)
    }

    /// Number of slots ever allocated, including dead ones.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn live_nodes(&self) -> Vec<NodeId> {
        (0..self.nodes.len())
            .map(NodeId::from_index)
            .filter(|&id| self.is_live(id))
            .collect()
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind<'arena>> {
        self.nodes
            .get(id.index())
            .filter(|node| node.live)
            .map(|node| &node.kind)
    }

    pub(crate) fn kind_or_err(&self, id: NodeId) -> IntrinsicResult<&NodeKind<'arena>> {
        self.kind(id).ok_or(IntrinsicError::UnknownNode(id))
    }

    pub fn intrinsic(&self, id: NodeId) -> Option<&IntrinsicNode> {
        match self.kind(id)? {
            NodeKind::Intrinsic(node) => Some(node),
            _ => None,
        }
    }

    /// Follow Pi nodes to the node they refine.
    pub fn alias_root(&self, mut id: NodeId) -> NodeId {
        while let Some(NodeKind::Pi { value, .. }) = self.kind(id) {
            id = *value;
        }
        id
    }

    /// Constant value of `id`, looking through Pi nodes.
    pub fn constant(&self, id: NodeId) -> Option<Constant<'arena>> {
        match self.kind(self.alias_root(id))? {
            NodeKind::Constant(constant) => Some(*constant),
            _ => None,
        }
    }

    pub fn int_constant(&self, id: NodeId) -> Option<i64> {
        self.constant(id)?.as_long()
    }

    /// Whether `a` and `b` are provably the same object.
    pub fn same_object(&self, a: NodeId, b: NodeId) -> bool {
        let (a, b) = (self.alias_root(a), self.alias_root(b));
        if a == b {
            return true;
        }
        match (self.constant(a), self.constant(b)) {
            (Some(Constant::Array(x)), Some(Constant::Array(y))) => x.object_id() == y.object_id(),
            _ => false,
        }
    }

    /// Whether `a` and `b` provably hold the same value.
    pub fn same_value(&self, a: NodeId, b: NodeId) -> bool {
        if self.alias_root(a) == self.alias_root(b) {
            return true;
        }
        match (self.constant(a), self.constant(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// Contents of a stable constant array or of a virtual array whose
    /// entries are all constant.
    pub fn array_contents(&self, id: NodeId) -> Option<ArrayContents<'arena>> {
        match self.kind(self.alias_root(id))? {
            NodeKind::Constant(Constant::Array(array)) if array.is_stable() => Some(ArrayContents {
                kind: array.kind(),
                bytes: Cow::Borrowed(array.bytes()),
            }),
            NodeKind::VirtualArray { kind, entries } => {
                let mut bytes = Vec::with_capacity(entries.len() * kind.bytes());
                for &entry in entries {
                    let raw = match self.constant(entry)? {
                        Constant::Int(v) => v as i64 as u64,
                        Constant::Long(v) => v as u64,
                        Constant::Float(v) => v.to_bits() as u64,
                        Constant::Double(v) => v.to_bits(),
                        Constant::Null | Constant::Array(_) => return None,
                    };
                    bytes.extend_from_slice(&raw.to_le_bytes()[..kind.bytes()]);
                }
                Some(ArrayContents {
                    kind: *kind,
                    bytes: Cow::Owned(bytes),
                })
            }
            _ => None,
        }
    }

    /// The memory node `id` is ordered after, if any.
    pub fn last_location_access(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id.index()).and_then(|node| node.last_location_access)
    }

    /// Live memory nodes in insertion order.
    pub fn memory_accessors(&self) -> &[NodeId] {
        &self.memory_accessors
    }

    pub fn inputs(&self, id: NodeId) -> Vec<NodeId> {
        self.kind(id).map(NodeKind::inputs).unwrap_or_default()
    }

    /// Live nodes that use `id` as a value input.
    pub fn usages(&self, id: NodeId) -> Vec<NodeId> {
        self.live_nodes()
            .into_iter()
            .filter(|&user| self.inputs(user).contains(&id))
            .collect()
    }

    /// Rewire every usage of `old` to `new` and remove `old`.
    pub fn replace_at_usages(&mut self, old: NodeId, new: NodeId) -> IntrinsicResult<()> {
        guarantee(old != new, "replace-with-self", || format!("{old} replaced by itself"))?;
        if !self.is_live(old) {
            return Err(IntrinsicError::UnknownNode(old));
        }
        if !self.is_live(new) {
            return Err(IntrinsicError::UnknownNode(new));
        }

        let forwarded = self.nodes[old.index()].last_location_access;
        for (index, node) in self.nodes.iter_mut().enumerate() {
            if !node.live || index == old.index() {
                continue;
            }
            node.kind.replace_input(old, new);
            if node.last_location_access == Some(old) {
                node.last_location_access = forwarded;
            }
        }
        self.nodes[old.index()].live = false;
        self.memory_accessors.retain(|&id| id != old);
        Ok(())
    }
}

impl RangeAnalysis for Graph<'_> {
    fn stamp(&self, node: NodeId) -> Stamp {
        match self.kind(node) {
            Some(NodeKind::Parameter { stamp, .. }) => *stamp,
            Some(NodeKind::Constant(constant)) => constant.stamp(),
            Some(NodeKind::Pi { stamp, .. }) => *stamp,
            Some(NodeKind::VirtualArray { .. }) => Stamp::array(),
            Some(NodeKind::Arith(_)) => Stamp::Float(FloatStamp::unrestricted(64)),
            Some(NodeKind::Intrinsic(intrinsic)) => intrinsic.stamp(self),
            None => Stamp::Integer(IntegerStamp::unrestricted(64)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::with_test_context;

    #[test]
    fn scalar_constants_are_shared() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let a = graph.add_constant(Constant::Int(7));
            let b = graph.add_constant(Constant::Int(7));
            let c = graph.add_constant(Constant::Long(7));
            assert_eq!(a, b);
            assert_ne!(a, c);
        });
    }

    #[test]
    fn constants_are_visible_through_pi() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let c = graph.add_constant(Constant::Int(3));
            let pi = graph.add_pi(c, Stamp::int()).unwrap();
            assert_eq!(graph.int_constant(pi), Some(3));
            assert_eq!(graph.alias_root(pi), c);
        });
    }

    #[test]
    fn virtual_array_contents_need_constant_entries() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let a = graph.add_constant(Constant::Int(0x141));
            let b = graph.add_constant(Constant::Int(-1));
            let array = graph.add_virtual_array(ElementKind::Char, vec![a, b]).unwrap();
            let contents = graph.array_contents(array).unwrap();
            assert_eq!(&*contents.bytes, &[0x41, 0x01, 0xFF, 0xFF]);

            let p = graph.add_parameter(0, Stamp::int());
            let partial = graph.add_virtual_array(ElementKind::Char, vec![a, p]).unwrap();
            assert!(graph.array_contents(partial).is_none());
        });
    }

    #[test]
    fn unstable_arrays_are_not_readable() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let array = graph.add_array(ElementKind::Byte, &[1, 2, 3], false).unwrap();
            assert!(graph.array_contents(array).is_none());
        });
    }

    #[test]
    fn replacement_rewires_usages() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let x = graph.add_parameter(0, Stamp::double());
            let y = graph.add_parameter(1, Stamp::double());
            let mul = graph.add_arith(ArithNode::mul(x, x)).unwrap();
            graph.replace_at_usages(x, y).unwrap();
            assert_eq!(graph.inputs(mul), vec![y, y]);
            assert!(!graph.is_live(x));
            assert!(graph.replace_at_usages(x, y).is_err());
        });
    }

    #[test]
    fn unknown_inputs_are_rejected() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let bogus = NodeId::from_index(42);
            assert_eq!(
                graph.add_arith(ArithNode::sqrt(bogus)),
                Err(IntrinsicError::UnknownNode(bogus))
            );
        });
    }
}
