// This module is the hand-off between intrinsic nodes and an instruction-emission backend. The
// driver schedules live nodes so that every value input and every memory predecessor is emitted
// before its user, then asks each node to lower itself. A node either requests an inline
// operation (the backend decides which instructions implement it for the effective features)
// or names a stub key; the context selects the stub variant for the node's runtime-checked
// capabilities and asks the backend to link a call. Nodes never see machine code, and the
// backend never sees node semantics beyond the operation it is asked to emit.

//! Lowering bridge between intrinsic nodes and an emission backend.

use hashbrown::{HashMap, HashSet};
use std::fmt;

use crate::core::config::IntrinsicsConfig;
use crate::core::constant::Constant;
use crate::core::element::ElementKind;
use crate::core::error::{guarantee, IntrinsicError, IntrinsicResult};
use crate::core::graph::{ArithOp, Graph, NodeId, NodeKind};
use crate::core::stamp::Stamp;
use crate::stubs::{StubDescriptor, StubKey, StubRegistry};
use crate::target::{CpuFeatureSet, TargetDescription};

/// Operation a backend emits inline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InlineOp {
    /// Compare `length` elements of two regions with raw-bit equality.
    /// Arguments: array_a, offset_a, array_b, offset_b.
    ArrayEquals { kind: ElementKind, length: usize },
    BitCount { bits: u32, features: CpuFeatureSet },
    LeadingZeros { bits: u32, features: CpuFeatureSet },
    TrailingZeros { bits: u32, features: CpuFeatureSet },
    ReverseBytes { bits: u32 },
    HalfToFloat,
    FloatToHalf,
    UnsignedBelow { bits: u32 },
    FloatMul,
    FloatDiv,
    Sqrt,
}

impl InlineOp {
    pub fn name(&self) -> &'static str {
        match self {
            InlineOp::ArrayEquals { .. } => "ArrayEquals",
            InlineOp::BitCount { .. } => "BitCount",
            InlineOp::LeadingZeros { .. } => "LeadingZeros",
            InlineOp::TrailingZeros { .. } => "TrailingZeros",
            InlineOp::ReverseBytes { .. } => "ReverseBytes",
            InlineOp::HalfToFloat => "HalfToFloat",
            InlineOp::FloatToHalf => "FloatToHalf",
            InlineOp::UnsignedBelow { .. } => "UnsignedBelow",
            InlineOp::FloatMul => "FloatMul",
            InlineOp::FloatDiv => "FloatDiv",
            InlineOp::Sqrt => "Sqrt",
        }
    }
}

impl From<ArithOp> for InlineOp {
    fn from(op: ArithOp) -> Self {
        match op {
            ArithOp::Mul => InlineOp::FloatMul,
            ArithOp::Div => InlineOp::FloatDiv,
            ArithOp::Sqrt => InlineOp::Sqrt,
        }
    }
}

impl fmt::Display for InlineOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Request to link a call to a selected stub.
#[derive(Debug, Clone, Copy)]
pub struct StubCall {
    pub descriptor: &'static StubDescriptor,
    pub runtime_checked: Option<CpuFeatureSet>,
}

/// Instruction-emission backend.
pub trait LoweringBackend {
    /// Location of an emitted value.
    type Value: Copy + fmt::Debug;

    fn target(&self) -> &TargetDescription;

    fn parameter(&mut self, index: u32, stamp: &Stamp) -> IntrinsicResult<Self::Value>;

    fn constant(&mut self, constant: &Constant<'_>) -> IntrinsicResult<Self::Value>;

    fn emit_inline(&mut self, op: &InlineOp, args: &[Self::Value]) -> IntrinsicResult<Self::Value>;

    fn emit_stub_call(&mut self, call: &StubCall, args: &[Self::Value]) -> IntrinsicResult<Self::Value>;
}

/// Implemented by every node family.
pub trait Lowerable {
    fn generate<B: LoweringBackend>(
        &self,
        this: NodeId,
        ctx: &mut LoweringContext<'_, '_, B>,
    ) -> IntrinsicResult<B::Value>;
}

/// State of one lowering run.
pub struct LoweringContext<'a, 'arena, B: LoweringBackend> {
    graph: &'a Graph<'arena>,
    backend: &'a mut B,
    registry: &'static StubRegistry,
    values: HashMap<NodeId, B::Value>,
}

impl<'a, 'arena, B: LoweringBackend> LoweringContext<'a, 'arena, B> {
    pub fn graph(&self) -> &'a Graph<'arena> {
        self.graph
    }

    pub fn config(&self) -> &'arena IntrinsicsConfig {
        self.graph.config()
    }

    pub fn target(&self) -> TargetDescription {
        *self.backend.target()
    }

    /// Features usable by code guarded by `runtime_checked`.
    pub fn effective_features(&self, runtime_checked: Option<&CpuFeatureSet>) -> IntrinsicResult<CpuFeatureSet> {
        self.backend.target().effective(runtime_checked)
    }

    /// Emitted value of an input.
    pub fn operand(&self, id: NodeId) -> IntrinsicResult<B::Value> {
        if let Some(value) = self.values.get(&id) {
            return Ok(*value);
        }
        let reason = match self.graph.kind(id) {
            Some(NodeKind::VirtualArray { .. }) => "virtual array has no storage".to_string(),
            Some(kind) => format!("{} input has not been lowered", kind.name()),
            None => return Err(IntrinsicError::UnknownNode(id)),
        };
        Err(IntrinsicError::NotLowerable { node: id, reason })
    }

    pub fn operands(&self, ids: &[NodeId]) -> IntrinsicResult<Vec<B::Value>> {
        ids.iter().map(|&id| self.operand(id)).collect()
    }

    /// Ask the backend for an inline sequence.
    pub fn inline(&mut self, this: NodeId, op: InlineOp, args: &[B::Value]) -> IntrinsicResult<B::Value> {
        log::trace!("{this}: inline {op}");
        self.graph.session().record_inline();
        self.backend.emit_inline(&op, args)
    }

    /// Select the stub for `key` and ask the backend to call it.
    pub fn call_stub(
        &mut self,
        this: NodeId,
        key: StubKey,
        runtime_checked: Option<&CpuFeatureSet>,
        args: &[B::Value],
    ) -> IntrinsicResult<B::Value> {
        let target = *self.backend.target();
        let descriptor = self.registry.select_for(&target, &key, runtime_checked)?;
        guarantee(args.len() == descriptor.args().len(), "stub-arity", || {
            format!(
                "{} takes {} arguments, {} supplied",
                descriptor.name(),
                descriptor.args().len(),
                args.len()
            )
        })?;
        log::debug!("{this}: call {}", descriptor.name());
        self.graph.session().record_stub_call(descriptor.name());
        let call = StubCall {
            descriptor,
            runtime_checked: runtime_checked.copied(),
        };
        self.backend.emit_stub_call(&call, args)
    }
}

/// Live nodes ordered so value inputs and memory predecessors come first.
pub fn schedule(graph: &Graph<'_>) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut visited = HashSet::new();
    for root in graph.live_nodes() {
        if visited.contains(&root) {
            continue;
        }
        // Iterative post-order; the bool marks "predecessors already pushed".
        let mut stack = vec![(root, false)];
        while let Some((id, expanded)) = stack.pop() {
            if expanded {
                order.push(id);
                continue;
            }
            if !visited.insert(id) {
                continue;
            }
            stack.push((id, true));
            let predecessors = graph
                .inputs(id)
                .into_iter()
                .chain(graph.last_location_access(id));
            for input in predecessors {
                if graph.is_live(input) && !visited.contains(&input) {
                    stack.push((input, false));
                }
            }
        }
    }
    order
}

/// Lower every live node of `graph` through `backend`.
pub fn lower_graph<B: LoweringBackend>(
    graph: &Graph<'_>,
    backend: &mut B,
) -> IntrinsicResult<HashMap<NodeId, B::Value>> {
    let registry = StubRegistry::global(backend.target().arch)?;
    let mut ctx = LoweringContext {
        graph,
        backend,
        registry,
        values: HashMap::new(),
    };

    for id in schedule(graph) {
        let value = match graph.kind_or_err(id)? {
            NodeKind::Parameter { index, stamp } => ctx.backend.parameter(*index, stamp)?,
            NodeKind::Constant(constant) => ctx.backend.constant(constant)?,
            NodeKind::Pi { value, .. } => ctx.operand(*value)?,
            NodeKind::VirtualArray { .. } => continue,
            NodeKind::Arith(arith) => {
                let args = ctx.operands(&arith.inputs())?;
                ctx.inline(id, InlineOp::from(arith.op), &args)?
            }
            NodeKind::Intrinsic(node) => node.generate(id, &mut ctx)?,
        };
        ctx.values.insert(id, value);
    }
    Ok(ctx.values)
}
