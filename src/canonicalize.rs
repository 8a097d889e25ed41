// This module is the folding engine. Each node family decides for itself whether it can be
// replaced: by a constant when every input is known (and array contents are stable and within
// the configured byte budget), or by a cheaper shape when an algebraic identity applies. The
// engine owns the mechanics around that decision. It hands the family a tool that can read the
// graph and create the replacement nodes, applies the replacement by redirecting usages, records
// statistics in the session, and drives a worklist until no node changes. Declining to fold is
// always allowed and is never an error.

//! Canonicalization: constant folding and algebraic simplification.

use hashbrown::HashSet;
use std::collections::VecDeque;

use crate::core::config::IntrinsicsConfig;
use crate::core::constant::Constant;
use crate::core::error::IntrinsicResult;
use crate::core::graph::{ArithNode, Graph, NodeId, NodeKind};
use crate::core::stamp::{RangeAnalysis, Stamp};

/// Outcome of canonicalizing one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Canonical {
    Unchanged,
    /// Replace the node by the given (possibly new) node.
    Replace(NodeId),
}

/// Implemented by every node that can fold or simplify itself.
pub trait Canonicalizable {
    /// Decide whether node `this` can be replaced. Must not modify the graph
    /// except by adding replacement nodes through `tool`.
    fn canonical(&self, this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical>;
}

/// Graph access handed to [`Canonicalizable::canonical`].
pub struct CanonicalizerTool<'g, 'arena> {
    graph: &'g mut Graph<'arena>,
}

impl<'g, 'arena> CanonicalizerTool<'g, 'arena> {
    pub fn graph(&self) -> &Graph<'arena> {
        self.graph
    }

    pub fn config(&self) -> &'arena IntrinsicsConfig {
        self.graph.config()
    }

    /// Whether full evaluation over `bytes` bytes of array contents is allowed.
    pub fn may_fold_bytes(&self, bytes: usize) -> bool {
        self.config().allows_fold_of(bytes)
    }

    /// Whether scalar constant evaluation is allowed.
    pub fn may_fold(&self) -> bool {
        self.config().enable_folding
    }

    pub fn stamp(&self, node: NodeId) -> Stamp {
        self.graph.stamp(node)
    }

    pub fn constant(&mut self, constant: Constant<'arena>) -> NodeId {
        self.graph.add_constant(constant)
    }

    pub fn arith(&mut self, arith: ArithNode) -> IntrinsicResult<NodeId> {
        self.graph.add_arith(arith)
    }

    /// Replace by a constant.
    pub fn fold(&mut self, constant: Constant<'arena>) -> Canonical {
        Canonical::Replace(self.constant(constant))
    }
}

impl Canonicalizable for ArithNode {
    fn canonical(&self, _this: NodeId, tool: &mut CanonicalizerTool<'_, '_>) -> IntrinsicResult<Canonical> {
        if !tool.may_fold() {
            return Ok(Canonical::Unchanged);
        }
        let graph = tool.graph();
        let Some(x) = graph.constant(self.x).and_then(|c| c.as_double()) else {
            return Ok(Canonical::Unchanged);
        };
        let y = match self.y {
            Some(y) => match graph.constant(y).and_then(|c| c.as_double()) {
                Some(y) => Some(y),
                None => return Ok(Canonical::Unchanged),
            },
            None => None,
        };
        Ok(match self.evaluate(x, y) {
            Some(value) => tool.fold(Constant::Double(value)),
            None => Canonical::Unchanged,
        })
    }
}

/// Applies canonicalization to the nodes of one graph.
pub struct Canonicalizer<'g, 'arena> {
    graph: &'g mut Graph<'arena>,
}

impl<'g, 'arena> Canonicalizer<'g, 'arena> {
    pub fn new(graph: &'g mut Graph<'arena>) -> Self {
        Self { graph }
    }

    pub fn graph(&self) -> &Graph<'arena> {
        self.graph
    }

    /// Canonicalize a single node and apply the replacement, if any.
    pub fn canonicalize(&mut self, id: NodeId) -> IntrinsicResult<Canonical> {
        let kind = self.graph.kind_or_err(id)?.clone();
        let mut tool = CanonicalizerTool { graph: &mut *self.graph };
        let result = match &kind {
            NodeKind::Intrinsic(node) => node.canonical(id, &mut tool)?,
            NodeKind::Arith(arith) => arith.canonical(id, &mut tool)?,
            NodeKind::Parameter { .. }
            | NodeKind::Constant(_)
            | NodeKind::Pi { .. }
            | NodeKind::VirtualArray { .. } => Canonical::Unchanged,
        };

        match result {
            Canonical::Replace(replacement) if replacement != id => {
                let folded = matches!(self.graph.kind(replacement), Some(NodeKind::Constant(_)));
                self.graph.replace_at_usages(id, replacement)?;
                let session = self.graph.session();
                if folded {
                    session.record_fold(kind.name());
                    log::debug!("folded {id} ({}) to {replacement}", kind.name());
                } else {
                    session.record_simplification(kind.name());
                    log::debug!(
                        "simplified {id} ({}) to {replacement} ({})",
                        kind.name(),
                        self.graph.kind(replacement).map_or("?", NodeKind::name)
                    );
                }
                Ok(result)
            }
            _ => Ok(Canonical::Unchanged),
        }
    }

    /// Canonicalize until no node changes. Returns the number of replacements.
    pub fn run(&mut self) -> IntrinsicResult<usize> {
        let mut worklist: VecDeque<NodeId> = self.graph.live_nodes().into();
        let mut queued: HashSet<NodeId> = worklist.iter().copied().collect();
        let mut replaced = 0;

        while let Some(id) = worklist.pop_front() {
            queued.remove(&id);
            if !self.graph.is_live(id) {
                continue;
            }
            let users = self.graph.usages(id);
            if let Canonical::Replace(replacement) = self.canonicalize(id)? {
                replaced += 1;
                for node in std::iter::once(replacement).chain(users) {
                    if queued.insert(node) {
                        worklist.push_back(node);
                    }
                }
            }
        }
        log::debug!("canonicalization finished after {replaced} replacements");
        Ok(replaced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::with_test_context;

    #[test]
    fn arithmetic_on_constants_folds() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let three = graph.add_constant(Constant::Double(3.0));
            let mul = graph.add_arith(ArithNode::mul(three, three)).unwrap();
            let root = graph.add_arith(ArithNode::sqrt(mul)).unwrap();

            let replaced = Canonicalizer::new(&mut graph).run().unwrap();
            assert_eq!(replaced, 2);
            assert!(!graph.is_live(root));
            assert_eq!(session.stats().nodes_folded, 2);
            let live_constants: Vec<_> = graph
                .live_nodes()
                .into_iter()
                .filter_map(|id| graph.constant(id))
                .collect();
            assert!(live_constants.contains(&Constant::Double(3.0)));
        });
    }

    #[test]
    fn parameters_stay_unchanged() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let mut graph = Graph::new(&session);
            let x = graph.add_parameter(0, Stamp::double());
            let sqrt = graph.add_arith(ArithNode::sqrt(x)).unwrap();
            let mut canonicalizer = Canonicalizer::new(&mut graph);
            assert_eq!(canonicalizer.canonicalize(sqrt).unwrap(), Canonical::Unchanged);
            assert_eq!(canonicalizer.run().unwrap(), 0);
        });
    }

    #[test]
    fn disabled_folding_runs_without_replacements() {
        with_test_context(|ctx| {
            let session = ctx.create_session_with(IntrinsicsConfig::new().with_folding(false));
            let mut graph = Graph::new(&session);
            let two = graph.add_constant(Constant::Double(2.0));
            let mul = graph.add_arith(ArithNode::mul(two, two)).unwrap();
            assert_eq!(Canonicalizer::new(&mut graph).run().unwrap(), 0);
            assert!(graph.is_live(mul));
            assert_eq!(session.stats().nodes_folded, 0);
        });
    }
}
