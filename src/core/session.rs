// This module provides the per-compilation session. One session exists for every method being
// compiled and is used by a single thread from graph construction to lowering. It owns a
// reference to the bumpalo arena that stores constant array payloads (so array constants can be
// passed around as plain copies with the arena lifetime), hands out object identities for those
// arrays, carries the folding and lowering configuration and accumulates statistics: how many
// intrinsic nodes were folded or simplified, how many stub calls and inline sequences were
// emitted, broken down per operation. Sessions are deliberately not Sync; cross-compilation
// state lives in the read-only stub registry instead.

//! Arena-based compilation session management.

use bumpalo::Bump;
use hashbrown::HashMap;
use std::cell::{Cell, RefCell};
use std::fmt;

use super::config::IntrinsicsConfig;
use super::constant::{ArrayConstant, ObjectId};
use super::element::ElementKind;
use super::error::{guarantee, IntrinsicResult};

/// Arena-based compilation session.
pub struct CompilationSession<'arena> {
    /// Arena allocator for constant payloads.
    arena: &'arena Bump,

    config: IntrinsicsConfig,

    stats: RefCell<SessionStats>,

    next_object_id: Cell<u32>,
}

impl<'arena> CompilationSession<'arena> {
    /// Create a session with the default configuration.
    pub fn new(arena: &'arena Bump) -> Self {
        Self::with_config(arena, IntrinsicsConfig::default())
    }

    pub fn with_config(arena: &'arena Bump, config: IntrinsicsConfig) -> Self {
        Self {
            arena,
            config,
            stats: RefCell::new(SessionStats::default()),
            next_object_id: Cell::new(0),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn config(&self) -> &IntrinsicsConfig {
        &self.config
    }

    /// Copy `data` into the arena as the contents of a fresh array object.
    pub fn alloc_array(
        &self,
        kind: ElementKind,
        data: &[u8],
        stable: bool,
    ) -> IntrinsicResult<ArrayConstant<'arena>> {
        guarantee(data.len() % kind.bytes() == 0, "array-payload-size", || {
            format!("{} bytes is not a whole number of {kind} elements", data.len())
        })?;
        let id = self.next_object_id.get();
        self.next_object_id.set(id + 1);
        let payload = self.arena.alloc_slice_copy(data);
        Ok(ArrayConstant::new(ObjectId(id), kind, payload, stable))
    }

    /// Record that a node was replaced by a constant.
    pub fn record_fold(&self, operation: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.nodes_folded += 1;
        *stats.per_operation.entry(operation.to_string()).or_insert(0) += 1;
    }

    /// Record that a node was replaced by a cheaper non-constant node.
    pub fn record_simplification(&self, operation: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.nodes_simplified += 1;
        *stats.per_operation.entry(operation.to_string()).or_insert(0) += 1;
    }

    pub fn record_stub_call(&self, stub: &str) {
        let mut stats = self.stats.borrow_mut();
        stats.stub_calls += 1;
        stats.linked_stubs.push(stub.to_string());
    }

    pub fn record_inline(&self) {
        self.stats.borrow_mut().inline_emissions += 1;
    }

    /// Snapshot of the statistics gathered so far.
    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

/// Statistics of one compilation.
#[derive(Debug, Clone, Default)]
pub struct SessionStats {
    pub nodes_folded: usize,
    pub nodes_simplified: usize,
    pub stub_calls: usize,
    pub inline_emissions: usize,
    /// Stubs linked, in emission order.
    pub linked_stubs: Vec<String>,
    /// Folds and simplifications per operation name.
    pub per_operation: HashMap<String, usize>,
}

impl fmt::Display for SessionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Intrinsic statistics:")?;
        writeln!(f, "  Nodes folded: {}", self.nodes_folded)?;
        writeln!(f, "  Nodes simplified: {}", self.nodes_simplified)?;
        writeln!(f, "  Stub calls: {}", self.stub_calls)?;
        writeln!(f, "  Inline emissions: {}", self.inline_emissions)?;

        let mut ops: Vec<_> = self.per_operation.iter().collect();
        ops.sort();
        for (op, count) in ops {
            writeln!(f, "    {op}: {count}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_utils::test::with_test_context;

    #[test]
    fn arrays_get_distinct_identities() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            let a = session.alloc_array(ElementKind::Byte, &[1, 2], true).unwrap();
            let b = session.alloc_array(ElementKind::Byte, &[1, 2], true).unwrap();
            assert_ne!(a.object_id(), b.object_id());
            assert_eq!(a.bytes(), b.bytes());
        });
    }

    #[test]
    fn rejects_partial_elements() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            assert!(session.alloc_array(ElementKind::Char, &[1, 2, 3], true).is_err());
        });
    }

    #[test]
    fn stats_count_per_operation() {
        with_test_context(|ctx| {
            let session = ctx.create_session();
            session.record_fold("ArrayEquals");
            session.record_fold("ArrayEquals");
            session.record_simplification("Pow");
            let stats = session.stats();
            assert_eq!(stats.nodes_folded, 2);
            assert_eq!(stats.nodes_simplified, 1);
            assert_eq!(stats.per_operation["ArrayEquals"], 2);
        });
    }
}
