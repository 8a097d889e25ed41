//! TPDE intrinsics - intrinsic operations for fast baseline compilation.
//!
//! This crate provides the intrinsic-operation layer of the compiler: nodes for
//! array searching, comparison and equality, string attribute scans, block
//! ciphers, math, bit counting, half-float conversion and unsigned comparison.
//! Each node folds itself when its inputs are known, takes part in the memory
//! chain when it reads or writes memory, and lowers either to an inline
//! sequence or to a call of a pre-generated stub selected for the CPU
//! features the caller has verified.
//!
//! # Primary Usage
//!
//! ```ignore
//! use bumpalo::Bump;
//! use tpde_intrinsics::core::{CompilationSession, Graph, Stamp};
//! use tpde_intrinsics::canonicalize::Canonicalizer;
//! use tpde_intrinsics::nodes::{BitOp, BitOpNode};
//! use tpde_intrinsics::stubs::ValueKind;
//! use tpde_intrinsics::target::TargetDescription;
//! use tpde_intrinsics::x64::{X64Backend, write_object};
//!
//! let arena = Bump::new();
//! let session = CompilationSession::new(&arena);
//! let mut graph = Graph::new(&session);
//! let x = graph.add_parameter(0, Stamp::long());
//! let count = graph.add_intrinsic(BitOpNode::new(BitOp::BitCount, 64, x)?)?;
//! Canonicalizer::new(&mut graph).run()?;
//!
//! let mut backend = X64Backend::new(TargetDescription::amd64(), &[ValueKind::Long])?;
//! let values = tpde_intrinsics::lowering::lower_graph(&graph, &mut backend)?;
//! let function = backend.emit(values.get(&count).copied())?;
//! let object = write_object("bit_count", &function)?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (session, graph, stamps, registers)
//! - [`target`] - Architectures, CPU features and feature tiers
//! - [`stubs`] - Stub keys, descriptors and the capability-dispatch registry
//! - [`nodes`] - Intrinsic node families
//! - [`canonicalize`] - Constant folding and simplification driver
//! - [`lowering`] - Scheduling and the backend interface
//! - [`x64`] - x86-64 reference backend and ELF output

pub mod canonicalize;
pub mod core;
pub mod lowering;
pub mod nodes;
pub mod stubs;
pub mod target;
pub mod x64;

pub use crate::canonicalize::{Canonical, Canonicalizable, Canonicalizer, CanonicalizerTool};
pub use crate::core::{
    // Session management
    CompilationSession, IntrinsicsConfig, SessionStats,
    // Errors
    IntrinsicError, IntrinsicResult,
    // Graph
    Graph, NodeId, NodeKind, Stamp,
};
pub use crate::lowering::{lower_graph, InlineOp, Lowerable, LoweringBackend, LoweringContext, StubCall};
pub use crate::nodes::IntrinsicNode;
pub use crate::stubs::{StubDescriptor, StubKey, StubRegistry, ValueKind};
pub use crate::target::{Architecture, CpuFeature, CpuFeatureSet, TargetDescription};
