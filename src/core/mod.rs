// This module gathers the infrastructure every intrinsic family builds on. The session owns the
// per-compilation arena and statistics; the graph holds nodes, their value inputs and the memory
// chain that orders readers after writers. Element kinds and strides describe array layouts,
// location identities and kill sets describe memory effects, constants and stamps describe what
// is known about values at compile time, and the register file tracks scratch registers for the
// emission backends. Configuration and the error taxonomy are shared by all of them.

//! Core infrastructure of the intrinsic layer.
//!
//! # Key Components
//!
//! ## Session Management (`session`)
//! - Arena-based allocation of constant array payloads using `bumpalo`
//! - Fold, simplification and stub call statistics
//!
//! ## Node Graph (`graph`)
//! - Arena of nodes addressed by [`NodeId`]
//! - Memory chain via `last_location_access`
//! - Usage rewriting for canonicalization
//!
//! ## Value Facts (`constant`, `stamp`)
//! - Bitwise-compared constants, stable constant arrays
//! - Integer ranges with known bits, float ranges
//!
//! ## Register Tracking (`register_file`)
//! - Clock-rotated scratch allocation over GP and vector banks

pub mod config;
pub mod constant;
pub mod element;
pub mod error;
pub mod graph;
pub mod location;
pub mod register_file;
pub mod session;
pub mod stamp;
pub mod test_utils;

pub use config::IntrinsicsConfig;
pub use constant::{ArrayConstant, Constant, ObjectId};
pub use element::{ElementKind, Stride};
pub use error::{IntrinsicError, IntrinsicResult};
pub use graph::{ArithNode, ArithOp, ArrayContents, Graph, NodeId, NodeKind};
pub use location::{KillSet, LocationIdentity, MemoryAccess, MemoryKill};
pub use register_file::{AsmReg, RegAllocError, RegBitSet, RegisterFile};
pub use session::{CompilationSession, SessionStats};
pub use stamp::{FloatStamp, IntegerStamp, RangeAnalysis, Stamp};
