//! x86-64 architecture-specific components.
//!
//! - Instruction encoding using iced-x86
//! - System V lowering backend
//! - ELF object output with stub relocations

pub mod backend;
pub mod elf;
pub mod encoder;

pub use backend::{EmittedFunction, StubRelocation, X64Backend, X64Value};
pub use elf::write_object;
pub use encoder::{EncodingError, X64Encoder};
