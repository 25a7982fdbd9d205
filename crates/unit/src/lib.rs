//! The loaded-code unit format.
//!
//! A unit is a named set of methods whose bodies are flat instruction lists
//! with absolute jump targets. Units travel as bytes (`GRFT` magic, format
//! version, MessagePack body) and are verified on every decode and encode,
//! so a byte buffer produced by this crate always parses back.

pub mod asm;
pub mod codec;
pub mod edit;
pub mod types;
pub mod verify;

pub use asm::{assemble_snippet, assemble_unit, disassemble, AsmError};
pub use codec::{decode, encode, CodecError};
pub use edit::{splice, EditCount, UnitEditor};
pub use types::*;
pub use verify::{verify, VerifyError};
