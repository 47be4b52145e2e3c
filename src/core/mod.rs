// This module is the hub for the selector's shared infrastructure: the IL seam (nodes,
// opcodes, types, flags), virtual registers and their typed fact table, the structured
// instruction model, condition-code masks and their remapping algebra, memory references
// with predictive addressing heuristics, symbols and relocation classification, the
// compilation-target model with its facility ladder and immediate oracles, the arena-based
// session, the error taxonomy, and the CodeGenerator that ties them together. Everything
// under src/z/ consumes these pieces; nothing here knows about any specific evaluator.

//! Core selection infrastructure shared by every evaluator family.
//!
//! # Key Components
//!
//! ## IL seam (`il`)
//! - Opcode set, data types, node flags
//! - Arena-allocated nodes with reference-counted consumption
//!
//! ## Registers (`register`)
//! - Virtual register handles by kind (GPR, pair, FPR, VRF)
//! - Typed register-fact side table
//!
//! ## Instructions (`insn`)
//! - Structured mnemonic + operand + pinned-dependency values
//! - CC-effect classification per mnemonic
//!
//! ## CodeGenerator (`codegen`)
//! - Recursive `evaluate()` dispatch with per-node register caching
//! - Runtime-checked exactly-once consumption
//! - Labels, literal pool, CC tracking, internal-control-flow regions

pub mod codegen;
pub mod cond;
pub mod error;
pub mod il;
pub mod insn;
pub mod memref;
pub mod register;
pub mod session;
pub mod symbol;
pub mod target;

pub use codegen::{CodeGenerator, Literal};
pub use cond::CondCode;
pub use error::{CodegenError, CodegenResult};
pub use il::{
    ArrayCmpConvention, CmpRel, CopyDirection, DataType, IlBuilder, IlNode, NodeFlags, OpCode,
    TranslateKind, VectorElem,
};
pub use insn::{Insn, LabelId, Mnemonic, Operand};
pub use memref::MemRef;
pub use register::{RegisterKind, VirtReg};
pub use session::CodegenSession;
pub use symbol::{RelocationKind, Symbol, SymbolRef};
pub use target::{ArchLevel, CodegenOptions};
