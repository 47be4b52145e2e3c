//! zsel — instruction-selection tree evaluator for a z/Architecture JIT.
//!
//! Given a low-level IL tree, zsel produces the structured target-instruction
//! sequence implementing it, choosing among functionally equivalent encodings
//! by operand shape, immediate range, and CPU facility level. The assembler,
//! register allocator, and IL optimizer are external collaborators reached
//! through narrow interfaces.
//!
//! # Primary Usage
//!
//! ```
//! use bumpalo::Bump;
//! use zsel::core::{CodeGenerator, CodegenOptions, CodegenSession, IlBuilder};
//!
//! let arena = Bump::new();
//! let session = CodegenSession::new(&arena);
//! let il = IlBuilder::new(&arena);
//! let mut cg = CodeGenerator::new(&session, CodegenOptions::default());
//!
//! let tree = il.lconst(0x1_0000_0000);
//! let reg = cg.evaluate(tree).unwrap();
//! println!("{} -> {}", reg, cg.listing());
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Shared infrastructure (session, IL, registers, instructions)
//! - [`z`] - The per-opcode evaluator families (constants, immediates,
//!   compare fusion, load/store/cast, control, bulk memory, vector)

pub mod core;
pub mod z;
