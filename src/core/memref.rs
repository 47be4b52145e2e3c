// This module defines the addressing-mode operand: base register + optional index register
// + displacement (+ optional symbol), plus the pure predictive heuristics the comparison
// and store evaluators consult before committing to an SI/SIL/SS-format instruction. The
// heuristics inspect the address subtree without evaluating anything: they answer whether
// building the reference is LIKELY to require an index register or a displacement beyond
// the unsigned 12-bit field. Instructions that cannot encode those would force a fallback
// after the fact, wasting the attempt, so predicted-illegal shapes are rejected up front.
// Rejection must have no side effects; these functions never touch reference counts.

//! Memory-reference operands and predictive addressing heuristics.

use super::il::{IlNode, OpCode};
use super::register::VirtReg;
use super::symbol::SymbolRef;
use super::target;

/// A base + index + displacement (+ symbol) addressing-mode operand.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MemRef {
    pub base: Option<VirtReg>,
    pub index: Option<VirtReg>,
    pub disp: i64,
    pub symbol: Option<SymbolRef>,
}

impl MemRef {
    /// Reference through an evaluated base register.
    pub fn based(base: VirtReg, disp: i64) -> Self {
        Self {
            base: Some(base),
            disp,
            ..Self::default()
        }
    }

    /// Reference naming a symbol directly (frame/static addressing handled
    /// by the external emitter).
    pub fn symbolic(symbol: SymbolRef) -> Self {
        let disp = symbol.offset;
        Self {
            symbol: Some(symbol),
            disp,
            ..Self::default()
        }
    }

    pub fn with_index(mut self, index: VirtReg) -> Self {
        self.index = Some(index);
        self
    }

    /// The same reference displaced by `offset` bytes.
    pub fn displaced(&self, offset: i64) -> Self {
        let mut copy = self.clone();
        copy.disp += offset;
        copy
    }

    pub fn set_offset(&mut self, disp: i64) {
        self.disp = disp;
    }

    /// Whether the displacement fits the short unsigned 12-bit field.
    pub fn fits_short_displacement(&self) -> bool {
        target::fits_u12(self.disp)
    }
}

impl std::fmt::Display for MemRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(sym) = &self.symbol {
            write!(f, "{}", sym.symbol.name)?;
            if self.disp != 0 {
                write!(f, "+{}", self.disp)?;
            }
            return Ok(());
        }
        write!(f, "{}(", self.disp)?;
        if let Some(index) = self.index {
            write!(f, "{index},")?;
        }
        match self.base {
            Some(base) => write!(f, "{base})"),
            None => write!(f, ")"),
        }
    }
}

/// The address subtree of a load or store node, if it has one. Direct
/// (symbol-addressed) accesses have none.
fn address_child<'a>(node: &'a IlNode<'a>) -> Option<&'a IlNode<'a>> {
    if node.op().is_store() {
        if node.child_count() == 2 {
            return Some(node.first_child());
        }
        return None;
    }
    if node.child_count() == 1 {
        return Some(node.first_child());
    }
    None
}

/// Predict whether building a memory reference for this load/store node
/// would need an index register. Pure; never evaluates or consumes
/// anything.
///
/// The shapes that stay index-free: a direct symbol reference, and an
/// address subtree of the form `reg`, `reg + const`, or an address
/// constant. Two non-constant address children force base+index.
pub fn might_need_index_register(node: &IlNode<'_>) -> bool {
    let addr = match address_child(node) {
        Some(addr) => addr,
        // Direct symbol addressing.
        None => return false,
    };
    match addr.op() {
        OpCode::IAdd | OpCode::LAdd => {
            !(addr.second_child().is_int_const() || addr.first_child().is_int_const())
        }
        _ => false,
    }
}

/// Predict whether the reference's displacement would exceed the unsigned
/// 12-bit field of SI/SS-format instructions. Pure.
pub fn might_need_large_displacement(node: &IlNode<'_>) -> bool {
    let sym_offset = node.symbol().map(|s| s.offset).unwrap_or(0);
    let const_disp = match address_child(node) {
        None => Some(sym_offset),
        Some(addr) => match addr.op() {
            OpCode::IAdd | OpCode::LAdd => addr
                .second_child()
                .int_value()
                .or_else(|| addr.first_child().int_value())
                .map(|disp| disp + sym_offset),
            _ => Some(sym_offset),
        },
    };
    match const_disp {
        Some(disp) => !target::fits_u12(disp),
        // Unknown shape: assume the worst.
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::il::{DataType, IlBuilder};
    use crate::core::symbol::Symbol;
    use bumpalo::Bump;

    #[test]
    fn test_direct_symbol_is_cheap() {
        let arena = Bump::new();
        let il = IlBuilder::new(&arena);
        let sym = SymbolRef::resolved(Symbol::static_data("field", 4));
        let load = il.load(OpCode::ILoad, DataType::Int32, sym);
        assert!(!might_need_index_register(load));
        assert!(!might_need_large_displacement(load));
    }

    #[test]
    fn test_reg_plus_reg_needs_index() {
        let arena = Bump::new();
        let il = IlBuilder::new(&arena);
        let shadow = SymbolRef::resolved(Symbol::shadow("elem", 4));
        let base = il.load(OpCode::ALoad, DataType::Address, SymbolRef::resolved(Symbol::auto("p", 8)));
        let idx = il.load(OpCode::LLoad, DataType::Int64, SymbolRef::resolved(Symbol::auto("i", 8)));
        let addr = il.node(OpCode::LAdd, DataType::Address, &[base, idx]);
        let load = il.loadi(OpCode::ILoad, DataType::Int32, addr, shadow);
        assert!(might_need_index_register(load));
    }

    #[test]
    fn test_large_offset_predicted() {
        let arena = Bump::new();
        let il = IlBuilder::new(&arena);
        let shadow = SymbolRef::resolved(Symbol::shadow("far", 4));
        let base = il.load(OpCode::ALoad, DataType::Address, SymbolRef::resolved(Symbol::auto("p", 8)));
        let addr = il.node(OpCode::LAdd, DataType::Address, &[base, il.lconst(0x2000)]);
        let load = il.loadi(OpCode::ILoad, DataType::Int32, addr, shadow);
        assert!(!might_need_index_register(load));
        assert!(might_need_large_displacement(load));
    }

    #[test]
    fn test_displacement_mutation() {
        let m = MemRef::symbolic(SymbolRef::resolved(Symbol::static_data("buf", 512)));
        let shifted = m.displaced(256);
        assert_eq!(shifted.disp, 256);
        assert_eq!(m.disp, 0);
    }
}
