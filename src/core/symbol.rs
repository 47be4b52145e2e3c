// This module models the symbol/relocation seam. Symbols classify the storage a load or
// store names (static data, auto/stack slot, shadow field behind an object pointer, method
// entry, runtime-meta cells); SymbolRef adds resolution state and the per-reference
// relocation tags the AOT path needs. The relocation-kind selection for literal-pool loads
// is a strict priority order over the tags present on the reference; it is platform
// knowledge reproduced verbatim (debug counter > recompile-count global > body-info address
// > static-data address > block-frequency > recompile-queued flag > catch-block counter >
// enter/exit hook address > none) and the constant materializer consumes it as-is.

//! Symbols, symbol references, and relocation-kind classification.

/// Storage classification of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Statically allocated data (globals, runtime cells).
    Static,
    /// Stack-allocated local addressed off the frame.
    Auto,
    /// Field behind an object/base pointer (indirect accesses).
    Shadow,
    /// Method entry point.
    Method,
}

/// Relocation record kinds a literal-pool address load may need, one per
/// runtime-meta cell the AOT loader knows how to patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelocationKind {
    DebugCounter,
    RecompCountGlobal,
    BodyInfoAddress,
    StaticDataAddress,
    BlockFrequency,
    RecompQueuedFlag,
    CatchBlockCounter,
    EnterExitHookAddress,
}

/// A symbol as classified by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    pub name: &'static str,
    pub kind: SymbolKind,
    /// Size in bytes of the referenced storage.
    pub size: i64,
    /// Known alignment of the symbol's address, in bytes (0 = unknown).
    pub alignment: i64,
}

impl Symbol {
    pub fn static_data(name: &'static str, size: i64) -> Self {
        Self {
            name,
            kind: SymbolKind::Static,
            size,
            alignment: size,
        }
    }

    pub fn auto(name: &'static str, size: i64) -> Self {
        Self {
            name,
            kind: SymbolKind::Auto,
            size,
            alignment: size,
        }
    }

    pub fn shadow(name: &'static str, size: i64) -> Self {
        Self {
            name,
            kind: SymbolKind::Shadow,
            size,
            alignment: size,
        }
    }

    pub fn method(name: &'static str) -> Self {
        Self {
            name,
            kind: SymbolKind::Method,
            size: 8,
            alignment: 8,
        }
    }
}

/// One reference to a symbol, with resolution state and relocation tags.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolRef {
    pub symbol: Symbol,
    /// Whether the address is known at compile time.
    pub resolved: bool,
    /// Reference goes through an indirection cell rather than the symbol
    /// address itself.
    pub indirect: bool,
    /// Byte offset applied on top of the symbol address.
    pub offset: i64,
    /// Runtime-meta tags present on this reference, unordered. The
    /// materializer picks the highest-priority one.
    pub reloc_tags: Vec<RelocationKind>,
}

impl SymbolRef {
    pub fn resolved(symbol: Symbol) -> Self {
        Self {
            symbol,
            resolved: true,
            indirect: false,
            offset: 0,
            reloc_tags: Vec::new(),
        }
    }

    pub fn unresolved(symbol: Symbol) -> Self {
        Self {
            resolved: false,
            ..Self::resolved(symbol)
        }
    }

    pub fn with_offset(mut self, offset: i64) -> Self {
        self.offset = offset;
        self
    }

    pub fn with_reloc(mut self, kind: RelocationKind) -> Self {
        self.reloc_tags.push(kind);
        self
    }

    pub fn with_indirect(mut self) -> Self {
        self.indirect = true;
        self
    }

    /// Whether a load of this reference needs a relocation record under an
    /// AOT compilation.
    pub fn needs_relocation(&self) -> bool {
        !self.reloc_tags.is_empty() || !self.resolved
    }

    /// Select the relocation kind by the fixed priority order. Returns None
    /// when the reference carries no runtime-meta tags.
    pub fn relocation_kind(&self) -> Option<RelocationKind> {
        // Priority order is load-bearing: a reference can carry several
        // tags and the loader patches only the one recorded.
        const PRIORITY: [RelocationKind; 8] = [
            RelocationKind::DebugCounter,
            RelocationKind::RecompCountGlobal,
            RelocationKind::BodyInfoAddress,
            RelocationKind::StaticDataAddress,
            RelocationKind::BlockFrequency,
            RelocationKind::RecompQueuedFlag,
            RelocationKind::CatchBlockCounter,
            RelocationKind::EnterExitHookAddress,
        ];
        PRIORITY
            .iter()
            .copied()
            .find(|kind| self.reloc_tags.contains(kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relocation_priority() {
        let sym = SymbolRef::resolved(Symbol::static_data("counter", 8))
            .with_reloc(RelocationKind::BlockFrequency)
            .with_reloc(RelocationKind::RecompCountGlobal)
            .with_reloc(RelocationKind::EnterExitHookAddress);
        assert_eq!(
            sym.relocation_kind(),
            Some(RelocationKind::RecompCountGlobal)
        );
    }

    #[test]
    fn test_no_tags_no_relocation_kind() {
        let sym = SymbolRef::resolved(Symbol::static_data("plain", 4));
        assert_eq!(sym.relocation_kind(), None);
        assert!(!sym.needs_relocation());
        assert!(SymbolRef::unresolved(Symbol::static_data("x", 4)).needs_relocation());
    }
}
