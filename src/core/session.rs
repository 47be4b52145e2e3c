// This module provides arena-based session management for one method's instruction
// selection, following the same shape as an arena compilation session: the session borrows
// the bumpalo arena that owns every IL node, and collects selection statistics with a
// unified lifetime. Statistics are deliberately cheap (counters keyed by opcode name and
// mnemonic) and exist for the iseldump tool and tests; nothing in selection correctness
// reads them back.

//! Arena-backed selection session and statistics.

use std::cell::RefCell;

use bumpalo::Bump;
use hashbrown::HashMap;

/// Selection statistics gathered during evaluation.
#[derive(Debug, Default, Clone)]
pub struct SessionStats {
    /// Evaluator invocations keyed by opcode name.
    pub evaluations: HashMap<String, usize>,
    /// Emitted instructions keyed by mnemonic name.
    pub instructions: HashMap<String, usize>,
    /// Total virtual registers issued.
    pub registers_issued: u32,
}

impl SessionStats {
    pub fn total_instructions(&self) -> usize {
        self.instructions.values().sum()
    }

    pub fn total_evaluations(&self) -> usize {
        self.evaluations.values().sum()
    }
}

/// One method's selection session: arena plus statistics.
pub struct CodegenSession<'arena> {
    arena: &'arena Bump,
    stats: RefCell<SessionStats>,
}

impl<'arena> CodegenSession<'arena> {
    pub fn new(arena: &'arena Bump) -> Self {
        Self {
            arena,
            stats: RefCell::new(SessionStats::default()),
        }
    }

    pub fn arena(&self) -> &'arena Bump {
        self.arena
    }

    pub fn record_evaluation(&self, opcode: &str) {
        *self
            .stats
            .borrow_mut()
            .evaluations
            .entry(opcode.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_instruction(&self, mnemonic: &str) {
        *self
            .stats
            .borrow_mut()
            .instructions
            .entry(mnemonic.to_string())
            .or_insert(0) += 1;
    }

    pub fn record_registers(&self, issued: u32) {
        self.stats.borrow_mut().registers_issued = issued;
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_accumulate() {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        session.record_evaluation("IAdd");
        session.record_evaluation("IAdd");
        session.record_instruction("AR");
        let stats = session.stats();
        assert_eq!(stats.evaluations["IAdd"], 2);
        assert_eq!(stats.total_instructions(), 1);
    }
}
