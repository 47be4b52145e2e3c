// This module defines virtual registers and their fact tracking. A VirtReg is a small Copy
// handle (id + kind) naming a not-yet-assigned storage location; the external allocator
// maps it to a physical register after selection. RegisterFacts is a typed attribute
// record replacing mutable bits on a shared register object: facts are read and written
// through the pool by register id, so a stale handle cannot smuggle flags between
// unrelated evaluators. The pool also tracks the use/stop-using protocol so the external
// allocator can derive last-use positions from the selector's behavior.

//! Virtual registers, register kinds, and the typed fact side table.

use hashbrown::HashMap;

/// Kind of storage a virtual register names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterKind {
    /// General-purpose 64-bit register.
    Gpr,
    /// Adjacent even/odd general-register pair (64-bit divide, 31-bit
    /// targets' 64-bit values).
    GprPair,
    /// Floating-point register.
    Fpr,
    /// 128-bit vector register.
    Vrf,
}

/// A virtual register handle. Cheap to copy; identity is the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtReg {
    pub id: u32,
    pub kind: RegisterKind,
}

impl std::fmt::Display for VirtReg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.kind {
            RegisterKind::Gpr => "gr",
            RegisterKind::GprPair => "gp",
            RegisterKind::Fpr => "fr",
            RegisterKind::Vrf => "vr",
        };
        write!(f, "{prefix}{}", self.id)
    }
}

/// Auxiliary facts attached to a virtual register.
///
/// Facts are monotone hints: setting one never changes generated-code
/// semantics, only enables skipping redundant work (a second sign
/// extension) or informs the external allocator (GC maps).
#[derive(Debug, Clone, Copy, Default)]
pub struct RegisterFacts {
    /// Upper 32 bits are a sign extension of bit 31.
    pub already_sign_extended: bool,
    /// Upper 32 bits are zero.
    pub already_zero_extended: bool,
    /// Holds a collected (GC-visible) object reference.
    pub contains_collected_reference: bool,
    /// Holds an internal pointer; the id of its pinning array register.
    pub internal_pointer_pin: Option<u32>,
    /// Carries a 64-bit value on the 31-bit target (calling convention).
    pub is_64bit_on_32bit_target: bool,
}

/// Issues virtual register ids and owns the fact side table.
#[derive(Debug, Default)]
pub struct RegisterPool {
    next_id: u32,
    facts: HashMap<u32, RegisterFacts>,
    /// Registers the selector has released; the allocator treats the
    /// release point as the last use.
    stopped: Vec<VirtReg>,
}

impl RegisterPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand out a fresh virtual register of the given kind.
    pub fn allocate(&mut self, kind: RegisterKind) -> VirtReg {
        let id = self.next_id;
        self.next_id += 1;
        VirtReg { id, kind }
    }

    /// Mark the selector's last use of a register.
    pub fn stop_using(&mut self, reg: VirtReg) {
        self.stopped.push(reg);
    }

    pub fn facts(&self, reg: VirtReg) -> RegisterFacts {
        self.facts.get(&reg.id).copied().unwrap_or_default()
    }

    pub fn facts_mut(&mut self, reg: VirtReg) -> &mut RegisterFacts {
        self.facts.entry(reg.id).or_default()
    }

    /// Number of registers issued so far.
    pub fn issued(&self) -> u32 {
        self.next_id
    }

    pub fn stopped(&self) -> &[VirtReg] {
        &self.stopped
    }
}
