// This module implements the CodeGenerator: the stateful hub every evaluator works
// through. It owns the emitted instruction stream, the label table, the literal pool, the
// virtual-register pool with its fact side table, and the condition-code tracking state,
// and it drives the recursive evaluate() entry point that dispatches each IL node to its
// evaluator exactly once (later consumers reuse the register cached on the node). The
// exactly-once consumption protocol is enforced here: decrement_ref_count surfaces
// underflow as a hard CodegenError instead of silently corrupting downstream liveness.
// Memory-reference construction from address subtrees also lives here because it consumes
// node links (evaluating bases, folding constant offsets) and must follow the same
// consumption discipline as any evaluator.

//! The CodeGenerator: instruction stream, registers, labels, CC state, and
//! the recursive evaluation entry point.

use log::trace;

use super::cond::CondCode;
use super::error::{il_assert, CodegenError, CodegenResult};
use super::il::{IlNode, OpCode};
use super::insn::{Insn, LabelId, LitId, Mnemonic, Operand, RegDep};
use super::memref::MemRef;
use super::register::{RegisterFacts, RegisterKind, RegisterPool, VirtReg};
use super::session::CodegenSession;
use super::symbol::RelocationKind;
use super::target::{self, CodegenOptions};

/// A literal-pool entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    /// Address constant, possibly carrying a relocation record kind.
    Address {
        value: i64,
        reloc: Option<RelocationKind>,
    },
}

/// What the live condition code currently encodes, if anything useful.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CcOrigin {
    /// CC reflects a test of this register's result value (load-and-test /
    /// logical-operation convention: CC0 zero, CC1 nonzero).
    ResultTest { reg: VirtReg },
}

/// Condition-code bookkeeping: which instruction's CC is still live.
#[derive(Debug, Default)]
struct CcState {
    origin: Option<CcOrigin>,
}

/// The instruction-selection context for one method.
pub struct CodeGenerator<'a> {
    session: &'a CodegenSession<'a>,
    pub options: CodegenOptions,
    regs: RegisterPool,
    insns: Vec<Insn>,
    literals: Vec<Literal>,
    next_label: u32,
    /// Branch-target ids (from IL) resolved to stream labels.
    branch_labels: hashbrown::HashMap<u32, LabelId>,
    cc: CcState,
    /// Depth of open internal-control-flow regions.
    icf_depth: u32,
}

impl<'a> CodeGenerator<'a> {
    pub fn new(session: &'a CodegenSession<'a>, options: CodegenOptions) -> Self {
        Self {
            session,
            options,
            regs: RegisterPool::new(),
            insns: Vec::new(),
            literals: Vec::new(),
            next_label: 0,
            branch_labels: hashbrown::HashMap::new(),
            cc: CcState::default(),
            icf_depth: 0,
        }
    }

    pub fn session(&self) -> &'a CodegenSession<'a> {
        self.session
    }

    // ------------------------------------------------------------------
    // Registers
    // ------------------------------------------------------------------

    pub fn allocate_register(&mut self, kind: RegisterKind) -> VirtReg {
        let reg = self.regs.allocate(kind);
        self.session.record_registers(self.regs.issued());
        reg
    }

    pub fn stop_using(&mut self, reg: VirtReg) {
        self.regs.stop_using(reg);
    }

    pub fn facts(&self, reg: VirtReg) -> RegisterFacts {
        self.regs.facts(reg)
    }

    pub fn facts_mut(&mut self, reg: VirtReg) -> &mut RegisterFacts {
        self.regs.facts_mut(reg)
    }

    /// Register kind appropriate for a node's data type.
    pub fn register_kind_for(&self, node: &IlNode<'_>) -> RegisterKind {
        use super::il::DataType;
        match node.data_type() {
            DataType::Float | DataType::Double => RegisterKind::Fpr,
            DataType::Vector(_) => RegisterKind::Vrf,
            DataType::Int64 if !self.options.is_64bit => RegisterKind::GprPair,
            _ => RegisterKind::Gpr,
        }
    }

    // ------------------------------------------------------------------
    // Evaluation and consumption protocol
    // ------------------------------------------------------------------

    /// Force a node into a register, evaluating it on first use and reusing
    /// the cached register afterwards. Does not consume the node: the
    /// caller still owes one decrement for its link.
    pub fn evaluate(&mut self, node: &'a IlNode<'a>) -> CodegenResult<VirtReg> {
        if let Some(reg) = node.register() {
            trace!("reuse {} for node {} ({:?})", reg, node.id(), node.op());
            return Ok(reg);
        }
        match self.evaluate_statement(node)? {
            Some(reg) => Ok(reg),
            None => Err(CodegenError::internal(
                "evaluate",
                format!("opcode {:?} produced no value", node.op()),
            )),
        }
    }

    /// Evaluate a node that may or may not produce a value (stores,
    /// branches, calls produce none).
    pub fn evaluate_statement(&mut self, node: &'a IlNode<'a>) -> CodegenResult<Option<VirtReg>> {
        if let Some(reg) = node.register() {
            return Ok(Some(reg));
        }
        self.session.record_evaluation(&format!("{:?}", node.op()));
        trace!("evaluate node {} ({:?})", node.id(), node.op());
        let result = crate::z::dispatch_evaluator(node, self)?;
        if let Some(reg) = result {
            node.set_register(reg);
        }
        Ok(result)
    }

    /// Consume one link to `node`. Every evaluator must call this exactly
    /// once per direct child it consumed; underflow is a hard error.
    pub fn decrement_ref_count(&mut self, node: &IlNode<'a>) -> CodegenResult<()> {
        match node.dec_ref_count_raw() {
            Some(remaining) => {
                if remaining == 0 {
                    if let Some(reg) = node.register() {
                        self.regs.stop_using(reg);
                    }
                }
                Ok(())
            }
            None => Err(CodegenError::RefCountUnderflow {
                node_id: node.id(),
                location: "decrement_ref_count",
            }),
        }
    }

    /// Consume a link to a node whose subtree was *not* evaluated (constant
    /// folded away, identity-eliminated). When the node's own count drains
    /// to zero unevaluated, its children's links drain recursively.
    pub fn recursively_decrement(&mut self, node: &IlNode<'a>) -> CodegenResult<()> {
        match node.dec_ref_count_raw() {
            Some(0) => {
                if node.is_unevaluated() {
                    for i in 0..node.child_count() {
                        self.recursively_decrement(node.child(i))?;
                    }
                } else if let Some(reg) = node.register() {
                    self.regs.stop_using(reg);
                }
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(CodegenError::RefCountUnderflow {
                node_id: node.id(),
                location: "recursively_decrement",
            }),
        }
    }

    /// Evaluate a node into a register the caller may freely overwrite.
    ///
    /// Single-use unevaluated nodes give up their own register; shared or
    /// already-evaluated nodes are copied into a fresh one first.
    pub fn clobber_evaluate(&mut self, node: &'a IlNode<'a>) -> CodegenResult<VirtReg> {
        let clobberable = node.is_single_use() && node.is_unevaluated();
        let reg = self.evaluate(node)?;
        if clobberable {
            return Ok(reg);
        }
        let kind = self.register_kind_for(node);
        let copy = self.allocate_register(kind);
        let mv = match kind {
            RegisterKind::Vrf => Mnemonic::Vlr,
            RegisterKind::Fpr => Mnemonic::Ldr,
            _ if node.data_type().is_64bit() => Mnemonic::Lgr,
            _ => Mnemonic::Lr,
        };
        self.gen_rr(mv, copy, reg);
        Ok(copy)
    }

    // ------------------------------------------------------------------
    // Emission
    // ------------------------------------------------------------------

    pub fn emit(&mut self, insn: Insn) -> usize {
        if insn.mnemonic.clobbers_cc() {
            self.cc.origin = None;
        }
        self.session.record_instruction(&insn.mnemonic.to_string());
        trace!("  emit {insn}");
        self.insns.push(insn);
        self.insns.len() - 1
    }

    pub fn gen_rr(&mut self, m: Mnemonic, r1: VirtReg, r2: VirtReg) -> usize {
        self.emit(Insn::new(m, vec![Operand::Reg(r1), Operand::Reg(r2)]))
    }

    pub fn gen_ri(&mut self, m: Mnemonic, r: VirtReg, imm: i64) -> usize {
        self.emit(Insn::new(m, vec![Operand::Reg(r), Operand::Imm(imm)]))
    }

    pub fn gen_ril(&mut self, m: Mnemonic, r: VirtReg, imm: i64) -> usize {
        self.emit(Insn::new(m, vec![Operand::Reg(r), Operand::Imm(imm)]))
    }

    pub fn gen_rx(&mut self, m: Mnemonic, r: VirtReg, mem: MemRef) -> usize {
        self.emit(Insn::new(m, vec![Operand::Reg(r), Operand::Mem(mem)]))
    }

    /// Relative-long or literal-pool register load/store.
    pub fn gen_ril_lit(&mut self, m: Mnemonic, r: VirtReg, lit: LitId) -> usize {
        self.emit(Insn::new(m, vec![Operand::Reg(r), Operand::Lit(lit)]))
    }

    pub fn gen_si(&mut self, m: Mnemonic, mem: MemRef, imm: i64) -> usize {
        self.emit(Insn::new(m, vec![Operand::Mem(mem), Operand::Imm(imm)]))
    }

    pub fn gen_sil(&mut self, m: Mnemonic, mem: MemRef, imm: i64) -> usize {
        self.emit(Insn::new(m, vec![Operand::Mem(mem), Operand::Imm(imm)]))
    }

    /// SS-format with one length field. `len` is the byte count; the
    /// encoded length is `len - 1`.
    pub fn gen_ss(&mut self, m: Mnemonic, len: i64, dst: MemRef, src: MemRef) -> usize {
        debug_assert!((1..=target::MAX_SS_LENGTH).contains(&len));
        self.emit(Insn::new(
            m,
            vec![Operand::Len(len - 1), Operand::Mem(dst), Operand::Mem(src)],
        ))
    }

    /// RS-format shift: `dst` is also the shifted register for 32-bit forms.
    pub fn gen_shift(&mut self, m: Mnemonic, dst: VirtReg, src: VirtReg, amount: i64) -> usize {
        self.emit(Insn::new(
            m,
            vec![Operand::Reg(dst), Operand::Reg(src), Operand::Imm(amount)],
        ))
    }

    /// Fused compare-and-branch (RIE-b register form).
    pub fn gen_cmp_branch_rr(
        &mut self,
        m: Mnemonic,
        r1: VirtReg,
        r2: VirtReg,
        mask: CondCode,
        label: LabelId,
    ) -> usize {
        self.emit(Insn::new(
            m,
            vec![
                Operand::Reg(r1),
                Operand::Reg(r2),
                Operand::Mask(mask.0),
                Operand::Label(label),
            ],
        ))
    }

    /// Fused compare-and-branch (RIE-c immediate form).
    pub fn gen_cmp_branch_ri(
        &mut self,
        m: Mnemonic,
        r1: VirtReg,
        imm: i64,
        mask: CondCode,
        label: LabelId,
    ) -> usize {
        self.emit(Insn::new(
            m,
            vec![
                Operand::Reg(r1),
                Operand::Imm(imm),
                Operand::Mask(mask.0),
                Operand::Label(label),
            ],
        ))
    }

    pub fn gen_branch(&mut self, cond: CondCode, label: LabelId) -> usize {
        self.emit(Insn::new(
            Mnemonic::Brc,
            vec![Operand::Mask(cond.0), Operand::Label(label)],
        ))
    }

    /// Vector instruction with an element-size mask.
    pub fn gen_vrr(&mut self, m: Mnemonic, regs: &[VirtReg], mask: u8) -> usize {
        let mut operands: Vec<Operand> = regs.iter().copied().map(Operand::Reg).collect();
        operands.push(Operand::Mask(mask));
        self.emit(Insn::new(m, operands))
    }

    pub fn gen_vrx(&mut self, m: Mnemonic, v: VirtReg, mem: MemRef, mask: u8) -> usize {
        self.emit(Insn::new(
            m,
            vec![Operand::Reg(v), Operand::Mem(mem), Operand::Mask(mask)],
        ))
    }

    pub fn gen_with_deps(&mut self, insn: Insn, deps: Vec<RegDep>) -> usize {
        self.emit(insn.with_deps(deps))
    }

    // ------------------------------------------------------------------
    // Labels and control-flow regions
    // ------------------------------------------------------------------

    pub fn new_label(&mut self) -> LabelId {
        let id = LabelId(self.next_label);
        self.next_label += 1;
        id
    }

    pub fn place_label(&mut self, label: LabelId) {
        self.emit(Insn::new(Mnemonic::Label, vec![Operand::Label(label)]));
    }

    /// Stream label for an IL branch-target id, created on first use.
    pub fn label_for_target(&mut self, target: u32) -> LabelId {
        if let Some(&label) = self.branch_labels.get(&target) {
            return label;
        }
        let label = LabelId(self.next_label);
        self.next_label += 1;
        self.branch_labels.insert(target, label);
        label
    }

    /// Open a region the external allocator must not move instructions
    /// across (compare-and-swap loops, translate loops).
    pub fn begin_internal_control_flow(&mut self) {
        self.icf_depth += 1;
        self.emit(Insn::new(Mnemonic::InternalCtlFlowBegin, vec![]));
    }

    pub fn end_internal_control_flow(&mut self) -> CodegenResult<()> {
        il_assert!(
            self.icf_depth > 0,
            "end_internal_control_flow",
            "no open region"
        );
        self.icf_depth -= 1;
        self.emit(Insn::new(Mnemonic::InternalCtlFlowEnd, vec![]));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Condition-code bookkeeping
    // ------------------------------------------------------------------

    /// Record that the live CC tests `reg`'s result value. Must be called
    /// immediately after emitting the producing instruction.
    pub fn note_cc_result(&mut self, reg: VirtReg) {
        self.cc.origin = Some(CcOrigin::ResultTest { reg });
    }

    /// Whether the live CC already encodes a zero/nonzero test of `reg`.
    pub fn cc_tests_register(&self, reg: VirtReg) -> bool {
        matches!(self.cc.origin, Some(CcOrigin::ResultTest { reg: r }) if r == reg)
    }

    // ------------------------------------------------------------------
    // Literal pool
    // ------------------------------------------------------------------

    pub fn literal(&mut self, value: Literal) -> LitId {
        if let Some(existing) = self.literals.iter().position(|l| *l == value) {
            return LitId(existing as u32);
        }
        self.literals.push(value);
        LitId((self.literals.len() - 1) as u32)
    }

    pub fn literals(&self) -> &[Literal] {
        &self.literals
    }

    // ------------------------------------------------------------------
    // Memory-reference construction (consumes address links)
    // ------------------------------------------------------------------

    /// Build the addressing operand for a load/store node, consuming its
    /// address child (if any). The symbol's own offset folds into the
    /// displacement.
    pub fn memref_for(&mut self, node: &'a IlNode<'a>) -> CodegenResult<MemRef> {
        let sym_offset = node.symbol().map(|s| s.offset).unwrap_or(0);
        if node.child_count() == 0 || node.op().is_store() && node.child_count() == 1 {
            let sym = node.symbol().cloned().ok_or_else(|| {
                CodegenError::internal("memref_for", "no address child and no symbol")
            })?;
            return Ok(MemRef::symbolic(sym));
        }
        let addr = node.first_child();
        let mut mr = self.memref_for_address(addr)?;
        self.decrement_ref_count(addr)?;
        mr.disp += sym_offset;
        Ok(mr)
    }

    /// Build an addressing operand from an address subtree. Folds
    /// `base + const` into a displacement and `base + index` into an index
    /// register; anything else evaluates to a plain base.
    fn memref_for_address(&mut self, addr: &'a IlNode<'a>) -> CodegenResult<MemRef> {
        if addr.register().is_some() || !addr.is_single_use() {
            let base = self.evaluate(addr)?;
            return Ok(MemRef::based(base, 0));
        }
        match addr.op() {
            OpCode::IAdd | OpCode::LAdd => {
                let left = addr.first_child();
                let right = addr.second_child();
                if let Some(offset) = right.int_value() {
                    if target::fits_i20(offset) {
                        let base = self.evaluate(left)?;
                        self.decrement_ref_count(left)?;
                        self.recursively_decrement(right)?;
                        // Mark the add itself evaluated-by-folding: its
                        // register is the base; nothing else may reuse it.
                        return Ok(MemRef::based(base, offset));
                    }
                }
                let base = self.evaluate(left)?;
                let index = self.evaluate(right)?;
                self.decrement_ref_count(left)?;
                self.decrement_ref_count(right)?;
                Ok(MemRef::based(base, 0).with_index(index))
            }
            _ => {
                let base = self.evaluate(addr)?;
                Ok(MemRef::based(base, 0))
            }
        }
    }

    // ------------------------------------------------------------------
    // Results
    // ------------------------------------------------------------------

    pub fn insns(&self) -> &[Insn] {
        &self.insns
    }

    pub fn mnemonics(&self) -> Vec<Mnemonic> {
        self.insns.iter().map(|i| i.mnemonic).collect()
    }

    /// Render the stream as assembly-like text (iseldump).
    pub fn listing(&self) -> String {
        let mut out = String::new();
        for insn in &self.insns {
            if insn.mnemonic == Mnemonic::Label {
                out.push_str(&format!("{insn}:\n"));
            } else {
                out.push_str(&format!("    {insn}\n"));
            }
        }
        out
    }
}
