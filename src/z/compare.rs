// This module implements the comparison and branch fusion engine, the central decision
// machine of the selector. A compare-like node (optionally paired with its consuming
// branch) walks a fixed sequence of states, first match wins: float dispatch; the
// constant-operand path (memory-compare-immediate SIL forms, load-and-test against zero,
// register-immediate compare or fused compare-immediate-and-branch); the CLC memory-memory
// path; the mixed-width register-memory compare; fused compare-register-and-branch; the
// test-under-mask idioms; and the generic register compare with commutative operand-swap
// analysis. Every state's legality check is purely predictive: rejecting a state never
// touches reference counts or evaluates anything, so the next state sees the tree
// untouched. Whenever an idiom changes which condition codes encode the outcome, the
// branch mask is remapped (operand swap, TM translation, logical-CC reuse). Aggregate
// operand types are a fatal internal assertion, not a fallback.

//! The comparison & branch fusion engine.

use log::trace;

use crate::core::codegen::CodeGenerator;
use crate::core::cond::{address_compare_mask, CondCode};
use crate::core::error::{il_assert, CodegenError, CodegenResult};
use crate::core::il::{CmpRel, DataType, IlNode, OpCode};
use crate::core::insn::{Insn, LabelId, Mnemonic, Operand};
use crate::core::memref;
use crate::core::register::{RegisterKind, VirtReg};
use crate::core::target::{self, ArchLevel};

use super::constants;
use super::control;

/// What the engine did with a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOutcome {
    /// A fused compare-and-branch was emitted; the branch is done.
    Branched,
    /// The condition code is set; branch or materialize on this mask.
    CcSet(CondCode),
}

/// Normalized view of a compare node while the engine runs.
struct CompareState<'a> {
    rel: CmpRel,
    unsigned: bool,
    dtype: DataType,
    left: &'a IlNode<'a>,
    right: &'a IlNode<'a>,
}

impl<'a> CompareState<'a> {
    fn from_node(node: &'a IlNode<'a>) -> CodegenResult<Self> {
        let rel = node.op().compare_relation().ok_or_else(|| {
            CodegenError::internal("compare", format!("not a compare: {:?}", node.op()))
        })?;
        let dtype = node.op().compare_operand_type().ok_or_else(|| {
            CodegenError::internal("compare", format!("untyped compare: {:?}", node.op()))
        })?;
        il_assert!(
            node.child_count() == 2,
            "compare",
            "compare node with {} children",
            node.child_count()
        );
        let mut state = Self {
            rel,
            unsigned: node.op().is_unsigned_compare(),
            dtype,
            left: node.first_child(),
            right: node.second_child(),
        };
        // Canonicalize a constant into the right operand. The relation
        // swaps with the operands.
        if state.left.is_int_const() && !state.right.is_int_const() {
            std::mem::swap(&mut state.left, &mut state.right);
            state.rel = state.rel.swapped();
        }
        Ok(state)
    }

    fn width64(&self) -> bool {
        self.dtype.is_64bit()
    }

    /// The forward branch mask for the (possibly swapped) relation.
    fn mask(&self) -> CondCode {
        if self.dtype == DataType::Address {
            address_compare_mask(self.rel)
        } else {
            CondCode::for_relation(self.rel)
        }
    }
}

/// Evaluator for the fused compare-and-branch statements.
pub fn evaluate_if_compare<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    // Branch-on-count fusion replaces the whole compare when the canonical
    // counted-loop idiom matches.
    if control::try_branch_on_count(node, cg)? {
        return Ok(None);
    }
    let target = node.branch_target().ok_or_else(|| {
        CodegenError::internal("evaluate_if_compare", "if-compare without branch target")
    })?;
    let label = cg.label_for_target(target);
    let branch_to_cold = node.flags.branch_to_cold;
    match generate_compare(node, cg, Some(label), branch_to_cold)? {
        CompareOutcome::Branched => {}
        CompareOutcome::CcSet(mask) => {
            cg.gen_branch(mask, label);
        }
    }
    Ok(None)
}

/// Evaluator for the value-producing compares: materialize 0/1.
pub fn evaluate_compare_value<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let outcome = generate_compare(node, cg, None, false)?;
    let mask = match outcome {
        CompareOutcome::CcSet(mask) => mask,
        CompareOutcome::Branched => {
            return Err(CodegenError::internal(
                "evaluate_compare_value",
                "fused branch emitted without a branch consumer",
            ))
        }
    };
    let result = cg.allocate_register(RegisterKind::Gpr);
    if cg.options.arch.is_at_least(ArchLevel::Z13) {
        // Immediate-on-condition keeps the sequence branchless.
        cg.gen_ri(Mnemonic::Lhi, result, 0);
        cg.emit(Insn::new(
            Mnemonic::Lochi,
            vec![Operand::Reg(result), Operand::Imm(1), Operand::Mask(mask.0)],
        ));
    } else {
        let done = cg.new_label();
        cg.begin_internal_control_flow();
        cg.gen_ri(Mnemonic::Lhi, result, 1);
        cg.gen_branch(mask, done);
        cg.gen_ri(Mnemonic::Lhi, result, 0);
        cg.place_label(done);
        cg.end_internal_control_flow()?;
    }
    Ok(Some(result))
}

/// The state machine. `branch` carries the destination when a consuming
/// branch exists; `branch_to_cold` suppresses fused forms whose relative
/// offset may not reach the cold region.
pub fn generate_compare<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
    branch: Option<LabelId>,
    branch_to_cold: bool,
) -> CodegenResult<CompareOutcome> {
    let state = CompareState::from_node(node)?;

    il_assert!(
        !matches!(state.dtype, DataType::Vector(_)),
        "generate_compare",
        "vector compares route through the vector evaluator"
    );

    // State 1: floating point delegates entirely.
    if state.dtype.is_floating_point() {
        return generate_float_compare(cg, &state);
    }

    // State 2: a compile-time-constant operand.
    if let Some(value) = state.right.int_value() {
        if state.right.is_unevaluated() {
            if let Some(outcome) = try_memory_compare_immediate(cg, &state, value)? {
                return Ok(outcome);
            }
            if let Some(outcome) = try_load_and_test(cg, &state, value)? {
                return Ok(outcome);
            }
            // Test-under-mask beats a register compare when the left
            // subtree is the masking idiom.
            if let Some(outcome) = try_test_under_mask(cg, &state, value)? {
                return Ok(outcome);
            }
            return register_immediate_compare(cg, &state, value, branch, branch_to_cold);
        }
    }

    // State 3: memory-memory compare.
    if let Some(outcome) = try_memory_memory_compare(cg, &state)? {
        return Ok(outcome);
    }

    // State 4: mixed-width register-memory compare.
    if let Some(outcome) = try_mixed_width_compare(cg, &state)? {
        return Ok(outcome);
    }

    // State 5: fused compare-register-and-branch.
    if let Some(label) = branch {
        if cg.options.arch.is_at_least(ArchLevel::Z10) && !branch_to_cold {
            let left = cg.evaluate(state.left)?;
            let right = cg.evaluate(state.right)?;
            let mnemonic = match (state.unsigned, state.width64()) {
                (false, false) => Mnemonic::Crj,
                (false, true) => Mnemonic::Cgrj,
                (true, false) => Mnemonic::Clrj,
                (true, true) => Mnemonic::Clgrj,
            };
            cg.gen_cmp_branch_rr(mnemonic, left, right, state.mask(), label);
            cg.decrement_ref_count(state.left)?;
            cg.decrement_ref_count(state.right)?;
            return Ok(CompareOutcome::Branched);
        }
    }

    // State 7: generic register compare with operand-swap analysis.
    generic_register_compare(cg, &state)
}

// ----------------------------------------------------------------------
// State 1: floating point
// ----------------------------------------------------------------------

fn generate_float_compare<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
) -> CodegenResult<CompareOutcome> {
    let left = cg.evaluate(state.left)?;
    let right = cg.evaluate(state.right)?;
    let mnemonic = if state.dtype == DataType::Float {
        Mnemonic::Cebr
    } else {
        Mnemonic::Cdbr
    };
    cg.gen_rr(mnemonic, left, right);
    cg.decrement_ref_count(state.left)?;
    cg.decrement_ref_count(state.right)?;
    // Unordered (NaN) sets CC3: only inequality may take it.
    let mut mask = state.mask();
    if state.rel == CmpRel::Ne {
        mask = CondCode(mask.0 | CondCode::OVERFLOW.0);
    }
    Ok(CompareOutcome::CcSet(mask))
}

// ----------------------------------------------------------------------
// State 2a: memory-compare-immediate (SIL forms)
// ----------------------------------------------------------------------

fn try_memory_compare_immediate<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
    value: i64,
) -> CodegenResult<Option<CompareOutcome>> {
    if !cg.options.arch.is_at_least(ArchLevel::Z10) {
        return Ok(None);
    }
    let mem = state.left;
    if !mem.is_foldable_memory_operand() || mem.flags.byte_reversed {
        return Ok(None);
    }
    // A signed word/doubleword compare against zero belongs to the
    // load-and-test state: one instruction both loads and tests, and the
    // value stays available in a register.
    if value == 0 && !state.unsigned && matches!(mem.data_type().size(), 4 | 8) {
        return Ok(None);
    }
    // Predictive addressing legality: SIL has no index and a short
    // displacement; a reference that would need either forces a fallback
    // after the fact, so reject up front.
    if memref::might_need_index_register(mem) || memref::might_need_large_displacement(mem) {
        return Ok(None);
    }
    let size = mem.data_type().size();
    // Byte compares only exist unsigned (CLI); equality is sign-agnostic,
    // so it qualifies under either opcode flavor.
    let byte_legal = state.unsigned || state.rel.is_equality();
    let mnemonic = match (size, state.unsigned) {
        (1, _) if byte_legal => {
            if !target::fits_u8(value) {
                return Ok(None);
            }
            let mr = cg.memref_for(mem)?;
            cg.gen_si(Mnemonic::Cli, mr, value);
            cg.decrement_ref_count(mem)?;
            cg.recursively_decrement(state.right)?;
            return Ok(Some(CompareOutcome::CcSet(state.mask())));
        }
        (2, false) => Mnemonic::Chhsi,
        (2, true) => Mnemonic::Clhhsi,
        (4, false) => Mnemonic::Chsi,
        (4, true) => Mnemonic::Clfhsi,
        (8, false) => Mnemonic::Cghsi,
        (8, true) => Mnemonic::Clghsi,
        _ => return Ok(None),
    };
    let fits = if state.unsigned {
        target::fits_u16(value)
    } else {
        target::fits_i16(value)
    };
    if !fits {
        return Ok(None);
    }
    trace!("memory-compare-immediate {mnemonic:?} vs {value}");
    let mr = cg.memref_for(mem)?;
    cg.gen_sil(mnemonic, mr, value);
    cg.decrement_ref_count(mem)?;
    cg.recursively_decrement(state.right)?;
    Ok(Some(CompareOutcome::CcSet(state.mask())))
}

// ----------------------------------------------------------------------
// State 2b: load-and-test against zero
// ----------------------------------------------------------------------

fn try_load_and_test<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
    value: i64,
) -> CodegenResult<Option<CompareOutcome>> {
    if value != 0 {
        return Ok(None);
    }
    // Unsigned order relations against zero are degenerate; only the
    // signed view of the condition codes is meaningful after a test.
    if state.unsigned && !state.rel.is_equality() {
        return Ok(None);
    }

    // CC-reuse: a live condition code already testing this value's
    // register resolves equality compares with no instruction at all.
    if let Some(reg) = state.left.register() {
        if cg.cc_tests_register(reg) {
            if let Some(mask) = CondCode::logical_result(state.rel) {
                trace!("compare vs zero resolved by live CC on {reg}");
                cg.decrement_ref_count(state.left)?;
                cg.recursively_decrement(state.right)?;
                return Ok(Some(CompareOutcome::CcSet(mask)));
            }
        }
    }

    let mem = state.left;
    if mem.is_foldable_memory_operand()
        && !mem.flags.byte_reversed
        && matches!(mem.data_type().size(), 4 | 8)
        && !state.unsigned
    {
        // One instruction both loads and tests.
        let mnemonic = if mem.data_type().size() == 8 {
            Mnemonic::Ltg
        } else if mem.flags.needs_64bit_promotion {
            // The loaded value must also be valid at 64 bits: the
            // sign-extending load-and-test covers both.
            Mnemonic::Ltgf
        } else {
            Mnemonic::Lt
        };
        let mr = cg.memref_for(mem)?;
        let reg = cg.allocate_register(RegisterKind::Gpr);
        cg.gen_rx(mnemonic, reg, mr);
        if mnemonic == Mnemonic::Ltgf {
            cg.facts_mut(reg).already_sign_extended = true;
        }
        mem.set_register(reg);
        cg.decrement_ref_count(mem)?;
        cg.recursively_decrement(state.right)?;
        return Ok(Some(CompareOutcome::CcSet(state.mask())));
    }

    // Evaluated operand: a register test beats a compare-immediate.
    if !mem.is_unevaluated() || mem.flags.load_and_test {
        let reg = cg.evaluate(mem)?;
        let mnemonic = if state.width64() { Mnemonic::Ltgr } else { Mnemonic::Ltr };
        cg.gen_rr(mnemonic, reg, reg);
        cg.decrement_ref_count(mem)?;
        cg.recursively_decrement(state.right)?;
        return Ok(Some(CompareOutcome::CcSet(state.mask())));
    }
    Ok(None)
}

// ----------------------------------------------------------------------
// State 2c: register-immediate compare (+ fused immediate branch)
// ----------------------------------------------------------------------

fn register_immediate_compare<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
    value: i64,
    branch: Option<LabelId>,
    branch_to_cold: bool,
) -> CodegenResult<CompareOutcome> {
    let reg = cg.evaluate(state.left)?;

    // Fused compare-immediate-and-branch: 8-bit immediate fast path.
    if let Some(label) = branch {
        if cg.options.arch.is_at_least(ArchLevel::Z10) && !branch_to_cold {
            let fits = if state.unsigned {
                target::fits_u8(value)
            } else {
                target::fits_i8(value)
            };
            if fits {
                let mnemonic = match (state.unsigned, state.width64()) {
                    (false, false) => Mnemonic::Cij,
                    (false, true) => Mnemonic::Cgij,
                    (true, false) => Mnemonic::Clij,
                    (true, true) => Mnemonic::Clgij,
                };
                cg.gen_cmp_branch_ri(mnemonic, reg, value, state.mask(), label);
                cg.decrement_ref_count(state.left)?;
                cg.recursively_decrement(state.right)?;
                return Ok(CompareOutcome::Branched);
            }
        }
    }

    let emitted = if state.unsigned {
        if target::fits_u32(value) {
            let mnemonic = if state.width64() { Mnemonic::Clgfi } else { Mnemonic::Clfi };
            cg.gen_ril(mnemonic, reg, value);
            true
        } else {
            false
        }
    } else if target::fits_i16(value) {
        let mnemonic = if state.width64() { Mnemonic::Cghi } else { Mnemonic::Chi };
        cg.gen_ri(mnemonic, reg, value);
        true
    } else if target::fits_i32(value) {
        let mnemonic = if state.width64() { Mnemonic::Cgfi } else { Mnemonic::Cfi };
        cg.gen_ril(mnemonic, reg, value);
        true
    } else {
        false
    };
    if !emitted {
        // Out-of-range immediate: materialize and compare registers.
        let rhs = constants::load_int64_constant(cg, value);
        let mnemonic = match (state.unsigned, state.width64()) {
            (false, false) => Mnemonic::Cr,
            (false, true) => Mnemonic::Cgr,
            (true, false) => Mnemonic::Clr,
            (true, true) => Mnemonic::Clgr,
        };
        cg.gen_rr(mnemonic, reg, rhs);
        cg.stop_using(rhs);
    }
    cg.decrement_ref_count(state.left)?;
    cg.recursively_decrement(state.right)?;
    Ok(CompareOutcome::CcSet(state.mask()))
}

// ----------------------------------------------------------------------
// State 3: memory-memory compare (CLC)
// ----------------------------------------------------------------------

fn try_memory_memory_compare<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
) -> CodegenResult<Option<CompareOutcome>> {
    // CLC compares storage as unsigned bytes: legal for equality always,
    // and for order only under the unsigned interpretation.
    if !state.rel.is_equality() && !state.unsigned {
        return Ok(None);
    }
    let (left, right) = (state.left, state.right);
    if !left.is_foldable_memory_operand() || !right.is_foldable_memory_operand() {
        return Ok(None);
    }
    if left.flags.byte_reversed || right.flags.byte_reversed {
        return Ok(None);
    }
    let size = left.data_type().size();
    if right.data_type().size() != size {
        return Ok(None);
    }
    if !matches!(size, 1 | 2 | 4 | 8) {
        return Ok(None);
    }
    // VFT-pointer compares under compressed references: the masked slot
    // and the raw 4-byte field disagree, and at exactly word size a plain
    // compare beats CLC anyway. Excluded entirely.
    if size == 4 && (left.flags.is_vft_load || right.flags.is_vft_load) {
        return Ok(None);
    }
    if memref::might_need_index_register(left)
        || memref::might_need_index_register(right)
        || memref::might_need_large_displacement(left)
        || memref::might_need_large_displacement(right)
    {
        return Ok(None);
    }
    trace!("memory-memory compare: CLC {size} bytes");
    let left_mr = cg.memref_for(left)?;
    let right_mr = cg.memref_for(right)?;
    cg.gen_ss(Mnemonic::Clc, size, left_mr, right_mr);
    cg.decrement_ref_count(left)?;
    cg.decrement_ref_count(right)?;
    Ok(Some(CompareOutcome::CcSet(state.mask())))
}

// ----------------------------------------------------------------------
// State 4: mixed-width register-memory compare
// ----------------------------------------------------------------------

/// Widening-conversion parameters mirrored from the cast family.
fn conversion_of_load(node: &IlNode<'_>) -> Option<(u8, bool)> {
    let (bits, signed) = match node.op() {
        OpCode::S2I | OpCode::S2L => (16, true),
        OpCode::Su2I | OpCode::Su2L => (16, false),
        OpCode::I2L => (32, true),
        OpCode::Iu2L => (32, false),
        _ => return None,
    };
    Some((bits, signed))
}

fn try_mixed_width_compare<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
) -> CodegenResult<Option<CompareOutcome>> {
    // Identify which side is conversion-of-a-foldable-load.
    let pick = |node: &'a IlNode<'a>| -> Option<(u8, bool, &'a IlNode<'a>)> {
        let (bits, signed) = conversion_of_load(node)?;
        if !node.is_single_use() || !node.is_unevaluated() {
            return None;
        }
        let load = node.first_child();
        if !load.is_foldable_memory_operand() || load.flags.byte_reversed {
            return None;
        }
        Some((bits, signed, load))
    };

    let (conv_side_left, conv) = if let Some(c) = pick(state.left) {
        (true, c)
    } else if let Some(c) = pick(state.right) {
        (false, c)
    } else {
        return Ok(None);
    };
    let (bits, signed, load) = conv;
    let other = if conv_side_left { state.right } else { state.left };

    // Signedness-polarity compatibility, with one exception: a symmetric
    // equality compare of two zero-extended 16-bit values may reinterpret
    // through the sign-extending halfword compare, because identical bit
    // patterns stay identical under either extension.
    let symmetric_equality_trick = state.rel.is_equality()
        && bits == 16
        && !signed
        && other.flags.zero_extended_at_source;
    if signed == state.unsigned && !symmetric_equality_trick {
        return Ok(None);
    }

    let mnemonic = match (bits, signed || symmetric_equality_trick, state.width64()) {
        (16, true, false) => Mnemonic::Ch,
        (16, true, true) => Mnemonic::Cgh,
        (32, true, true) => Mnemonic::Cgf,
        (32, false, true) => Mnemonic::Clgf,
        _ => return Ok(None),
    };

    let reg = cg.evaluate(other)?;
    let mr = cg.memref_for(load)?;
    trace!("mixed-width compare {mnemonic:?}");
    cg.gen_rx(mnemonic, reg, mr);
    cg.decrement_ref_count(load)?;
    // The conversion node itself was folded away.
    let conv_node = if conv_side_left { state.left } else { state.right };
    cg.decrement_ref_count(conv_node)?;
    cg.decrement_ref_count(other)?;

    // The register always rides in the first operand slot; when the
    // conversion sat on the left, the emitted operand order is reversed
    // and the mask remaps.
    let mask = if conv_side_left {
        state.mask().swapped_operands()
    } else {
        state.mask()
    };
    Ok(Some(CompareOutcome::CcSet(mask)))
}

// ----------------------------------------------------------------------
// State 6: test-under-mask idioms
// ----------------------------------------------------------------------

/// Match `(x & mask) rel {0, mask}` and translate into TM forms.
fn try_test_under_mask<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
    value: i64,
) -> CodegenResult<Option<CompareOutcome>> {
    if !state.rel.is_equality() {
        return Ok(None);
    }
    let and_node = state.left;
    if !matches!(and_node.op(), OpCode::IAnd | OpCode::LAnd) {
        return Ok(None);
    }
    if !and_node.is_single_use() || !and_node.is_unevaluated() {
        return Ok(None);
    }
    let x = and_node.first_child();
    let mask_node = and_node.second_child();
    let mask = match mask_node.int_value() {
        Some(m) => m,
        None => return Ok(None),
    };
    let against_full_mask = if value == 0 {
        false
    } else if value == mask {
        true
    } else {
        return Ok(None);
    };
    let cc = match CondCode::test_under_mask(state.rel, against_full_mask) {
        Some(cc) => cc,
        None => return Ok(None),
    };

    let bits = if and_node.op() == OpCode::LAnd {
        mask as u64
    } else {
        (mask as u32) as u64
    };
    if bits == 0 {
        return Ok(None);
    }

    // Single-byte test performed directly against memory: skips the
    // register load entirely. The mask must land inside one byte of the
    // loaded field.
    if x.is_foldable_memory_operand()
        && !x.flags.byte_reversed
        && !memref::might_need_index_register(x)
        && !memref::might_need_large_displacement(x)
    {
        let size = x.data_type().size() as u64;
        if let Some(byte_index) = single_byte_span(bits, size) {
            let byte_mask = (bits >> ((size - 1 - byte_index as u64) * 8)) & 0xff;
            let mr = cg.memref_for(x)?.displaced(byte_index as i64);
            trace!("test-under-mask on memory byte {byte_index}");
            cg.gen_si(Mnemonic::Tm, mr, byte_mask as i64);
            cg.decrement_ref_count(x)?;
            finish_tm_consumption(cg, state, and_node, mask_node)?;
            return Ok(Some(CompareOutcome::CcSet(cc)));
        }
    }

    // Register form: the mask must land inside one 16-bit lane.
    if let Some((lane, lane_mask)) = single_lane_span(bits) {
        let mnemonic = match lane {
            3 => Mnemonic::Tmhh,
            2 => Mnemonic::Tmhl,
            1 => Mnemonic::Tmlh,
            _ => Mnemonic::Tmll,
        };
        let reg = cg.evaluate(x)?;
        cg.gen_ri(mnemonic, reg, lane_mask as i64);
        cg.decrement_ref_count(x)?;
        finish_tm_consumption(cg, state, and_node, mask_node)?;
        return Ok(Some(CompareOutcome::CcSet(cc)));
    }

    Ok(None)
}

fn finish_tm_consumption<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
    and_node: &'a IlNode<'a>,
    mask_node: &'a IlNode<'a>,
) -> CodegenResult<()> {
    cg.recursively_decrement(mask_node)?;
    cg.decrement_ref_count(and_node)?;
    cg.recursively_decrement(state.right)?;
    Ok(())
}

/// The byte index (big-endian, within a field of `size` bytes) all set
/// bits fall into, or None when they span bytes.
fn single_byte_span(bits: u64, size: u64) -> Option<u32> {
    for byte in 0..size {
        let shift = (size - 1 - byte) * 8;
        let byte_mask = 0xffu64 << shift;
        if bits & !byte_mask == 0 {
            return Some(byte as u32);
        }
    }
    None
}

/// The 16-bit lane (0 = LL .. 3 = HH) all set bits fall into.
fn single_lane_span(bits: u64) -> Option<(u8, u16)> {
    for lane in 0u8..4 {
        let shift = (lane as u64) * 16;
        let lane_mask = 0xffffu64 << shift;
        if bits & !lane_mask == 0 {
            return Some((lane, ((bits >> shift) & 0xffff) as u16));
        }
    }
    None
}

// ----------------------------------------------------------------------
// State 7: generic register compare
// ----------------------------------------------------------------------

fn generic_register_compare<'a>(
    cg: &mut CodeGenerator<'a>,
    state: &CompareState<'a>,
) -> CodegenResult<CompareOutcome> {
    il_assert!(
        state.dtype.is_integer() || state.dtype == DataType::Address,
        "generic_register_compare",
        "unsupported compare operand type {:?}",
        state.dtype
    );

    // Commutative operand analysis: folding a foldable memory operand into
    // the register-memory compare form saves the separate load. When the
    // memory operand sits on the left, the operands swap and the mask is
    // remapped.
    let mem_mnemonic = match (state.unsigned, state.width64()) {
        (false, false) => Mnemonic::C,
        (false, true) => Mnemonic::Cg,
        (true, false) => Mnemonic::Cl,
        (true, true) => Mnemonic::Clg,
    };
    let fold_legal = |n: &IlNode<'_>| {
        n.is_foldable_memory_operand()
            && !n.flags.byte_reversed
            && n.data_type().size() == state.dtype.size()
    };
    if fold_legal(state.right) {
        let reg = cg.evaluate(state.left)?;
        let mr = cg.memref_for(state.right)?;
        cg.gen_rx(mem_mnemonic, reg, mr);
        cg.decrement_ref_count(state.left)?;
        cg.decrement_ref_count(state.right)?;
        return Ok(CompareOutcome::CcSet(state.mask()));
    }
    if fold_legal(state.left) {
        let reg = cg.evaluate(state.right)?;
        let mr = cg.memref_for(state.left)?;
        cg.gen_rx(mem_mnemonic, reg, mr);
        cg.decrement_ref_count(state.left)?;
        cg.decrement_ref_count(state.right)?;
        // Operands were emitted reversed: remap.
        return Ok(CompareOutcome::CcSet(state.mask().swapped_operands()));
    }

    let left = cg.evaluate(state.left)?;
    let right = cg.evaluate(state.right)?;
    let mnemonic = match (state.unsigned, state.width64()) {
        (false, false) => Mnemonic::Cr,
        (false, true) => Mnemonic::Cgr,
        (true, false) => Mnemonic::Clr,
        (true, true) => Mnemonic::Clgr,
    };
    cg.gen_rr(mnemonic, left, right);
    cg.decrement_ref_count(state.left)?;
    cg.decrement_ref_count(state.right)?;
    Ok(CompareOutcome::CcSet(state.mask()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_byte_span() {
        assert_eq!(single_byte_span(0x0000_ff00, 4), Some(2));
        assert_eq!(single_byte_span(0x0000_0080, 4), Some(3));
        assert_eq!(single_byte_span(0x0001_8000, 4), None);
        assert_eq!(single_byte_span(0x40, 1), Some(0));
    }

    #[test]
    fn test_single_lane_span() {
        assert_eq!(single_lane_span(0x0000_0000_0000_00f0), Some((0, 0xf0)));
        assert_eq!(single_lane_span(0x0000_0000_8000_0000), Some((1, 0x8000)));
        assert_eq!(single_lane_span(0xffff_0000_0000_0000), Some((3, 0xffff)));
        assert_eq!(single_lane_span(0x0000_0001_0001_0000), None);
    }
}
