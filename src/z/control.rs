// This module implements the control-transfer evaluators: direct and indirect call
// dispatch (the linkage builder itself is an external seam; argument evaluation order is
// the one selection-visible obligation, and the indirect target is evaluated last so the
// dispatch register is not clobbered by argument computation), the atomic pseudo-call
// intrinsics (interlocked load-and-add when the facility allows, otherwise a bracketed
// compare-and-swap retry loop), branch-on-count fusion for the canonical post-decrement
// loop idiom, value select, and the profile-guided conditional-move block folding. The
// folding is an explicit two-pass plan/commit: a pure analysis pass decides foldability
// and lists the operations to predicate, and a commit pass emits the predicated forms,
// so no global "conditional mode" flag ever changes evaluate() semantics.

//! Calls, atomics, branch-on-count, select, conditional-move folding.

use log::{debug, trace};

use crate::core::codegen::CodeGenerator;
use crate::core::cond::CondCode;
use crate::core::error::{il_assert, CodegenError, CodegenResult};
use crate::core::il::{IlNode, OpCode};
use crate::core::insn::{Insn, Mnemonic, Operand, Pin, RegDep};
use crate::core::memref;
use crate::core::register::{RegisterKind, VirtReg};
use crate::core::target::{ArchLevel, COND_MOVE_TAKEN_FREQ_HIGH, COND_MOVE_TAKEN_FREQ_LOW};

use super::compare::{self, CompareOutcome};
use super::constants;

/// Evaluator for unconditional jumps.
pub fn evaluate_goto<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let target = node
        .branch_target()
        .ok_or_else(|| CodegenError::internal("evaluate_goto", "goto without target"))?;
    let label = cg.label_for_target(target);
    cg.gen_branch(CondCode::ALWAYS, label);
    Ok(None)
}

/// Evaluator for method return. The epilogue itself belongs to the
/// external linkage; the selector only forces the return value and emits
/// the branch-on-link.
pub fn evaluate_return<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    if node.child_count() == 1 {
        let value = node.first_child();
        let reg = cg.evaluate(value)?;
        cg.decrement_ref_count(value)?;
        cg.stop_using(reg);
    }
    cg.emit(Insn::new(Mnemonic::Bcr, vec![Operand::Mask(CondCode::ALWAYS.0)]));
    Ok(None)
}

/// Evaluator for direct and indirect calls.
///
/// Direct calls: all children are arguments. Indirect calls: the first
/// child computes the entry address and is evaluated LAST, after every
/// argument, so argument evaluation cannot clobber the dispatch register.
pub fn evaluate_call<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let indirect = node.op() == OpCode::CallIndirect;
    let args_start = if indirect { 1 } else { 0 };

    for i in args_start..node.child_count() {
        let arg = node.child(i);
        let reg = cg.evaluate(arg)?;
        cg.decrement_ref_count(arg)?;
        if !cg.options.is_64bit && arg.data_type().is_64bit() {
            cg.facts_mut(reg).is_64bit_on_32bit_target = true;
        }
    }

    let link = cg.allocate_register(RegisterKind::Gpr);
    if indirect {
        let target_node = node.first_child();
        let target = cg.evaluate(target_node)?;
        cg.decrement_ref_count(target_node)?;
        let insn = Insn::new(Mnemonic::Basr, vec![Operand::Reg(link), Operand::Reg(target)])
            .with_deps(vec![RegDep {
                vreg: target,
                pin: Pin::Gpr(1),
            }]);
        cg.emit(insn);
    } else {
        let sym = node
            .symbol()
            .ok_or_else(|| CodegenError::internal("evaluate_call", "direct call without symbol"))?
            .clone();
        trace!("direct call to {}", sym.symbol.name);
        cg.emit(Insn::new(
            Mnemonic::Brasl,
            vec![Operand::Reg(link), Operand::Mem(crate::core::memref::MemRef::symbolic(sym))],
        ));
    }
    cg.stop_using(link);

    match node.data_type() {
        crate::core::il::DataType::Int8
        | crate::core::il::DataType::Int16
        | crate::core::il::DataType::Int32
        | crate::core::il::DataType::Int64
        | crate::core::il::DataType::Address => {
            Ok(Some(cg.allocate_register(RegisterKind::Gpr)))
        }
        crate::core::il::DataType::Float | crate::core::il::DataType::Double => {
            Ok(Some(cg.allocate_register(RegisterKind::Fpr)))
        }
        crate::core::il::DataType::Vector(_) => Ok(Some(cg.allocate_register(RegisterKind::Vrf))),
    }
}

/// Evaluator for the atomic pseudo-call intrinsics.
///
/// Children: [address, operand]. The interlocked-access facility turns
/// add/fetch-and-add into one LAA/LAAG; everything else (and older
/// targets) runs a compare-and-swap retry loop. The loop retries without
/// backoff until the CS succeeds; its body is bracketed so the external
/// allocator keeps the loop-carried registers intact.
pub fn evaluate_atomic<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let width64 = matches!(
        node.op(),
        OpCode::AtomicAdd64 | OpCode::AtomicFetchAdd64 | OpCode::AtomicSwap64
    );
    let wants_old_value = matches!(
        node.op(),
        OpCode::AtomicFetchAdd32 | OpCode::AtomicFetchAdd64 | OpCode::AtomicSwap32 | OpCode::AtomicSwap64
    );
    let is_swap = matches!(node.op(), OpCode::AtomicSwap32 | OpCode::AtomicSwap64);

    let addr_node = node.first_child();
    let operand_node = node.second_child();

    let base = cg.evaluate(addr_node)?;
    let mem = crate::core::memref::MemRef::based(base, 0);
    let operand = cg.evaluate(operand_node)?;

    if !is_swap && cg.options.arch.is_at_least(ArchLevel::Z196) {
        // Interlocked load-and-add: one instruction, returns the old value.
        let old = cg.allocate_register(RegisterKind::Gpr);
        let mnemonic = if width64 { Mnemonic::Laag } else { Mnemonic::Laa };
        cg.emit(Insn::new(
            mnemonic,
            vec![Operand::Reg(old), Operand::Reg(operand), Operand::Mem(mem)],
        ));
        cg.decrement_ref_count(addr_node)?;
        cg.decrement_ref_count(operand_node)?;
        return Ok(if wants_old_value {
            Some(old)
        } else {
            cg.stop_using(old);
            None
        });
    }

    // Compare-and-swap retry loop:
    //   L    old, mem
    // retry:
    //   LR   new, old ; AR new, operand   (or LR new, operand for swap)
    //   CS   old, new, mem
    //   BRC  NE, retry
    let (load, mv, add, cs) = if width64 {
        (Mnemonic::Lg, Mnemonic::Lgr, Mnemonic::Agr, Mnemonic::Csg)
    } else {
        (Mnemonic::L, Mnemonic::Lr, Mnemonic::Ar, Mnemonic::Cs)
    };
    let old = cg.allocate_register(RegisterKind::Gpr);
    let new = cg.allocate_register(RegisterKind::Gpr);
    cg.gen_rx(load, old, mem.clone());
    let retry = cg.new_label();
    cg.begin_internal_control_flow();
    cg.place_label(retry);
    if is_swap {
        cg.gen_rr(mv, new, operand);
    } else {
        cg.gen_rr(mv, new, old);
        cg.gen_rr(add, new, operand);
    }
    cg.emit(Insn::new(
        cs,
        vec![Operand::Reg(old), Operand::Reg(new), Operand::Mem(mem)],
    ));
    // CS failure (CC1) reloads `old` with the current value; loop back.
    cg.gen_branch(CondCode::NE, retry);
    cg.end_internal_control_flow()?;
    cg.stop_using(new);

    cg.decrement_ref_count(addr_node)?;
    cg.decrement_ref_count(operand_node)?;
    Ok(if wants_old_value {
        Some(old)
    } else {
        cg.stop_using(old);
        None
    })
}

/// Branch-on-count fusion: `value = value - 1; if (value > 0) branch`
/// becomes one BRCT/BRCTG when nothing else observes the decremented
/// value. Returns false (leaving the tree untouched) when the idiom does
/// not match.
pub fn try_branch_on_count<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<bool> {
    let (width64, rel) = match node.op() {
        OpCode::IfICmp(rel) => (false, rel),
        OpCode::IfLCmp(rel) => (true, rel),
        _ => return Ok(false),
    };
    if rel != crate::core::il::CmpRel::Gt {
        return Ok(false);
    }
    let add = node.first_child();
    let zero = node.second_child();
    if zero.int_value() != Some(0) {
        return Ok(false);
    }
    let expected_add = if width64 { OpCode::LAdd } else { OpCode::IAdd };
    let expected_sub = if width64 { OpCode::LSub } else { OpCode::ISub };
    let decrements = (add.op() == expected_add
        && add.child_count() == 2
        && add.second_child().int_value() == Some(-1))
        || (add.op() == expected_sub
            && add.child_count() == 2
            && add.second_child().int_value() == Some(1));
    if !decrements {
        return Ok(false);
    }
    // The intermediate result must have no other observer.
    if !add.is_single_use() || !add.is_unevaluated() {
        return Ok(false);
    }
    let target = node
        .branch_target()
        .ok_or_else(|| CodegenError::internal("try_branch_on_count", "missing target"))?;
    let label = cg.label_for_target(target);

    let counter_node = add.first_child();
    let counter = cg.clobber_evaluate(counter_node)?;
    trace!("branch-on-count fusion on {counter}");
    cg.emit(Insn::new(
        if width64 { Mnemonic::Brctg } else { Mnemonic::Brct },
        vec![Operand::Reg(counter), Operand::Label(label)],
    ));
    // The decremented value lives in `counter`; the add node is consumed
    // by the fusion.
    add.set_register(counter);
    cg.decrement_ref_count(counter_node)?;
    cg.recursively_decrement(add.second_child())?;
    cg.decrement_ref_count(add)?;
    cg.recursively_decrement(zero)?;
    Ok(true)
}

/// Evaluator for value select (cond ? a : b).
pub fn evaluate_select<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let width64 = node.op() == OpCode::LSelect;
    il_assert!(
        node.child_count() == 3,
        "evaluate_select",
        "select with {} children",
        node.child_count()
    );
    let cond_node = node.child(0);
    let true_node = node.child(1);
    let false_node = node.child(2);

    // The false value seeds the result; the true value overwrites it on
    // condition. The condition is tested last so nothing clobbers the CC.
    let result = cg.clobber_evaluate(false_node)?;
    let true_reg = cg.evaluate(true_node)?;
    let cond = cg.evaluate(cond_node)?;
    cg.gen_rr(if width64 { Mnemonic::Ltgr } else { Mnemonic::Ltr }, cond, cond);

    if cg.options.arch.is_at_least(ArchLevel::Z196) {
        let mnemonic = if width64 { Mnemonic::Locgr } else { Mnemonic::Locr };
        cg.emit(Insn::new(
            mnemonic,
            vec![
                Operand::Reg(result),
                Operand::Reg(true_reg),
                // Nonzero condition value selects the true side.
                Operand::Mask(CondCode(0b0100).0),
            ],
        ));
    } else {
        let done = cg.new_label();
        cg.begin_internal_control_flow();
        cg.gen_branch(CondCode(0b1000), done); // zero: keep false value
        cg.gen_rr(if width64 { Mnemonic::Lgr } else { Mnemonic::Lr }, result, true_reg);
        cg.place_label(done);
        cg.end_internal_control_flow()?;
    }

    cg.decrement_ref_count(cond_node)?;
    cg.decrement_ref_count(true_node)?;
    cg.decrement_ref_count(false_node)?;
    Ok(Some(result))
}

// ----------------------------------------------------------------------
// Conditional-move block folding (two-pass plan/commit)
// ----------------------------------------------------------------------

/// A two-way branch plus the block it jumps over, reconverging at the
/// branch target. The candidate comes from the block walker upstream.
pub struct FoldCandidate<'a> {
    pub branch: &'a IlNode<'a>,
    /// Statements executed only on the fall-through path.
    pub fallthrough_block: &'a [&'a IlNode<'a>],
}

/// The operations a foldable candidate will predicate.
#[derive(Debug)]
pub struct FoldPlan<'a> {
    stores: Vec<&'a IlNode<'a>>,
}

/// Pure analysis pass: decide foldability and list the operations to
/// predicate. Nothing is evaluated and no reference count moves.
pub fn analyze_cond_move_candidate<'a>(
    candidate: &FoldCandidate<'a>,
    cg: &CodeGenerator<'_>,
) -> Option<FoldPlan<'a>> {
    if !cg.options.arch.is_at_least(ArchLevel::Z196) {
        return None;
    }
    if !cg.options.perform_transformation("conditional-move folding") {
        return None;
    }
    // Profile gate: only a poorly predicted branch pays for predication.
    let freq = candidate.branch.flags.taken_freq?;
    if !(COND_MOVE_TAKEN_FREQ_LOW..=COND_MOVE_TAKEN_FREQ_HIGH).contains(&freq) {
        debug!("cond-move rejected: taken frequency {freq:.2} outside window");
        return None;
    }
    if candidate.fallthrough_block.is_empty() {
        return None;
    }
    // Every statement must belong to the safe predicable subset: plain
    // word/doubleword stores without array addressing, whose value is a
    // simple load, constant, shift of a load, or already-computed value.
    for stmt in candidate.fallthrough_block {
        if !matches!(stmt.op(), OpCode::IStore | OpCode::LStore | OpCode::AStore) {
            return None;
        }
        if memref::might_need_index_register(stmt) {
            return None;
        }
        let value = if stmt.child_count() == 2 {
            stmt.second_child()
        } else {
            stmt.first_child()
        };
        let safe_value = value.is_int_const()
            || value.register().is_some()
            || (value.op().is_load() && !memref::might_need_index_register(value))
            || matches!(value.op(), OpCode::IShl | OpCode::LShl | OpCode::IUShr | OpCode::LUShr);
        if !safe_value {
            return None;
        }
        if value.data_type().size() != stmt.data_type().size() || value.data_type().size() < 4 {
            return None;
        }
    }
    Some(FoldPlan {
        stores: candidate.fallthrough_block.to_vec(),
    })
}

/// Commit pass: emit the compare, then every planned operation in its
/// predicated form keyed to the fall-through condition.
pub fn commit_cond_move<'a>(
    candidate: &FoldCandidate<'a>,
    plan: &FoldPlan<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<()> {
    // The branch jumps over the block when its condition holds, so the
    // block's operations execute under the negated mask.
    let mask = match compare::generate_compare(candidate.branch, cg, None, false)? {
        CompareOutcome::CcSet(mask) => mask.negated(),
        CompareOutcome::Branched => {
            return Err(CodegenError::internal(
                "commit_cond_move",
                "compare fused a branch during predication",
            ))
        }
    };
    trace!("predicating {} stores under mask {mask:?}", plan.stores.len());

    for stmt in &plan.stores {
        let width64 = stmt.data_type().size() == 8;
        let value = if stmt.child_count() == 2 {
            stmt.second_child()
        } else {
            stmt.first_child()
        };

        // Value production must leave the governing CC untouched.
        let value_reg = if let Some(constant) = value.int_value() {
            let reg = cg.allocate_register(RegisterKind::Gpr);
            if width64 {
                constants::materialize_int64(cg, reg, constant, false);
            } else {
                constants::materialize_int32(cg, reg, constant as i32, false);
            }
            cg.recursively_decrement(value)?;
            reg
        } else if value.is_foldable_memory_operand() {
            // The load itself becomes load-on-condition.
            let reg = cg.allocate_register(RegisterKind::Gpr);
            let mr = cg.memref_for(value)?;
            let mnemonic = if width64 { Mnemonic::Locg } else { Mnemonic::Loc };
            cg.emit(Insn::new(
                mnemonic,
                vec![Operand::Reg(reg), Operand::Mem(mr), Operand::Mask(mask.0)],
            ));
            value.set_register(reg);
            cg.decrement_ref_count(value)?;
            reg
        } else {
            let reg = cg.evaluate(value)?;
            cg.decrement_ref_count(value)?;
            reg
        };

        let mr = cg.memref_for(stmt)?;
        let mnemonic = if width64 { Mnemonic::Stocg } else { Mnemonic::Stoc };
        cg.emit(Insn::new(
            mnemonic,
            vec![Operand::Reg(value_reg), Operand::Mem(mr), Operand::Mask(mask.0)],
        ));
    }
    Ok(())
}

/// Fold the candidate when the plan approves; otherwise emit the branch
/// and the block unchanged. This is the block walker's entry point.
pub fn fold_or_branch<'a>(
    candidate: &FoldCandidate<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<()> {
    if let Some(plan) = analyze_cond_move_candidate(candidate, cg) {
        return commit_cond_move(candidate, &plan, cg);
    }
    cg.evaluate_statement(candidate.branch)?;
    for stmt in candidate.fallthrough_block {
        cg.evaluate_statement(stmt)?;
    }
    // Reconvergence point.
    if let Some(target) = candidate.branch.branch_target() {
        let label = cg.label_for_target(target);
        cg.place_label(label);
    }
    Ok(())
}
