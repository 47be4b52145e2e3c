// This module implements the bulk memory-operation evaluators: array copy with
// overlap-safe direction selection, array set, array compare under both result
// conventions, array translate with the hardware translate loop and the SIMD transcoder,
// and bit-permute with its three length-keyed strategies. Direction selection on copies is
// a correctness requirement: when neither hint nor proof fixes a direction, a runtime
// pointer-relationship check picks forward or backward so overlapping regions never
// corrupt. Constant-length forward copies unroll into maximal 256-byte block moves plus
// one sized residue; variable lengths run a counted block loop with an execute-patched
// residue template. Backward copies prefer the reverse-block-copy instruction on new
// enough facilities, then a vector loop, then the generic indexed-branch element loop.

//! Array copy/set/compare/translate and bit-permute evaluators.

use log::trace;

use crate::core::codegen::CodeGenerator;
use crate::core::cond::CondCode;
use crate::core::error::{il_assert, CodegenResult};
use crate::core::il::{ArrayCmpConvention, CopyDirection, IlNode, TranslateKind};
use crate::core::insn::{Insn, Mnemonic, Operand, Pin, RegDep};
use crate::core::memref::MemRef;
use crate::core::register::{RegisterKind, VirtReg};
use crate::core::target::{
    ArchLevel, EARLY_CLC_THRESHOLD, MAX_SS_LENGTH, TRANSLATE_VECTOR_CHARS,
};

use super::constants;

struct CopyOperands<'a> {
    dst_node: &'a IlNode<'a>,
    src_node: &'a IlNode<'a>,
    len_node: &'a IlNode<'a>,
    dst: VirtReg,
    src: VirtReg,
}

fn copy_operands<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<CopyOperands<'a>> {
    il_assert!(
        node.child_count() == 3,
        "bulk",
        "bulk operation with {} children",
        node.child_count()
    );
    let dst_node = node.child(0);
    let src_node = node.child(1);
    let len_node = node.child(2);
    let dst = cg.evaluate(dst_node)?;
    let src = cg.evaluate(src_node)?;
    Ok(CopyOperands {
        dst_node,
        src_node,
        len_node,
        dst,
        src,
    })
}

/// Evaluator for ArrayCopy.
pub fn evaluate_arraycopy<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let ops = copy_operands(node, cg)?;

    match node.flags.copy_direction {
        CopyDirection::Forward => {
            emit_forward_copy(cg, &ops)?;
        }
        CopyDirection::Backward => {
            emit_backward_copy(cg, &ops)?;
        }
        CopyDirection::Unknown => {
            // Runtime direction check: copying the wrong way on
            // overlapping ranges corrupts data, so this is not optional.
            // Effective source >= destination: forward is safe.
            let backward = cg.new_label();
            let done = cg.new_label();
            cg.begin_internal_control_flow();
            cg.gen_rr(Mnemonic::Clgr, ops.src, ops.dst);
            cg.gen_branch(CondCode::LT, backward);
            emit_forward_copy(cg, &ops)?;
            cg.gen_branch(CondCode::ALWAYS, done);
            cg.place_label(backward);
            emit_backward_copy(cg, &ops)?;
            cg.place_label(done);
            cg.end_internal_control_flow()?;
        }
    }

    cg.decrement_ref_count(ops.dst_node)?;
    cg.decrement_ref_count(ops.src_node)?;
    if ops.len_node.is_int_const() && ops.len_node.is_unevaluated() {
        cg.recursively_decrement(ops.len_node)?;
    } else {
        cg.decrement_ref_count(ops.len_node)?;
    }
    Ok(None)
}

fn emit_forward_copy<'a>(cg: &mut CodeGenerator<'a>, ops: &CopyOperands<'a>) -> CodegenResult<()> {
    if let Some(len) = ops.len_node.int_value() {
        emit_forward_copy_const(cg, ops.dst, ops.src, len);
        return Ok(());
    }
    emit_forward_copy_variable(cg, ops)
}

/// Constant length: unrolled maximal block moves plus one sized residue.
fn emit_forward_copy_const(cg: &mut CodeGenerator<'_>, dst: VirtReg, src: VirtReg, len: i64) {
    let mut offset = 0i64;
    let mut remaining = len;
    while remaining >= MAX_SS_LENGTH {
        cg.gen_ss(
            Mnemonic::Mvc,
            MAX_SS_LENGTH,
            MemRef::based(dst, offset),
            MemRef::based(src, offset),
        );
        offset += MAX_SS_LENGTH;
        remaining -= MAX_SS_LENGTH;
    }
    if remaining > 0 {
        cg.gen_ss(
            Mnemonic::Mvc,
            remaining,
            MemRef::based(dst, offset),
            MemRef::based(src, offset),
        );
    }
}

/// Variable length: counted 256-byte block loop, then an execute-patched
/// residue template covering the last 1..256 bytes.
fn emit_forward_copy_variable<'a>(
    cg: &mut CodeGenerator<'a>,
    ops: &CopyOperands<'a>,
) -> CodegenResult<()> {
    let len = cg.evaluate(ops.len_node)?;
    let dst = cg.clobber_evaluate(ops.dst_node)?;
    let src = cg.clobber_evaluate(ops.src_node)?;

    let blocks = cg.allocate_register(RegisterKind::Gpr);
    let loop_top = cg.new_label();
    let residue = cg.new_label();
    let template = cg.new_label();
    let done = cg.new_label();

    cg.begin_internal_control_flow();
    // blocks = len / 256; skip the loop when none.
    cg.gen_shift(Mnemonic::Srlg, blocks, len, 8);
    cg.gen_rr(Mnemonic::Ltgr, blocks, blocks);
    cg.gen_branch(CondCode::EQ, residue);
    cg.place_label(loop_top);
    cg.gen_ss(
        Mnemonic::Mvc,
        MAX_SS_LENGTH,
        MemRef::based(dst, 0),
        MemRef::based(src, 0),
    );
    cg.gen_rx(Mnemonic::La, dst, MemRef::based(dst, MAX_SS_LENGTH));
    cg.gen_rx(Mnemonic::La, src, MemRef::based(src, MAX_SS_LENGTH));
    cg.emit(Insn::new(
        Mnemonic::Brct,
        vec![Operand::Reg(blocks), Operand::Label(loop_top)],
    ));
    cg.place_label(residue);
    // residue byte count - 1 is the execute-patched length.
    let exlen = cg.allocate_register(RegisterKind::Gpr);
    cg.emit(Insn::new(
        Mnemonic::Risbg,
        vec![
            Operand::Reg(exlen),
            Operand::Reg(len),
            Operand::Imm(56),
            Operand::Imm(63),
            Operand::Imm(0),
        ],
    ));
    cg.gen_ri(Mnemonic::Aghi, exlen, -1);
    cg.gen_branch(CondCode::LT, done);
    cg.emit(Insn::new(
        Mnemonic::Exrl,
        vec![Operand::Reg(exlen), Operand::Label(template)],
    ));
    cg.gen_branch(CondCode::ALWAYS, done);
    // The template is patched by EXRL; it must stay at a stable location.
    cg.place_label(template);
    cg.gen_ss(Mnemonic::Mvc, 1, MemRef::based(dst, 0), MemRef::based(src, 0));
    cg.place_label(done);
    cg.end_internal_control_flow()?;
    cg.stop_using(blocks);
    cg.stop_using(exlen);
    Ok(())
}

fn emit_backward_copy<'a>(cg: &mut CodeGenerator<'a>, ops: &CopyOperands<'a>) -> CodegenResult<()> {
    let len = cg.evaluate(ops.len_node)?;
    if cg.options.arch.is_at_least(ArchLevel::Z15) {
        // Dedicated right-to-left block copy; length rides in GR0.
        trace!("backward copy via MVCRL");
        let insn = Insn::new(
            Mnemonic::Mvcrl,
            vec![
                Operand::Mem(MemRef::based(ops.dst, 0)),
                Operand::Mem(MemRef::based(ops.src, 0)),
            ],
        )
        .with_deps(vec![RegDep {
            vreg: len,
            pin: Pin::Gpr(0),
        }]);
        cg.emit(insn);
        return Ok(());
    }
    if cg.options.arch.is_at_least(ArchLevel::Z13) {
        return emit_backward_copy_vector(cg, ops, len);
    }
    emit_backward_copy_generic(cg, ops, len)
}

/// Vector-register backward loop: 16-byte chunks from the top end down.
fn emit_backward_copy_vector<'a>(
    cg: &mut CodeGenerator<'a>,
    ops: &CopyOperands<'a>,
    len: VirtReg,
) -> CodegenResult<()> {
    let cursor = cg.allocate_register(RegisterKind::Gpr);
    let chunk = cg.allocate_register(RegisterKind::Vrf);
    let loop_top = cg.new_label();
    let residue = cg.new_label();
    let done = cg.new_label();

    cg.begin_internal_control_flow();
    cg.gen_rr(Mnemonic::Lgr, cursor, len);
    cg.place_label(loop_top);
    cg.gen_ri(Mnemonic::Aghi, cursor, -16);
    cg.gen_branch(CondCode::LT, residue);
    cg.gen_vrx(Mnemonic::Vl, chunk, MemRef::based(ops.src, 0).with_index(cursor), 0);
    cg.gen_vrx(Mnemonic::Vst, chunk, MemRef::based(ops.dst, 0).with_index(cursor), 0);
    cg.gen_branch(CondCode::ALWAYS, loop_top);
    cg.place_label(residue);
    // cursor is now len mod 16 minus 16: the head residue is cursor+16
    // bytes, copied with a length-limited vector pair.
    cg.gen_ri(Mnemonic::Aghi, cursor, 16);
    cg.gen_branch(CondCode::EQ, done);
    cg.gen_ri(Mnemonic::Aghi, cursor, -1);
    cg.emit(Insn::new(
        Mnemonic::Vll,
        vec![
            Operand::Reg(chunk),
            Operand::Reg(cursor),
            Operand::Mem(MemRef::based(ops.src, 0)),
        ],
    ));
    cg.emit(Insn::new(
        Mnemonic::Vstl,
        vec![
            Operand::Reg(chunk),
            Operand::Reg(cursor),
            Operand::Mem(MemRef::based(ops.dst, 0)),
        ],
    ));
    cg.place_label(done);
    cg.end_internal_control_flow()?;
    cg.stop_using(cursor);
    cg.stop_using(chunk);
    Ok(())
}

/// Fully generic element loop, one byte at a time from the top end,
/// driven by the register-pair-indexed branch.
fn emit_backward_copy_generic<'a>(
    cg: &mut CodeGenerator<'a>,
    ops: &CopyOperands<'a>,
    len: VirtReg,
) -> CodegenResult<()> {
    let index = cg.allocate_register(RegisterKind::GprPair);
    let byte = cg.allocate_register(RegisterKind::Gpr);
    let limit = constants::load_int64_constant(cg, 0);
    let loop_top = cg.new_label();
    let done = cg.new_label();

    cg.begin_internal_control_flow();
    // index = len - 1, increment = -1 (the pair's odd half).
    cg.gen_rr(Mnemonic::Lgr, index, len);
    cg.gen_ri(Mnemonic::Aghi, index, -1);
    cg.gen_branch(CondCode::LT, done);
    cg.place_label(loop_top);
    cg.gen_rx(Mnemonic::Llc, byte, MemRef::based(ops.src, 0).with_index(index));
    cg.gen_rx(Mnemonic::Stc, byte, MemRef::based(ops.dst, 0).with_index(index));
    cg.emit(
        Insn::new(
            Mnemonic::Brxle,
            vec![
                Operand::Reg(index),
                Operand::Reg(limit),
                Operand::Label(loop_top),
            ],
        )
        .with_deps(vec![RegDep {
            vreg: index,
            pin: Pin::EvenOddPair,
        }]),
    );
    cg.place_label(done);
    cg.end_internal_control_flow()?;
    cg.stop_using(index);
    cg.stop_using(byte);
    cg.stop_using(limit);
    Ok(())
}

/// Evaluator for ArraySet: fill length bytes with a byte value.
pub fn evaluate_arrayset<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    il_assert!(
        node.child_count() == 3,
        "evaluate_arrayset",
        "arrayset with {} children",
        node.child_count()
    );
    let dst_node = node.child(0);
    let value_node = node.child(1);
    let len_node = node.child(2);
    let dst = cg.evaluate(dst_node)?;

    let const_len = len_node.int_value();
    let const_value = value_node.int_value();

    match (const_len, const_value) {
        (Some(len), Some(0)) if len <= MAX_SS_LENGTH => {
            // Zero fill: XC dst,dst clears in place.
            cg.gen_ss(
                Mnemonic::Xc,
                len,
                MemRef::based(dst, 0),
                MemRef::based(dst, 0),
            );
        }
        (Some(len), Some(value)) if len <= MAX_SS_LENGTH => {
            // Seed the first byte, then propagate with an overlapping MVC.
            cg.gen_si(Mnemonic::Mvi, MemRef::based(dst, 0), value & 0xff);
            if len > 1 {
                cg.gen_ss(
                    Mnemonic::Mvc,
                    len - 1,
                    MemRef::based(dst, 1),
                    MemRef::based(dst, 0),
                );
            }
        }
        (Some(len), _) => {
            // Constant length, runtime value: store the byte then
            // propagate blockwise.
            let value = cg.evaluate(value_node)?;
            cg.gen_rx(Mnemonic::Stc, value, MemRef::based(dst, 0));
            let mut offset = 1i64;
            let mut remaining = len - 1;
            while remaining > 0 {
                let run = remaining.min(offset.min(MAX_SS_LENGTH));
                cg.gen_ss(
                    Mnemonic::Mvc,
                    run,
                    MemRef::based(dst, offset),
                    MemRef::based(dst, offset - run),
                );
                offset += run;
                remaining -= run;
            }
        }
        (None, _) => {
            // Variable length: seed plus execute-patched propagation loop.
            let value = cg.evaluate(value_node)?;
            let len = cg.evaluate(len_node)?;
            let template = cg.new_label();
            let done = cg.new_label();
            let exlen = cg.allocate_register(RegisterKind::Gpr);
            cg.begin_internal_control_flow();
            cg.gen_rr(Mnemonic::Ltgr, exlen, len);
            cg.gen_branch(CondCode::EQ, done);
            cg.gen_rx(Mnemonic::Stc, value, MemRef::based(dst, 0));
            cg.gen_ri(Mnemonic::Aghi, exlen, -2);
            cg.gen_branch(CondCode::LT, done);
            cg.emit(Insn::new(
                Mnemonic::Exrl,
                vec![Operand::Reg(exlen), Operand::Label(template)],
            ));
            cg.gen_branch(CondCode::ALWAYS, done);
            cg.place_label(template);
            cg.gen_ss(Mnemonic::Mvc, 1, MemRef::based(dst, 1), MemRef::based(dst, 0));
            cg.place_label(done);
            cg.end_internal_control_flow()?;
            cg.stop_using(exlen);
        }
    }

    cg.decrement_ref_count(dst_node)?;
    if value_node.is_unevaluated() && value_node.is_int_const() {
        cg.recursively_decrement(value_node)?;
    } else {
        cg.decrement_ref_count(value_node)?;
    }
    if len_node.is_unevaluated() && len_node.is_int_const() {
        cg.recursively_decrement(len_node)?;
    } else {
        cg.decrement_ref_count(len_node)?;
    }
    Ok(None)
}

/// Evaluator for ArrayCmp. The result convention is the node's
/// `cmp_convention` flag and must thread through every path.
pub fn evaluate_arraycmp<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let ops = copy_operands(node, cg)?;
    let convention = node.flags.cmp_convention;
    let result = cg.allocate_register(RegisterKind::Gpr);

    if let Some(len) = ops.len_node.int_value() {
        if len == 0 {
            // Empty ranges compare equal.
            constants::materialize_int32(cg, result, 0, true);
            finish_cmp_consumption(cg, &ops)?;
            return Ok(Some(result));
        }
        if len <= MAX_SS_LENGTH {
            cg.gen_ss(
                Mnemonic::Clc,
                len,
                MemRef::based(ops.dst, 0),
                MemRef::based(ops.src, 0),
            );
            materialize_cmp_result(cg, result, convention)?;
            finish_cmp_consumption(cg, &ops)?;
            return Ok(Some(result));
        }
    }

    if cg.options.arch.is_at_least(ArchLevel::Z13) {
        emit_arraycmp_vector(cg, &ops, result, convention)?;
    } else {
        emit_arraycmp_clc_loop(cg, &ops, result, convention)?;
    }
    finish_cmp_consumption(cg, &ops)?;
    Ok(Some(result))
}

fn finish_cmp_consumption<'a>(
    cg: &mut CodeGenerator<'a>,
    ops: &CopyOperands<'a>,
) -> CodegenResult<()> {
    cg.decrement_ref_count(ops.dst_node)?;
    cg.decrement_ref_count(ops.src_node)?;
    if ops.len_node.is_unevaluated() && ops.len_node.is_int_const() {
        cg.recursively_decrement(ops.len_node)?;
    } else {
        cg.decrement_ref_count(ops.len_node)?;
    }
    Ok(())
}

/// Turn the live CC of a storage compare into the requested result value.
fn materialize_cmp_result(
    cg: &mut CodeGenerator<'_>,
    result: VirtReg,
    convention: ArrayCmpConvention,
) -> CodegenResult<()> {
    let (low_value, high_value) = match convention {
        ArrayCmpConvention::SignumLike => (-1i64, 1i64),
        ArrayCmpConvention::IndexLike => (1, 2),
    };
    cg.gen_ri(Mnemonic::Lhi, result, 0);
    if cg.options.arch.is_at_least(ArchLevel::Z13) {
        cg.emit(Insn::new(
            Mnemonic::Lochi,
            vec![Operand::Reg(result), Operand::Imm(low_value), Operand::Mask(CondCode::LT.0)],
        ));
        cg.emit(Insn::new(
            Mnemonic::Lochi,
            vec![Operand::Reg(result), Operand::Imm(high_value), Operand::Mask(CondCode::GT.0)],
        ));
        return Ok(());
    }
    let done = cg.new_label();
    cg.begin_internal_control_flow();
    cg.gen_branch(CondCode::EQ, done);
    cg.gen_ri(Mnemonic::Lhi, result, low_value);
    cg.gen_branch(CondCode::LT, done);
    cg.gen_ri(Mnemonic::Lhi, result, high_value);
    cg.place_label(done);
    cg.end_internal_control_flow()?;
    Ok(())
}

/// Generic path: an early short CLC often resolves the compare before the
/// block loop spins up.
fn emit_arraycmp_clc_loop<'a>(
    cg: &mut CodeGenerator<'a>,
    ops: &CopyOperands<'a>,
    result: VirtReg,
    convention: ArrayCmpConvention,
) -> CodegenResult<()> {
    let len = cg.evaluate(ops.len_node)?;
    let dst = cg.clobber_evaluate(ops.dst_node)?;
    let src = cg.clobber_evaluate(ops.src_node)?;
    let blocks = cg.allocate_register(RegisterKind::Gpr);
    let loop_top = cg.new_label();
    let residue = cg.new_label();
    let template = cg.new_label();
    let decide = cg.new_label();

    cg.begin_internal_control_flow();
    // Early compare of the first 8 bytes; mismatch short-circuits the
    // loop, and short arrays skip the block-loop arithmetic entirely.
    cg.gen_ri(Mnemonic::Cghi, len, 8);
    cg.gen_branch(CondCode::LT, residue);
    cg.gen_ss(
        Mnemonic::Clc,
        8,
        MemRef::based(dst, 0),
        MemRef::based(src, 0),
    );
    cg.gen_branch(CondCode::NE, decide);
    cg.gen_ri(Mnemonic::Cghi, len, EARLY_CLC_THRESHOLD);
    cg.gen_branch(CondCode::LT, residue);
    cg.gen_shift(Mnemonic::Srlg, blocks, len, 8);
    cg.gen_rr(Mnemonic::Ltgr, blocks, blocks);
    cg.gen_branch(CondCode::EQ, residue);
    cg.place_label(loop_top);
    cg.gen_ss(
        Mnemonic::Clc,
        MAX_SS_LENGTH,
        MemRef::based(dst, 0),
        MemRef::based(src, 0),
    );
    cg.gen_branch(CondCode::NE, decide);
    cg.gen_rx(Mnemonic::La, dst, MemRef::based(dst, MAX_SS_LENGTH));
    cg.gen_rx(Mnemonic::La, src, MemRef::based(src, MAX_SS_LENGTH));
    cg.emit(Insn::new(
        Mnemonic::Brct,
        vec![Operand::Reg(blocks), Operand::Label(loop_top)],
    ));
    cg.place_label(residue);
    let exlen = cg.allocate_register(RegisterKind::Gpr);
    let no_residue = cg.new_label();
    cg.emit(Insn::new(
        Mnemonic::Risbg,
        vec![
            Operand::Reg(exlen),
            Operand::Reg(len),
            Operand::Imm(56),
            Operand::Imm(63),
            Operand::Imm(0),
        ],
    ));
    cg.gen_ri(Mnemonic::Aghi, exlen, -1);
    cg.gen_branch(CondCode::LT, no_residue);
    cg.emit(Insn::new(
        Mnemonic::Exrl,
        vec![Operand::Reg(exlen), Operand::Label(template)],
    ));
    cg.gen_branch(CondCode::ALWAYS, decide);
    cg.place_label(template);
    cg.gen_ss(Mnemonic::Clc, 1, MemRef::based(dst, 0), MemRef::based(src, 0));
    cg.place_label(no_residue);
    // Nothing left to compare: force the equal outcome.
    cg.gen_rr(Mnemonic::Cr, exlen, exlen);
    cg.place_label(decide);
    materialize_cmp_result(cg, result, convention)?;
    cg.end_internal_control_flow()?;
    cg.stop_using(blocks);
    cg.stop_using(exlen);
    Ok(())
}

/// Vector path: 16-byte chunks, find-first-nonequal on mismatch, residue
/// via length-limited vector loads.
fn emit_arraycmp_vector<'a>(
    cg: &mut CodeGenerator<'a>,
    ops: &CopyOperands<'a>,
    result: VirtReg,
    convention: ArrayCmpConvention,
) -> CodegenResult<()> {
    let len = cg.evaluate(ops.len_node)?;
    let va = cg.allocate_register(RegisterKind::Vrf);
    let vb = cg.allocate_register(RegisterKind::Vrf);
    let vmis = cg.allocate_register(RegisterKind::Vrf);
    let cursor = cg.allocate_register(RegisterKind::Gpr);
    let loop_top = cg.new_label();
    let residue = cg.new_label();
    let mismatch = cg.new_label();
    let decide = cg.new_label();
    let done = cg.new_label();

    cg.begin_internal_control_flow();
    cg.gen_rr(Mnemonic::Xgr, cursor, cursor);
    cg.place_label(loop_top);
    // remaining = len - cursor; below 16 goes to the residue tail.
    cg.gen_rr(Mnemonic::Lgr, result, len);
    cg.gen_rr(Mnemonic::Sgr, result, cursor);
    cg.gen_ri(Mnemonic::Cghi, result, 16);
    cg.gen_branch(CondCode::LT, residue);
    cg.gen_vrx(Mnemonic::Vl, va, MemRef::based(ops.dst, 0).with_index(cursor), 0);
    cg.gen_vrx(Mnemonic::Vl, vb, MemRef::based(ops.src, 0).with_index(cursor), 0);
    // Find first nonequal byte; CC3 means all equal.
    cg.gen_vrr(Mnemonic::Vfene, &[vmis, va, vb], 0);
    cg.gen_branch(CondCode(0b0001).complement(), mismatch);
    cg.gen_ri(Mnemonic::Aghi, cursor, 16);
    cg.gen_branch(CondCode::ALWAYS, loop_top);
    cg.place_label(residue);
    // Tail of 1..15 bytes through length-limited loads.
    cg.gen_rr(Mnemonic::Ltgr, result, result);
    cg.gen_branch(CondCode::EQ, done);
    cg.gen_ri(Mnemonic::Aghi, result, -1);
    cg.emit(Insn::new(
        Mnemonic::Vll,
        vec![
            Operand::Reg(va),
            Operand::Reg(result),
            Operand::Mem(MemRef::based(ops.dst, 0).with_index(cursor)),
        ],
    ));
    cg.emit(Insn::new(
        Mnemonic::Vll,
        vec![
            Operand::Reg(vb),
            Operand::Reg(result),
            Operand::Mem(MemRef::based(ops.src, 0).with_index(cursor)),
        ],
    ));
    cg.gen_vrr(Mnemonic::Vfene, &[vmis, va, vb], 0);
    cg.gen_branch(CondCode(0b0001).complement(), mismatch);
    cg.place_label(done);
    constants::materialize_int32(cg, result, 0, false);
    cg.gen_branch(CondCode::ALWAYS, decide);
    cg.place_label(mismatch);
    // The mismatch byte index rides in lane 7 of the VFENE result; the
    // byte compare below sets the final CC.
    cg.gen_vrr(Mnemonic::Vlgv, &[result, vmis], 7);
    cg.gen_rr(Mnemonic::Agr, result, cursor);
    let abyte = cg.allocate_register(RegisterKind::Gpr);
    let bbyte = cg.allocate_register(RegisterKind::Gpr);
    cg.gen_rx(Mnemonic::Llc, abyte, MemRef::based(ops.dst, 0).with_index(result));
    cg.gen_rx(Mnemonic::Llc, bbyte, MemRef::based(ops.src, 0).with_index(result));
    cg.gen_rr(Mnemonic::Clr, abyte, bbyte);
    materialize_cmp_result(cg, result, convention)?;
    cg.place_label(decide);
    cg.end_internal_control_flow()?;
    cg.stop_using(va);
    cg.stop_using(vb);
    cg.stop_using(vmis);
    cg.stop_using(cursor);
    cg.stop_using(abyte);
    cg.stop_using(bbyte);
    Ok(())
}

/// Evaluator for ArrayTranslate. Children: [input, output, table, length].
/// Returns the count of elements successfully translated before
/// saturation.
pub fn evaluate_translate<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    il_assert!(
        node.child_count() == 4,
        "evaluate_translate",
        "translate with {} children",
        node.child_count()
    );
    let in_node = node.child(0);
    let out_node = node.child(1);
    let table_node = node.child(2);
    let len_node = node.child(3);

    if node.flags.translate_kind == TranslateKind::CharToByte
        && cg.options.arch.is_at_least(ArchLevel::Z13)
        && node.flags.saturation_limit.is_some()
    {
        let result = emit_translate_simd(cg, node)?;
        consume_translate(cg, in_node, out_node, table_node, len_node)?;
        return Ok(Some(result));
    }

    let result = emit_translate_hardware_loop(cg, node)?;
    consume_translate(cg, in_node, out_node, table_node, len_node)?;
    Ok(Some(result))
}

fn consume_translate<'a>(
    cg: &mut CodeGenerator<'a>,
    in_node: &'a IlNode<'a>,
    out_node: &'a IlNode<'a>,
    table_node: &'a IlNode<'a>,
    len_node: &'a IlNode<'a>,
) -> CodegenResult<()> {
    cg.decrement_ref_count(in_node)?;
    cg.decrement_ref_count(out_node)?;
    cg.decrement_ref_count(table_node)?;
    cg.decrement_ref_count(len_node)?;
    Ok(())
}

/// The hardware translate loop. The instruction processes a CPU-defined
/// amount per execution: CC3 means it stopped early for that reason and
/// simply re-executes; CC1 is a saturating (untranslatable) element.
fn emit_translate_hardware_loop<'a>(
    cg: &mut CodeGenerator<'a>,
    node: &'a IlNode<'a>,
) -> CodegenResult<VirtReg> {
    let in_node = node.child(0);
    let out_node = node.child(1);
    let table_node = node.child(2);
    let len_node = node.child(3);

    let mnemonic = match node.flags.translate_kind {
        TranslateKind::ByteToByte => Mnemonic::Troo,
        TranslateKind::ByteToChar => Mnemonic::Trot,
        TranslateKind::CharToByte => Mnemonic::Trto,
        TranslateKind::CharToChar => Mnemonic::Trtt,
    };

    let src = cg.clobber_evaluate(in_node)?;
    let dst = cg.clobber_evaluate(out_node)?;
    let table = cg.evaluate(table_node)?;
    let len = cg.clobber_evaluate(len_node)?;
    let total = cg.allocate_register(RegisterKind::Gpr);
    cg.gen_rr(Mnemonic::Lgr, total, len);

    let retry = cg.new_label();
    cg.begin_internal_control_flow();
    cg.place_label(retry);
    // R1 carries the destination, the source rides in the even/odd pair
    // with its remaining length; the table is pinned to GR1's neighbor by
    // convention (table in GR1, test byte in GR0).
    let insn = Insn::new(
        mnemonic,
        vec![Operand::Reg(dst), Operand::Reg(src), Operand::Reg(len)],
    )
    .with_deps(vec![
        RegDep {
            vreg: table,
            pin: Pin::Gpr(1),
        },
        RegDep {
            vreg: src,
            pin: Pin::EvenOddPair,
        },
    ]);
    cg.emit(insn);
    // CC3: processing limit hit mid-block; resume where it stopped.
    cg.gen_branch(CondCode(0b0001), retry);
    cg.end_internal_control_flow()?;

    // Translated count = original length - remaining length.
    cg.gen_rr(Mnemonic::Sgr, total, len);
    cg.stop_using(len);
    Ok(total)
}

/// SIMD transcoder: 16 chars per iteration via pack-with-saturation, with
/// exact bookkeeping of which lane saturated.
fn emit_translate_simd<'a>(
    cg: &mut CodeGenerator<'a>,
    node: &'a IlNode<'a>,
) -> CodegenResult<VirtReg> {
    let in_node = node.child(0);
    let out_node = node.child(1);
    let len_node = node.child(3);
    let limit = node.flags.saturation_limit.unwrap_or(0x100);

    let src = cg.evaluate(in_node)?;
    let dst = cg.evaluate(out_node)?;
    let len = cg.evaluate(len_node)?;

    let v1 = cg.allocate_register(RegisterKind::Vrf);
    let v2 = cg.allocate_register(RegisterKind::Vrf);
    let vout = cg.allocate_register(RegisterKind::Vrf);
    let vlimit = cg.allocate_register(RegisterKind::Vrf);
    let vtest = cg.allocate_register(RegisterKind::Vrf);
    let vzero = cg.allocate_register(RegisterKind::Vrf);
    let count = cg.allocate_register(RegisterKind::Gpr);
    let scratch = cg.allocate_register(RegisterKind::Gpr);

    let loop_top = cg.new_label();
    let saturated = cg.new_label();
    let tail = cg.new_label();
    let done = cg.new_label();

    // Per-lane upper bound for the saturation test: chars strictly above
    // limit-1 are untranslatable.
    cg.emit(Insn::new(
        Mnemonic::Vrepi,
        vec![
            Operand::Reg(vlimit),
            Operand::Imm(limit as i64 - 1),
            Operand::Mask(1),
        ],
    ));
    cg.emit(Insn::new(
        Mnemonic::Vgbm,
        vec![Operand::Reg(vzero), Operand::Imm(0)],
    ));
    cg.begin_internal_control_flow();
    cg.gen_rr(Mnemonic::Xgr, count, count);
    cg.place_label(loop_top);
    cg.gen_rr(Mnemonic::Lgr, scratch, len);
    cg.gen_rr(Mnemonic::Sgr, scratch, count);
    cg.gen_ri(Mnemonic::Cghi, scratch, TRANSLATE_VECTOR_CHARS);
    cg.gen_branch(CondCode::LT, tail);
    // Two vectors of 8 halfword chars each; the index scales by 2.
    cg.gen_rr(Mnemonic::Lgr, scratch, count);
    cg.gen_shift(Mnemonic::Sllg, scratch, scratch, 1);
    cg.gen_vrx(Mnemonic::Vl, v1, MemRef::based(src, 0).with_index(scratch), 0);
    cg.gen_vrx(Mnemonic::Vl, v2, MemRef::based(src, 16).with_index(scratch), 0);
    // Pack with saturation; CC0 means every element fit.
    cg.gen_vrr(Mnemonic::Vpkls, &[vout, v1, v2], 1);
    cg.gen_branch(CondCode(0b0111), saturated);
    cg.emit(Insn::new(
        Mnemonic::Vst,
        vec![
            Operand::Reg(vout),
            Operand::Mem(MemRef::based(dst, 0).with_index(count)),
            Operand::Mask(0),
        ],
    ));
    cg.gen_ri(Mnemonic::Aghi, count, TRANSLATE_VECTOR_CHARS);
    cg.gen_branch(CondCode::ALWAYS, loop_top);

    cg.place_label(saturated);
    // Exact saturated-lane bookkeeping: compare both input vectors
    // against the limit, pack the per-halfword masks down to one byte per
    // lane, and find the first nonzero byte. Only the chars before that
    // lane count as translated.
    cg.gen_vrr(Mnemonic::Vchl, &[v1, v1, vlimit], 1);
    cg.gen_vrr(Mnemonic::Vchl, &[v2, v2, vlimit], 1);
    cg.gen_vrr(Mnemonic::Vpkls, &[vtest, v1, v2], 1);
    cg.gen_vrr(Mnemonic::Vfene, &[vtest, vtest, vzero], 0);
    cg.gen_vrr(Mnemonic::Vlgv, &[scratch, vtest], 7);
    cg.gen_rr(Mnemonic::Agr, count, scratch);
    cg.gen_branch(CondCode::ALWAYS, done);

    cg.place_label(tail);
    // Scalar residue: translate the remaining <16 chars one at a time,
    // stopping at the first out-of-range value.
    let ch = cg.allocate_register(RegisterKind::Gpr);
    let tail_loop = cg.new_label();
    cg.place_label(tail_loop);
    cg.gen_rr(Mnemonic::Lgr, scratch, len);
    cg.gen_rr(Mnemonic::Sgr, scratch, count);
    cg.gen_rr(Mnemonic::Ltgr, scratch, scratch);
    cg.gen_branch(CondCode::EQ, done);
    cg.gen_rr(Mnemonic::Lgr, scratch, count);
    cg.gen_shift(Mnemonic::Sllg, scratch, scratch, 1);
    cg.gen_rx(Mnemonic::Llh, ch, MemRef::based(src, 0).with_index(scratch));
    cg.gen_ril(Mnemonic::Clfi, ch, limit as i64);
    cg.gen_branch(CondCode::GE, done);
    cg.gen_rx(Mnemonic::Stc, ch, MemRef::based(dst, 0).with_index(count));
    cg.gen_ri(Mnemonic::Aghi, count, 1);
    cg.gen_branch(CondCode::ALWAYS, tail_loop);

    cg.place_label(done);
    cg.end_internal_control_flow()?;
    cg.stop_using(v1);
    cg.stop_using(v2);
    cg.stop_using(vout);
    cg.stop_using(vlimit);
    cg.stop_using(vtest);
    cg.stop_using(vzero);
    cg.stop_using(scratch);
    cg.stop_using(ch);
    Ok(count)
}

/// Evaluator for BitPermute. Children: [value, selector array address,
/// length]. Builds the permuted result bit by bit (or all at once with
/// the vector bit-permute when the shape allows).
pub fn evaluate_bitpermute<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    use crate::core::target::{BIT_PERMUTE_UNROLL_MAX, BIT_PERMUTE_VECTOR_MAX};

    il_assert!(
        node.child_count() == 3,
        "evaluate_bitpermute",
        "bitpermute with {} children",
        node.child_count()
    );
    let value_node = node.child(0);
    let array_node = node.child(1);
    let len_node = node.child(2);

    let value = cg.evaluate(value_node)?;
    let array = cg.evaluate(array_node)?;
    let result = cg.allocate_register(RegisterKind::Gpr);

    let const_len = len_node.int_value().map(|l| l as usize);

    match const_len {
        Some(len) if len <= BIT_PERMUTE_UNROLL_MAX => {
            // Fully unrolled shift/mask/or sequence.
            cg.gen_rr(Mnemonic::Xgr, result, result);
            let sel = cg.allocate_register(RegisterKind::Gpr);
            let bit = cg.allocate_register(RegisterKind::Gpr);
            for i in 0..len {
                cg.gen_rx(Mnemonic::Llc, sel, MemRef::based(array, i as i64));
                cg.emit(Insn::new(
                    Mnemonic::Srlg,
                    vec![Operand::Reg(bit), Operand::Reg(value), Operand::Reg(sel)],
                ));
                cg.gen_ri(Mnemonic::Nill, bit, 1);
                if i > 0 {
                    cg.gen_shift(Mnemonic::Sllg, bit, bit, i as i64);
                }
                cg.gen_rr(Mnemonic::Ogr, result, bit);
            }
            cg.stop_using(sel);
            cg.stop_using(bit);
        }
        Some(len)
            if len <= BIT_PERMUTE_VECTOR_MAX && cg.options.arch.is_at_least(ArchLevel::Z13) =>
        {
            // One vector bit-permute. The architecture numbers bits
            // big-endian, so the selector order reverses and each index
            // complements against 63 before the instruction sees it.
            let vsel = cg.allocate_register(RegisterKind::Vrf);
            let vval = cg.allocate_register(RegisterKind::Vrf);
            let vperm = cg.allocate_register(RegisterKind::Vrf);
            let v63 = cg.allocate_register(RegisterKind::Vrf);
            let lenreg = constants::load_int64_constant(cg, len as i64 - 1);
            cg.emit(Insn::new(
                Mnemonic::Vll,
                vec![
                    Operand::Reg(vsel),
                    Operand::Reg(lenreg),
                    Operand::Mem(MemRef::based(array, 0)),
                ],
            ));
            cg.emit(Insn::new(
                Mnemonic::Vrepi,
                vec![Operand::Reg(v63), Operand::Imm(63), Operand::Mask(0)],
            ));
            // Complement the bit indices; VBPERM selects by big-endian
            // numbering.
            cg.gen_vrr(Mnemonic::Vs, &[vsel, v63, vsel], 0);
            cg.gen_vrr(Mnemonic::Vlvgp, &[vval, value, value], 0);
            cg.gen_vrr(Mnemonic::Vbperm, &[vperm, vval, vsel], 0);
            // The permuted bits land in halfword lane 3.
            cg.gen_vrr(Mnemonic::Vlgv, &[result, vperm], 3);
            cg.stop_using(vsel);
            cg.stop_using(vval);
            cg.stop_using(vperm);
            cg.stop_using(v63);
            cg.stop_using(lenreg);
        }
        _ => {
            // Counted loop, one bit per iteration.
            let len = cg.evaluate(len_node)?;
            let counter = cg.allocate_register(RegisterKind::Gpr);
            let sel = cg.allocate_register(RegisterKind::Gpr);
            let bit = cg.allocate_register(RegisterKind::Gpr);
            let index = cg.allocate_register(RegisterKind::Gpr);
            let loop_top = cg.new_label();
            let done = cg.new_label();
            cg.begin_internal_control_flow();
            cg.gen_rr(Mnemonic::Xgr, result, result);
            cg.gen_rr(Mnemonic::Xgr, index, index);
            cg.gen_rr(Mnemonic::Ltgr, counter, len);
            cg.gen_branch(CondCode::EQ, done);
            cg.place_label(loop_top);
            cg.gen_rx(Mnemonic::Llc, sel, MemRef::based(array, 0).with_index(index));
            cg.emit(Insn::new(
                Mnemonic::Srlg,
                vec![Operand::Reg(bit), Operand::Reg(value), Operand::Reg(sel)],
            ));
            cg.gen_ri(Mnemonic::Nill, bit, 1);
            cg.emit(Insn::new(
                Mnemonic::Sllg,
                vec![Operand::Reg(bit), Operand::Reg(bit), Operand::Reg(index)],
            ));
            cg.gen_rr(Mnemonic::Ogr, result, bit);
            cg.gen_ri(Mnemonic::Aghi, index, 1);
            cg.emit(Insn::new(
                Mnemonic::Brct,
                vec![Operand::Reg(counter), Operand::Label(loop_top)],
            ));
            cg.place_label(done);
            cg.end_internal_control_flow()?;
            cg.stop_using(counter);
            cg.stop_using(sel);
            cg.stop_using(bit);
            cg.stop_using(index);
        }
    }

    cg.decrement_ref_count(value_node)?;
    cg.decrement_ref_count(array_node)?;
    if len_node.is_unevaluated() && len_node.is_int_const() {
        cg.recursively_decrement(len_node)?;
    } else {
        cg.decrement_ref_count(len_node)?;
    }
    Ok(Some(result))
}
