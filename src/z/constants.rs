// This module implements the constant materializer: loading an integer, address, or float
// constant into a register with the fewest bytes / cheapest instruction available. The
// 32-bit and 64-bit ladders try short-immediate forms first, then extended immediates,
// then half-selective forms (high-zero / low-zero single loads), then a position-relative
// literal-pool load when the facility allows and the compilation is not relocatable, and
// only then the two-instruction high+low assembly. Zero is special-cased to a register-
// clear XOR when clobbering the condition code is acceptable; callers in predicated
// (conditional-move) sequences pass cc_clobber_ok=false to keep the CC intact. Patchable
// address constants must come out as one of the two exact recognized sequences so the
// runtime patching logic can overwrite the embedded immediate safely.

//! Constant materialization: cheapest-form integer/address/float loads.

use log::trace;

use crate::core::codegen::{CodeGenerator, Literal};
use crate::core::error::{CodegenError, CodegenResult};
use crate::core::il::{IlNode, OpCode};
use crate::core::insn::Mnemonic;
use crate::core::register::{RegisterKind, VirtReg};
use crate::core::target::{self, ArchLevel};

/// Evaluator for every *Const opcode.
pub fn evaluate_const<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    match node.op() {
        OpCode::BConst | OpCode::SConst | OpCode::IConst => {
            let value = expect_int(node)?;
            let reg = cg.allocate_register(RegisterKind::Gpr);
            materialize_int32(cg, reg, value as i32, true);
            Ok(Some(reg))
        }
        OpCode::LConst => {
            let value = expect_int(node)?;
            let reg = cg.allocate_register(RegisterKind::Gpr);
            materialize_int64(cg, reg, value, true);
            Ok(Some(reg))
        }
        OpCode::AConst => {
            let reg = cg.allocate_register(RegisterKind::Gpr);
            materialize_address(cg, reg, node)?;
            Ok(Some(reg))
        }
        OpCode::FConst => {
            let value = node
                .float_value()
                .ok_or_else(|| CodegenError::internal("evaluate_const", "FConst without payload"))?;
            let reg = cg.allocate_register(RegisterKind::Fpr);
            let lit = cg.literal(Literal::Float(value));
            cg.gen_ril_lit(Mnemonic::Le, reg, lit);
            Ok(Some(reg))
        }
        OpCode::DConst => {
            let value = node.double_value().ok_or_else(|| {
                CodegenError::internal("evaluate_const", "DConst without payload")
            })?;
            let reg = cg.allocate_register(RegisterKind::Fpr);
            let lit = cg.literal(Literal::Double(value));
            cg.gen_ril_lit(Mnemonic::Ld, reg, lit);
            Ok(Some(reg))
        }
        other => Err(CodegenError::internal(
            "evaluate_const",
            format!("not a constant opcode: {other:?}"),
        )),
    }
}

fn expect_int(node: &IlNode<'_>) -> CodegenResult<i64> {
    node.int_value()
        .ok_or_else(|| CodegenError::internal("constants", "integer constant without payload"))
}

/// Load a 32-bit constant into `reg` using the cheapest form.
///
/// `cc_clobber_ok` permits the XR register-clear idiom for zero; predicated
/// sequences must pass false so the governing condition code survives.
pub fn materialize_int32(cg: &mut CodeGenerator<'_>, reg: VirtReg, value: i32, cc_clobber_ok: bool) {
    if value == 0 && cc_clobber_ok {
        cg.gen_rr(Mnemonic::Xr, reg, reg);
        cg.note_cc_result(reg);
        return;
    }
    if target::fits_i16(value as i64) {
        cg.gen_ri(Mnemonic::Lhi, reg, value as i64);
        return;
    }
    // Extended-immediate forms are baseline on every supported target.
    cg.gen_ril(Mnemonic::Iilf, reg, (value as u32) as i64);
}

/// Load a 64-bit constant into `reg` using the cheapest form.
///
/// The ladder order is load-bearing: each rung is strictly cheaper than the
/// ones after it, and the two-instruction assembly is reached only when no
/// single instruction covers the value.
pub fn materialize_int64(cg: &mut CodeGenerator<'_>, reg: VirtReg, value: i64, cc_clobber_ok: bool) {
    let low32 = value as u32;
    let high32 = (value as u64 >> 32) as u32;

    if value == 0 && cc_clobber_ok {
        cg.gen_rr(Mnemonic::Xgr, reg, reg);
        cg.note_cc_result(reg);
        return;
    }
    if target::fits_i16(value) {
        cg.gen_ri(Mnemonic::Lghi, reg, value);
        return;
    }
    if target::fits_u16(value) {
        cg.gen_ri(Mnemonic::Llill, reg, value);
        return;
    }
    if target::fits_i32(value) {
        cg.gen_ril(Mnemonic::Lgfi, reg, value);
        return;
    }
    if high32 == 0 {
        // High half zero, low half arbitrary: one zero-extending load.
        cg.gen_ril(Mnemonic::Llilf, reg, low32 as i64);
        return;
    }
    if low32 == 0 {
        // Low half zero, high half arbitrary: one high-half load.
        cg.gen_ril(Mnemonic::Llihf, reg, high32 as i64);
        return;
    }
    if cg.options.arch.is_at_least(ArchLevel::Z10) && cg.options.is_64bit && !cg.options.relocatable
    {
        // Position-relative literal load beats the two-instruction pair.
        trace!("materialize 64-bit {value:#x} via literal pool");
        let lit = cg.literal(Literal::Int64(value));
        cg.gen_ril_lit(Mnemonic::Lgrl, reg, lit);
        return;
    }
    cg.gen_ril(Mnemonic::Llihf, reg, high32 as i64);
    cg.gen_ril(Mnemonic::Iilf, reg, low32 as i64);
}

/// Materialize an address constant, honoring relocation and patchability.
pub fn materialize_address<'a>(
    cg: &mut CodeGenerator<'a>,
    reg: VirtReg,
    node: &'a IlNode<'a>,
) -> CodegenResult<()> {
    let value = expect_int(node)?;

    if node.flags.patchable {
        materialize_patchable_address(cg, reg, value);
        return Ok(());
    }

    if let Some(symref) = node.symbol() {
        if symref.needs_relocation() {
            // Relocation-aware literal-pool path. The relocation kind comes
            // from the reference's priority-ordered tag classification.
            let reloc = symref.relocation_kind();
            trace!("address constant {value:#x} needs relocation {reloc:?}");
            let lit = cg.literal(Literal::Address { value, reloc });
            cg.gen_ril_lit(Mnemonic::Lgrl, reg, lit);
            return Ok(());
        }
    }

    materialize_int64(cg, reg, value, true);
    Ok(())
}

/// Emit one of the two exact patchable sequences for an address constant.
///
/// The runtime patcher recognizes IILF-at-fixed-offset, optionally followed
/// by IIHF, and overwrites the embedded immediates in place. Any other
/// shape here breaks patching, so the constant ladder is bypassed entirely.
fn materialize_patchable_address(cg: &mut CodeGenerator<'_>, reg: VirtReg, value: i64) {
    let low32 = value as u32;
    let high32 = (value as u64 >> 32) as u32;
    cg.gen_ril(Mnemonic::Iilf, reg, low32 as i64);
    if cg.options.is_64bit {
        // The high fill is part of the recognized pattern and is emitted
        // even for a zero high half: the patched-in address may not be.
        cg.gen_ril(Mnemonic::Iihf, reg, high32 as i64);
    }
}

/// Convenience for evaluators that need a constant in a fresh register.
pub fn load_int64_constant(cg: &mut CodeGenerator<'_>, value: i64) -> VirtReg {
    let reg = cg.allocate_register(RegisterKind::Gpr);
    materialize_int64(cg, reg, value, true);
    reg
}

/// Convenience for 32-bit contexts.
pub fn load_int32_constant(cg: &mut CodeGenerator<'_>, value: i32) -> VirtReg {
    let reg = cg.allocate_register(RegisterKind::Gpr);
    materialize_int32(cg, reg, value, true);
    reg
}
