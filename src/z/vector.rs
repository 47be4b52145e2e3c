// This module implements the 128-bit vector evaluator family plus the scalar
// floating-point arithmetic that shares its fused-multiply-add recognizer. Most vector
// arithmetic/compare/logical operations map one-to-one onto native instructions
// parameterized by the element-size mask; the operations with no native form are emulated
// by composition: 64-bit lane multiply from 32-bit even/odd multiplies with shifts and
// adds (low 64 bits per lane, wraparound semantics), and 64-bit lane divide/remainder by
// extracting each lane to a scalar register pair, dividing, and reinserting. FMA
// recognition rewrites add/subtract-of-a-multiply into the fused instruction when the
// multiply is single-use and unevaluated; fusing changes observable intermediate rounding,
// so it is gated on the strict-FP option with a per-node opt-in override. Element
// extraction and insertion handle the double-precision bit-reinterpret through a
// general-register move and the 31-bit target's register-pair split with doubled indices.

//! Vector (SIMD) evaluators and scalar FP arithmetic with FMA fusion.

use log::trace;

use crate::core::codegen::{CodeGenerator, Literal};
use crate::core::error::{il_assert, CodegenError, CodegenResult};
use crate::core::il::{DataType, IlNode, OpCode, VectorElem};
use crate::core::insn::{Insn, Mnemonic, Operand, Pin, RegDep};
use crate::core::register::{RegisterKind, VirtReg};
use crate::core::target::ArchLevel;

fn vector_elem(node: &IlNode<'_>) -> CodegenResult<VectorElem> {
    match node.data_type() {
        DataType::Vector(elem) => Ok(elem),
        other => Err(CodegenError::internal(
            "vector",
            format!("vector opcode with non-vector type {other:?}"),
        )),
    }
}

/// Facility gate shared by every vector evaluator. Facility selection is
/// per compilation target, so a violation is an assert, not a branch.
fn require_vector_facility(cg: &CodeGenerator<'_>, elem: VectorElem) -> CodegenResult<()> {
    let required = match elem {
        VectorElem::Float => ArchLevel::Z14,
        _ => ArchLevel::Z13,
    };
    if !cg.options.arch.is_at_least(required) {
        return Err(CodegenError::FacilityRequired {
            what: "vector operation",
            required,
            actual: cg.options.arch,
        });
    }
    Ok(())
}

/// Evaluator for the vector binary arithmetic/logical opcodes.
pub fn evaluate_vector_binary<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let elem = vector_elem(node)?;
    require_vector_facility(cg, elem)?;
    let mask = elem.mask();

    if elem.is_float() {
        if let Some(reg) = try_vector_fma(node, cg, elem)? {
            return Ok(Some(reg));
        }
        let mnemonic = match node.op() {
            OpCode::VAdd => Mnemonic::Vfa,
            OpCode::VSub => Mnemonic::Vfs,
            OpCode::VMul => Mnemonic::Vfm,
            OpCode::VDiv => Mnemonic::Vfd,
            other => {
                return Err(CodegenError::internal(
                    "evaluate_vector_binary",
                    format!("no float form for {other:?}"),
                ))
            }
        };
        return emit_simple_vector_binary(node, cg, mnemonic, mask);
    }

    match node.op() {
        OpCode::VAdd => emit_simple_vector_binary(node, cg, Mnemonic::Va, mask),
        OpCode::VSub => emit_simple_vector_binary(node, cg, Mnemonic::Vs, mask),
        OpCode::VAnd => emit_simple_vector_binary(node, cg, Mnemonic::Vn, 0),
        OpCode::VOr => emit_simple_vector_binary(node, cg, Mnemonic::Vo, 0),
        OpCode::VXor => emit_simple_vector_binary(node, cg, Mnemonic::Vx, 0),
        OpCode::VMul => {
            if elem == VectorElem::Int64 {
                return emulate_vector_multiply64(node, cg);
            }
            emit_simple_vector_binary(node, cg, Mnemonic::Vml, mask)
        }
        OpCode::VDiv | OpCode::VRem => emulate_vector_divide64(node, cg),
        other => Err(CodegenError::internal(
            "evaluate_vector_binary",
            format!("bad opcode {other:?}"),
        )),
    }
}

fn emit_simple_vector_binary<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
    mnemonic: Mnemonic,
    mask: u8,
) -> CodegenResult<Option<VirtReg>> {
    let left = node.first_child();
    let right = node.second_child();
    let a = cg.evaluate(left)?;
    let b = cg.evaluate(right)?;
    let result = cg.allocate_register(RegisterKind::Vrf);
    cg.gen_vrr(mnemonic, &[result, a, b], mask);
    cg.decrement_ref_count(left)?;
    cg.decrement_ref_count(right)?;
    Ok(Some(result))
}

/// FMA recognition: `add(mul(a, b), c)` / `sub(mul(a, b), c)` fuses when
/// the multiply is single-use, unevaluated, and rounding-observable fusion
/// is permitted.
fn try_vector_fma<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
    elem: VectorElem,
) -> CodegenResult<Option<VirtReg>> {
    let subtract = match node.op() {
        OpCode::VAdd => false,
        OpCode::VSub => true,
        _ => return Ok(None),
    };
    let left = node.first_child();
    let right = node.second_child();
    // The multiply may sit on either side of an add; a subtract only
    // fuses the minuend (a*b - c).
    let (mul, addend) = if is_fusable_multiply(left, cg) {
        (left, right)
    } else if !subtract && is_fusable_multiply(right, cg) {
        (right, left)
    } else {
        return Ok(None);
    };
    trace!("vector FMA fusion ({})", if subtract { "vfms" } else { "vfma" });
    let a_node = mul.first_child();
    let b_node = mul.second_child();
    let a = cg.evaluate(a_node)?;
    let b = cg.evaluate(b_node)?;
    let c = cg.evaluate(addend)?;
    let result = cg.allocate_register(RegisterKind::Vrf);
    let mnemonic = if subtract { Mnemonic::Vfms } else { Mnemonic::Vfma };
    cg.gen_vrr(mnemonic, &[result, a, b, c], elem.mask());
    cg.decrement_ref_count(a_node)?;
    cg.decrement_ref_count(b_node)?;
    cg.decrement_ref_count(mul)?;
    cg.decrement_ref_count(addend)?;
    Ok(Some(result))
}

fn is_fusable_multiply(node: &IlNode<'_>, cg: &CodeGenerator<'_>) -> bool {
    let is_mul = match node.op() {
        OpCode::VMul => matches!(node.data_type(), DataType::Vector(e) if e.is_float()),
        OpCode::FMul | OpCode::DMul => true,
        _ => false,
    };
    is_mul
        && node.is_single_use()
        && node.is_unevaluated()
        && (!cg.options.strict_fp || node.flags.relaxed_fp)
}

/// 64-bit lane multiply has no native instruction. Composed from 32-bit
/// even/odd multiplies: with each doubleword lane split as (high, low),
///   result = low*low + ((low*high + high*low) << 32)
/// keeping only the low 64 bits per lane (wraparound semantics).
fn emulate_vector_multiply64<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let left = node.first_child();
    let right = node.second_child();
    let a = cg.evaluate(left)?;
    let b = cg.evaluate(right)?;

    let dw = VectorElem::Int64.mask();
    let fw = VectorElem::Int32.mask();
    let a_high = cg.allocate_register(RegisterKind::Vrf);
    let b_high = cg.allocate_register(RegisterKind::Vrf);
    let cross1 = cg.allocate_register(RegisterKind::Vrf);
    let cross2 = cg.allocate_register(RegisterKind::Vrf);
    let result = cg.allocate_register(RegisterKind::Vrf);

    trace!("emulating 64-bit vector lane multiply");
    // High halves shifted into the odd (low) fullword positions.
    cg.emit(Insn::new(
        Mnemonic::Vesrl,
        vec![Operand::Reg(a_high), Operand::Reg(a), Operand::Imm(32), Operand::Mask(dw)],
    ));
    cg.emit(Insn::new(
        Mnemonic::Vesrl,
        vec![Operand::Reg(b_high), Operand::Reg(b), Operand::Imm(32), Operand::Mask(dw)],
    ));
    // Odd-fullword multiplies: aH*bL and aL*bH as 64-bit products.
    cg.gen_vrr(Mnemonic::Vmlo, &[cross1, a_high, b], fw);
    cg.gen_vrr(Mnemonic::Vmlo, &[cross2, a, b_high], fw);
    cg.gen_vrr(Mnemonic::Va, &[cross1, cross1, cross2], dw);
    cg.emit(Insn::new(
        Mnemonic::Vesl,
        vec![Operand::Reg(cross1), Operand::Reg(cross1), Operand::Imm(32), Operand::Mask(dw)],
    ));
    // Low*low, then fold the shifted cross terms in.
    cg.gen_vrr(Mnemonic::Vmlo, &[result, a, b], fw);
    cg.gen_vrr(Mnemonic::Va, &[result, result, cross1], dw);

    cg.stop_using(a_high);
    cg.stop_using(b_high);
    cg.stop_using(cross1);
    cg.stop_using(cross2);
    cg.decrement_ref_count(left)?;
    cg.decrement_ref_count(right)?;
    Ok(Some(result))
}

/// No vectorized integer divide exists at any lane width: extract each
/// lane to a scalar register pair, divide, and reinsert the quotient or
/// remainder.
fn emulate_vector_divide64<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let elem = vector_elem(node)?;
    if elem != VectorElem::Int64 {
        // Only the 64-bit lane shape is lowered; narrower lane divides
        // have no consumer in this target's IL.
        return Err(CodegenError::UnimplementedOpCode { opcode: node.op() });
    }
    let wants_remainder = node.op() == OpCode::VRem;
    let left = node.first_child();
    let right = node.second_child();
    let a = cg.evaluate(left)?;
    let b = cg.evaluate(right)?;
    let result = cg.allocate_register(RegisterKind::Vrf);

    for lane in 0..2u8 {
        let dividend = cg.allocate_register(RegisterKind::GprPair);
        let divisor = cg.allocate_register(RegisterKind::Gpr);
        cg.gen_vrr(Mnemonic::Vlgv, &[dividend, a], lane | 0x30);
        cg.gen_vrr(Mnemonic::Vlgv, &[divisor, b], lane | 0x30);
        // DSGR: quotient lands in the odd register, remainder in the even.
        cg.emit(
            Insn::new(
                Mnemonic::Dsgr,
                vec![Operand::Reg(dividend), Operand::Reg(divisor)],
            )
            .with_deps(vec![RegDep {
                vreg: dividend,
                pin: Pin::EvenOddPair,
            }]),
        );
        // Pull out the even (remainder) or odd (quotient) half; the
        // external allocator resolves the half from the pair binding.
        let half = cg.allocate_register(RegisterKind::Gpr);
        cg.emit(Insn::new(
            Mnemonic::Lgr,
            vec![
                Operand::Reg(half),
                Operand::Reg(dividend),
                Operand::Imm(if wants_remainder { 0 } else { 1 }),
            ],
        ));
        cg.gen_vrr(Mnemonic::Vlvg, &[result, half], lane | 0x30);
        cg.stop_using(dividend);
        cg.stop_using(divisor);
        cg.stop_using(half);
    }

    cg.decrement_ref_count(left)?;
    cg.decrement_ref_count(right)?;
    Ok(Some(result))
}

/// Evaluator for the vector unary opcodes.
pub fn evaluate_vector_unary<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let elem = vector_elem(node)?;
    require_vector_facility(cg, elem)?;
    let child = node.first_child();
    let src = cg.evaluate(child)?;
    let result = cg.allocate_register(RegisterKind::Vrf);
    match node.op() {
        OpCode::VNot => {
            cg.gen_vrr(Mnemonic::Vno, &[result, src, src], 0);
        }
        OpCode::VNeg => {
            cg.gen_vrr(Mnemonic::Vlc, &[result, src], elem.mask());
        }
        other => {
            return Err(CodegenError::internal(
                "evaluate_vector_unary",
                format!("bad opcode {other:?}"),
            ))
        }
    }
    cg.decrement_ref_count(child)?;
    Ok(Some(result))
}

/// Evaluator for vector compares: per-lane all-ones/all-zeros masks.
pub fn evaluate_vector_compare<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    use crate::core::il::CmpRel;
    let elem = vector_elem(node)?;
    require_vector_facility(cg, elem)?;
    let rel = node.op().compare_relation().ok_or_else(|| {
        CodegenError::internal("evaluate_vector_compare", "VCmp without relation")
    })?;
    let mask = elem.mask();
    let left = node.first_child();
    let right = node.second_child();
    let a = cg.evaluate(left)?;
    let b = cg.evaluate(right)?;
    let result = cg.allocate_register(RegisterKind::Vrf);

    // Only equal and signed greater exist natively; everything else is a
    // swap or a complement away.
    match rel {
        CmpRel::Eq => {
            cg.gen_vrr(Mnemonic::Vceq, &[result, a, b], mask);
        }
        CmpRel::Ne => {
            cg.gen_vrr(Mnemonic::Vceq, &[result, a, b], mask);
            cg.gen_vrr(Mnemonic::Vno, &[result, result, result], 0);
        }
        CmpRel::Gt => {
            cg.gen_vrr(Mnemonic::Vch, &[result, a, b], mask);
        }
        CmpRel::Lt => {
            cg.gen_vrr(Mnemonic::Vch, &[result, b, a], mask);
        }
        CmpRel::Ge => {
            cg.gen_vrr(Mnemonic::Vch, &[result, b, a], mask);
            cg.gen_vrr(Mnemonic::Vno, &[result, result, result], 0);
        }
        CmpRel::Le => {
            cg.gen_vrr(Mnemonic::Vch, &[result, a, b], mask);
            cg.gen_vrr(Mnemonic::Vno, &[result, result, result], 0);
        }
    }
    cg.decrement_ref_count(left)?;
    cg.decrement_ref_count(right)?;
    Ok(Some(result))
}

/// Evaluator for splat (broadcast a scalar to all lanes).
pub fn evaluate_splat<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let elem = vector_elem(node)?;
    require_vector_facility(cg, elem)?;
    let child = node.first_child();
    let result = cg.allocate_register(RegisterKind::Vrf);
    let mask = elem.mask();

    // Cheapest: broadcast-load straight from memory or the literal pool.
    if child.is_foldable_memory_operand() && !child.flags.byte_reversed {
        let mr = cg.memref_for(child)?;
        cg.gen_vrx(Mnemonic::Vlrep, result, mr, mask);
        cg.decrement_ref_count(child)?;
        return Ok(Some(result));
    }
    if let Some(value) = child.int_value() {
        if child.is_unevaluated() {
            if (i16::MIN as i64..=i16::MAX as i64).contains(&value) {
                cg.emit(Insn::new(
                    Mnemonic::Vrepi,
                    vec![Operand::Reg(result), Operand::Imm(value), Operand::Mask(mask)],
                ));
            } else {
                let lit = match elem {
                    VectorElem::Int64 => cg.literal(Literal::Int64(value)),
                    _ => cg.literal(Literal::Int32(value as i32)),
                };
                cg.emit(Insn::new(
                    Mnemonic::Vlrep,
                    vec![Operand::Reg(result), Operand::Lit(lit), Operand::Mask(mask)],
                ));
            }
            cg.recursively_decrement(child)?;
            return Ok(Some(result));
        }
    }

    let src = cg.evaluate(child)?;
    match src.kind {
        RegisterKind::Fpr => {
            // FPRs overlay the low half of the vector file: replicate the
            // resident lane directly, no cross-file move.
            cg.gen_vrr(Mnemonic::Vrep, &[result, src], mask);
        }
        RegisterKind::GprPair => {
            // 64-bit scalar arriving as a pair on the 31-bit target.
            cg.gen_vrr(Mnemonic::Vlvgp, &[result, src, src], 0);
            cg.gen_vrr(Mnemonic::Vrep, &[result, result], mask);
        }
        _ => {
            cg.gen_vrr(Mnemonic::Vlvg, &[result, src], mask);
            cg.gen_vrr(Mnemonic::Vrep, &[result, result], mask);
        }
    }
    cg.decrement_ref_count(child)?;
    Ok(Some(result))
}

/// Evaluator for element extraction to a scalar.
pub fn evaluate_get_element<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let vec_node = node.first_child();
    let index_node = node.second_child();
    let elem = vector_elem(vec_node)?;
    require_vector_facility(cg, elem)?;
    let vec = cg.evaluate(vec_node)?;
    let index = index_node.int_value().ok_or_else(|| {
        CodegenError::internal("evaluate_get_element", "non-constant lane index")
    })?;

    let result = if elem == VectorElem::Double {
        // Extraction targets a general register; a double value then
        // bit-reinterprets through the general-to-float move.
        let gpr = cg.allocate_register(RegisterKind::Gpr);
        cg.gen_vrr(Mnemonic::Vlgv, &[gpr, vec], (index as u8) | 0x30);
        let fpr = cg.allocate_register(RegisterKind::Fpr);
        cg.gen_rr(Mnemonic::Ldgr, fpr, gpr);
        cg.stop_using(gpr);
        fpr
    } else if elem == VectorElem::Int64 && !cg.options.is_64bit {
        // 64-bit lane on the 31-bit target: split across a register pair
        // with doubled word-element indices.
        let pair = cg.allocate_register(RegisterKind::GprPair);
        let word = VectorElem::Int32.mask() << 4;
        cg.gen_vrr(Mnemonic::Vlgv, &[pair, vec], (index as u8 * 2) | word);
        cg.gen_vrr(Mnemonic::Vlgv, &[pair, vec], (index as u8 * 2 + 1) | word);
        pair
    } else {
        let gpr = cg.allocate_register(RegisterKind::Gpr);
        cg.gen_vrr(Mnemonic::Vlgv, &[gpr, vec], (index as u8) | (elem.mask() << 4));
        gpr
    };

    cg.decrement_ref_count(vec_node)?;
    cg.recursively_decrement(index_node)?;
    Ok(Some(result))
}

/// Evaluator for element insertion.
pub fn evaluate_set_element<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let elem = vector_elem(node)?;
    require_vector_facility(cg, elem)?;
    il_assert!(
        node.child_count() == 3,
        "evaluate_set_element",
        "vsetelem with {} children",
        node.child_count()
    );
    let vec_node = node.child(0);
    let value_node = node.child(1);
    let index_node = node.child(2);

    let vec = cg.clobber_evaluate(vec_node)?;
    let value = cg.evaluate(value_node)?;
    let index = index_node.int_value().ok_or_else(|| {
        CodegenError::internal("evaluate_set_element", "non-constant lane index")
    })?;

    let scalar = if value.kind == RegisterKind::Fpr {
        let gpr = cg.allocate_register(RegisterKind::Gpr);
        cg.gen_rr(Mnemonic::Lgdr, gpr, value);
        gpr
    } else {
        value
    };
    cg.gen_vrr(Mnemonic::Vlvg, &[vec, scalar], (index as u8) | (elem.mask() << 4));

    cg.decrement_ref_count(vec_node)?;
    cg.decrement_ref_count(value_node)?;
    cg.recursively_decrement(index_node)?;
    Ok(Some(vec))
}

/// Evaluator for the across-lanes sum reduction.
pub fn evaluate_vector_sum<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let vec_node = node.first_child();
    let elem = vector_elem(vec_node)?;
    require_vector_facility(cg, elem)?;
    let vec = cg.evaluate(vec_node)?;
    let acc = cg.allocate_register(RegisterKind::Vrf);
    let zero = cg.allocate_register(RegisterKind::Vrf);
    cg.emit(Insn::new(
        Mnemonic::Vgbm,
        vec![Operand::Reg(zero), Operand::Imm(0)],
    ));
    let mnemonic = match elem {
        VectorElem::Int8 | VectorElem::Int16 => Mnemonic::Vsum,
        VectorElem::Int32 => Mnemonic::Vsumg,
        VectorElem::Int64 => Mnemonic::Vsumq,
        other => {
            return Err(CodegenError::internal(
                "evaluate_vector_sum",
                format!("no sum reduction for {other:?} lanes"),
            ))
        }
    };
    cg.gen_vrr(mnemonic, &[acc, vec, zero], elem.mask());
    let result = cg.allocate_register(RegisterKind::Gpr);
    cg.gen_vrr(Mnemonic::Vlgv, &[result, acc], 0x31);
    cg.stop_using(acc);
    cg.stop_using(zero);
    cg.decrement_ref_count(vec_node)?;
    Ok(Some(result))
}

// ----------------------------------------------------------------------
// Scalar floating point (shares the FMA recognizer)
// ----------------------------------------------------------------------

/// Evaluator for scalar FP add/sub/mul, with fused multiply-add
/// recognition mirroring the vector path.
pub fn evaluate_float_binary<'a>(
    node: &'a IlNode<'a>,
    cg: &mut CodeGenerator<'a>,
) -> CodegenResult<Option<VirtReg>> {
    let double = matches!(node.op(), OpCode::DAdd | OpCode::DSub | OpCode::DMul);
    let left = node.first_child();
    let right = node.second_child();

    let subtract = matches!(node.op(), OpCode::FSub | OpCode::DSub);
    if matches!(node.op(), OpCode::FAdd | OpCode::DAdd | OpCode::FSub | OpCode::DSub) {
        let (mul, addend) = if is_fusable_multiply(left, cg) {
            (Some(left), right)
        } else if !subtract && is_fusable_multiply(right, cg) {
            (Some(right), left)
        } else {
            (None, left)
        };
        if let Some(mul) = mul {
            trace!("scalar FMA fusion");
            let a_node = mul.first_child();
            let b_node = mul.second_child();
            // The accumulator operand is overwritten by the fused form.
            let acc = cg.clobber_evaluate(addend)?;
            let a = cg.evaluate(a_node)?;
            let b = cg.evaluate(b_node)?;
            let mnemonic = match (double, subtract) {
                (true, false) => Mnemonic::Madb,
                (true, true) => Mnemonic::Msdb,
                (false, false) => Mnemonic::Maeb,
                (false, true) => Mnemonic::Mseb,
            };
            cg.emit(Insn::new(
                mnemonic,
                vec![Operand::Reg(acc), Operand::Reg(a), Operand::Reg(b)],
            ));
            cg.decrement_ref_count(a_node)?;
            cg.decrement_ref_count(b_node)?;
            cg.decrement_ref_count(mul)?;
            cg.decrement_ref_count(addend)?;
            return Ok(Some(acc));
        }
    }

    let dest = cg.clobber_evaluate(left)?;
    let src = cg.evaluate(right)?;
    let mnemonic = match (node.op(), double) {
        (OpCode::FAdd, _) => Mnemonic::Aebr,
        (OpCode::DAdd, _) => Mnemonic::Adbr,
        (OpCode::FSub, _) => Mnemonic::Sebr,
        (OpCode::DSub, _) => Mnemonic::Sdbr,
        (OpCode::FMul, _) => Mnemonic::Meebr,
        (OpCode::DMul, _) => Mnemonic::Mdbr,
        (other, _) => {
            return Err(CodegenError::internal(
                "evaluate_float_binary",
                format!("bad opcode {other:?}"),
            ))
        }
    };
    cg.gen_rr(mnemonic, dest, src);
    cg.decrement_ref_count(left)?;
    cg.decrement_ref_count(right)?;
    Ok(Some(dest))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reference model of the 64-bit lane multiply emulation, checked
    /// against native wrapping multiplication per lane.
    fn emulated_mul64(a: u64, b: u64) -> u64 {
        let a_l = a & 0xffff_ffff;
        let a_h = a >> 32;
        let b_l = b & 0xffff_ffff;
        let b_h = b >> 32;
        let low = a_l.wrapping_mul(b_l);
        let cross = a_h.wrapping_mul(b_l).wrapping_add(a_l.wrapping_mul(b_h));
        low.wrapping_add(cross << 32)
    }

    #[test]
    fn test_multiply64_emulation_model() {
        for &(a, b) in &[
            (3u64, 5u64),
            (0xffff_ffff_ffff_ffff, 2),
            (0x1_0000_0001, 0x1_0000_0001),
            (0xdead_beef_cafe_f00d, 0x0123_4567_89ab_cdef),
            (u64::MAX, u64::MAX),
        ] {
            assert_eq!(emulated_mul64(a, b), a.wrapping_mul(b));
        }
    }
}
