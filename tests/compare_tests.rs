//! Integration tests for the comparison & branch fusion engine: state
//! selection order, mask remapping, and the consumption protocol.

use bumpalo::Bump;
use zsel::core::{
    ArchLevel, CmpRel, CodeGenerator, CodegenOptions, CodegenSession, CondCode, DataType,
    IlBuilder, Mnemonic, NodeFlags, OpCode, Operand, Symbol, SymbolRef,
};

fn setup(arena: &Bump) -> (CodegenSession<'_>, IlBuilder<'_>) {
    (CodegenSession::new(arena), IlBuilder::new(arena))
}

fn iload<'a>(il: &IlBuilder<'a>, name: &'static str) -> &'a zsel::core::IlNode<'a> {
    il.load(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::auto(name, 4)),
    )
}

fn branch_mask(insn: &zsel::core::Insn) -> Option<u8> {
    insn.operands.iter().find_map(|op| match op {
        Operand::Mask(m) => Some(*m),
        _ => None,
    })
}

#[test]
fn test_compare_zero_fuses_into_load_and_test() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let x = iload(&il, "x");
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Eq), x, il.iconst(0));
    cg.evaluate_statement(node).unwrap();
    // One instruction both loads and tests; no separate compare.
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Lt, Mnemonic::Brc]);
    assert_eq!(branch_mask(&cg.insns()[1]), Some(CondCode::EQ.0));
}

#[test]
fn test_compare_zero_64bit_promotion_uses_extending_test() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let flags = NodeFlags {
        needs_64bit_promotion: true,
        ..NodeFlags::default()
    };
    let x = il.load_with_flags(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::auto("x", 4)),
        flags,
    );
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Ne), x, il.iconst(0));
    cg.evaluate_statement(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Ltgf, Mnemonic::Brc]);
}

#[test]
fn test_memory_compare_immediate_selected_for_nonzero() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Lt), iload(&il, "x"), il.iconst(100));
    cg.evaluate_statement(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Chsi, Mnemonic::Brc]);
    assert_eq!(branch_mask(&cg.insns()[1]), Some(CondCode::LT.0));
}

#[test]
fn test_unsigned_memory_compare_immediate() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.if_cmp(OpCode::IfIUCmp(CmpRel::Lt), iload(&il, "x"), il.iconst(200));
    cg.evaluate_statement(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Clfhsi, Mnemonic::Brc]);
}

#[test]
fn test_byte_equality_uses_cli() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let b = il.load(
        OpCode::BLoad,
        DataType::Int8,
        SymbolRef::resolved(Symbol::auto("flag", 1)),
    );
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Eq), b, il.iconst(65));
    cg.evaluate_statement(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Cli, Mnemonic::Brc]);
}

#[test]
fn test_evaluated_operand_takes_fused_immediate_branch() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let x = iload(&il, "x");
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Lt), x, il.iconst(100));
    // The operand is already in a register: no memory form applies, and
    // the 8-bit immediate range allows the fused compare-and-branch.
    cg.evaluate(x).unwrap();
    cg.evaluate_statement(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::L, Mnemonic::Cij]);
}

#[test]
fn test_wide_immediate_on_evaluated_operand_compares_then_branches() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let x = iload(&il, "x");
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Gt), x, il.iconst(1000));
    cg.evaluate(x).unwrap();
    cg.evaluate_statement(node).unwrap();
    // Out of the 8-bit fused range, within the 16-bit compare range.
    assert_eq!(cg.mnemonics(), vec![Mnemonic::L, Mnemonic::Chi, Mnemonic::Brc]);
}

#[test]
fn test_cold_branch_suppresses_fusion() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let a = iload(&il, "a");
    let b = iload(&il, "b");
    cg.evaluate(a).unwrap();
    cg.evaluate(b).unwrap();
    let flags = NodeFlags {
        branch_to_cold: true,
        ..NodeFlags::default()
    };
    let node = il.if_cmp_with_flags(OpCode::IfICmp(CmpRel::Eq), a, b, flags);
    cg.evaluate_statement(node).unwrap();
    // The fused form's relative offset may not reach the cold region:
    // explicit compare plus branch instead.
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::L, Mnemonic::L, Mnemonic::Cr, Mnemonic::Brc]
    );
}

#[test]
fn test_register_compare_and_branch_fusion() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let a = iload(&il, "a");
    let b = iload(&il, "b");
    cg.evaluate(a).unwrap();
    cg.evaluate(b).unwrap();
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Gt), a, b);
    cg.evaluate_statement(node).unwrap();
    let insns = cg.insns();
    assert_eq!(insns[2].mnemonic, Mnemonic::Crj);
    assert_eq!(branch_mask(&insns[2]), Some(CondCode::GT.0));
}

#[test]
fn test_pre_z10_has_no_compare_and_branch() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            arch: ArchLevel::Z9,
            ..CodegenOptions::default()
        },
    );

    let a = iload(&il, "a");
    let b = iload(&il, "b");
    cg.evaluate(a).unwrap();
    cg.evaluate(b).unwrap();
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Gt), a, b);
    cg.evaluate_statement(node).unwrap();
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::L, Mnemonic::L, Mnemonic::Cr, Mnemonic::Brc]
    );
}

#[test]
fn test_memory_memory_equality_uses_clc() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ICmp(CmpRel::Eq),
        DataType::Int32,
        &[iload(&il, "a"), iload(&il, "b")],
    );
    cg.evaluate(node).unwrap();
    // CLC plus branchless materialization; no loads at all.
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::Clc, Mnemonic::Lhi, Mnemonic::Lochi]
    );
}

#[test]
fn test_signed_order_compare_rejects_clc() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ICmp(CmpRel::Lt),
        DataType::Int32,
        &[iload(&il, "a"), iload(&il, "b")],
    );
    cg.evaluate(node).unwrap();
    // Storage compares are unsigned; a signed order compare must not use
    // CLC. The right operand folds into a register-memory compare.
    assert!(cg.mnemonics().contains(&Mnemonic::C));
    assert!(!cg.mnemonics().contains(&Mnemonic::Clc));
}

#[test]
fn test_vft_word_compare_excluded_from_clc() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            compressed_refs: true,
            ..CodegenOptions::default()
        },
    );

    let flags = NodeFlags {
        is_vft_load: true,
        ..NodeFlags::default()
    };
    let a = il.load_with_flags(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::shadow("vft_a", 4)),
        flags.clone(),
    );
    let b = il.load_with_flags(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::shadow("vft_b", 4)),
        flags,
    );
    let node = il.node(OpCode::ICmp(CmpRel::Eq), DataType::Int32, &[a, b]);
    cg.evaluate(node).unwrap();
    assert!(!cg.mnemonics().contains(&Mnemonic::Clc));
    assert!(cg.mnemonics().contains(&Mnemonic::C));
}

#[test]
fn test_operand_swap_remaps_branch_mask() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    // Left side foldable memory, right side already evaluated: the
    // engine emits compare(right, left-memory) and must swap the mask.
    let a = iload(&il, "a");
    let b = iload(&il, "b");
    cg.evaluate(b).unwrap();
    let node = il.node(OpCode::ICmp(CmpRel::Lt), DataType::Int32, &[a, b]);
    cg.evaluate(node).unwrap();
    let insns = cg.insns();
    assert_eq!(insns[1].mnemonic, Mnemonic::C);
    // Materialized under the swapped (GT) mask.
    let lochi = insns.iter().find(|i| i.mnemonic == Mnemonic::Lochi).unwrap();
    assert_eq!(branch_mask(lochi), Some(CondCode::GT.0));
}

#[test]
fn test_test_under_mask_on_memory_byte() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let x = iload(&il, "x");
    let and = il.node(OpCode::IAnd, DataType::Int32, &[x, il.iconst(0x80)]);
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Eq), and, il.iconst(0));
    cg.evaluate_statement(node).unwrap();
    let insns = cg.insns();
    assert_eq!(insns[0].mnemonic, Mnemonic::Tm);
    assert_eq!(insns[0].first_imm(), Some(0x80));
    // Mask byte sits in the last byte of the word: displacement 3.
    let mem = insns[0]
        .operands
        .iter()
        .find_map(|op| match op {
            Operand::Mem(m) => Some(m.clone()),
            _ => None,
        })
        .unwrap();
    assert_eq!(mem.disp, 3);
    assert_eq!(branch_mask(&insns[1]), Some(CondCode::TM_ALL_ZERO.0));
    assert_eq!(x.reference_count(), 0);
    assert_eq!(and.reference_count(), 0);
}

#[test]
fn test_test_under_mask_register_lane() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let x = iload(&il, "x");
    cg.evaluate(x).unwrap();
    let and = il.node(OpCode::IAnd, DataType::Int32, &[x, il.iconst(0x8000)]);
    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Ne), and, il.iconst(0x8000));
    cg.evaluate_statement(node).unwrap();
    let insns = cg.insns();
    assert_eq!(insns[1].mnemonic, Mnemonic::Tmll);
    assert_eq!(insns[1].first_imm(), Some(0x8000));
    assert_eq!(branch_mask(&insns[2]), Some(CondCode::TM_NOT_ALL_ONE.0));
}

#[test]
fn test_mixed_width_compare_folds_conversion() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let s = il.load(
        OpCode::SLoad,
        DataType::Int16,
        SymbolRef::resolved(Symbol::auto("s", 2)),
    );
    let conv = il.node(OpCode::S2I, DataType::Int32, &[s]);
    let other = iload(&il, "x");
    let node = il.node(OpCode::ICmp(CmpRel::Lt), DataType::Int32, &[conv, other]);
    cg.evaluate(node).unwrap();
    let insns = cg.insns();
    // One auto-extending halfword compare instead of two same-width
    // registers; the conversion sat on the left, so the mask swaps.
    assert_eq!(insns[1].mnemonic, Mnemonic::Ch);
    let lochi = insns.iter().find(|i| i.mnemonic == Mnemonic::Lochi).unwrap();
    assert_eq!(branch_mask(lochi), Some(CondCode::GT.0));
    assert_eq!(conv.reference_count(), 0);
    assert_eq!(s.reference_count(), 0);
}

#[test]
fn test_float_inequality_includes_unordered() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let a = il.load(
        OpCode::DLoad,
        DataType::Double,
        SymbolRef::resolved(Symbol::auto("a", 8)),
    );
    let b = il.load(
        OpCode::DLoad,
        DataType::Double,
        SymbolRef::resolved(Symbol::auto("b", 8)),
    );
    let node = il.if_cmp(OpCode::IfDCmp(CmpRel::Ne), a, b);
    cg.evaluate_statement(node).unwrap();
    let insns = cg.insns();
    assert_eq!(insns[2].mnemonic, Mnemonic::Cdbr);
    // NaN compares unordered (CC3): inequality must take that case too.
    assert_eq!(branch_mask(&insns[3]), Some(CondCode::NE.0 | 1));
}

#[test]
fn test_address_compare_is_unsigned() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let a = il.load(
        OpCode::ALoad,
        DataType::Address,
        SymbolRef::resolved(Symbol::auto("p", 8)),
    );
    let b = il.load(
        OpCode::ALoad,
        DataType::Address,
        SymbolRef::resolved(Symbol::auto("q", 8)),
    );
    cg.evaluate(a).unwrap();
    cg.evaluate(b).unwrap();
    let node = il.node(OpCode::ACmp(CmpRel::Lt), DataType::Int32, &[a, b]);
    cg.evaluate(node).unwrap();
    // Pointer ordering lowers to the unsigned doubleword compare.
    assert!(cg.mnemonics().contains(&Mnemonic::Clgr));
}

#[test]
fn test_live_logical_cc_resolves_zero_compare() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    // The XOR leaves CC0-zero/CC1-nonzero behind; an equality compare of
    // its result against zero needs no test instruction at all. (The
    // second operand folds into the register-memory XOR form.)
    let x = il.node(
        OpCode::IXor,
        DataType::Int32,
        &[iload(&il, "a"), iload(&il, "b")],
    );
    cg.evaluate(x).unwrap();
    let node = il.node(OpCode::ICmp(CmpRel::Ne), DataType::Int32, &[x, il.iconst(0)]);
    cg.evaluate(node).unwrap();
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::L, Mnemonic::X, Mnemonic::Lhi, Mnemonic::Lochi]
    );
    // Nonzero under the logical convention is CC1 alone.
    let lochi = cg
        .insns()
        .iter()
        .find(|i| i.mnemonic == Mnemonic::Lochi)
        .unwrap();
    assert_eq!(branch_mask(lochi), Some(0b0100));
}

#[test]
fn test_double_evaluation_of_statement_is_refcount_error() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.if_cmp(OpCode::IfICmp(CmpRel::Eq), iload(&il, "x"), il.iconst(0));
    cg.evaluate_statement(node).unwrap();
    // A second traversal would consume children twice: the protocol
    // check surfaces it instead of corrupting liveness.
    let err = cg.evaluate_statement(node).unwrap_err();
    assert!(matches!(
        err,
        zsel::core::CodegenError::RefCountUnderflow { .. }
    ));
}
