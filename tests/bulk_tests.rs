//! Integration tests for the bulk memory evaluators: copy direction and
//! chunking, set propagation, compare conventions, translate loops, and
//! the bit-permute strategies.

use bumpalo::Bump;
use zsel::core::{
    ArchLevel, ArrayCmpConvention, CodeGenerator, CodegenOptions, CodegenSession, CopyDirection,
    DataType, IlBuilder, Mnemonic, NodeFlags, OpCode, Operand, Symbol, SymbolRef, TranslateKind,
};

fn setup(arena: &Bump) -> (CodegenSession<'_>, IlBuilder<'_>) {
    (CodegenSession::new(arena), IlBuilder::new(arena))
}

fn aload<'a>(il: &IlBuilder<'a>, name: &'static str) -> &'a zsel::core::IlNode<'a> {
    il.load(
        OpCode::ALoad,
        DataType::Address,
        SymbolRef::resolved(Symbol::auto(name, 8)),
    )
}

fn lload<'a>(il: &IlBuilder<'a>, name: &'static str) -> &'a zsel::core::IlNode<'a> {
    il.load(
        OpCode::LLoad,
        DataType::Int64,
        SymbolRef::resolved(Symbol::auto(name, 8)),
    )
}

fn forward_copy<'a>(il: &IlBuilder<'a>, len: i64) -> &'a zsel::core::IlNode<'a> {
    let flags = NodeFlags {
        copy_direction: CopyDirection::Forward,
        ..NodeFlags::default()
    };
    il.node_with_flags(
        OpCode::ArrayCopy,
        DataType::Address,
        &[aload(il, "dst"), aload(il, "src"), il.lconst(len)],
        flags,
    )
}

fn ss_lengths(cg: &CodeGenerator<'_>, mnemonic: Mnemonic) -> Vec<i64> {
    cg.insns()
        .iter()
        .filter(|i| i.mnemonic == mnemonic)
        .filter_map(|i| {
            i.operands.iter().find_map(|op| match op {
                Operand::Len(n) => Some(*n + 1),
                _ => None,
            })
        })
        .collect()
}

#[test]
fn test_constant_copy_unrolls_blocks_plus_residue() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    cg.evaluate_statement(forward_copy(&il, 300)).unwrap();
    // One maximal 256-byte block plus one 44-byte residue.
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::Lg, Mnemonic::Lg, Mnemonic::Mvc, Mnemonic::Mvc]
    );
    assert_eq!(ss_lengths(&cg, Mnemonic::Mvc), vec![256, 44]);
}

#[test]
fn test_constant_copy_boundaries() {
    for (len, expected_blocks) in [(1i64, vec![1]), (256, vec![256]), (257, vec![256, 1]), (512, vec![256, 256])] {
        let arena = Bump::new();
        let (session, il) = setup(&arena);
        let mut cg = CodeGenerator::new(&session, CodegenOptions::default());
        cg.evaluate_statement(forward_copy(&il, len)).unwrap();
        assert_eq!(ss_lengths(&cg, Mnemonic::Mvc), expected_blocks, "len {len}");
    }
}

#[test]
fn test_variable_length_copy_uses_execute_residue() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let flags = NodeFlags {
        copy_direction: CopyDirection::Forward,
        ..NodeFlags::default()
    };
    let node = il.node_with_flags(
        OpCode::ArrayCopy,
        DataType::Address,
        &[aload(&il, "dst"), aload(&il, "src"), lload(&il, "len")],
        flags,
    );
    cg.evaluate_statement(node).unwrap();
    let mnems = cg.mnemonics();
    assert!(mnems.contains(&Mnemonic::Brct));
    assert!(mnems.contains(&Mnemonic::Exrl));
}

#[test]
fn test_unknown_direction_emits_runtime_check() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ArrayCopy,
        DataType::Address,
        &[aload(&il, "dst"), aload(&il, "src"), lload(&il, "len")],
    );
    cg.evaluate_statement(node).unwrap();
    let mnems = cg.mnemonics();
    // Pointer-relationship compare, then both a forward and a backward
    // path in the stream.
    assert!(mnems.contains(&Mnemonic::Clgr));
    assert!(mnems.contains(&Mnemonic::Exrl));
    assert!(mnems.contains(&Mnemonic::Mvcrl));
}

#[test]
fn test_backward_copy_facility_ladder() {
    // z15: one reverse-block-copy instruction.
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());
    let flags = NodeFlags {
        copy_direction: CopyDirection::Backward,
        ..NodeFlags::default()
    };
    let node = il.node_with_flags(
        OpCode::ArrayCopy,
        DataType::Address,
        &[aload(&il, "dst"), aload(&il, "src"), lload(&il, "len")],
        flags.clone(),
    );
    cg.evaluate_statement(node).unwrap();
    assert!(cg.mnemonics().contains(&Mnemonic::Mvcrl));

    // z13: vector loop.
    let arena2 = Bump::new();
    let (session2, il2) = setup(&arena2);
    let mut cg2 = CodeGenerator::new(
        &session2,
        CodegenOptions {
            arch: ArchLevel::Z13,
            ..CodegenOptions::default()
        },
    );
    let node = il2.node_with_flags(
        OpCode::ArrayCopy,
        DataType::Address,
        &[aload(&il2, "dst"), aload(&il2, "src"), lload(&il2, "len")],
        flags.clone(),
    );
    cg2.evaluate_statement(node).unwrap();
    let mnems = cg2.mnemonics();
    assert!(!mnems.contains(&Mnemonic::Mvcrl));
    assert!(mnems.contains(&Mnemonic::Vl));
    assert!(mnems.contains(&Mnemonic::Vstl));

    // z10: generic indexed-branch element loop.
    let arena3 = Bump::new();
    let (session3, il3) = setup(&arena3);
    let mut cg3 = CodeGenerator::new(
        &session3,
        CodegenOptions {
            arch: ArchLevel::Z10,
            ..CodegenOptions::default()
        },
    );
    let node = il3.node_with_flags(
        OpCode::ArrayCopy,
        DataType::Address,
        &[aload(&il3, "dst"), aload(&il3, "src"), lload(&il3, "len")],
        flags,
    );
    cg3.evaluate_statement(node).unwrap();
    let mnems = cg3.mnemonics();
    assert!(mnems.contains(&Mnemonic::Brxle));
    assert!(mnems.contains(&Mnemonic::Stc));
}

#[test]
fn test_arrayset_zero_uses_xc() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ArraySet,
        DataType::Address,
        &[aload(&il, "dst"), il.bconst(0), il.lconst(64)],
    );
    cg.evaluate_statement(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Lg, Mnemonic::Xc]);
}

#[test]
fn test_arrayset_propagates_with_overlapping_move() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ArraySet,
        DataType::Address,
        &[aload(&il, "dst"), il.bconst(0x5a), il.lconst(10)],
    );
    cg.evaluate_statement(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Lg, Mnemonic::Mvi, Mnemonic::Mvc]);
    assert_eq!(ss_lengths(&cg, Mnemonic::Mvc), vec![9]);
}

#[test]
fn test_arraycmp_small_constant_is_single_clc() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ArrayCmp,
        DataType::Int32,
        &[aload(&il, "a"), aload(&il, "b"), il.lconst(16)],
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    assert_eq!(ss_lengths(&cg, Mnemonic::Clc), vec![16]);
    // Signum convention: -1 / 0 / 1 via conditional immediates.
    assert!(mnems.contains(&Mnemonic::Lochi));
}

#[test]
fn test_arraycmp_zero_length_is_equal() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ArrayCmp,
        DataType::Int32,
        &[aload(&il, "a"), aload(&il, "b"), il.lconst(0)],
    );
    cg.evaluate(node).unwrap();
    assert!(!cg.mnemonics().contains(&Mnemonic::Clc));
}

#[test]
fn test_arraycmp_index_convention_values() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let flags = NodeFlags {
        cmp_convention: ArrayCmpConvention::IndexLike,
        ..NodeFlags::default()
    };
    let node = il.node_with_flags(
        OpCode::ArrayCmp,
        DataType::Int32,
        &[aload(&il, "a"), aload(&il, "b"), il.lconst(8)],
        flags,
    );
    cg.evaluate(node).unwrap();
    let immediates: Vec<i64> = cg
        .insns()
        .iter()
        .filter(|i| i.mnemonic == Mnemonic::Lochi)
        .filter_map(|i| i.first_imm())
        .collect();
    assert_eq!(immediates, vec![1, 2]);
}

#[test]
fn test_arraycmp_large_uses_vector_find_first_nonequal() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::ArrayCmp,
        DataType::Int32,
        &[aload(&il, "a"), aload(&il, "b"), lload(&il, "len")],
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    assert!(mnems.contains(&Mnemonic::Vfene));
    // Sub-16-byte residue via length-limited vector loads.
    assert!(mnems.contains(&Mnemonic::Vll));
}

#[test]
fn test_arraycmp_generic_clc_loop_below_vector_facility() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            arch: ArchLevel::Z196,
            ..CodegenOptions::default()
        },
    );

    let node = il.node(
        OpCode::ArrayCmp,
        DataType::Int32,
        &[aload(&il, "a"), aload(&il, "b"), lload(&il, "len")],
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    assert!(mnems.contains(&Mnemonic::Clc));
    assert!(mnems.contains(&Mnemonic::Exrl));
    assert!(!mnems.contains(&Mnemonic::Vfene));
}

#[test]
fn test_translate_hardware_loop_retries_on_cpu_limit() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let flags = NodeFlags {
        translate_kind: TranslateKind::ByteToChar,
        ..NodeFlags::default()
    };
    let node = il.node_with_flags(
        OpCode::ArrayTranslate,
        DataType::Int32,
        &[
            aload(&il, "in"),
            aload(&il, "out"),
            aload(&il, "table"),
            lload(&il, "len"),
        ],
        flags,
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    assert!(mnems.contains(&Mnemonic::Trot));
    // The CC3 retry branch loops the instruction itself.
    let trot_pos = mnems.iter().position(|m| *m == Mnemonic::Trot).unwrap();
    assert_eq!(mnems[trot_pos + 1], Mnemonic::Brc);
    // The translate instruction pins its table register.
    assert!(!cg.insns()[trot_pos].deps.is_empty());
}

#[test]
fn test_translate_simd_uses_saturating_pack() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let flags = NodeFlags {
        translate_kind: TranslateKind::CharToByte,
        saturation_limit: Some(0x100),
        ..NodeFlags::default()
    };
    let node = il.node_with_flags(
        OpCode::ArrayTranslate,
        DataType::Int32,
        &[
            aload(&il, "in"),
            aload(&il, "out"),
            aload(&il, "table"),
            lload(&il, "len"),
        ],
        flags,
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    assert!(mnems.contains(&Mnemonic::Vpkls));
    // Exact saturated-lane bookkeeping needs the find-first-nonequal.
    assert!(mnems.contains(&Mnemonic::Vfene));
    assert!(mnems.contains(&Mnemonic::Vchl));
}

#[test]
fn test_bitpermute_small_constant_unrolls() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::BitPermute,
        DataType::Int64,
        &[lload(&il, "value"), aload(&il, "sel"), il.lconst(3)],
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    assert!(!mnems.contains(&Mnemonic::Vbperm));
    assert!(!mnems.contains(&Mnemonic::Brct));
    assert_eq!(mnems.iter().filter(|m| **m == Mnemonic::Llc).count(), 3);
}

#[test]
fn test_bitpermute_vector_strategy_complements_indices() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::BitPermute,
        DataType::Int64,
        &[lload(&il, "value"), aload(&il, "sel"), il.lconst(12)],
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    assert!(mnems.contains(&Mnemonic::Vbperm));
    // Big-endian bit numbering: indices complement against 63 first.
    assert!(mnems.contains(&Mnemonic::Vrepi));
    assert!(mnems.contains(&Mnemonic::Vs));
}

#[test]
fn test_bitpermute_variable_length_loops() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::BitPermute,
        DataType::Int64,
        &[lload(&il, "value"), aload(&il, "sel"), lload(&il, "len")],
    );
    cg.evaluate(node).unwrap();
    assert!(cg.mnemonics().contains(&Mnemonic::Brct));
}
