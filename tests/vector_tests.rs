//! Integration tests for the vector family: native mappings, the 64-bit
//! lane emulations, FMA gating, splat preferences, and lane extraction.

use bumpalo::Bump;
use zsel::core::{
    ArchLevel, CmpRel, CodeGenerator, CodegenError, CodegenOptions, CodegenSession, DataType,
    IlBuilder, Mnemonic, NodeFlags, OpCode, RegisterKind, Symbol, SymbolRef, VectorElem,
};

fn setup(arena: &Bump) -> (CodegenSession<'_>, IlBuilder<'_>) {
    (CodegenSession::new(arena), IlBuilder::new(arena))
}

fn vload<'a>(
    il: &IlBuilder<'a>,
    name: &'static str,
    elem: VectorElem,
) -> &'a zsel::core::IlNode<'a> {
    il.load(
        OpCode::VLoad,
        DataType::Vector(elem),
        SymbolRef::resolved(Symbol::auto(name, 16)),
    )
}

#[test]
fn test_integer_lanes_map_directly() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let vtype = DataType::Vector(VectorElem::Int32);
    let node = il.node(
        OpCode::VAdd,
        vtype,
        &[vload(&il, "a", VectorElem::Int32), vload(&il, "b", VectorElem::Int32)],
    );
    cg.evaluate(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Vl, Mnemonic::Vl, Mnemonic::Va]);
}

#[test]
fn test_multiply64_is_emulated_by_composition() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let vtype = DataType::Vector(VectorElem::Int64);
    let node = il.node(
        OpCode::VMul,
        vtype,
        &[vload(&il, "a", VectorElem::Int64), vload(&il, "b", VectorElem::Int64)],
    );
    cg.evaluate(node).unwrap();
    // The documented composition: two shifts, three odd multiplies, two
    // adds, one shift of the cross terms.
    assert_eq!(
        cg.mnemonics(),
        vec![
            Mnemonic::Vl,
            Mnemonic::Vl,
            Mnemonic::Vesrl,
            Mnemonic::Vesrl,
            Mnemonic::Vmlo,
            Mnemonic::Vmlo,
            Mnemonic::Va,
            Mnemonic::Vesl,
            Mnemonic::Vmlo,
            Mnemonic::Va,
        ]
    );
}

#[test]
fn test_multiply32_is_native() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let vtype = DataType::Vector(VectorElem::Int32);
    let node = il.node(
        OpCode::VMul,
        vtype,
        &[vload(&il, "a", VectorElem::Int32), vload(&il, "b", VectorElem::Int32)],
    );
    cg.evaluate(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Vl, Mnemonic::Vl, Mnemonic::Vml]);
}

#[test]
fn test_divide64_extracts_to_scalar_pairs() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let vtype = DataType::Vector(VectorElem::Int64);
    let node = il.node(
        OpCode::VDiv,
        vtype,
        &[vload(&il, "a", VectorElem::Int64), vload(&il, "b", VectorElem::Int64)],
    );
    cg.evaluate(node).unwrap();
    let mnems = cg.mnemonics();
    // Two lanes, one scalar divide each.
    assert_eq!(mnems.iter().filter(|m| **m == Mnemonic::Dsgr).count(), 2);
    assert_eq!(mnems.iter().filter(|m| **m == Mnemonic::Vlvg).count(), 2);
    // The divide pins an even/odd pair.
    let dsgr = cg
        .insns()
        .iter()
        .find(|i| i.mnemonic == Mnemonic::Dsgr)
        .unwrap();
    assert!(!dsgr.deps.is_empty());
}

#[test]
fn test_fma_fuses_when_rounding_permits() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let vtype = DataType::Vector(VectorElem::Double);
    let mul = il.node(
        OpCode::VMul,
        vtype,
        &[vload(&il, "a", VectorElem::Double), vload(&il, "b", VectorElem::Double)],
    );
    let add = il.node(OpCode::VAdd, vtype, &[mul, vload(&il, "c", VectorElem::Double)]);
    cg.evaluate(add).unwrap();
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::Vl, Mnemonic::Vl, Mnemonic::Vl, Mnemonic::Vfma]
    );
    assert_eq!(mul.reference_count(), 0);
}

#[test]
fn test_fma_suppressed_under_strict_fp() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            strict_fp: true,
            ..CodegenOptions::default()
        },
    );

    let vtype = DataType::Vector(VectorElem::Double);
    let mul = il.node(
        OpCode::VMul,
        vtype,
        &[vload(&il, "a", VectorElem::Double), vload(&il, "b", VectorElem::Double)],
    );
    let add = il.node(OpCode::VAdd, vtype, &[mul, vload(&il, "c", VectorElem::Double)]);
    cg.evaluate(add).unwrap();
    // Fusing changes observable rounding: separate multiply and add.
    let mnems = cg.mnemonics();
    assert!(mnems.contains(&Mnemonic::Vfm));
    assert!(mnems.contains(&Mnemonic::Vfa));
    assert!(!mnems.contains(&Mnemonic::Vfma));
}

#[test]
fn test_fma_per_node_override_under_strict_fp() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            strict_fp: true,
            ..CodegenOptions::default()
        },
    );

    let vtype = DataType::Vector(VectorElem::Double);
    let flags = NodeFlags {
        relaxed_fp: true,
        ..NodeFlags::default()
    };
    let mul = il.node_with_flags(
        OpCode::VMul,
        vtype,
        &[vload(&il, "a", VectorElem::Double), vload(&il, "b", VectorElem::Double)],
        flags,
    );
    let add = il.node(OpCode::VAdd, vtype, &[mul, vload(&il, "c", VectorElem::Double)]);
    cg.evaluate(add).unwrap();
    assert!(cg.mnemonics().contains(&Mnemonic::Vfma));
}

#[test]
fn test_scalar_fma_shares_the_recognizer() {
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
    let c = il.load(
        OpCode::DLoad,
        DataType::Double,
        SymbolRef::resolved(Symbol::auto("c", 8)),
    );
    let mul = il.node(OpCode::DMul, DataType::Double, &[a, b]);
    let add = il.node(OpCode::DAdd, DataType::Double, &[mul, c]);
    cg.evaluate(add).unwrap();
    assert!(cg.mnemonics().contains(&Mnemonic::Madb));
    assert!(!cg.mnemonics().contains(&Mnemonic::Mdbr));
}

#[test]
fn test_vector_compare_composition() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let vtype = DataType::Vector(VectorElem::Int16);
    let node = il.node(
        OpCode::VCmp(CmpRel::Le),
        vtype,
        &[vload(&il, "a", VectorElem::Int16), vload(&il, "b", VectorElem::Int16)],
    );
    cg.evaluate(node).unwrap();
    // a <= b is not(a > b).
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::Vl, Mnemonic::Vl, Mnemonic::Vch, Mnemonic::Vno]
    );
}

#[test]
fn test_splat_prefers_broadcast_load() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let scalar = il.load(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::auto("s", 4)),
    );
    let node = il.node(OpCode::VSplats, DataType::Vector(VectorElem::Int32), &[scalar]);
    cg.evaluate(node).unwrap();
    // Straight broadcast-load; the scalar never lands in a GPR.
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Vlrep]);
}

#[test]
fn test_splat_small_immediate_is_replicate_immediate() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::VSplats,
        DataType::Vector(VectorElem::Int16),
        &[il.sconst(9)],
    );
    cg.evaluate(node).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Vrepi]);
}

#[test]
fn test_splat_evaluated_scalar_replicates_from_register() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let scalar = il.load(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::auto("s", 4)),
    );
    cg.evaluate(scalar).unwrap();
    let node = il.node(OpCode::VSplats, DataType::Vector(VectorElem::Int32), &[scalar]);
    cg.evaluate(node).unwrap();
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::L, Mnemonic::Vlvg, Mnemonic::Vrep]
    );
}

#[test]
fn test_get_element_double_reinterprets_through_gpr() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::VGetElem,
        DataType::Double,
        &[vload(&il, "v", VectorElem::Double), il.iconst(1)],
    );
    let reg = cg.evaluate(node).unwrap();
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::Vl, Mnemonic::Vlgv, Mnemonic::Ldgr]
    );
    assert_eq!(reg.kind, RegisterKind::Fpr);
}

#[test]
fn test_get_element_64bit_on_31bit_target_splits_pair() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            is_64bit: false,
            ..CodegenOptions::default()
        },
    );

    let node = il.node(
        OpCode::VGetElem,
        DataType::Int64,
        &[vload(&il, "v", VectorElem::Int64), il.iconst(1)],
    );
    let reg = cg.evaluate(node).unwrap();
    assert_eq!(reg.kind, RegisterKind::GprPair);
    // Two word extracts with doubled lane indices.
    let extracts = cg
        .mnemonics()
        .iter()
        .filter(|m| **m == Mnemonic::Vlgv)
        .count();
    assert_eq!(extracts, 2);
}

#[test]
fn test_set_element_inserts_into_clobbered_copy() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let v = vload(&il, "v", VectorElem::Int32);
    let x = il.load(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::auto("x", 4)),
    );
    let node = il.node(
        OpCode::VSetElem,
        DataType::Vector(VectorElem::Int32),
        &[v, x, il.iconst(2)],
    );
    cg.evaluate(node).unwrap();
    assert_eq!(
        cg.mnemonics(),
        vec![Mnemonic::Vl, Mnemonic::L, Mnemonic::Vlvg]
    );
}

#[test]
fn test_sum_reduction_ladder() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(&session, CodegenOptions::default());

    let node = il.node(
        OpCode::VSum,
        DataType::Vector(VectorElem::Int32),
        &[vload(&il, "v", VectorElem::Int32)],
    );
    cg.evaluate(node).unwrap();
    assert!(cg.mnemonics().contains(&Mnemonic::Vsumg));
}

#[test]
fn test_vector_requires_facility() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            arch: ArchLevel::Zec12,
            ..CodegenOptions::default()
        },
    );

    let vtype = DataType::Vector(VectorElem::Int32);
    let node = il.node(
        OpCode::VAdd,
        vtype,
        &[vload(&il, "a", VectorElem::Int32), vload(&il, "b", VectorElem::Int32)],
    );
    let err = cg.evaluate(node).unwrap_err();
    assert!(matches!(err, CodegenError::FacilityRequired { .. }));
}

#[test]
fn test_single_precision_lanes_need_z14() {
    let arena = Bump::new();
    let (session, il) = setup(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            arch: ArchLevel::Z13,
            ..CodegenOptions::default()
        },
    );

    let vtype = DataType::Vector(VectorElem::Float);
    let node = il.node(
        OpCode::VAdd,
        vtype,
        &[vload(&il, "a", VectorElem::Float), vload(&il, "b", VectorElem::Float)],
    );
    let err = cg.evaluate(node).unwrap_err();
    assert!(matches!(err, CodegenError::FacilityRequired { .. }));
}
