//! Integration tests for the constant materializer.
//!
//! Each test builds a small IL tree, runs selection, and asserts the
//! emitted mnemonic sequence, following the documented cheapest-form
//! ladders and their boundary values.

use bumpalo::Bump;
use zsel::core::codegen::Literal;
use zsel::core::{
    ArchLevel, CodeGenerator, CodegenOptions, CodegenSession, IlBuilder, Mnemonic, NodeFlags,
    RelocationKind, Symbol, SymbolRef,
};

fn opts() -> CodegenOptions {
    CodegenOptions::default()
}

#[test]
fn test_zero_materializes_as_register_clear() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(&session, opts());

    let reg = cg.evaluate(il.iconst(0)).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Xr]);
    // The XOR targets the result register on both sides.
    assert_eq!(cg.insns()[0].first_reg(), Some(reg));
}

#[test]
fn test_zero_64_uses_wide_clear() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(&session, opts());

    cg.evaluate(il.lconst(0)).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Xgr]);
}

#[test]
fn test_short_immediate_boundaries() {
    for (value, expected) in [
        (1i32, Mnemonic::Lhi),
        (-1, Mnemonic::Lhi),
        (32767, Mnemonic::Lhi),
        (-32768, Mnemonic::Lhi),
        (32768, Mnemonic::Iilf),
        (-32769, Mnemonic::Iilf),
    ] {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let il = IlBuilder::new(&arena);
        let mut cg = CodeGenerator::new(&session, opts());
        cg.evaluate(il.iconst(value)).unwrap();
        assert_eq!(cg.mnemonics(), vec![expected], "value {value}");
    }
}

#[test]
fn test_64bit_ladder_order() {
    for (value, expected) in [
        (5i64, Mnemonic::Lghi),
        (-32768, Mnemonic::Lghi),
        // Unsigned 16-bit: cheaper than the extended immediate.
        (40000, Mnemonic::Llill),
        (65535, Mnemonic::Llill),
        // Signed 32-bit extended immediate.
        (65536, Mnemonic::Lgfi),
        (-40000, Mnemonic::Lgfi),
        (i32::MAX as i64, Mnemonic::Lgfi),
        // High half zero, low half arbitrary.
        (0xffff_ffff, Mnemonic::Llilf),
        // Low half zero, high half arbitrary.
        (0x0000_0001_0000_0000, Mnemonic::Llihf),
        (0x7fff_0000_0000_0000, Mnemonic::Llihf),
    ] {
        let arena = Bump::new();
        let session = CodegenSession::new(&arena);
        let il = IlBuilder::new(&arena);
        let mut cg = CodeGenerator::new(&session, opts());
        cg.evaluate(il.lconst(value)).unwrap();
        assert_eq!(cg.mnemonics(), vec![expected], "value {value:#x}");
    }
}

#[test]
fn test_full_64bit_prefers_literal_pool() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(&session, opts());

    cg.evaluate(il.lconst(0x0123_4567_89ab_cdef)).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Lgrl]);
    assert_eq!(cg.literals(), &[Literal::Int64(0x0123_4567_89ab_cdef)]);
}

#[test]
fn test_full_64bit_under_aot_assembles_halves() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            relocatable: true,
            ..opts()
        },
    );

    cg.evaluate(il.lconst(0x0123_4567_89ab_cdef)).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Llihf, Mnemonic::Iilf]);
    let high = cg.insns()[0].first_imm().unwrap();
    let low = cg.insns()[1].first_imm().unwrap();
    assert_eq!(high, 0x0123_4567);
    assert_eq!(low, 0x89ab_cdef);
}

#[test]
fn test_pre_z10_never_uses_literal_relative_load() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(
        &session,
        CodegenOptions {
            arch: ArchLevel::Z9,
            ..opts()
        },
    );

    cg.evaluate(il.lconst(0x0123_4567_89ab_cdef)).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Llihf, Mnemonic::Iilf]);
}

#[test]
fn test_patchable_address_uses_recognized_sequence() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(&session, opts());

    let flags = NodeFlags {
        patchable: true,
        ..NodeFlags::default()
    };
    // A small value would normally take LGHI; patchability forces the
    // exact immediate-load-then-high-fill shape the patcher recognizes.
    cg.evaluate(il.aconst(0x1000, flags)).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Iilf, Mnemonic::Iihf]);
}

#[test]
fn test_relocated_address_goes_through_literal_pool() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(&session, opts());

    // Two tags on the reference; the recorded kind follows the fixed
    // priority order (recompile-count global outranks block frequency).
    let symref = SymbolRef::resolved(Symbol::static_data("recomp_count", 8))
        .with_reloc(RelocationKind::BlockFrequency)
        .with_reloc(RelocationKind::RecompCountGlobal);
    cg.evaluate(il.aconst_sym(0xdead_0000, symref)).unwrap();
    assert_eq!(cg.mnemonics(), vec![Mnemonic::Lgrl]);
    assert_eq!(
        cg.literals(),
        &[Literal::Address {
            value: 0xdead_0000,
            reloc: Some(RelocationKind::RecompCountGlobal),
        }]
    );
}

#[test]
fn test_repeated_evaluation_reuses_cached_register() {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(&session, opts());

    let node = il.lconst(42);
    let first = cg.evaluate(node).unwrap();
    let second = cg.evaluate(node).unwrap();
    assert_eq!(first, second);
    assert_eq!(cg.insns().len(), 1);
}
