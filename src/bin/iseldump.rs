//! Instruction-selection dump tool.
//!
//! Builds named sample IL trees, runs the evaluator, and prints the
//! selected instruction stream. Useful for eyeballing selection decisions
//! across facility levels without a full compiler around the layer.

use bumpalo::Bump;
use clap::Parser;

use zsel::core::{
    ArchLevel, CmpRel, CodeGenerator, CodegenOptions, CodegenSession, CopyDirection, DataType,
    IlBuilder, IlNode, NodeFlags, OpCode, Symbol, SymbolRef, VectorElem,
};

#[derive(Parser)]
#[command(name = "iseldump", about = "Dump selected instruction sequences for sample IL trees")]
struct Args {
    /// Scenario to dump: const32, const64, loadtest, copy300, copyruntime,
    /// vmul64, or all.
    #[arg(default_value = "all")]
    scenario: String,

    /// Facility level of the target (z10, z196, zec12, z13, z14, z15, z16).
    #[arg(long, default_value = "z15")]
    arch: String,

    /// Compile relocatable (AOT) code.
    #[arg(long)]
    aot: bool,
}

fn parse_arch(name: &str) -> Option<ArchLevel> {
    Some(match name {
        "z9" => ArchLevel::Z9,
        "z10" => ArchLevel::Z10,
        "z196" => ArchLevel::Z196,
        "zec12" => ArchLevel::Zec12,
        "z13" => ArchLevel::Z13,
        "z14" => ArchLevel::Z14,
        "z15" => ArchLevel::Z15,
        "z16" => ArchLevel::Z16,
        _ => return None,
    })
}

type TreeBuilder = for<'a> fn(&IlBuilder<'a>) -> &'a IlNode<'a>;

fn build_const32_zero<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    il.iconst(0)
}

fn build_const32_wide<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    il.iconst(0x1234_5678)
}

fn build_const64_high<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    il.lconst(0x0000_0001_0000_0000)
}

fn build_const64_full<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    il.lconst(0x0123_4567_89ab_cdef)
}

fn build_loadtest<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    let x = il.load(
        OpCode::ILoad,
        DataType::Int32,
        SymbolRef::resolved(Symbol::auto("x", 4)),
    );
    il.if_cmp(OpCode::IfICmp(CmpRel::Eq), x, il.iconst(0))
}

fn build_copy300<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    let dst = il.load(
        OpCode::ALoad,
        DataType::Address,
        SymbolRef::resolved(Symbol::auto("dst", 8)),
    );
    let src = il.load(
        OpCode::ALoad,
        DataType::Address,
        SymbolRef::resolved(Symbol::auto("src", 8)),
    );
    let flags = NodeFlags {
        copy_direction: CopyDirection::Forward,
        ..NodeFlags::default()
    };
    il.node_with_flags(
        OpCode::ArrayCopy,
        DataType::Address,
        &[dst, src, il.lconst(300)],
        flags,
    )
}

fn build_copyruntime<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    let dst = il.load(
        OpCode::ALoad,
        DataType::Address,
        SymbolRef::resolved(Symbol::auto("dst", 8)),
    );
    let src = il.load(
        OpCode::ALoad,
        DataType::Address,
        SymbolRef::resolved(Symbol::auto("src", 8)),
    );
    let len = il.load(
        OpCode::LLoad,
        DataType::Int64,
        SymbolRef::resolved(Symbol::auto("len", 8)),
    );
    il.node(OpCode::ArrayCopy, DataType::Address, &[dst, src, len])
}

fn build_vmul64<'a>(il: &IlBuilder<'a>) -> &'a IlNode<'a> {
    let vtype = DataType::Vector(VectorElem::Int64);
    let a = il.load(
        OpCode::VLoad,
        vtype,
        SymbolRef::resolved(Symbol::auto("va", 16)),
    );
    let b = il.load(
        OpCode::VLoad,
        vtype,
        SymbolRef::resolved(Symbol::auto("vb", 16)),
    );
    il.node(OpCode::VMul, vtype, &[a, b])
}

const SCENARIOS: &[(&str, &str, TreeBuilder)] = &[
    ("const32", "materialize 0", build_const32_zero),
    ("const32", "materialize 0x12345678", build_const32_wide),
    ("const64", "high half only", build_const64_high),
    ("const64", "full width", build_const64_full),
    ("loadtest", "if (x == 0)", build_loadtest),
    ("copy300", "constant forward copy of 300 bytes", build_copy300),
    ("copyruntime", "direction checked at runtime", build_copyruntime),
    ("vmul64", "emulated 64-bit lane multiply", build_vmul64),
];

fn dump(name: &str, detail: &str, options: &CodegenOptions, build: TreeBuilder) {
    let arena = Bump::new();
    let session = CodegenSession::new(&arena);
    let il = IlBuilder::new(&arena);
    let mut cg = CodeGenerator::new(&session, options.clone());
    let tree = build(&il);
    println!("=== {name}: {detail} ===");
    match cg.evaluate_statement(tree) {
        Ok(result) => {
            print!("{}", cg.listing());
            if let Some(reg) = result {
                println!("  ; result in {reg}");
            }
            let stats = session.stats();
            println!(
                "  ; {} instructions, {} registers",
                stats.total_instructions(),
                stats.registers_issued
            );
        }
        Err(err) => println!("  ! selection failed: {err}"),
    }
    println!();
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    let arch = match parse_arch(&args.arch) {
        Some(arch) => arch,
        None => {
            eprintln!("unknown facility level: {}", args.arch);
            std::process::exit(1);
        }
    };
    let options = CodegenOptions {
        arch,
        relocatable: args.aot,
        ..CodegenOptions::default()
    };

    let mut matched = false;
    for (name, detail, build) in SCENARIOS {
        if args.scenario == "all" || args.scenario == *name {
            matched = true;
            dump(name, detail, &options, *build);
        }
    }
    if !matched {
        eprintln!("unknown scenario: {}", args.scenario);
        std::process::exit(1);
    }
}
