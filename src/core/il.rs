// This module defines the IL seam the instruction selector consumes: the opcode set, data
// types, node flags, and the arena-allocated IlNode itself. Nodes are created by the
// upstream optimizer (modeled here by IlBuilder, which tests and the iseldump tool use);
// the selector consumes each node exactly reference-count times, evaluating it into a
// virtual register on first use and reusing the cached register afterwards. Reference
// counts and the cached register are the only mutable node state and live in Cells; all
// structural data (opcode, type, children, constant payload, symbol, flags) is fixed at
// construction. Children are arena slices so the whole tree shares the session lifetime.
// The opcode enum is deliberately exhaustive-match friendly: the dispatcher matches on it
// with no wildcard arm, so adding an opcode without an evaluator is a compile error.

//! IL node model: opcodes, data types, flags, and the arena-allocated node.

use std::cell::Cell;

use bumpalo::Bump;

use super::symbol::SymbolRef;

/// Comparison relation carried by compare-class opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CmpRel {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpRel {
    /// The relation with operands exchanged (a REL b == b REL' a).
    pub fn swapped(self) -> CmpRel {
        match self {
            CmpRel::Eq => CmpRel::Eq,
            CmpRel::Ne => CmpRel::Ne,
            CmpRel::Lt => CmpRel::Gt,
            CmpRel::Le => CmpRel::Ge,
            CmpRel::Gt => CmpRel::Lt,
            CmpRel::Ge => CmpRel::Le,
        }
    }

    /// Whether this is an equality-class relation (no ordering involved).
    pub fn is_equality(self) -> bool {
        matches!(self, CmpRel::Eq | CmpRel::Ne)
    }

    /// Reference evaluation over signed values, used by tests and the
    /// strength-reduction plan checker.
    pub fn apply_i64(self, a: i64, b: i64) -> bool {
        match self {
            CmpRel::Eq => a == b,
            CmpRel::Ne => a != b,
            CmpRel::Lt => a < b,
            CmpRel::Le => a <= b,
            CmpRel::Gt => a > b,
            CmpRel::Ge => a >= b,
        }
    }
}

/// Vector lane element type for the 128-bit SIMD opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VectorElem {
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
}

impl VectorElem {
    /// Element size in bytes.
    pub fn size(self) -> u8 {
        match self {
            VectorElem::Int8 => 1,
            VectorElem::Int16 => 2,
            VectorElem::Int32 | VectorElem::Float => 4,
            VectorElem::Int64 | VectorElem::Double => 8,
        }
    }

    /// The element-size mask field (log2 of the byte size) vector
    /// instructions are parameterized by.
    pub fn mask(self) -> u8 {
        match self {
            VectorElem::Int8 => 0,
            VectorElem::Int16 => 1,
            VectorElem::Int32 | VectorElem::Float => 2,
            VectorElem::Int64 | VectorElem::Double => 3,
        }
    }

    pub fn is_float(self) -> bool {
        matches!(self, VectorElem::Float | VectorElem::Double)
    }
}

/// IL data types as seen by the selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    Int8,
    Int16,
    Int32,
    Int64,
    Address,
    Float,
    Double,
    Vector(VectorElem),
}

impl DataType {
    /// Size in bytes. Address size is the 64-bit target's pointer width.
    pub fn size(self) -> i64 {
        match self {
            DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Address | DataType::Double => 8,
            DataType::Vector(_) => 16,
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(
            self,
            DataType::Int8 | DataType::Int16 | DataType::Int32 | DataType::Int64
        )
    }

    pub fn is_floating_point(self) -> bool {
        matches!(self, DataType::Float | DataType::Double)
    }

    /// Whether values of this type occupy a full 64-bit register.
    pub fn is_64bit(self) -> bool {
        matches!(self, DataType::Int64 | DataType::Address | DataType::Double)
    }
}

/// Direction hint for array copies, set by the upstream optimizer when it
/// can prove the operands' relationship.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CopyDirection {
    /// Relationship unknown; a runtime pointer check decides.
    #[default]
    Unknown,
    Forward,
    Backward,
}

/// Result-encoding convention requested by an array-compare use site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArrayCmpConvention {
    /// Three-state signum: -1 / 0 / 1.
    #[default]
    SignumLike,
    /// Indexed-compare encoding: 1 (first low) / 0 (equal) / 2 (first high).
    IndexLike,
}

/// IL opcodes dispatched by the tree evaluator.
///
/// Compare opcodes carry their relation as a payload; the dispatcher still
/// matches exhaustively on the opcode shape. `If*` forms are the fused
/// compare-and-branch nodes (the branch target lives on the node).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpCode {
    // Constants.
    BConst,
    SConst,
    IConst,
    LConst,
    AConst,
    FConst,
    DConst,

    // Loads: direct (symbol) or indirect (address child), per type.
    BLoad,
    SLoad,
    ILoad,
    LLoad,
    ALoad,
    FLoad,
    DLoad,
    VLoad,

    // Stores, same shape as loads.
    BStore,
    SStore,
    IStore,
    LStore,
    AStore,
    FStore,
    DStore,
    VStore,

    // Integer arithmetic.
    IAdd,
    LAdd,
    ISub,
    LSub,
    IMul,
    LMul,
    INeg,
    LNeg,
    IAbs,
    LAbs,

    // Scalar floating-point arithmetic.
    FAdd,
    DAdd,
    FSub,
    DSub,
    FMul,
    DMul,

    // Bitwise.
    IAnd,
    LAnd,
    IOr,
    LOr,
    IXor,
    LXor,

    // Shifts. `UShr` is the logical right shift.
    IShl,
    LShl,
    IShr,
    LShr,
    IUShr,
    LUShr,

    // Width and address conversions.
    B2I,
    Bu2I,
    B2L,
    Bu2L,
    S2I,
    Su2I,
    S2L,
    Su2L,
    I2L,
    Iu2L,
    L2I,
    I2B,
    I2S,
    L2B,
    L2S,
    I2A,
    Iu2A,
    L2A,
    A2L,
    A2I,

    // Value-producing compares (materialize 0/1).
    ICmp(CmpRel),
    IUCmp(CmpRel),
    LCmp(CmpRel),
    LUCmp(CmpRel),
    ACmp(CmpRel),
    FCmp(CmpRel),
    DCmp(CmpRel),

    // Fused compare-and-branch statements.
    IfICmp(CmpRel),
    IfIUCmp(CmpRel),
    IfLCmp(CmpRel),
    IfLUCmp(CmpRel),
    IfACmp(CmpRel),
    IfFCmp(CmpRel),
    IfDCmp(CmpRel),

    // Value select (cond ? a : b).
    ISelect,
    LSelect,

    // Control transfer.
    Goto,
    Return,
    Call,
    CallIndirect,

    // Atomic runtime intrinsics recognized as pseudo-calls.
    AtomicAdd32,
    AtomicAdd64,
    AtomicFetchAdd32,
    AtomicFetchAdd64,
    AtomicSwap32,
    AtomicSwap64,

    // Address computation (LA of a memory reference shape).
    LoadAddr,

    // Bulk memory operations.
    ArrayCopy,
    ArraySet,
    ArrayCmp,
    ArrayTranslate,
    BitPermute,

    // 128-bit vector operations.
    VAdd,
    VSub,
    VMul,
    VDiv,
    VRem,
    VAnd,
    VOr,
    VXor,
    VNot,
    VNeg,
    VCmp(CmpRel),
    VSplats,
    VGetElem,
    VSetElem,
    VSum,

    /// Recognized but intentionally not lowered on this target.
    BadIl,
}

impl OpCode {
    pub fn is_load(self) -> bool {
        matches!(
            self,
            OpCode::BLoad
                | OpCode::SLoad
                | OpCode::ILoad
                | OpCode::LLoad
                | OpCode::ALoad
                | OpCode::FLoad
                | OpCode::DLoad
                | OpCode::VLoad
        )
    }

    pub fn is_store(self) -> bool {
        matches!(
            self,
            OpCode::BStore
                | OpCode::SStore
                | OpCode::IStore
                | OpCode::LStore
                | OpCode::AStore
                | OpCode::FStore
                | OpCode::DStore
                | OpCode::VStore
        )
    }

    pub fn is_const(self) -> bool {
        matches!(
            self,
            OpCode::BConst
                | OpCode::SConst
                | OpCode::IConst
                | OpCode::LConst
                | OpCode::AConst
                | OpCode::FConst
                | OpCode::DConst
        )
    }

    /// The relation of any compare-class opcode (value or fused form).
    pub fn compare_relation(self) -> Option<CmpRel> {
        match self {
            OpCode::ICmp(r)
            | OpCode::IUCmp(r)
            | OpCode::LCmp(r)
            | OpCode::LUCmp(r)
            | OpCode::ACmp(r)
            | OpCode::FCmp(r)
            | OpCode::DCmp(r)
            | OpCode::IfICmp(r)
            | OpCode::IfIUCmp(r)
            | OpCode::IfLCmp(r)
            | OpCode::IfLUCmp(r)
            | OpCode::IfACmp(r)
            | OpCode::IfFCmp(r)
            | OpCode::IfDCmp(r)
            | OpCode::VCmp(r) => Some(r),
            _ => None,
        }
    }

    /// Whether the compare interprets its operands as unsigned. Address
    /// compares are always unsigned by architecture convention.
    pub fn is_unsigned_compare(self) -> bool {
        matches!(
            self,
            OpCode::IUCmp(_)
                | OpCode::LUCmp(_)
                | OpCode::ACmp(_)
                | OpCode::IfIUCmp(_)
                | OpCode::IfLUCmp(_)
                | OpCode::IfACmp(_)
        )
    }

    /// Whether this is a fused compare-and-branch statement.
    pub fn is_if_compare(self) -> bool {
        matches!(
            self,
            OpCode::IfICmp(_)
                | OpCode::IfIUCmp(_)
                | OpCode::IfLCmp(_)
                | OpCode::IfLUCmp(_)
                | OpCode::IfACmp(_)
                | OpCode::IfFCmp(_)
                | OpCode::IfDCmp(_)
        )
    }

    /// Operand type compared by a compare-class opcode.
    pub fn compare_operand_type(self) -> Option<DataType> {
        match self {
            OpCode::ICmp(_) | OpCode::IUCmp(_) | OpCode::IfICmp(_) | OpCode::IfIUCmp(_) => {
                Some(DataType::Int32)
            }
            OpCode::LCmp(_) | OpCode::LUCmp(_) | OpCode::IfLCmp(_) | OpCode::IfLUCmp(_) => {
                Some(DataType::Int64)
            }
            OpCode::ACmp(_) | OpCode::IfACmp(_) => Some(DataType::Address),
            OpCode::FCmp(_) | OpCode::IfFCmp(_) => Some(DataType::Float),
            OpCode::DCmp(_) | OpCode::IfDCmp(_) => Some(DataType::Double),
            _ => None,
        }
    }
}

/// Node flags set by the upstream optimizer. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct NodeFlags {
    /// The value is known zero-extended where it was produced; a widening
    /// zero extension of it needs no instruction.
    pub zero_extended_at_source: bool,
    /// As above for sign extension.
    pub sign_extended_at_source: bool,
    /// Compare-against-zero may be absorbed into the load of this value.
    pub load_and_test: bool,
    /// This conversion is a no-op at machine level; pass the child through.
    pub unneeded_conversion: bool,
    /// A load-and-test result must additionally be valid at 64 bits.
    pub needs_64bit_promotion: bool,
    /// Store/load should use the byte-reversed instruction forms.
    pub byte_reversed: bool,
    /// Store becomes a store-on-condition predicated by this mask.
    pub store_condition: Option<super::cond::CondCode>,
    /// AConst must be materialized with one of the two patchable sequences.
    pub patchable: bool,
    /// Direction hint for ArrayCopy.
    pub copy_direction: CopyDirection,
    /// Result convention for ArrayCmp.
    pub cmp_convention: ArrayCmpConvention,
    /// Profile: fraction of executions on which the branch was taken.
    pub taken_freq: Option<f32>,
    /// The branch target sits in the cold code region; fused
    /// compare-and-branch offsets may not reach it.
    pub branch_to_cold: bool,
    /// Rounding-observable FMA fusion is allowed on this node even under a
    /// strict-FP compilation.
    pub relaxed_fp: bool,
    /// This ALoad produces a VFT (class) pointer read from an object header.
    pub is_vft_load: bool,
    /// Element widths of an ArrayTranslate (source, destination).
    pub translate_kind: TranslateKind,
    /// First source value outside the translatable range; translation
    /// saturates (stops with a partial count) when one is met.
    pub saturation_limit: Option<u16>,
}

/// Source/destination element widths of an array translate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TranslateKind {
    /// byte -> byte (TROO-shaped).
    #[default]
    ByteToByte,
    /// byte -> char (TROT-shaped).
    ByteToChar,
    /// char -> byte (TRTO-shaped), the saturating transcoder.
    CharToByte,
    /// char -> char (TRTT-shaped).
    CharToChar,
}

/// Constant payload of a node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NodeValue {
    None,
    Int(i64),
    Float(f32),
    Double(f64),
}

/// One IL operation plus typed operand subtrees.
///
/// Lifecycle: created by the optimizer with a reference count equal to its
/// number of parent links; consumed exactly that many times by evaluators.
/// First consumption evaluates it into a register (cached on the node),
/// later consumptions reuse the cache. Every direct parent decrements the
/// count exactly once.
#[derive(Debug)]
pub struct IlNode<'a> {
    id: u32,
    op: OpCode,
    dtype: DataType,
    children: &'a [&'a IlNode<'a>],
    value: NodeValue,
    symbol: Option<SymbolRef>,
    /// Branch target label for If*/Goto nodes, assigned by the builder.
    branch_target: Option<u32>,
    pub flags: NodeFlags,
    ref_count: Cell<u32>,
    register: Cell<Option<super::register::VirtReg>>,
}

impl<'a> IlNode<'a> {
    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn op(&self) -> OpCode {
        self.op
    }

    pub fn data_type(&self) -> DataType {
        self.dtype
    }

    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    pub fn child(&self, index: usize) -> &'a IlNode<'a> {
        self.children[index]
    }

    pub fn first_child(&self) -> &'a IlNode<'a> {
        self.children[0]
    }

    pub fn second_child(&self) -> &'a IlNode<'a> {
        self.children[1]
    }

    pub fn children(&self) -> &'a [&'a IlNode<'a>] {
        self.children
    }

    pub fn reference_count(&self) -> u32 {
        self.ref_count.get()
    }

    /// Whether this node link is the only remaining use.
    pub fn is_single_use(&self) -> bool {
        self.ref_count.get() == 1
    }

    /// Whether no evaluator has produced a register for this node yet.
    pub fn is_unevaluated(&self) -> bool {
        self.register.get().is_none()
    }

    pub fn register(&self) -> Option<super::register::VirtReg> {
        self.register.get()
    }

    pub(crate) fn set_register(&self, reg: super::register::VirtReg) {
        self.register.set(Some(reg));
    }

    /// Raw decrement; `CodeGenerator::decrement_ref_count` wraps this with
    /// the underflow check. Returns the new count.
    pub(crate) fn dec_ref_count_raw(&self) -> Option<u32> {
        let current = self.ref_count.get();
        if current == 0 {
            return None;
        }
        self.ref_count.set(current - 1);
        Some(current - 1)
    }

    pub(crate) fn inc_ref_count(&self) {
        self.ref_count.set(self.ref_count.get() + 1);
    }

    /// Signed integer constant payload, if this is an integer/address const.
    pub fn int_value(&self) -> Option<i64> {
        match self.value {
            NodeValue::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn float_value(&self) -> Option<f32> {
        match self.value {
            NodeValue::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn double_value(&self) -> Option<f64> {
        match self.value {
            NodeValue::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn symbol(&self) -> Option<&SymbolRef> {
        self.symbol.as_ref()
    }

    pub fn branch_target(&self) -> Option<u32> {
        self.branch_target
    }

    /// An integer constant whose value is known at selection time.
    pub fn is_int_const(&self) -> bool {
        self.op.is_const() && matches!(self.value, NodeValue::Int(_))
    }

    /// A load that has not been evaluated and has no other consumers: its
    /// memory reference may be folded into the parent's instruction.
    pub fn is_foldable_memory_operand(&self) -> bool {
        self.op.is_load() && self.is_single_use() && self.is_unevaluated()
    }
}

/// Arena-backed IL construction, used by tests and the iseldump tool.
///
/// Reference counts are maintained automatically: attaching a node as a
/// child increments its count, so a finished tree carries exactly one count
/// per parent link.
pub struct IlBuilder<'a> {
    arena: &'a Bump,
    next_id: Cell<u32>,
    next_label: Cell<u32>,
}

impl<'a> IlBuilder<'a> {
    pub fn new(arena: &'a Bump) -> Self {
        Self {
            arena,
            next_id: Cell::new(0),
            next_label: Cell::new(0),
        }
    }

    fn alloc(
        &self,
        op: OpCode,
        dtype: DataType,
        children: &[&'a IlNode<'a>],
        value: NodeValue,
        symbol: Option<SymbolRef>,
        branch_target: Option<u32>,
        flags: NodeFlags,
    ) -> &'a IlNode<'a> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        for child in children {
            child.inc_ref_count();
        }
        let children = self.arena.alloc_slice_copy(children);
        self.arena.alloc(IlNode {
            id,
            op,
            dtype,
            children,
            value,
            symbol,
            branch_target,
            flags,
            ref_count: Cell::new(0),
            register: Cell::new(None),
        })
    }

    /// Generic node constructor for opcodes without special payloads.
    pub fn node(
        &self,
        op: OpCode,
        dtype: DataType,
        children: &[&'a IlNode<'a>],
    ) -> &'a IlNode<'a> {
        self.alloc(op, dtype, children, NodeValue::None, None, None, NodeFlags::default())
    }

    /// Generic constructor with explicit flags.
    pub fn node_with_flags(
        &self,
        op: OpCode,
        dtype: DataType,
        children: &[&'a IlNode<'a>],
        flags: NodeFlags,
    ) -> &'a IlNode<'a> {
        self.alloc(op, dtype, children, NodeValue::None, None, None, flags)
    }

    pub fn iconst(&self, value: i32) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::IConst,
            DataType::Int32,
            &[],
            NodeValue::Int(value as i64),
            None,
            None,
            NodeFlags::default(),
        )
    }

    pub fn lconst(&self, value: i64) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::LConst,
            DataType::Int64,
            &[],
            NodeValue::Int(value),
            None,
            None,
            NodeFlags::default(),
        )
    }

    pub fn bconst(&self, value: i8) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::BConst,
            DataType::Int8,
            &[],
            NodeValue::Int(value as i64),
            None,
            None,
            NodeFlags::default(),
        )
    }

    pub fn sconst(&self, value: i16) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::SConst,
            DataType::Int16,
            &[],
            NodeValue::Int(value as i64),
            None,
            None,
            NodeFlags::default(),
        )
    }

    pub fn aconst(&self, value: i64, flags: NodeFlags) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::AConst,
            DataType::Address,
            &[],
            NodeValue::Int(value),
            None,
            None,
            flags,
        )
    }

    /// Address constant naming a symbol (relocation classification rides
    /// on the reference).
    pub fn aconst_sym(&self, value: i64, symbol: SymbolRef) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::AConst,
            DataType::Address,
            &[],
            NodeValue::Int(value),
            Some(symbol),
            None,
            NodeFlags::default(),
        )
    }

    pub fn fconst(&self, value: f32) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::FConst,
            DataType::Float,
            &[],
            NodeValue::Float(value),
            None,
            None,
            NodeFlags::default(),
        )
    }

    pub fn dconst(&self, value: f64) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::DConst,
            DataType::Double,
            &[],
            NodeValue::Double(value),
            None,
            None,
            NodeFlags::default(),
        )
    }

    /// Direct (symbol-addressed) load.
    pub fn load(&self, op: OpCode, dtype: DataType, symbol: SymbolRef) -> &'a IlNode<'a> {
        debug_assert!(op.is_load());
        self.alloc(op, dtype, &[], NodeValue::None, Some(symbol), None, NodeFlags::default())
    }

    /// Direct load with flags (load-and-test, byte-reversed, ...).
    pub fn load_with_flags(
        &self,
        op: OpCode,
        dtype: DataType,
        symbol: SymbolRef,
        flags: NodeFlags,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_load());
        self.alloc(op, dtype, &[], NodeValue::None, Some(symbol), None, flags)
    }

    /// Indirect load through an address subtree.
    pub fn loadi(
        &self,
        op: OpCode,
        dtype: DataType,
        address: &'a IlNode<'a>,
        symbol: SymbolRef,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_load());
        self.alloc(
            op,
            dtype,
            &[address],
            NodeValue::None,
            Some(symbol),
            None,
            NodeFlags::default(),
        )
    }

    /// Direct store of `value` to `symbol`.
    pub fn store(
        &self,
        op: OpCode,
        value: &'a IlNode<'a>,
        symbol: SymbolRef,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_store());
        let dtype = value.data_type();
        self.alloc(op, dtype, &[value], NodeValue::None, Some(symbol), None, NodeFlags::default())
    }

    /// Direct store with flags (store-on-condition, byte-reversed).
    pub fn store_with_flags(
        &self,
        op: OpCode,
        value: &'a IlNode<'a>,
        symbol: SymbolRef,
        flags: NodeFlags,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_store());
        let dtype = value.data_type();
        self.alloc(op, dtype, &[value], NodeValue::None, Some(symbol), None, flags)
    }

    /// Indirect store: children are [address, value].
    pub fn storei(
        &self,
        op: OpCode,
        address: &'a IlNode<'a>,
        value: &'a IlNode<'a>,
        symbol: SymbolRef,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_store());
        let dtype = value.data_type();
        self.alloc(
            op,
            dtype,
            &[address, value],
            NodeValue::None,
            Some(symbol),
            None,
            NodeFlags::default(),
        )
    }

    /// Unconditional jump to a fresh target label.
    pub fn goto(&self) -> &'a IlNode<'a> {
        let label = self.next_label.get();
        self.next_label.set(label + 1);
        self.alloc(
            OpCode::Goto,
            DataType::Int32,
            &[],
            NodeValue::None,
            None,
            Some(label),
            NodeFlags::default(),
        )
    }

    /// Direct call to a method symbol; children are the arguments.
    pub fn call(
        &self,
        dtype: DataType,
        symbol: SymbolRef,
        args: &[&'a IlNode<'a>],
    ) -> &'a IlNode<'a> {
        self.alloc(
            OpCode::Call,
            dtype,
            args,
            NodeValue::None,
            Some(symbol),
            None,
            NodeFlags::default(),
        )
    }

    /// Fused compare-and-branch statement; allocates a fresh target label id.
    pub fn if_cmp(
        &self,
        op: OpCode,
        left: &'a IlNode<'a>,
        right: &'a IlNode<'a>,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_if_compare());
        let label = self.next_label.get();
        self.next_label.set(label + 1);
        self.alloc(
            op,
            DataType::Int32,
            &[left, right],
            NodeValue::None,
            None,
            Some(label),
            NodeFlags::default(),
        )
    }

    /// Fused compare-and-branch with explicit flags (cold target,
    /// profile data).
    pub fn if_cmp_with_flags(
        &self,
        op: OpCode,
        left: &'a IlNode<'a>,
        right: &'a IlNode<'a>,
        flags: NodeFlags,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_if_compare());
        let label = self.next_label.get();
        self.next_label.set(label + 1);
        self.alloc(
            op,
            DataType::Int32,
            &[left, right],
            NodeValue::None,
            None,
            Some(label),
            flags,
        )
    }

    /// Fused compare-and-branch with profile data attached.
    pub fn if_cmp_with_freq(
        &self,
        op: OpCode,
        left: &'a IlNode<'a>,
        right: &'a IlNode<'a>,
        taken_freq: f32,
    ) -> &'a IlNode<'a> {
        debug_assert!(op.is_if_compare());
        let label = self.next_label.get();
        self.next_label.set(label + 1);
        self.alloc(
            op,
            DataType::Int32,
            &[left, right],
            NodeValue::None,
            None,
            Some(label),
            NodeFlags {
                taken_freq: Some(taken_freq),
                ..NodeFlags::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::symbol::{Symbol, SymbolRef};

    #[test]
    fn test_ref_counts_follow_parent_links() {
        let arena = Bump::new();
        let il = IlBuilder::new(&arena);
        let shared = il.iconst(7);
        let sum = il.node(OpCode::IAdd, DataType::Int32, &[shared, shared]);
        assert_eq!(shared.reference_count(), 2);
        assert_eq!(sum.reference_count(), 0);
    }

    #[test]
    fn test_foldable_memory_operand() {
        let arena = Bump::new();
        let il = IlBuilder::new(&arena);
        let sym = SymbolRef::resolved(Symbol::static_data("field", 4));
        let load = il.load(OpCode::ILoad, DataType::Int32, sym);
        let _use1 = il.node(OpCode::IAdd, DataType::Int32, &[load, il.iconst(1)]);
        assert!(load.is_foldable_memory_operand());
        let _use2 = il.node(OpCode::ISub, DataType::Int32, &[load, il.iconst(1)]);
        // Two consumers: no longer safe to fold into either parent.
        assert!(!load.is_foldable_memory_operand());
    }

    #[test]
    fn test_compare_opcode_queries() {
        assert_eq!(
            OpCode::IfLUCmp(CmpRel::Lt).compare_relation(),
            Some(CmpRel::Lt)
        );
        assert!(OpCode::IfLUCmp(CmpRel::Lt).is_unsigned_compare());
        assert!(OpCode::ACmp(CmpRel::Ge).is_unsigned_compare());
        assert!(!OpCode::LCmp(CmpRel::Ge).is_unsigned_compare());
        assert_eq!(
            OpCode::IfACmp(CmpRel::Eq).compare_operand_type(),
            Some(DataType::Address)
        );
    }

    #[test]
    fn test_relation_swap() {
        assert_eq!(CmpRel::Lt.swapped(), CmpRel::Gt);
        assert_eq!(CmpRel::Ge.swapped(), CmpRel::Le);
        assert_eq!(CmpRel::Eq.swapped(), CmpRel::Eq);
    }
}
