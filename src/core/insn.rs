// This module defines the structured instruction stream the evaluators emit: the mnemonic
// subset of the z instruction set the selector uses, operand payloads (virtual registers,
// immediates, memory references, labels, literal-pool entries, element masks, SS lengths),
// and per-instruction register-dependency conditions used to pin real registers (GPR0 for
// the immediate-shortcut forms, GPR1/GPR2 for the hardware translate loop, even/odd pairs
// for double-width divide). Instructions are values, not encodings: the assembler is an
// external collaborator, and tests assert against this stream. Mnemonics know whether they
// clobber the condition code, which the CC-reuse optimizations depend on; when in doubt a
// mnemonic must report that it clobbers, never the reverse.

//! Structured target instructions: mnemonics, operands, dependencies.

use super::memref::MemRef;
use super::register::VirtReg;

/// Identifies a branch-target label within one method's stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// Identifies a literal-pool entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LitId(pub u32);

/// The z mnemonics used by the selector.
///
/// Grouped by family; the `Label` / internal-control-flow markers are
/// pseudo-instructions consumed by the external register allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(clippy::upper_case_acronyms)]
pub enum Mnemonic {
    // Register-register moves and extensions.
    Lr,
    Lgr,
    Lgfr,
    Llgfr,
    Lbr,
    Lgbr,
    Llcr,
    Llgcr,
    Lhr,
    Lghr,
    Llhr,
    Llghr,
    /// 31-bit-clean zero-extending load (address promotion).
    Llgtr,
    Ldr,
    Ldgr,
    Lgdr,

    // Register-memory loads.
    L,
    Lg,
    Lgf,
    Llgf,
    Lb,
    Lgb,
    Llc,
    Llgc,
    Lh,
    Lgh,
    Llh,
    Llgh,
    Ld,
    Le,
    // Load-and-test.
    Lt,
    Ltg,
    Ltgf,
    Ltr,
    Ltgr,
    // Byte-reversed.
    Lrv,
    Lrvg,
    // Address computation.
    La,
    Lay,
    Larl,
    // Relative-long.
    Lrl,
    Lgrl,
    Lgfrl,
    Llgfrl,

    // Load-immediate family.
    Lhi,
    Lghi,
    Lgfi,
    Llill,
    Llilh,
    Llihl,
    Llihh,
    Llilf,
    Llihf,
    Iill,
    Iilh,
    Iihl,
    Iihh,
    Iilf,
    Iihf,

    // Stores.
    St,
    Stg,
    Stc,
    Sth,
    Std,
    Ste,
    Strv,
    Strvg,
    Strl,
    Stgrl,
    // Conditional load/store/move.
    Loc,
    Locg,
    Locr,
    Locgr,
    Lochi,
    Locghi,
    Stoc,
    Stocg,

    // Arithmetic.
    Ar,
    Agr,
    Sr,
    Sgr,
    A,
    Ag,
    S,
    Sg,
    Ahi,
    Aghi,
    Afi,
    Agfi,
    Asi,
    Agsi,
    Msr,
    Msgr,
    Ms,
    Msg,
    Mhi,
    Mghi,
    Msfi,
    Msgfi,
    Lcr,
    Lcgr,
    Lpr,
    Lpgr,
    /// Divide single (64-bit), even/odd pair.
    Dsgr,

    // Bitwise.
    Nr,
    Ngr,
    Or,
    Ogr,
    Xr,
    Xgr,
    N,
    Ng,
    O,
    Og,
    X,
    Xg,
    Nill,
    Nilh,
    Nihl,
    Nihh,
    Nilf,
    Nihf,
    Oill,
    Oilh,
    Oihl,
    Oihh,
    Oilf,
    Oihf,
    Xilf,
    Xihf,

    // Shifts.
    Sll,
    Sllg,
    Srl,
    Srlg,
    Sra,
    Srag,
    Risbg,

    // Compares.
    Cr,
    Cgr,
    Clr,
    Clgr,
    C,
    Cg,
    Cl,
    Clg,
    Ch,
    Cgh,
    Cgf,
    Clgf,
    Chi,
    Cghi,
    Cfi,
    Cgfi,
    Clfi,
    Clgfi,
    Cli,
    Chhsi,
    Chsi,
    Cghsi,
    Clhhsi,
    Clfhsi,
    Clghsi,
    Clc,
    Cebr,
    Cdbr,

    // Test under mask.
    Tm,
    Tmll,
    Tmlh,
    Tmhl,
    Tmhh,

    // Branches and fused compare-branches.
    Brc,
    Bcr,
    Brct,
    Brctg,
    Brxle,
    Crj,
    Cgrj,
    Clrj,
    Clgrj,
    Cij,
    Cgij,
    Clij,
    Clgij,

    // Calls.
    Basr,
    Brasl,

    // Atomics.
    Laa,
    Laag,
    Cs,
    Csg,

    // SS-format storage operations.
    Mvc,
    Mvcrl,
    Xc,
    Mvi,
    Mvhhi,
    Mvhi,
    Mvghi,
    Exrl,
    // Hardware translate family.
    Trot,
    Trto,
    Troo,
    Trtt,

    // Scalar FP arithmetic and multiply-add.
    Aebr,
    Adbr,
    Sebr,
    Sdbr,
    Meebr,
    Mdbr,
    Madb,
    Msdb,
    Maeb,
    Mseb,

    // Vector.
    Vl,
    Vst,
    Vll,
    Vstl,
    Vlr,
    Vlrep,
    Vlgv,
    Vlvg,
    Vlvgp,
    Vrep,
    Vrepi,
    Vgbm,
    Va,
    Vs,
    Vml,
    Vme,
    Vmo,
    Vmle,
    Vmlo,
    Vn,
    Vo,
    Vx,
    Vno,
    Vceq,
    Vch,
    Vchl,
    Vesl,
    Vesrl,
    Vesra,
    Vfa,
    Vfs,
    Vfm,
    Vfd,
    Vfma,
    Vfms,
    Vfene,
    Vpkls,
    Vuplh,
    Vupll,
    Vsum,
    Vsumg,
    Vsumq,
    Vbperm,
    Vlc,

    // Pseudo-instructions.
    Label,
    InternalCtlFlowBegin,
    InternalCtlFlowEnd,
}

impl Mnemonic {
    /// Whether emitting this instruction invalidates a condition code a
    /// later instruction might have wanted to reuse. Conservative: anything
    /// not positively known CC-transparent reports true.
    pub fn clobbers_cc(self) -> bool {
        use Mnemonic::*;
        !matches!(
            self,
            Lr | Lgr
                | Lgfr
                | Llgfr
                | Lbr
                | Lgbr
                | Llcr
                | Llgcr
                | Lhr
                | Lghr
                | Llhr
                | Llghr
                | Llgtr
                | Ldr
                | Ldgr
                | Lgdr
                | L
                | Lg
                | Lgf
                | Llgf
                | Lb
                | Lgb
                | Llc
                | Llgc
                | Lh
                | Lgh
                | Llh
                | Llgh
                | Ld
                | Le
                | Lrv
                | Lrvg
                | La
                | Lay
                | Larl
                | Lrl
                | Lgrl
                | Lgfrl
                | Llgfrl
                | Lhi
                | Lghi
                | Lgfi
                | Llill
                | Llilh
                | Llihl
                | Llihh
                | Llilf
                | Llihf
                | Iill
                | Iilh
                | Iihl
                | Iihh
                | Iilf
                | Iihf
                | St
                | Stg
                | Stc
                | Sth
                | Std
                | Ste
                | Strv
                | Strvg
                | Strl
                | Stgrl
                | Loc
                | Locg
                | Locr
                | Locgr
                | Lochi
                | Locghi
                | Stoc
                | Stocg
                | Sll
                | Sllg
                | Srl
                | Srlg
                | Mvc
                | Mvcrl
                | Mvi
                | Mvhhi
                | Mvhi
                | Mvghi
                | Msr
                | Msgr
                | Ms
                | Msg
                | Mhi
                | Mghi
                | Msfi
                | Msgfi
                | Dsgr
                | Vl
                | Vst
                | Vll
                | Vstl
                | Vlr
                | Vlrep
                | Vlgv
                | Vlvg
                | Vlvgp
                | Vrep
                | Vrepi
                | Vgbm
                | Va
                | Vs
                | Vml
                | Vme
                | Vmo
                | Vmle
                | Vmlo
                | Vn
                | Vo
                | Vx
                | Vno
                | Vceq
                | Vch
                | Vchl
                | Vesl
                | Vesrl
                | Vesra
                | Vfa
                | Vfs
                | Vfm
                | Vfd
                | Vfma
                | Vfms
                | Vuplh
                | Vupll
                | Vsum
                | Vsumg
                | Vsumq
                | Vbperm
                | Vlc
                | Meebr
                | Mdbr
                | Madb
                | Msdb
                | Maeb
                | Mseb
                | Label
                | InternalCtlFlowBegin
                | InternalCtlFlowEnd
        )
    }

    /// Whether this instruction leaves the logical-result condition code
    /// behind: CC0 = result zero, CC1 = result nonzero. Only this
    /// convention supports the equality-class compare-against-zero reuse;
    /// arithmetic results use a sign-split convention whose nonzero case
    /// spans two condition codes.
    pub fn sets_logical_result_cc(self) -> bool {
        use Mnemonic::*;
        matches!(
            self,
            Nr | Ngr | Or | Ogr | Xr | Xgr | N | Ng | O | Og | X | Xg | Nilf | Nihf | Oilf | Oihf
                | Xilf | Xihf
        )
    }
}

impl std::fmt::Display for Mnemonic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // The debug name is the mnemonic in mixed case.
        let name = format!("{:?}", self).to_uppercase();
        write!(f, "{name}")
    }
}

/// Real-register pinning request attached to an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pin {
    /// The virtual register must be assigned the named GPR.
    Gpr(u8),
    /// The virtual register is a GprPair and must land on an even/odd pair.
    EvenOddPair,
}

/// One register-dependency condition: pin `vreg` per `pin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegDep {
    pub vreg: VirtReg,
    pub pin: Pin,
}

/// Instruction operand payloads.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Reg(VirtReg),
    Imm(i64),
    Mem(MemRef),
    Label(LabelId),
    Lit(LitId),
    /// Condition/element mask field.
    Mask(u8),
    /// SS-format length field (encoded length, i.e. bytes - 1).
    Len(i64),
}

/// One emitted instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Insn {
    pub mnemonic: Mnemonic,
    pub operands: Vec<Operand>,
    pub deps: Vec<RegDep>,
}

impl Insn {
    pub fn new(mnemonic: Mnemonic, operands: Vec<Operand>) -> Self {
        Self {
            mnemonic,
            operands,
            deps: Vec::new(),
        }
    }

    pub fn with_deps(mut self, deps: Vec<RegDep>) -> Self {
        self.deps = deps;
        self
    }

    /// First register operand, if any. Convenience for tests.
    pub fn first_reg(&self) -> Option<VirtReg> {
        self.operands.iter().find_map(|op| match op {
            Operand::Reg(r) => Some(*r),
            _ => None,
        })
    }

    /// First immediate operand, if any.
    pub fn first_imm(&self) -> Option<i64> {
        self.operands.iter().find_map(|op| match op {
            Operand::Imm(v) => Some(*v),
            _ => None,
        })
    }
}

impl std::fmt::Display for Insn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.mnemonic)?;
        for (i, op) in self.operands.iter().enumerate() {
            let sep = if i == 0 { " " } else { "," };
            match op {
                Operand::Reg(r) => write!(f, "{sep}{r}")?,
                Operand::Imm(v) => write!(f, "{sep}{v}")?,
                Operand::Mem(m) => write!(f, "{sep}{m}")?,
                Operand::Label(l) => write!(f, "{sep}L{}", l.0)?,
                Operand::Lit(l) => write!(f, "{sep}=lit{}", l.0)?,
                Operand::Mask(m) => write!(f, "{sep}#{m}")?,
                Operand::Len(n) => write!(f, "{sep}len({n})")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cc_classification() {
        assert!(Mnemonic::Cr.clobbers_cc());
        assert!(Mnemonic::Ar.clobbers_cc());
        assert!(!Mnemonic::Lgr.clobbers_cc());
        assert!(!Mnemonic::Mvc.clobbers_cc());
        assert!(Mnemonic::Xgr.sets_logical_result_cc());
        assert!(!Mnemonic::Cr.sets_logical_result_cc());
        // Arithmetic results split nonzero across two condition codes.
        assert!(!Mnemonic::Ar.sets_logical_result_cc());
    }

    #[test]
    fn test_display_uppercase() {
        assert_eq!(Mnemonic::Lghi.to_string(), "LGHI");
        assert_eq!(Mnemonic::Clgij.to_string(), "CLGIJ");
    }
}
