// This module defines the abstract branch-condition model: a 4-bit condition-code mask
// (bit 8 selects CC0, 4 selects CC1, 2 selects CC2, 1 selects CC3) plus the remapping
// algebra the comparison engine relies on. Three remaps matter: operand swap (exchanges
// the CC1/CC2 bits, used when the generic compare path reverses operands to save an
// instruction), negation within a compare context (flips CC0..CC2 and leaves the CC3 bit
// alone, since compares never set CC3), and the idiom-specific translations for
// test-under-mask and logical-CC reuse where the producing instruction assigns different
// meanings to the condition codes. The address-compare relation table is recorded verbatim
// as platform knowledge: address compares are always unsigned integer compares of pointer
// width, and getting polarity wrong silently inverts pointer ordering.

//! Branch-condition masks and their remapping rules.

use super::il::CmpRel;

/// A 4-bit condition-code branch mask.
///
/// The comparison engine selects a mask when it emits a compare and remaps
/// it whenever the chosen idiom changes which condition codes encode the
/// outcome (swapped operands, test-under-mask, logical-CC reuse).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CondCode(pub u8);

impl CondCode {
    pub const NEVER: CondCode = CondCode(0);
    pub const ALWAYS: CondCode = CondCode(15);

    // After a compare: CC0 equal, CC1 first-operand-low, CC2 first-operand-high.
    pub const EQ: CondCode = CondCode(8);
    pub const LT: CondCode = CondCode(4);
    pub const GT: CondCode = CondCode(2);
    pub const NE: CondCode = CondCode(6);
    pub const LE: CondCode = CondCode(12);
    pub const GE: CondCode = CondCode(10);

    /// Arithmetic overflow (CC3 after add/subtract).
    pub const OVERFLOW: CondCode = CondCode(1);

    // After test-under-mask: CC0 all selected bits zero, CC3 all ones,
    // CC1/CC2 mixed.
    pub const TM_ALL_ZERO: CondCode = CondCode(8);
    pub const TM_ALL_ONE: CondCode = CondCode(1);
    pub const TM_NOT_ALL_ZERO: CondCode = CondCode(7);
    pub const TM_NOT_ALL_ONE: CondCode = CondCode(14);

    /// Mask for a comparison relation, forward operand order.
    pub fn for_relation(rel: CmpRel) -> CondCode {
        match rel {
            CmpRel::Eq => Self::EQ,
            CmpRel::Ne => Self::NE,
            CmpRel::Lt => Self::LT,
            CmpRel::Le => Self::LE,
            CmpRel::Gt => Self::GT,
            CmpRel::Ge => Self::GE,
        }
    }

    /// Remap after the compare's operands were emitted in reversed order:
    /// CC1 and CC2 exchange meaning, CC0/CC3 are order-independent.
    pub fn swapped_operands(self) -> CondCode {
        let m = self.0;
        CondCode((m & 0b1001) | ((m & 0b0100) >> 1) | ((m & 0b0010) << 1))
    }

    /// Negate within a compare context. Compares never set CC3, so only the
    /// CC0..CC2 bits flip; the CC3 bit is preserved untouched.
    pub fn negated(self) -> CondCode {
        CondCode(self.0 ^ 0b1110)
    }

    /// Full complement over all four condition codes.
    pub fn complement(self) -> CondCode {
        CondCode(self.0 ^ 0b1111)
    }

    /// Mask to use when an equality-class compare against zero reuses the
    /// condition code of a preceding logical operation (CC0 = result zero,
    /// CC1 = result nonzero). Only equality/inequality survive this reuse.
    pub fn logical_result(rel: CmpRel) -> Option<CondCode> {
        match rel {
            CmpRel::Eq => Some(CondCode(0b1000)),
            CmpRel::Ne => Some(CondCode(0b0100)),
            _ => None,
        }
    }

    /// Test-under-mask translation for `(x & mask) cmp operand` where the
    /// comparison operand is either zero or the mask itself.
    ///
    /// `against_full_mask` selects the `== mask` form. Only equality-class
    /// relations are representable.
    pub fn test_under_mask(rel: CmpRel, against_full_mask: bool) -> Option<CondCode> {
        match (rel, against_full_mask) {
            (CmpRel::Eq, false) => Some(Self::TM_ALL_ZERO),
            (CmpRel::Ne, false) => Some(Self::TM_NOT_ALL_ZERO),
            (CmpRel::Eq, true) => Some(Self::TM_ALL_ONE),
            (CmpRel::Ne, true) => Some(Self::TM_NOT_ALL_ONE),
            _ => None,
        }
    }
}

/// Address compares lower to unsigned integer compares of pointer width.
///
/// This mapping is architecture convention, reproduced verbatim rather than
/// derived: the relation keeps its shape, the comparison is always the
/// unsigned (CL-class) one. Polarity errors here silently invert pointer
/// ordering, so the table is spelled out relation by relation.
pub fn address_compare_mask(rel: CmpRel) -> CondCode {
    match rel {
        CmpRel::Eq => CondCode::EQ,
        CmpRel::Ne => CondCode::NE,
        CmpRel::Lt => CondCode::LT,
        CmpRel::Le => CondCode::LE,
        CmpRel::Gt => CondCode::GT,
        CmpRel::Ge => CondCode::GE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_swap_exchanges_lt_gt() {
        assert_eq!(CondCode::LT.swapped_operands(), CondCode::GT);
        assert_eq!(CondCode::GT.swapped_operands(), CondCode::LT);
        assert_eq!(CondCode::LE.swapped_operands(), CondCode::GE);
        assert_eq!(CondCode::GE.swapped_operands(), CondCode::LE);
        // Order-independent masks are fixed points.
        assert_eq!(CondCode::EQ.swapped_operands(), CondCode::EQ);
        assert_eq!(CondCode::NE.swapped_operands(), CondCode::NE);
    }

    #[test]
    fn test_negation_is_involutive_on_compare_masks() {
        for mask in [
            CondCode::EQ,
            CondCode::NE,
            CondCode::LT,
            CondCode::LE,
            CondCode::GT,
            CondCode::GE,
        ] {
            assert_eq!(mask.negated().negated(), mask);
        }
        assert_eq!(CondCode::EQ.negated(), CondCode::NE);
        assert_eq!(CondCode::LT.negated(), CondCode::GE);
        assert_eq!(CondCode::GT.negated(), CondCode::LE);
    }

    #[test]
    fn test_tm_masks() {
        assert_eq!(
            CondCode::test_under_mask(CmpRel::Eq, false),
            Some(CondCode::TM_ALL_ZERO)
        );
        assert_eq!(
            CondCode::test_under_mask(CmpRel::Ne, true),
            Some(CondCode::TM_NOT_ALL_ONE)
        );
        assert_eq!(CondCode::test_under_mask(CmpRel::Lt, false), None);
    }

    #[test]
    fn test_logical_cc_reuse_is_equality_only() {
        assert!(CondCode::logical_result(CmpRel::Eq).is_some());
        assert!(CondCode::logical_result(CmpRel::Ne).is_some());
        assert!(CondCode::logical_result(CmpRel::Lt).is_none());
        assert!(CondCode::logical_result(CmpRel::Ge).is_none());
    }
}
