//! SPIR-V support: reading (binary and textual) and lowering to a [`Module`](crate::Module).

pub mod asm;
pub mod lower;
pub mod read;
pub mod spec;

use smallvec::SmallVec;
use std::collections::BTreeSet;
use std::num::NonZeroU32;

/// SPIR-V ID.
pub type Id = NonZeroU32;

/// Module-wide settings, from the header and the mode-setting instructions.
#[derive(Clone, Debug, Default)]
pub struct Dialect {
    pub version_major: u8,
    pub version_minor: u8,

    pub capabilities: BTreeSet<u32>,
    pub extensions: BTreeSet<String>,

    pub addressing_model: u32,
    pub memory_model: u32,
}

/// A decoded SPIR-V instruction.
///
/// ID operands (other than the result type and result) are kept in `ids`, and
/// all other operands in `imms`, both in the order they appear in. E.g. for
/// `OpSwitch`, `ids` is `[selector, default, target...]`, while `imms` holds
/// one case literal per target.
#[derive(Clone, Debug)]
pub struct Inst {
    pub opcode: spec::Opcode,

    pub result_type_id: Option<Id>,
    pub result_id: Option<Id>,

    pub ids: SmallVec<[Id; 4]>,
    pub imms: SmallVec<[Imm; 2]>,
}

/// Non-ID operand.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Imm {
    /// Enumerant, mask, or 32-bit (or narrower) number.
    Word(u32),

    /// Number of a 64-bit contextual type.
    Wide(u64),

    Str(String),
}

impl Imm {
    pub fn as_u32(&self) -> Option<u32> {
        match *self {
            Imm::Word(word) => Some(word),
            Imm::Wide(_) | Imm::Str(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match *self {
            Imm::Word(word) => Some(word.into()),
            Imm::Wide(wide) => Some(wide),
            Imm::Str(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Imm::Str(s) => Some(s),
            Imm::Word(_) | Imm::Wide(_) => None,
        }
    }
}

impl Inst {
    pub fn new(opcode: spec::Opcode) -> Self {
        Inst { opcode, result_type_id: None, result_id: None, ids: SmallVec::new(), imms: SmallVec::new() }
    }

    /// The `i`th non-ID operand, if it's a single word.
    pub fn word(&self, i: usize) -> Option<u32> {
        self.imms.get(i)?.as_u32()
    }

    /// All the single-word non-ID operands (e.g. `OpCompositeExtract` indices).
    pub fn words(&self) -> impl Iterator<Item = u32> + '_ {
        self.imms.iter().filter_map(Imm::as_u32)
    }

    /// The `i`th non-ID operand, if it's a string.
    pub fn string(&self, i: usize) -> Option<&str> {
        self.imms.get(i)?.as_str()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_accessors() {
        let wk = &spec::Spec::get().well_known;
        let mut inst = Inst::new(wk.OpEntryPoint);
        inst.imms.extend([Imm::Word(4), Imm::Str("main".into()), Imm::Wide(1 << 40)]);

        assert_eq!(inst.word(0), Some(4));
        assert_eq!(inst.word(1), None);
        assert_eq!(inst.string(1), Some("main"));
        assert_eq!(inst.imms[2].as_u64(), Some(1 << 40));
        assert_eq!(inst.words().collect::<Vec<_>>(), [4]);
    }
}
