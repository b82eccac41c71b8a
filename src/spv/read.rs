//! Decoding of the SPIR-V binary form into [`spv::Inst`]s.

use crate::spv::spec::{self, OperandKindDef, OperandSink};
use crate::spv::{self, Imm};
use rustc_hash::FxHashMap;
use std::path::Path;
use std::{fs, io};

/// What's known about an already decoded ID, enough to size the
/// `LiteralContextDependentNumber` operands referring to it.
#[derive(Copy, Clone)]
enum IdShape {
    /// `OpTypeInt`/`OpTypeFloat`.
    NumericType { width: u32 },
    Value { ty: spv::Id },
    Other,
}

#[derive(Debug, thiserror::Error)]
enum DecodeError {
    #[error("truncated instruction")]
    Truncated,
    #[error("overlong instruction")]
    Overlong,
    #[error("ID %0 is illegal")]
    IdZero,
    #[error("%{0} used as a result type before its definition")]
    UndefinedResultType(spv::Id),
    #[error("unsupported {kind:?} {value:#x}")]
    UnsupportedEnumerant { kind: spec::OperandKind, value: u32 },
    #[error("string operand isn't valid UTF-8")]
    InvalidUtf8,
    #[error("no integer or float type to decode a literal with")]
    UntypedLiteral,
}

/// Decoder for the operands of a single instruction.
struct InstDecoder<'a> {
    shapes: &'a FxHashMap<spv::Id, IdShape>,
    words: &'a [u32],
    inst: spv::Inst,
}

impl InstDecoder<'_> {
    fn next_word(&mut self) -> Result<u32, DecodeError> {
        let (&word, rest) = self.words.split_first().ok_or(DecodeError::Truncated)?;
        self.words = rest;
        Ok(word)
    }

    fn id(&mut self) -> Result<spv::Id, DecodeError> {
        spv::Id::new(self.next_word()?).ok_or(DecodeError::IdZero)
    }

    fn string(&mut self) -> Result<String, DecodeError> {
        let mut bytes = vec![];
        loop {
            for byte in self.next_word()?.to_le_bytes() {
                if byte == 0 {
                    return String::from_utf8(bytes).map_err(|_| DecodeError::InvalidUtf8);
                }
                bytes.push(byte);
            }
        }
    }

    /// Width of the type numeric literals are decoded with: the result type,
    /// or else the type of the first ID operand (the `OpSwitch` selector).
    fn literal_width(&self) -> Option<u32> {
        let ty = match self.inst.result_type_id {
            Some(ty) => ty,
            None => match self.shapes.get(self.inst.ids.first()?)? {
                IdShape::Value { ty } => *ty,
                _ => return None,
            },
        };
        match self.shapes.get(&ty)? {
            IdShape::NumericType { width } => Some(*width),
            _ => None,
        }
    }

    fn enumerant_params(
        &mut self,
        kind: spec::OperandKind,
        enumerants: &spec::Enumerants,
        value: u32,
    ) -> Result<(), DecodeError> {
        let enumerant =
            enumerants.by_value(value).ok_or(DecodeError::UnsupportedEnumerant { kind, value })?;
        enumerant.params.visit(self)
    }
}

impl OperandSink for InstDecoder<'_> {
    type Error = DecodeError;

    fn has_more(&mut self) -> bool {
        !self.words.is_empty()
    }

    fn operand(&mut self, kind: spec::OperandKind) -> Result<(), DecodeError> {
        match kind.def() {
            OperandKindDef::Id => {
                let id = self.id()?;
                self.inst.ids.push(id);
            }
            OperandKindDef::Enum(variants) => {
                let value = self.next_word()?;
                self.inst.imms.push(Imm::Word(value));
                self.enumerant_params(kind, variants, value)?;
            }
            OperandKindDef::Mask { flags, .. } => {
                let mask = self.next_word()?;
                self.inst.imms.push(Imm::Word(mask));
                let unknown = spec::mask_flags(mask)
                    .filter(|&flag| flags.by_value(flag).is_none())
                    .fold(0, |acc, flag| acc | flag);
                if unknown != 0 {
                    return Err(DecodeError::UnsupportedEnumerant { kind, value: unknown });
                }
                for flag in spec::mask_flags(mask) {
                    self.enumerant_params(kind, flags, flag)?;
                }
            }
            OperandKindDef::Literal(spec::LiteralSize::Word) => {
                let word = self.next_word()?;
                self.inst.imms.push(Imm::Word(word));
            }
            OperandKindDef::Literal(spec::LiteralSize::NulTerminated) => {
                let s = self.string()?;
                self.inst.imms.push(Imm::Str(s));
            }
            OperandKindDef::Literal(spec::LiteralSize::FromContextualType) => {
                let width = self.literal_width().ok_or(DecodeError::UntypedLiteral)?;
                let lo = self.next_word()?;
                let imm = if width > 32 {
                    let hi = self.next_word()?;
                    Imm::Wide(u64::from(lo) | (u64::from(hi) << 32))
                } else {
                    Imm::Word(lo)
                };
                self.inst.imms.push(imm);
            }
        }
        Ok(())
    }
}

fn invalid(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed SPIR-V ({reason})"))
}

/// Iterator over the instructions of a binary module, stopping after the
/// first error.
pub struct ModuleParser {
    /// The header words, after any endianness swapping.
    pub header: [u32; spec::HEADER_LEN],

    /// The whole module, in native endianness.
    words: Vec<u32>,
    next_word: usize,

    shapes: FxHashMap<spv::Id, IdShape>,
}

impl ModuleParser {
    pub fn read_from_spv_file(path: impl AsRef<Path>) -> io::Result<Self> {
        Self::read_from_spv_bytes(&fs::read(path)?)
    }

    pub fn read_from_spv_bytes(spv_bytes: &[u8]) -> io::Result<Self> {
        if spv_bytes.len() % 4 != 0 {
            return Err(invalid("not a multiple of 4 bytes"));
        }
        let words = match bytemuck::try_cast_slice::<u8, u32>(spv_bytes) {
            Ok(words) => words.to_vec(),
            Err(_) => spv_bytes
                .chunks_exact(4)
                .map(|w| u32::from_ne_bytes([w[0], w[1], w[2], w[3]]))
                .collect(),
        };
        Self::read_from_spv_words(words)
    }

    pub fn read_from_spv_words(mut words: Vec<u32>) -> io::Result<Self> {
        let magic = spec::Spec::get().magic;
        let header: [u32; spec::HEADER_LEN] = words
            .get(..spec::HEADER_LEN)
            .and_then(|header| header.try_into().ok())
            .ok_or_else(|| invalid("truncated header"))?;

        let header = if header[0] == magic {
            header
        } else if header[0].swap_bytes() == magic {
            words.iter_mut().for_each(|word| *word = word.swap_bytes());
            header.map(u32::swap_bytes)
        } else {
            return Err(invalid("incorrect magic number"));
        };

        Ok(Self { header, words, next_word: spec::HEADER_LEN, shapes: FxHashMap::default() })
    }

    /// Decode the instruction starting at `self.next_word`, returning it
    /// along with its length in words.
    fn decode_next(&self) -> io::Result<(spv::Inst, usize)> {
        let words = &self.words[self.next_word..];
        let (len, opcode) = ((words[0] >> 16) as usize, words[0] as u16);

        let opcode = spec::Opcode::from_u16(opcode)
            .ok_or_else(|| invalid(&format!("unsupported opcode {opcode}")))?;
        let def = opcode.def();
        let invalid = |e: DecodeError| invalid(&format!("in {}: {e}", def.name));

        if len == 0 || words.len() < len {
            return Err(invalid(DecodeError::Truncated));
        }

        let mut decoder =
            InstDecoder { shapes: &self.shapes, words: &words[1..len], inst: spv::Inst::new(opcode) };
        if def.has_result_type_id {
            let ty = decoder.id().map_err(invalid)?;
            if !self.shapes.contains_key(&ty) {
                return Err(invalid(DecodeError::UndefinedResultType(ty)));
            }
            decoder.inst.result_type_id = Some(ty);
        }
        if def.has_result_id {
            decoder.inst.result_id = Some(decoder.id().map_err(invalid)?);
        }
        def.operands.visit(&mut decoder).map_err(invalid)?;
        if decoder.has_more() {
            return Err(invalid(DecodeError::Overlong));
        }

        Ok((decoder.inst, len))
    }

    fn record_shape(&mut self, inst: &spv::Inst) -> io::Result<()> {
        let Some(id) = inst.result_id else {
            return Ok(());
        };
        let wk = &spec::Spec::get().well_known;
        let shape = if inst.opcode == wk.OpTypeInt || inst.opcode == wk.OpTypeFloat {
            IdShape::NumericType { width: inst.word(0).unwrap_or(0) }
        } else if let Some(ty) = inst.result_type_id {
            IdShape::Value { ty }
        } else {
            IdShape::Other
        };
        if self.shapes.insert(id, shape).is_some() {
            return Err(invalid(&format!("%{id} is the result of multiple instructions")));
        }
        Ok(())
    }
}

impl Iterator for ModuleParser {
    type Item = io::Result<spv::Inst>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next_word >= self.words.len() {
            return None;
        }
        let result = self.decode_next().and_then(|(inst, len)| {
            self.record_shape(&inst)?;
            self.next_word += len;
            Ok(inst)
        });
        if result.is_err() {
            self.next_word = self.words.len();
        }
        Some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> Vec<u32> {
        vec![spec::Spec::get().magic, 0x0001_0300, 0, 100, 0]
    }

    fn op<'a>(name: &str, operands: &'a [u32]) -> impl Iterator<Item = u32> + 'a {
        let opcode = spec::Spec::get().opcode_by_name(name).unwrap().as_u16();
        let len = u32::try_from(operands.len() + 1).unwrap();
        std::iter::once((len << 16) | u32::from(opcode)).chain(operands.iter().copied())
    }

    fn decode(words: Vec<u32>) -> io::Result<Vec<spv::Inst>> {
        ModuleParser::read_from_spv_words(words)?.collect()
    }

    #[test]
    fn strings_and_wide_literals() {
        let mut words = header();
        // "GLSL.std.450" is 12 bytes, so its terminator takes a whole word.
        words.extend(op("OpExtInstImport", &[1, 0x4c53_4c47, 0x6474_732e, 0x3035_342e, 0]));
        words.extend(op("OpTypeInt", &[2, 64, 0]));
        words.extend(op("OpConstant", &[2, 3, 7, 1]));

        let insts = decode(words).unwrap();
        assert_eq!(insts[0].string(0), Some("GLSL.std.450"));
        assert_eq!(insts[2].imms[..], [Imm::Wide(7 | (1 << 32))]);
    }

    #[test]
    fn switch_cases_follow_selector_width() {
        let mut words = header();
        words.extend(op("OpTypeInt", &[1, 32, 1]));
        words.extend(op("OpConstant", &[1, 2, 5]));
        words.extend(op("OpSwitch", &[2, 10, 1, 11, 2, 12]));

        let insts = decode(words).unwrap();
        let ids: Vec<_> = insts[2].ids.iter().map(|id| id.get()).collect();
        assert_eq!(ids, [2, 10, 11, 12]);
        assert_eq!(insts[2].imms[..], [Imm::Word(1), Imm::Word(2)]);
    }

    #[test]
    fn unknown_mask_bits_are_rejected() {
        let mut words = header();
        words.extend(op("OpTypeVoid", &[1]));
        words.extend(op("OpTypeFunction", &[2, 1]));
        words.extend(op("OpFunction", &[1, 3, 0x8000_0000, 2]));

        let mut parser = ModuleParser::read_from_spv_words(words).unwrap();
        assert!(parser.next().unwrap().is_ok());
        assert!(parser.next().unwrap().is_ok());
        let err = parser.next().unwrap().unwrap_err();
        assert!(err.to_string().contains("FunctionControl"), "{err}");
        assert!(parser.next().is_none());
    }

    #[test]
    fn duplicate_result_ids_are_rejected() {
        let mut words = header();
        words.extend(op("OpTypeVoid", &[1]));
        words.extend(op("OpTypeBool", &[1]));
        assert!(decode(words).is_err());
    }
}
