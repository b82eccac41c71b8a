//! Assembling the textual SPIR-V form (as produced by `spirv-dis`) into words.
//!
//! The result is a complete SPIR-V binary module (header included), which can
//! then be parsed with [`read::ModuleParser`](crate::spv::read::ModuleParser).
//!
//! Named IDs (e.g. `%main`) are supported: numeric IDs (`%12`) keep their
//! number, while all other names are assigned fresh IDs, above the largest
//! numeric ID, in order of first appearance.

use crate::spv::{self, spec};
use rustc_hash::FxHashMap;
use std::{io, iter};

fn invalid(line: usize, reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("invalid SPIR-V assembly (line {line}: {reason})"))
}

#[derive(Clone, Debug, PartialEq)]
enum Token<'a> {
    Id(&'a str),
    Equals,
    Str(String),
    Word(&'a str),
}

fn tokenize_line(line_idx: usize, line: &str) -> io::Result<Vec<Token<'_>>> {
    let mut tokens = vec![];
    let mut rest = line;
    loop {
        rest = rest.trim_start();
        let Some(c) = rest.chars().next() else {
            break;
        };
        match c {
            ';' => break,
            '=' => {
                tokens.push(Token::Equals);
                rest = &rest[1..];
            }
            '"' => {
                let mut s = String::new();
                let mut chars = rest[1..].char_indices();
                let end = loop {
                    match chars.next() {
                        Some((i, '"')) => break i + 2,
                        Some((_, '\\')) => match chars.next() {
                            Some((_, escaped)) => s.push(escaped),
                            None => return Err(invalid(line_idx, "unterminated string")),
                        },
                        Some((_, c)) => s.push(c),
                        None => return Err(invalid(line_idx, "unterminated string")),
                    }
                };
                tokens.push(Token::Str(s));
                rest = &rest[end..];
            }
            _ => {
                let end = rest
                    .find(|c: char| c.is_whitespace() || c == ';' || c == '"' || c == '=')
                    .unwrap_or(rest.len());
                let word = &rest[..end];
                tokens.push(match word.strip_prefix('%') {
                    Some(name) if !name.is_empty() => Token::Id(name),
                    _ => Token::Word(word),
                });
                rest = &rest[end..];
            }
        }
    }
    Ok(tokens)
}

/// Words of a `LiteralString`: UTF-8, `\0`-terminated, padded with `\0`s.
fn encode_string(s: &str) -> impl Iterator<Item = u32> + '_ {
    let bytes = s.as_bytes();
    // Always at least one `\0`, even when `bytes` fills its last word.
    let word_count = bytes.len() / 4 + 1;
    (0..word_count).map(move |i| {
        let mut word = [0; 4];
        let chunk = bytes.get(i * 4..).unwrap_or(&[]);
        let n = chunk.len().min(4);
        word[..n].copy_from_slice(&chunk[..n]);
        u32::from_le_bytes(word)
    })
}

/// Scalar type information needed to encode `LiteralContextDependentNumber`s.
#[derive(Copy, Clone)]
enum NumericType {
    Int { width: u32, signed: bool },
    Float { width: u32 },
}

struct Assembler<'a> {
    wk: &'static spec::WellKnown,

    ids: &'a FxHashMap<&'a str, spv::Id>,
    numeric_types: FxHashMap<spv::Id, NumericType>,
    value_types: FxHashMap<spv::Id, spv::Id>,

    line_idx: usize,
    tokens: iter::Peekable<std::vec::IntoIter<Token<'a>>>,
    words: Vec<u32>,

    /// Of the instruction being assembled, to type its numeric literals.
    result_type: Option<spv::Id>,
    first_id_operand: Option<spv::Id>,
}

impl<'a> Assembler<'a> {
    fn err(&self, reason: impl AsRef<str>) -> io::Error {
        invalid(self.line_idx, reason.as_ref())
    }

    fn next_token(&mut self) -> io::Result<Token<'a>> {
        self.tokens.next().ok_or_else(|| self.err("missing operand"))
    }

    fn id(&mut self) -> io::Result<spv::Id> {
        match self.next_token()? {
            Token::Id(name) => Ok(self.ids[name]),
            tok => Err(self.err(format!("expected ID, found {tok:?}"))),
        }
    }

    fn word_token(&mut self) -> io::Result<&'a str> {
        match self.next_token()? {
            Token::Word(w) => Ok(w),
            tok => Err(self.err(format!("expected literal, found {tok:?}"))),
        }
    }

    fn parse_u32(&self, s: &str) -> io::Result<u32> {
        let parsed = if let Some(hex) = s.strip_prefix("0x") {
            u32::from_str_radix(hex, 16).ok()
        } else if let Some(neg) = s.strip_prefix('-') {
            neg.parse::<u32>().ok().map(|x| x.wrapping_neg())
        } else {
            s.parse().ok()
        };
        parsed.ok_or_else(|| self.err(format!("invalid integer literal `{s}`")))
    }

    fn enumerant_params(
        &mut self,
        enumerant: Option<&spec::Enumerant>,
        token: &str,
    ) -> io::Result<()> {
        match enumerant {
            Some(enumerant) => enumerant.params.visit(self),
            None => Err(self.err(format!("unsupported enumerant `{token}`"))),
        }
    }

    fn enum_value(&self, enumerants: &spec::Enumerants, token: &str) -> io::Result<u32> {
        match enumerants.by_name(token) {
            Some(enumerant) => Ok(enumerant.value),
            None => self.parse_u32(token),
        }
    }
}

impl spec::OperandSink for Assembler<'_> {
    type Error = io::Error;

    fn has_more(&mut self) -> bool {
        self.tokens.peek().is_some()
    }

    fn operand(&mut self, kind: spec::OperandKind) -> io::Result<()> {
        match kind.def() {
            spec::OperandKindDef::Mask { none, flags } => {
                let token = self.word_token()?;
                let mut mask = 0;
                for part in token.split('|').filter(|part| part != none) {
                    mask |= self.enum_value(flags, part)?;
                }
                self.words.push(mask);
                for flag in spec::mask_flags(mask) {
                    self.enumerant_params(flags.by_value(flag), token)?;
                }
            }
            spec::OperandKindDef::Enum(variants) => {
                let token = self.word_token()?;
                let value = self.enum_value(variants, token)?;
                self.words.push(value);
                self.enumerant_params(variants.by_value(value), token)?;
            }
            spec::OperandKindDef::Id => {
                let id = self.id()?;
                self.words.push(id.get());
                self.first_id_operand.get_or_insert(id);
            }
            spec::OperandKindDef::Literal(spec::LiteralSize::Word) => {
                let token = self.word_token()?;
                let ext_inst = (kind == self.wk.LiteralExtInstInteger)
                    .then(|| spec::Spec::get().glsl_std_450.number(token))
                    .flatten();
                let word = match ext_inst {
                    Some(number) => number,
                    None => self.parse_u32(token)?,
                };
                self.words.push(word);
            }
            spec::OperandKindDef::Literal(spec::LiteralSize::NulTerminated) => {
                let s = match self.next_token()? {
                    Token::Str(s) => s,
                    tok => return Err(self.err(format!("expected string, found {tok:?}"))),
                };
                self.words.extend(encode_string(&s));
            }
            spec::OperandKindDef::Literal(spec::LiteralSize::FromContextualType) => {
                let token = self.word_token()?;
                // `OpSwitch` takes its literal type from the selector.
                let ty = self
                    .result_type
                    .or_else(|| self.value_types.get(&self.first_id_operand?).copied())
                    .and_then(|ty| self.numeric_types.get(&ty).copied())
                    .ok_or_else(|| self.err("missing type for literal"))?;
                self.numeric_literal(ty, token)?;
            }
        }
        Ok(())
    }
}

impl Assembler<'_> {
    fn numeric_literal(&mut self, ty: NumericType, token: &str) -> io::Result<()> {
        let bad = || self.err(format!("invalid numeric literal `{token}`"));
        let bits: u64 = match ty {
            NumericType::Float { width: 32 } => u64::from(token.parse::<f32>().map_err(|_| bad())?.to_bits()),
            NumericType::Float { width: 64 } => token.parse::<f64>().map_err(|_| bad())?.to_bits(),
            NumericType::Float { width } => {
                return Err(self.err(format!("unsupported float width {width}")));
            }
            NumericType::Int { width, signed } => {
                let value = if let Some(hex) = token.strip_prefix("0x") {
                    u64::from_str_radix(hex, 16).map_err(|_| bad())?
                } else if signed || token.starts_with('-') {
                    token.parse::<i64>().map_err(|_| bad())? as u64
                } else {
                    token.parse::<u64>().map_err(|_| bad())?
                };
                if width < 64 { value & ((1 << width) - 1) } else { value }
            }
        };
        let width = match ty {
            NumericType::Int { width, .. } | NumericType::Float { width } => width,
        };
        self.words.push(bits as u32);
        if width > 32 {
            self.words.push((bits >> 32) as u32);
        }
        Ok(())
    }

    fn inst(
        &mut self,
        result_id: Option<spv::Id>,
        opcode: spec::Opcode,
        def: &spec::InstructionDef,
    ) -> io::Result<()> {
        let start = self.words.len();
        self.words.push(0);

        let mut result_type_id = None;
        if def.has_result_type_id {
            let ty = self.id()?;
            result_type_id = Some(ty);
            self.words.push(ty.get());
        }
        if def.has_result_id != result_id.is_some() {
            return Err(self.err(if def.has_result_id {
                format!("{} requires a result ID", opcode.name())
            } else {
                format!("{} has no result", opcode.name())
            }));
        }
        if let Some(id) = result_id {
            self.words.push(id.get());
        }

        self.result_type = result_type_id;
        self.first_id_operand = None;
        def.operands.visit(self)?;
        if let Some(tok) = self.tokens.next() {
            return Err(self.err(format!("unexpected trailing operand {tok:?}")));
        }

        let len = self.words.len() - start;
        let len = u16::try_from(len).map_err(|_| self.err("instruction too long"))?;
        self.words[start] = (u32::from(len) << 16) | u32::from(opcode.as_u16());

        // Track what's needed to interpret later `LiteralContextDependentNumber`s.
        if let Some(id) = result_id {
            let operands = &self.words[start + 2..];
            if opcode == self.wk.OpTypeInt {
                self.numeric_types
                    .insert(id, NumericType::Int { width: operands[0], signed: operands[1] != 0 });
            } else if opcode == self.wk.OpTypeFloat {
                self.numeric_types.insert(id, NumericType::Float { width: operands[0] });
            }
            if let Some(ty) = result_type_id {
                self.value_types.insert(id, ty);
            }
        }
        Ok(())
    }
}

/// Assemble `text` into a complete SPIR-V module (header included).
pub fn assemble(text: &str) -> io::Result<Vec<u32>> {
    let spv_spec = spec::Spec::get();

    let lines = text
        .lines()
        .enumerate()
        .map(|(i, line)| Ok((i + 1, tokenize_line(i + 1, line)?)))
        .filter(|r| !matches!(r, Ok((_, tokens)) if tokens.is_empty()))
        .collect::<io::Result<Vec<_>>>()?;

    // Assign IDs to all names, numeric ones first.
    let all_names = || {
        lines.iter().flat_map(|(_, tokens)| tokens).filter_map(|tok| match *tok {
            Token::Id(name) => Some(name),
            _ => None,
        })
    };
    let max_numeric = all_names().filter_map(|name| name.parse::<u32>().ok()).max().unwrap_or(0);
    let mut next_id = max_numeric + 1;
    let mut ids = FxHashMap::default();
    for name in all_names() {
        if ids.contains_key(name) {
            continue;
        }
        let id = match name.parse::<u32>() {
            Ok(n) => n,
            Err(_) => {
                let id = next_id;
                next_id += 1;
                id
            }
        };
        let id = spv::Id::new(id).ok_or_else(|| invalid(0, "ID %0 is illegal"))?;
        ids.insert(name, id);
    }

    let mut asm = Assembler {
        wk: &spv_spec.well_known,
        ids: &ids,
        numeric_types: FxHashMap::default(),
        value_types: FxHashMap::default(),
        line_idx: 0,
        tokens: vec![].into_iter().peekable(),
        words: vec![spv_spec.magic, 0x0001_0300, 0, next_id, 0],
        result_type: None,
        first_id_operand: None,
    };

    for (line_idx, tokens) in lines {
        asm.line_idx = line_idx;
        let (result_id, rest) = match &tokens[..] {
            [Token::Id(name), Token::Equals, ..] => (Some(ids[name]), &tokens[2..]),
            _ => (None, &tokens[..]),
        };
        let (opname, operands) = match rest {
            [Token::Word(opname), operands @ ..] => (*opname, operands),
            _ => return Err(invalid(line_idx, "expected instruction")),
        };
        let opcode = spv_spec
            .opcode_by_name(opname)
            .ok_or_else(|| invalid(line_idx, &format!("unsupported instruction `{opname}`")))?;

        asm.tokens = operands.to_vec().into_iter().peekable();
        asm.inst(result_id, opcode, opcode.def())?;
    }

    Ok(asm.words)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spv::read::ModuleParser;

    #[test]
    fn named_ids_follow_numeric_ones() {
        let words = assemble(
            "%void = OpTypeVoid\n\
             %5 = OpTypeBool\n\
             %fn = OpTypeFunction %void",
        )
        .unwrap();
        let insts: Vec<_> = ModuleParser::read_from_spv_words(words)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        let result_ids: Vec<_> = insts.iter().map(|inst| inst.result_id.unwrap().get()).collect();
        assert_eq!(result_ids, [6, 5, 7]);
        assert_eq!(insts[2].ids[0].get(), 6);
    }

    #[test]
    fn contextual_literals() {
        let words = assemble(
            "%f32 = OpTypeFloat 32\n\
             %u64 = OpTypeInt 64 0\n\
             %half = OpConstant %f32 0.5\n\
             %big = OpConstant %u64 0x100000002",
        )
        .unwrap();
        let insts: Vec<_> = ModuleParser::read_from_spv_words(words)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(insts[2].word(0), Some(0.5f32.to_bits()));
        assert_eq!(insts[3].imms[..], [spv::Imm::Wide(0x1_0000_0002)]);
    }

    #[test]
    fn comments_and_strings() {
        let words = assemble("OpCapability Shader ; trailing\n; full line\nOpSourceExtension \"a;b\"").unwrap();
        let insts: Vec<_> = ModuleParser::read_from_spv_words(words)
            .unwrap()
            .collect::<io::Result<_>>()
            .unwrap();
        assert_eq!(insts.len(), 2);
        assert_eq!(insts[1].string(0), Some("a;b"));
    }

    #[test]
    fn string_padding() {
        assert_eq!(encode_string("").collect::<Vec<_>>(), [0]);
        assert_eq!(encode_string("abc").collect::<Vec<_>>(), [0x0063_6261]);
        assert_eq!(encode_string("main").collect::<Vec<_>>(), [0x6e69_616d, 0]);
    }

    #[test]
    fn unknown_instruction_is_an_error() {
        let err = assemble("OpFrobnicate %1").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("OpFrobnicate"));
    }
}
