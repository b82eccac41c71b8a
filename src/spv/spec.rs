//! The part of the SPIR-V grammar this crate reads and writes.
//!
//! Loaded once from the embedded Khronos `.grammar.json` files, which are
//! trimmed down to the instructions and operand kinds understood here.

use arrayvec::ArrayVec;
use lazy_static::lazy_static;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use std::fmt;

pub const HEADER_LEN: usize = 5;

pub struct Spec {
    pub magic: u32,

    /// Opcodes and enumerant values referred to by name in this crate.
    pub well_known: WellKnown,

    pub glsl_std_450: ExtInstSet,

    tables: Tables,
}

struct Tables {
    instructions: FxHashMap<Opcode, InstructionDef>,
    opcodes_by_name: FxHashMap<&'static str, Opcode>,

    operand_kinds: Vec<(&'static str, OperandKindDef)>,
    operand_kinds_by_name: FxHashMap<&'static str, OperandKind>,
}

macro_rules! well_known {
    ($($resolve:ident: $ty:ty { $($name:ident),+ $(,)? })+) => {
        #[allow(non_snake_case)]
        pub struct WellKnown {
            $($(pub $name: $ty,)+)+
        }

        impl WellKnown {
            fn resolve(tables: &Tables) -> Self {
                Self { $($($name: tables.$resolve(stringify!($name)),)+)+ }
            }
        }
    };
}

well_known! {
    opcode: Opcode {
        OpNop,
        OpCapability, OpExtension, OpExtInstImport, OpExtInst, OpMemoryModel,
        OpEntryPoint, OpExecutionMode, OpExecutionModeId,
        OpString, OpSource, OpSourceContinued, OpSourceExtension,
        OpName, OpMemberName, OpModuleProcessed,
        OpDecorate, OpMemberDecorate, OpDecorateId, OpDecorateString, OpMemberDecorateString,
        OpLine, OpNoLine,

        OpTypeVoid, OpTypeBool, OpTypeInt, OpTypeFloat, OpTypeVector, OpTypeMatrix,
        OpTypeArray, OpTypeRuntimeArray, OpTypeStruct, OpTypePointer, OpTypeFunction,
        OpTypeImage, OpTypeSampler, OpTypeSampledImage,

        OpConstantFalse, OpConstantTrue, OpConstant, OpConstantComposite, OpConstantNull,
        OpSpecConstantFalse, OpSpecConstantTrue, OpSpecConstant, OpSpecConstantComposite,
        OpUndef,

        OpVariable, OpFunction, OpFunctionParameter, OpFunctionEnd, OpFunctionCall,

        OpLabel, OpPhi, OpSelectionMerge, OpLoopMerge,
        OpUnreachable, OpReturn, OpReturnValue, OpKill, OpTerminateInvocation,
        OpBranch, OpBranchConditional, OpSwitch,

        OpLoad, OpStore, OpAccessChain, OpInBoundsAccessChain, OpCopyObject,
        OpCompositeInsert, OpSampledImage, OpImage,
    }
    operand_kind: OperandKind {
        LiteralExtInstInteger, LiteralString, LiteralContextDependentNumber,
    }
    storage_class: u32 {
        Function, Private, Workgroup,
        UniformConstant, Uniform, StorageBuffer, PushConstant, Input, Output,
    }
    execution_mode: u32 { LocalSize }
    image_operand: u32 { Bias, Lod, Grad, ConstOffset, Offset, Sample, MinLod }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct Opcode(u16);

impl fmt::Debug for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Opcode {
    /// Only opcodes present in the grammar can be turned into an [`Opcode`].
    pub fn from_u16(opcode: u16) -> Option<Self> {
        Spec::get().tables.instructions.contains_key(&Self(opcode)).then_some(Self(opcode))
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }

    pub fn def(self) -> &'static InstructionDef {
        match Spec::get().tables.instructions.get(&self) {
            Some(def) => def,
            None => unreachable!("opcode {} missing from the grammar", self.0),
        }
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }
}

pub struct InstructionDef {
    pub name: &'static str,
    pub category: InstructionCategory,

    pub has_result_type_id: bool,
    pub has_result_id: bool,

    /// Everything after the result type and result.
    pub operands: Operands,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InstructionCategory {
    Type,
    Const,
    ControlFlow,
    Other,
}

/// Operand layout, for both instructions and enumerant parameters: required
/// operands, then optional ones, then a group repeated until the end.
#[derive(Default)]
pub struct Operands {
    pub required: ArrayVec<OperandKind, 8>,
    pub optional: ArrayVec<OperandKind, 2>,
    pub repeated: ArrayVec<OperandKind, 2>,
}

/// Consumer of an operand layout, driven by [`Operands::visit`].
pub trait OperandSink {
    type Error;

    /// Whether any operands remain (only asked before optional ones, and
    /// before each repetition of the repeated group).
    fn has_more(&mut self) -> bool;

    fn operand(&mut self, kind: OperandKind) -> Result<(), Self::Error>;
}

impl Operands {
    pub fn visit<S: OperandSink>(&self, sink: &mut S) -> Result<(), S::Error> {
        for &kind in &self.required {
            sink.operand(kind)?;
        }
        for &kind in &self.optional {
            if !sink.has_more() {
                return Ok(());
            }
            sink.operand(kind)?;
        }
        if !self.repeated.is_empty() {
            while sink.has_more() {
                for &kind in &self.repeated {
                    sink.operand(kind)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
pub struct OperandKind(u8);

impl fmt::Debug for OperandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl OperandKind {
    fn entry(self) -> &'static (&'static str, OperandKindDef) {
        match Spec::get().tables.operand_kinds.get(usize::from(self.0)) {
            Some(entry) => entry,
            None => unreachable!("operand kind {} missing from the grammar", self.0),
        }
    }

    pub fn name(self) -> &'static str {
        self.entry().0
    }

    pub fn def(self) -> &'static OperandKindDef {
        &self.entry().1
    }
}

pub enum OperandKindDef {
    /// Bit flags, where every set bit can bring its own parameters.
    Mask { none: &'static str, flags: Enumerants },

    Enum(Enumerants),

    Id,

    Literal(LiteralSize),
}

pub struct Enumerant {
    pub name: &'static str,

    /// For mask flags, the (single-bit) flag itself.
    pub value: u32,

    pub params: Operands,
}

/// Enumerants of one kind, by name and by value (aliases only by name).
#[derive(Default)]
pub struct Enumerants {
    all: Vec<Enumerant>,
    by_value: FxHashMap<u32, usize>,
    by_name: FxHashMap<&'static str, usize>,
}

impl Enumerants {
    fn push(&mut self, enumerant: Enumerant) {
        let idx = self.all.len();
        self.by_value.entry(enumerant.value).or_insert(idx);
        self.by_name.insert(enumerant.name, idx);
        self.all.push(enumerant);
    }

    pub fn by_value(&self, value: u32) -> Option<&Enumerant> {
        self.by_value.get(&value).map(|&idx| &self.all[idx])
    }

    pub fn by_name(&self, name: &str) -> Option<&Enumerant> {
        self.by_name.get(name).map(|&idx| &self.all[idx])
    }
}

/// The single-bit flags set in `mask`, lowest first.
pub fn mask_flags(mask: u32) -> impl Iterator<Item = u32> {
    (0..u32::BITS).map(|i| 1 << i).filter(move |flag| mask & flag != 0)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LiteralSize {
    /// Exactly one word.
    Word,

    /// UTF-8 bytes, `\0`-terminated and padded to whole words.
    NulTerminated,

    /// One or two words, depending on the width of a contextual integer or
    /// float type (`OpConstant`'s result type or `OpSwitch`'s selector type).
    FromContextualType,
}

/// Names of the instructions in an extended instruction set.
#[derive(Default)]
pub struct ExtInstSet {
    names: FxHashMap<u32, &'static str>,
    numbers: FxHashMap<&'static str, u32>,
}

impl ExtInstSet {
    pub fn name(&self, number: u32) -> Option<&'static str> {
        self.names.get(&number).copied()
    }

    pub fn number(&self, name: &str) -> Option<u32> {
        self.numbers.get(name).copied()
    }
}

impl Spec {
    /// The grammar, parsed on first use.
    #[must_use]
    pub fn get() -> &'static Spec {
        lazy_static! {
            static ref SPEC: Spec = Spec::load(
                include_str!("grammar/spirv.core.grammar.json"),
                include_str!("grammar/extinst.glsl.std.450.grammar.json"),
            );
        }
        &SPEC
    }

    pub fn opcode_by_name(&self, name: &str) -> Option<Opcode> {
        self.tables.opcodes_by_name.get(name).copied()
    }

    // The embedded grammar is trusted, any inconsistency in it is a bug.
    fn load(core_json: &'static str, glsl_json: &'static str) -> Self {
        let core: raw::CoreGrammar<'static> = match serde_json::from_str(core_json) {
            Ok(core) => core,
            Err(e) => panic!("embedded core grammar: {e}"),
        };
        let glsl: raw::ExtInstGrammar<'static> = match serde_json::from_str(glsl_json) {
            Ok(glsl) => glsl,
            Err(e) => panic!("embedded GLSL.std.450 grammar: {e}"),
        };

        let mut operand_kinds_by_name = FxHashMap::default();
        let mut pairs = FxHashMap::default();
        for raw_kind in &core.operand_kinds {
            if let Some(bases) = &raw_kind.bases {
                let mut bases = [bases[0], bases[1]];
                // `OpSwitch` case literals are typed by the selector, but the
                // grammar declares them as plain `LiteralInteger`s.
                if raw_kind.kind == "PairLiteralIntegerIdRef" {
                    bases[0] = "LiteralContextDependentNumber";
                }
                pairs.insert(raw_kind.kind, bases);
            } else if !matches!(raw_kind.kind, "IdResultType" | "IdResult") {
                let idx = u8::try_from(operand_kinds_by_name.len()).unwrap_or(u8::MAX);
                operand_kinds_by_name.insert(raw_kind.kind, OperandKind(idx));
            }
        }
        let kind = |name: &str| match operand_kinds_by_name.get(name) {
            Some(&kind) => kind,
            None => panic!("unknown operand kind {name}"),
        };

        let enumerants = |raw_kind: &raw::OperandKind<'static>| {
            let mut enumerants = Enumerants::default();
            for e in raw_kind.enumerants.iter().flatten() {
                let mut params = Operands::default();
                params.required.extend(e.parameters.iter().map(|p| kind(p.kind)));
                enumerants.push(Enumerant { name: e.enumerant, value: e.value.get(), params });
            }
            enumerants
        };

        let mut operand_kinds = vec![];
        for raw_kind in &core.operand_kinds {
            if !operand_kinds_by_name.contains_key(raw_kind.kind) {
                continue;
            }
            let def = match raw_kind.category {
                "BitEnum" => {
                    let mut flags = enumerants(raw_kind);
                    let none = flags.by_value(0).map_or("None", |e| e.name);
                    flags.by_value.remove(&0);
                    OperandKindDef::Mask { none, flags }
                }
                "ValueEnum" => OperandKindDef::Enum(enumerants(raw_kind)),
                "Id" => OperandKindDef::Id,
                "Literal" => OperandKindDef::Literal(match raw_kind.kind {
                    "LiteralString" => LiteralSize::NulTerminated,
                    "LiteralContextDependentNumber" => LiteralSize::FromContextualType,
                    _ => LiteralSize::Word,
                }),
                category => panic!("unknown operand kind category {category}"),
            };
            operand_kinds.push((raw_kind.kind, def));
        }

        let mut instructions = FxHashMap::default();
        let mut opcodes_by_name = FxHashMap::default();
        for inst in &core.instructions {
            let mut def = InstructionDef {
                name: inst.opname,
                category: match inst.class {
                    "Type-Declaration" => InstructionCategory::Type,
                    "Constant-Creation" => InstructionCategory::Const,
                    "Control-Flow" => InstructionCategory::ControlFlow,
                    _ => InstructionCategory::Other,
                },
                has_result_type_id: false,
                has_result_id: false,
                operands: Operands::default(),
            };
            for operand in &inst.operands {
                match (operand.kind, operand.quantifier) {
                    ("IdResultType", None) => def.has_result_type_id = true,
                    ("IdResult", None) => def.has_result_id = true,
                    (name, None) => def.operands.required.push(kind(name)),
                    (name, Some("?")) => def.operands.optional.push(kind(name)),
                    (name, Some("*")) => match pairs.get(name) {
                        Some(&[a, b]) => def.operands.repeated.extend([kind(a), kind(b)]),
                        None => def.operands.repeated.push(kind(name)),
                    },
                    (name, Some(q)) => panic!("{}: unknown quantifier {q:?} on {name}", inst.opname),
                }
            }
            let opcode = Opcode(inst.opcode);
            instructions.insert(opcode, def);
            opcodes_by_name.insert(inst.opname, opcode);
        }

        let mut glsl_std_450 = ExtInstSet::default();
        for inst in &glsl.instructions {
            glsl_std_450.names.insert(inst.opcode.into(), inst.opname);
            glsl_std_450.numbers.insert(inst.opname, inst.opcode.into());
        }

        let tables = Tables { instructions, opcodes_by_name, operand_kinds, operand_kinds_by_name };
        Spec {
            magic: core.magic_number.get(),
            well_known: WellKnown::resolve(&tables),
            glsl_std_450,
            tables,
        }
    }
}

// Lookups by name, for `WellKnown::resolve` (`Spec::get` isn't usable yet).
impl Tables {
    fn opcode(&self, name: &str) -> Opcode {
        match self.opcodes_by_name.get(name) {
            Some(&opcode) => opcode,
            None => panic!("{name} missing from the embedded grammar"),
        }
    }

    fn operand_kind(&self, name: &str) -> OperandKind {
        match self.operand_kinds_by_name.get(name) {
            Some(&kind) => kind,
            None => panic!("operand kind {name} missing from the embedded grammar"),
        }
    }

    fn enumerant(&self, kind: &str, name: &str) -> u32 {
        let def = &self.operand_kinds[usize::from(self.operand_kind(kind).0)].1;
        let enumerant = match def {
            OperandKindDef::Mask { flags: enumerants, .. } | OperandKindDef::Enum(enumerants) => {
                enumerants.by_name(name)
            }
            OperandKindDef::Id | OperandKindDef::Literal(_) => None,
        };
        match enumerant {
            Some(e) => e.value,
            None => panic!("{kind} {name} missing from the embedded grammar"),
        }
    }

    fn storage_class(&self, name: &str) -> u32 {
        self.enumerant("StorageClass", name)
    }

    fn execution_mode(&self, name: &str) -> u32 {
        self.enumerant("ExecutionMode", name)
    }

    fn image_operand(&self, name: &str) -> u32 {
        self.enumerant("ImageOperands", name)
    }
}

/// Just the parts of the `.grammar.json` files used above.
mod raw {
    use super::Deserialize;

    #[derive(Deserialize)]
    pub struct CoreGrammar<'a> {
        #[serde(borrow)]
        pub magic_number: Number<'a>,
        pub instructions: Vec<Instruction<'a>>,
        pub operand_kinds: Vec<OperandKind<'a>>,
    }

    #[derive(Deserialize)]
    pub struct ExtInstGrammar<'a> {
        #[serde(borrow)]
        pub instructions: Vec<Instruction<'a>>,
    }

    #[derive(Deserialize)]
    pub struct Instruction<'a> {
        pub opname: &'a str,
        #[serde(default)]
        pub class: &'a str,
        pub opcode: u16,
        #[serde(default, borrow)]
        pub operands: Vec<Operand<'a>>,
    }

    #[derive(Deserialize)]
    pub struct Operand<'a> {
        pub kind: &'a str,
        pub quantifier: Option<&'a str>,
    }

    #[derive(Deserialize)]
    pub struct OperandKind<'a> {
        pub category: &'a str,
        pub kind: &'a str,
        #[serde(borrow)]
        pub enumerants: Option<Vec<Enumerant<'a>>>,
        pub bases: Option<Vec<&'a str>>,
    }

    #[derive(Deserialize)]
    pub struct Enumerant<'a> {
        pub enumerant: &'a str,
        #[serde(borrow)]
        pub value: Number<'a>,
        #[serde(default, borrow)]
        pub parameters: Vec<Operand<'a>>,
    }

    /// Either a JSON number, or a string holding a hexadecimal (or decimal) one.
    #[derive(Deserialize)]
    #[serde(untagged)]
    pub enum Number<'a> {
        Int(u32),
        Text(&'a str),
    }

    impl Number<'_> {
        pub fn get(&self) -> u32 {
            let parsed = match *self {
                Number::Int(x) => Ok(x),
                Number::Text(s) => match s.strip_prefix("0x") {
                    Some(hex) => u32::from_str_radix(hex, 16),
                    None => s.parse(),
                },
            };
            match parsed {
                Ok(x) => x,
                Err(e) => panic!("bad number in embedded grammar: {e}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn well_known_values() {
        let spec = Spec::get();
        let wk = &spec.well_known;
        assert_eq!(spec.magic, 0x0723_0203);
        assert_eq!(wk.OpLabel.as_u16(), 248);
        assert_eq!(wk.OpSwitch.name(), "OpSwitch");
        assert_eq!(wk.Function, 7);
        assert_eq!(wk.Grad, 4);
        assert_eq!(spec.glsl_std_450.number("Sqrt"), Some(31));
        assert_eq!(spec.glsl_std_450.name(31), Some("Sqrt"));
    }

    #[test]
    fn switch_pairs_use_contextual_literals() {
        let wk = &Spec::get().well_known;
        let operands = &wk.OpSwitch.def().operands;
        assert_eq!(operands.required.len(), 2);
        assert_eq!(operands.repeated[0], wk.LiteralContextDependentNumber);
        assert!(matches!(operands.repeated[1].def(), OperandKindDef::Id));
    }

    #[test]
    fn mask_flags_are_single_bits() {
        assert_eq!(mask_flags(0b1010_0001).collect::<Vec<_>>(), [1, 0b10_0000, 0b1000_0000]);
        assert_eq!(mask_flags(0).count(), 0);
    }
}
