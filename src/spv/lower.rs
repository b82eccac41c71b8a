//! SPIR-V to [`Module`](crate::Module) lowering.

use crate::spv::{self, spec};
use crate::{
    BasicBlock, ConstDef, ConstKind, Context, EntryPoint, FuncDecl, FuncParam,
    GlobalVarDecl, ImageType, Type, TypeDef,
};
use smallvec::SmallVec;
use std::io;
use std::path::Path;
use std::rc::Rc;

// FIXME stop abusing `io::Error` for error reporting.
fn invalid(reason: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, format!("malformed SPIR-V module ({reason})"))
}

/// In-progress function, between `OpFunction` and `OpFunctionEnd`.
struct PendingFunc {
    id: spv::Id,
    decl: FuncDecl,

    /// Block currently being filled in, i.e. after its `OpLabel`, but before
    /// its terminator.
    current_block: Option<BasicBlock>,
}

impl crate::Module {
    pub fn lower_from_spv_file(cx: Rc<Context>, path: impl AsRef<Path>) -> io::Result<Self> {
        Self::lower_from_spv_module_parser(cx, spv::read::ModuleParser::read_from_spv_file(path)?)
    }

    pub fn lower_from_spv_bytes(cx: Rc<Context>, spv_bytes: &[u8]) -> io::Result<Self> {
        Self::lower_from_spv_module_parser(
            cx,
            spv::read::ModuleParser::read_from_spv_bytes(spv_bytes)?,
        )
    }

    /// Assemble (see [`spv::asm`]) and then lower SPIR-V assembly text.
    pub fn lower_from_spv_asm(cx: Rc<Context>, text: &str) -> io::Result<Self> {
        Self::lower_from_spv_module_parser(
            cx,
            spv::read::ModuleParser::read_from_spv_words(spv::asm::assemble(text)?)?,
        )
    }

    pub fn lower_from_spv_module_parser(
        cx: Rc<Context>,
        parser: spv::read::ModuleParser,
    ) -> io::Result<Self> {
        let spv_spec = spec::Spec::get();
        let wk = &spv_spec.well_known;

        let mut module = {
            let [magic, version, _generator_magic, _id_bound, reserved_inst_schema] =
                parser.header;

            // Ensured above (this is the value after any endianness swapping).
            assert_eq!(magic, spv_spec.magic);

            let [version_reserved_hi, version_major, version_minor, version_reserved_lo] =
                version.to_be_bytes();

            if (version_reserved_lo, version_reserved_hi) != (0, 0) {
                return Err(invalid(&format!(
                    "version 0x{version:08x} is not in expected (0.major.minor.0) form"
                )));
            }

            if reserved_inst_schema != 0 {
                return Err(invalid(&format!(
                    "unknown instruction schema {reserved_inst_schema} - only 0 is supported"
                )));
            }

            Self::new(
                cx.clone(),
                spv::Dialect { version_major, version_minor, ..spv::Dialect::default() },
            )
        };

        #[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
        enum Seq {
            Capability,
            Extension,
            ExtInstImport,
            MemoryModel,
            EntryPoint,
            ExecutionMode,
            DebugStringAndSource,
            DebugName,
            DebugModuleProcessed,
            Decoration,

            // NOTE not its own section, but only a "checkpoint", forcing
            // instructions following `OpLine`/`OpNoLine` into later sections.
            DebugLine,

            Globals,
            Functions,
        }
        let mut seq = None;

        let mut has_memory_model = false;
        let mut current_func: Option<PendingFunc> = None;

        // Execution modes may precede or follow the `OpEntryPoint` they apply to.
        let mut workgroup_sizes = rustc_hash::FxHashMap::<spv::Id, [u32; 3]>::default();

        for inst in parser {
            let inst = inst?;
            let opcode = inst.opcode;

            let invalid = |msg: &str| invalid(&format!("in {}: {msg}", opcode.name()));

            let result_id = || inst.result_id.ok_or_else(|| invalid("missing result ID"));
            let result_type_id =
                || inst.result_type_id.ok_or_else(|| invalid("missing result type"));
            let id_operand = |i: usize| {
                inst.ids.get(i).copied().ok_or_else(|| invalid("missing ID operand"))
            };
            let imm_operand = |i: usize| inst.word(i).ok_or_else(|| invalid("missing operand"));
            let string_operand = |i: usize| {
                inst.string(i).map(str::to_owned).ok_or_else(|| invalid("missing string operand"))
            };
            let lookup_type = |id: spv::Id| {
                module.types.get(&id).copied().ok_or_else(|| invalid(&format!("%{id} is not a type")))
            };

            // Line debuginfo doesn't have its own section, but rather can go
            // almost anywhere among globals and functions.
            if [wk.OpLine, wk.OpNoLine].contains(&opcode) {
                // Advance to `Seq::DebugLine` if we're not there yet, forcing
                // any following instructions to not be in earlier sections.
                seq = seq.max(Some(Seq::DebugLine));
                continue;
            }

            let next_seq = if opcode == wk.OpCapability {
                module.dialect.capabilities.insert(imm_operand(0)?);
                Seq::Capability
            } else if opcode == wk.OpExtension {
                let ext = string_operand(0)?;
                module.dialect.extensions.insert(ext);
                Seq::Extension
            } else if opcode == wk.OpExtInstImport {
                let name = string_operand(0)?;
                module.ext_inst_imports.insert(result_id()?, cx.intern(name));
                Seq::ExtInstImport
            } else if opcode == wk.OpMemoryModel {
                if has_memory_model {
                    return Err(invalid("duplicate OpMemoryModel"));
                }
                has_memory_model = true;

                module.dialect.addressing_model = imm_operand(0)?;
                module.dialect.memory_model = imm_operand(1)?;
                Seq::MemoryModel
            } else if opcode == wk.OpEntryPoint {
                let name = string_operand(1)?;
                module.entry_points.push(EntryPoint {
                    execution_model: imm_operand(0)?,
                    func: id_operand(0)?,
                    name,
                    interface: inst.ids[1..].iter().copied().collect(),
                    workgroup_size: None,
                });
                Seq::EntryPoint
            } else if [wk.OpExecutionMode, wk.OpExecutionModeId].contains(&opcode) {
                if opcode == wk.OpExecutionMode && imm_operand(0)? == wk.LocalSize {
                    workgroup_sizes
                        .insert(id_operand(0)?, [imm_operand(1)?, imm_operand(2)?, imm_operand(3)?]);
                }
                Seq::ExecutionMode
            } else if [wk.OpString, wk.OpSource, wk.OpSourceContinued, wk.OpSourceExtension]
                .contains(&opcode)
            {
                Seq::DebugStringAndSource
            } else if opcode == wk.OpName {
                let name = string_operand(0)?;
                if !name.is_empty() {
                    module.debug_names.names.insert(id_operand(0)?, cx.intern(name));
                }
                Seq::DebugName
            } else if opcode == wk.OpMemberName {
                let name = string_operand(1)?;
                if !name.is_empty() {
                    module
                        .debug_names
                        .member_names
                        .insert((id_operand(0)?, imm_operand(0)?), cx.intern(name));
                }
                Seq::DebugName
            } else if opcode == wk.OpModuleProcessed {
                Seq::DebugModuleProcessed
            } else if [
                wk.OpDecorate,
                wk.OpMemberDecorate,
                wk.OpDecorateId,
                wk.OpDecorateString,
                wk.OpMemberDecorateString,
            ]
            .contains(&opcode)
            {
                Seq::Decoration
            } else if opcode == wk.OpFunction {
                if current_func.is_some() {
                    return Err(invalid("nested OpFunction while still in a function"));
                }

                let func_type = lookup_type(id_operand(0)?)?;
                let ret_type = lookup_type(result_type_id()?)?;
                match &cx[func_type] {
                    TypeDef::Function { ret, .. } if *ret == ret_type => {}
                    _ => return Err(invalid("function type doesn't match return type")),
                }

                current_func = Some(PendingFunc {
                    id: result_id()?,
                    decl: FuncDecl { ret_type, params: SmallVec::new(), blocks: vec![] },
                    current_block: None,
                });

                Seq::Functions
            } else if opcode == wk.OpFunctionParameter {
                let func = current_func
                    .as_mut()
                    .filter(|func| func.decl.blocks.is_empty() && func.current_block.is_none())
                    .ok_or_else(|| invalid("must directly follow OpFunction"))?;
                func.decl.params.push(FuncParam { id: result_id()?, ty: lookup_type(result_type_id()?)? });

                Seq::Functions
            } else if opcode == wk.OpFunctionEnd {
                let func = current_func
                    .take()
                    .ok_or_else(|| invalid("OpFunctionEnd without matching OpFunction"))?;
                if let Some(block) = func.current_block {
                    return Err(invalid(&format!("block %{} lacks a terminator", block.id)));
                }

                module.funcs.insert(func.id, func.decl);

                Seq::Functions
            } else if let Some(func) = &mut current_func {
                if opcode == wk.OpLabel {
                    if let Some(block) = &func.current_block {
                        return Err(invalid(&format!("block %{} lacks a terminator", block.id)));
                    }
                    func.current_block = Some(BasicBlock { id: result_id()?, insts: vec![] });
                } else {
                    let block = func
                        .current_block
                        .as_mut()
                        .ok_or_else(|| invalid("instruction outside of a basic block"))?;
                    let is_terminator = [
                        wk.OpBranch,
                        wk.OpBranchConditional,
                        wk.OpSwitch,
                        wk.OpReturn,
                        wk.OpReturnValue,
                        wk.OpKill,
                        wk.OpTerminateInvocation,
                        wk.OpUnreachable,
                    ]
                    .contains(&opcode);

                    block.insts.push(inst);

                    if is_terminator {
                        if let Some(block) = func.current_block.take() {
                            func.decl.blocks.push(block);
                        }
                    }
                }

                Seq::Functions
            } else {
                let id = result_id()?;
                match opcode.def().category {
                    spec::InstructionCategory::Type => {
                        let ty = lower_type_def(&module, &cx, &inst, id).map_err(|e| invalid(&e))?;
                        module.types.insert(id, cx.intern(ty));
                    }
                    spec::InstructionCategory::Const => {
                        let ty = lookup_type(result_type_id()?)?;
                        let kind = lower_const_kind(&module, &inst).map_err(|e| invalid(&e))?;
                        module.consts.insert(id, cx.intern(ConstDef { ty, kind }));
                    }
                    _ if opcode == wk.OpVariable => {
                        let storage_class = imm_operand(0)?;
                        if storage_class == wk.Function {
                            return Err(invalid("function-local OpVariable outside of a function"));
                        }
                        module.global_vars.insert(
                            id,
                            GlobalVarDecl {
                                ty: lookup_type(result_type_id()?)?,
                                storage_class,
                                initializer: inst.ids.first().copied(),
                            },
                        );
                    }
                    _ if opcode == wk.OpUndef => {
                        let ty = lookup_type(result_type_id()?)?;
                        module.consts.insert(id, cx.intern(ConstDef { ty, kind: ConstKind::Undef }));
                    }
                    _ => return Err(invalid("unsupported instruction outside of a function")),
                }

                Seq::Globals
            };
            if !(seq <= Some(next_seq)) {
                return Err(invalid(&format!(
                    "out of order: {next_seq:?} instructions must precede {seq:?} instructions"
                )));
            }
            seq = Some(next_seq);
        }

        if !has_memory_model {
            return Err(invalid("missing OpMemoryModel"));
        }

        if current_func.is_some() {
            return Err(invalid("OpFunction without matching OpFunctionEnd"));
        }

        for entry_point in &mut module.entry_points {
            entry_point.workgroup_size = workgroup_sizes.get(&entry_point.func).copied();
            if !module.funcs.contains_key(&entry_point.func) {
                return Err(invalid(&format!(
                    "entry-point {:?} targets %{}, which isn't a function",
                    entry_point.name, entry_point.func
                )));
            }
        }

        Ok(module)
    }
}

fn lower_type_def(
    module: &crate::Module,
    cx: &Context,
    inst: &spv::Inst,
    id: spv::Id,
) -> Result<TypeDef, String> {
    let wk = &spec::Spec::get().well_known;
    let opcode = inst.opcode;

    let ty = |i: usize| -> Result<Type, String> {
        let id = *inst.ids.get(i).ok_or("missing type operand")?;
        module.types.get(&id).copied().ok_or_else(|| format!("%{id} is not a type"))
    };
    let imm = |i: usize| -> Result<u32, String> {
        inst.word(i).ok_or_else(|| "missing operand".to_string())
    };

    Ok(if opcode == wk.OpTypeVoid {
        TypeDef::Void
    } else if opcode == wk.OpTypeBool {
        TypeDef::Bool
    } else if opcode == wk.OpTypeInt {
        TypeDef::Int { width: imm(0)?, signed: imm(1)? != 0 }
    } else if opcode == wk.OpTypeFloat {
        TypeDef::Float { width: imm(0)? }
    } else if opcode == wk.OpTypeVector {
        TypeDef::Vector { elem: ty(0)?, count: imm(0)? }
    } else if opcode == wk.OpTypeMatrix {
        TypeDef::Matrix { column: ty(0)?, count: imm(0)? }
    } else if opcode == wk.OpTypeArray {
        let len_id = *inst.ids.get(1).ok_or("missing length operand")?;
        let len = match module.consts.get(&len_id).map(|&ct| &cx[ct].kind) {
            Some(&ConstKind::Scalar(len)) => {
                u32::try_from(len).map_err(|_| format!("array length {len} is too large"))?
            }
            _ => return Err(format!("array length %{len_id} is not a constant integer")),
        };
        TypeDef::Array { elem: ty(0)?, len: Some(len) }
    } else if opcode == wk.OpTypeRuntimeArray {
        TypeDef::Array { elem: ty(0)?, len: None }
    } else if opcode == wk.OpTypeStruct {
        TypeDef::Struct { id, members: (0..inst.ids.len()).map(ty).collect::<Result<_, _>>()? }
    } else if opcode == wk.OpTypePointer {
        TypeDef::Pointer { storage_class: imm(0)?, pointee: ty(0)? }
    } else if opcode == wk.OpTypeFunction {
        TypeDef::Function {
            ret: ty(0)?,
            params: (1..inst.ids.len()).map(ty).collect::<Result<_, _>>()?,
        }
    } else if opcode == wk.OpTypeImage {
        TypeDef::Image(ImageType {
            sampled_type: ty(0)?,
            dim: imm(0)?,
            depth: imm(1)?,
            arrayed: imm(2)? != 0,
            multisampled: imm(3)? != 0,
            sampled: imm(4)?,
            format: imm(5)?,
            access: imm(6).ok(),
        })
    } else if opcode == wk.OpTypeSampler {
        TypeDef::Sampler
    } else if opcode == wk.OpTypeSampledImage {
        TypeDef::SampledImage { image: ty(0)? }
    } else {
        return Err("unsupported type".into());
    })
}

fn lower_const_kind(module: &crate::Module, inst: &spv::Inst) -> Result<ConstKind, String> {
    let wk = &spec::Spec::get().well_known;
    let opcode = inst.opcode;

    Ok(if [wk.OpConstantTrue, wk.OpSpecConstantTrue].contains(&opcode) {
        ConstKind::Bool(true)
    } else if [wk.OpConstantFalse, wk.OpSpecConstantFalse].contains(&opcode) {
        ConstKind::Bool(false)
    } else if [wk.OpConstant, wk.OpSpecConstant].contains(&opcode) {
        ConstKind::Scalar(
            inst.imms.first().and_then(spv::Imm::as_u64).ok_or("missing constant literal")?,
        )
    } else if [wk.OpConstantComposite, wk.OpSpecConstantComposite].contains(&opcode) {
        ConstKind::Composite(
            inst.ids
                .iter()
                .map(|id| {
                    module
                        .consts
                        .get(id)
                        .copied()
                        .ok_or_else(|| format!("%{id} is not a constant"))
                })
                .collect::<Result<_, _>>()?,
        )
    } else if opcode == wk.OpConstantNull {
        ConstKind::Null
    } else {
        return Err("unsupported constant".into());
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lower(text: &str) -> io::Result<crate::Module> {
        crate::Module::lower_from_spv_asm(Rc::new(Context::new()), text)
    }

    const PRELUDE: &str = "
        OpCapability Shader
        OpMemoryModel Logical Simple
        OpEntryPoint GLCompute %100 \"main\"
        OpExecutionMode %100 LocalSize 8 4 1
        OpName %100 \"main\"
        %void = OpTypeVoid
        %voidfn = OpTypeFunction %void
        %uint = OpTypeInt 32 0
        %uint_4 = OpConstant %uint 4
        %arr = OpTypeArray %uint %uint_4
    ";

    #[test]
    fn lowers_types_consts_and_entry_points() {
        let module = lower(&format!(
            "{PRELUDE}
            %100 = OpFunction %void None %voidfn
            %10 = OpLabel
            OpReturn
            OpFunctionEnd"
        ))
        .unwrap();
        let cx = module.cx();

        let func_id = spv::Id::new(100).unwrap();
        assert_eq!(module.funcs[&func_id].blocks.len(), 1);
        assert_eq!(module.entry_points[0].name, "main");
        assert_eq!(module.entry_points[0].workgroup_size, Some([8, 4, 1]));
        assert_eq!(&cx[module.debug_names.names[&func_id]], "main");

        let arr = module.types.values().find(|&&ty| matches!(cx[ty], TypeDef::Array { .. }));
        match arr.map(|&ty| &cx[ty]) {
            Some(TypeDef::Array { len: Some(4), .. }) => {}
            _ => panic!("missing `[u32; 4]` array type"),
        }
    }

    #[test]
    fn rejects_missing_terminator() {
        let err = lower(&format!(
            "{PRELUDE}
            %100 = OpFunction %void None %voidfn
            %10 = OpLabel
            %20 = OpLabel
            OpReturn
            OpFunctionEnd"
        ))
        .err()
        .unwrap();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("block %10 lacks a terminator"), "{err}");
    }

    #[test]
    fn decorations_are_only_checked_for_placement() {
        let func = "%100 = OpFunction %void None %voidfn
            %10 = OpLabel
            OpReturn
            OpFunctionEnd";
        let decorated = PRELUDE.replace(
            "%void = OpTypeVoid",
            "OpDecorate %arr ArrayStride 4
            %void = OpTypeVoid",
        );
        let module = lower(&format!("{decorated}\n{func}")).unwrap();
        assert_eq!(module.types.len(), 4);

        let err = lower(&format!("{PRELUDE}\nOpDecorate %arr ArrayStride 4\n{func}")).err().unwrap();
        assert!(err.to_string().contains("out of order"), "{err}");
    }

    #[test]
    fn rejects_out_of_order_sections() {
        let err = lower(
            "OpCapability Shader
            %void = OpTypeVoid
            OpMemoryModel Logical Simple",
        )
        .err()
        .unwrap();
        assert!(err.to_string().contains("out of order"), "{err}");
    }
}
