//! Structured control-flow reconstruction for SPIR-V.
//!
//! SPIR-V functions are flat lists of basic blocks, connected by branches, and
//! annotated with `OpSelectionMerge`/`OpLoopMerge` "structure" hints. This crate
//! recovers the nesting those hints describe, and emits each function as a tree
//! of WGSL-like statements (`if`/`else`, `loop`/`continuing`, `switch`/`case`,
//! `break`/`continue`/`return`), with SSA values turned into `let`/`var`
//! declarations, and `OpPhi`s into assignments on the incoming edges.
//!
//! The pipeline, per function, is:
//! 1. [`cfg`]: block order (reverse structured post-order) and merge metadata
//! 2. [`construct`]: the tree of nested constructs spanning that block order
//! 3. [`cfg::FuncCfg::classify_edges`]: classifying (and validating) every CFG edge
//! 4. [`def_use`]: where values are defined and used, hoisting and naming decisions
//! 5. [`emit`]: walking the blocks, building the [`ast`] statement tree
//!
//! ```no_run
//! # fn main() -> std::io::Result<()> {
//! let cx = std::rc::Rc::new(spv_structurize::Context::new());
//! let module = spv_structurize::Module::lower_from_spv_file(cx, "shader.spv")?;
//! for (func_id, result) in module.structurize_all(&Default::default()) {
//!     match result {
//!         Ok(body) => println!("{}", spv_structurize::print::function_to_wgsl(&body)),
//!         Err(e) => eprintln!("%{func_id}: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

use rustc_hash::{FxHashMap, FxHasher};
use smallvec::SmallVec;
use std::hash::BuildHasherDefault;

mod context;
pub use context::{Const, Context, Handle, Intern, InternedStr, Type};

pub mod ast;
pub mod cfg;
pub mod construct;
pub mod def_use;
pub mod emit;
pub mod error;
pub mod namer;
pub mod phi;
pub mod print;
pub mod spv;

pub use error::{Error, ErrorContext, Result};

pub type FxIndexMap<K, V> = indexmap::IndexMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FxIndexSet<V> = indexmap::IndexSet<V, BuildHasherDefault<FxHasher>>;

// HACK this only serves to disallow modifying the `cx` field of `Module`.
mod sealed {
    use super::*;
    use std::rc::Rc;

    /// A whole SPIR-V module, as needed for structurizing its functions.
    ///
    /// Everything module-level (types, constants, global variables, functions)
    /// is kept keyed by its SPIR-V result ID, in definition order.
    pub struct Module {
        /// Context used for everything interned, in this module.
        ///
        /// Notable choices made for this field:
        /// * private to disallow switching the context of a module
        /// * `Rc` sharing to allow multiple modules to use the same context
        ///   (`Context: !Sync` because of the interners so it can't be `Arc`)
        cx: Rc<Context>,

        pub dialect: spv::Dialect,
        pub debug_names: DebugNames,

        pub ext_inst_imports: FxHashMap<spv::Id, InternedStr>,

        pub types: FxIndexMap<spv::Id, Type>,
        pub consts: FxIndexMap<spv::Id, Const>,
        pub global_vars: FxIndexMap<spv::Id, GlobalVarDecl>,
        pub funcs: FxIndexMap<spv::Id, FuncDecl>,

        pub entry_points: Vec<EntryPoint>,
    }

    impl Module {
        pub fn new(cx: Rc<Context>, dialect: spv::Dialect) -> Self {
            Self {
                cx,

                dialect,
                debug_names: DebugNames::default(),

                ext_inst_imports: FxHashMap::default(),

                types: FxIndexMap::default(),
                consts: FxIndexMap::default(),
                global_vars: FxIndexMap::default(),
                funcs: FxIndexMap::default(),

                entry_points: vec![],
            }
        }

        pub fn cx(&self) -> Rc<Context> {
            self.cx.clone()
        }

        pub fn cx_ref(&self) -> &Rc<Context> {
            &self.cx
        }
    }
}
pub use sealed::Module;

/// `OpName`/`OpMemberName` strings, used for naming things in the output.
#[derive(Default)]
pub struct DebugNames {
    pub names: FxHashMap<spv::Id, InternedStr>,
    pub member_names: FxHashMap<(spv::Id, u32), InternedStr>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TypeDef {
    Void,
    Bool,
    Int { width: u32, signed: bool },
    Float { width: u32 },
    Vector { elem: Type, count: u32 },
    Matrix { column: Type, count: u32 },

    /// `OpTypeArray` (with `len: Some(_)`), or `OpTypeRuntimeArray`.
    Array { elem: Type, len: Option<u32> },

    /// Structs are nominal, so their defining ID is kept (and is what makes two
    /// structurally identical structs remain distinct after interning).
    Struct { id: spv::Id, members: SmallVec<[Type; 4]> },

    Pointer { storage_class: u32, pointee: Type },
    Function { ret: Type, params: SmallVec<[Type; 4]> },

    Image(ImageType),
    Sampler,
    SampledImage { image: Type },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ImageType {
    pub sampled_type: Type,

    /// SPIR-V `Dim` value (e.g. `1` for `2D`, `3` for `Cube`).
    pub dim: u32,

    /// `0` (not depth), `1` (depth) or `2` (unknown).
    pub depth: u32,
    pub arrayed: bool,
    pub multisampled: bool,

    /// `1` (sampled) or `2` (storage), `0` for "known at runtime".
    pub sampled: u32,

    /// SPIR-V `ImageFormat` value.
    pub format: u32,
    pub access: Option<u32>,
}

impl TypeDef {
    pub fn is_handle(&self) -> bool {
        matches!(self, TypeDef::Image(_) | TypeDef::Sampler | TypeDef::SampledImage { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConstDef {
    pub ty: Type,
    pub kind: ConstKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConstKind {
    Bool(bool),

    /// Integer or floating-point value, as its (zero-extended) bit pattern,
    /// to be interpreted according to the constant's type.
    Scalar(u64),

    Composite(SmallVec<[Const; 4]>),

    /// `OpConstantNull` (the "zero value" of any type).
    Null,

    /// `OpUndef` at module scope (treated like `Null`).
    Undef,
}

pub struct GlobalVarDecl {
    /// Pointer type of the variable itself.
    pub ty: Type,
    pub storage_class: u32,
    pub initializer: Option<spv::Id>,
}

pub struct FuncDecl {
    pub ret_type: Type,
    pub params: SmallVec<[FuncParam; 2]>,

    /// All the basic blocks, in the order they were declared in, with the
    /// entry block first (empty for functions without a body).
    pub blocks: Vec<BasicBlock>,
}

#[derive(Copy, Clone)]
pub struct FuncParam {
    pub id: spv::Id,
    pub ty: Type,
}

/// A SPIR-V basic block (all of its instructions, except for the `OpLabel`).
pub struct BasicBlock {
    pub id: spv::Id,
    pub insts: Vec<spv::Inst>,
}

impl BasicBlock {
    /// The last instruction, which (for a valid block) is its terminator.
    pub fn terminator(&self) -> Option<&spv::Inst> {
        self.insts.last()
    }

    /// The `OpSelectionMerge`/`OpLoopMerge` instruction, if this block has one
    /// (which must immediately precede the terminator).
    pub fn merge_inst(&self) -> Option<&spv::Inst> {
        let wk = &spv::spec::Spec::get().well_known;

        let [.., merge, _] = &self.insts[..] else {
            return None;
        };
        [wk.OpSelectionMerge, wk.OpLoopMerge].contains(&merge.opcode).then_some(merge)
    }

    /// The targets of the terminator, in operand order (i.e. `true` before
    /// `false`, and the `OpSwitch` default before the cases), with duplicates.
    pub fn successors(&self) -> SmallVec<[spv::Id; 4]> {
        let wk = &spv::spec::Spec::get().well_known;

        let Some(terminator) = self.terminator() else {
            return SmallVec::new();
        };
        if terminator.opcode == wk.OpBranch {
            terminator.ids.iter().copied().take(1).collect()
        } else if terminator.opcode == wk.OpBranchConditional {
            terminator.ids.iter().copied().skip(1).take(2).collect()
        } else if terminator.opcode == wk.OpSwitch {
            terminator.ids.iter().copied().skip(1).collect()
        } else {
            SmallVec::new()
        }
    }
}

pub struct EntryPoint {
    /// SPIR-V `ExecutionModel` value.
    pub execution_model: u32,
    pub func: spv::Id,
    pub name: String,
    pub interface: SmallVec<[spv::Id; 4]>,
    pub workgroup_size: Option<[u32; 3]>,
}

/// Knobs controlling the shape of the output.
#[derive(Copy, Clone, Debug)]
pub struct Options {
    /// Use `OpName`s (sanitized) for naming values, instead of just `x_<id>`.
    pub use_debug_names: bool,

    /// Omit the final `return;` of a function body (it's implied).
    pub elide_trailing_return: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self { use_debug_names: true, elide_trailing_return: true }
    }
}

impl Module {
    /// Structurize every function with a body, in definition order.
    ///
    /// Failures are per-function, and don't affect the other functions.
    pub fn structurize_all(&self, options: &Options) -> Vec<(spv::Id, Result<ast::FunctionBody>)> {
        let module_names = namer::Namer::for_module(self, options);
        self.funcs
            .iter()
            .filter(|(_, func)| !func.blocks.is_empty())
            .map(|(&func_id, _)| {
                let result = emit::structurize_func_with_names(
                    self,
                    func_id,
                    options,
                    module_names.clone(),
                );
                if let Err(e) = &result {
                    tracing::warn!(func = %func_id, error = %e, "failed to structurize function");
                }
                (func_id, result)
            })
            .collect()
    }

    /// Structurize a single function (see also [`Module::structurize_all`]).
    pub fn structurize_func(
        &self,
        func_id: spv::Id,
        options: &Options,
    ) -> Result<ast::FunctionBody> {
        emit::structurize_func_with_names(
            self,
            func_id,
            options,
            namer::Namer::for_module(self, options),
        )
    }
}
