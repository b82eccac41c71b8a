//! Where every value is defined and used, and how it needs to be declared.
//!
//! SPIR-V only guarantees that definitions *dominate* their uses, but the
//! structured output needs *lexical* scoping: a `let` inside an `if` can't be
//! seen after it. Values whose uses escape the construct they're defined in
//! either get a named `let` (if that's enough), or are hoisted into a `var`
//! declared in the innermost construct whose scope covers all of their uses.

use crate::cfg::{FuncCfg, Pos};
use crate::construct::{ConstructIdx, ConstructKind, ConstructList};
use crate::error::{Reporter, Result};
use crate::phi::PhiAssignment;
use crate::{spv, FuncDecl, FxIndexMap, Module, TypeDef};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DefKind {
    /// Pure value, which can be emitted inline at its use (if used once).
    Combinatorial,

    /// Value that must be computed exactly where it's defined (memory reads,
    /// calls, etc.), and so always gets a named definition.
    Named,

    /// Pointer or handle, never declared, but instead substituted at each use
    /// (which also counts as a use of its own operands).
    Sunk,

    /// `OpPhi`, backed by a state variable assigned on every incoming edge.
    Phi,

    /// Function-scope `OpVariable`, declared at the start of the function.
    LocalVar,
}

pub struct DefInfo<'a> {
    pub inst: &'a spv::Inst,

    pub block_id: spv::Id,
    pub block_pos: Pos,

    /// Position of the defining instruction among all the instructions of the
    /// function (in block order), used to order definitions in the same block.
    pub index: usize,

    pub kind: DefKind,

    pub num_uses: u32,
    pub first_use_pos: Option<Pos>,
    pub last_use_pos: Option<Pos>,
    pub used_in_another_construct: bool,

    /// The value is mentioned more than once by the expression using it, or
    /// must be evaluated before the `OpPhi` copies of its block.
    pub requires_named: bool,

    /// A `let` at the definition is visible to all uses (only set when the
    /// value escapes its construct, see also [`DefInfo::hoisted_to`]).
    pub requires_named_let: bool,

    /// Construct at the start of which a `var` must be declared (and then
    /// assigned, at the definition).
    pub hoisted_to: Option<ConstructIdx>,

    /// For (used) `OpPhi`s, the construct declaring their state variable.
    pub phi_scope: Option<ConstructIdx>,
}

impl DefInfo<'_> {
    /// Whether the definition gets its own `let` (or `var` assignment),
    /// instead of being inlined into its only use.
    pub fn needs_named_def(&self) -> bool {
        match self.kind {
            DefKind::Named => true,
            DefKind::Combinatorial => {
                self.hoisted_to.is_some()
                    || self.requires_named
                    || self.requires_named_let
                    || self.used_in_another_construct
                    || self.num_uses != 1
            }
            DefKind::Sunk | DefKind::Phi | DefKind::LocalVar => false,
        }
    }
}

pub struct DefUse<'a> {
    /// All values defined in reachable blocks, in definition order.
    pub defs: FxIndexMap<spv::Id, DefInfo<'a>>,

    /// Hoisted `var`s, keyed by the construct they're declared at the start of.
    pub hoisted_vars: FxHashMap<ConstructIdx, SmallVec<[spv::Id; 2]>>,

    /// `OpPhi` state variables, keyed like `hoisted_vars`.
    pub phi_vars: FxHashMap<ConstructIdx, SmallVec<[spv::Id; 2]>>,

    /// `OpPhi` copies, keyed by the predecessor block they happen at the end of.
    pub phi_assignments: FxHashMap<spv::Id, SmallVec<[PhiAssignment; 2]>>,
}

/// The ID operands of `inst` that refer to values (i.e. excluding labels,
/// `OpExtInst` sets, and `OpFunctionCall` callees), except for `OpPhi`s.
pub fn value_operands(inst: &spv::Inst) -> &[spv::Id] {
    let wk = &spv::spec::Spec::get().well_known;

    if [wk.OpBranch, wk.OpSelectionMerge, wk.OpLoopMerge, wk.OpPhi].contains(&inst.opcode) {
        &[]
    } else if [wk.OpBranchConditional, wk.OpSwitch].contains(&inst.opcode) {
        &inst.ids[..inst.ids.len().min(1)]
    } else if [wk.OpExtInst, wk.OpFunctionCall].contains(&inst.opcode) {
        inst.ids.get(1..).unwrap_or(&[])
    } else {
        &inst.ids
    }
}

/// Instructions that always get a named definition (see [`DefKind::Named`]).
const ALWAYS_NAMED: &[&str] = &[
    "OpLoad",
    "OpFunctionCall",
    "OpCopyObject",
    "OpCompositeInsert",
    "OpVectorInsertDynamic",
    "OpImageSampleImplicitLod",
    "OpImageSampleExplicitLod",
    "OpImageSampleDrefImplicitLod",
    "OpImageSampleDrefExplicitLod",
    "OpImageFetch",
    "OpImageGather",
    "OpImageDrefGather",
    "OpImageRead",
    "OpImageQuerySize",
    "OpImageQuerySizeLod",
    "OpImageQueryLevels",
    "OpImageQuerySamples",
    "OpArrayLength",
];

pub fn def_kind(module: &Module, inst: &spv::Inst) -> DefKind {
    let wk = &spv::spec::Spec::get().well_known;
    let cx = module.cx_ref();

    if inst.opcode == wk.OpPhi {
        return DefKind::Phi;
    }
    if inst.opcode == wk.OpVariable {
        return DefKind::LocalVar;
    }
    let ty = inst.result_type_id.and_then(|ty| module.types.get(&ty));
    if ty.is_some_and(|&ty| matches!(cx[ty], TypeDef::Pointer { .. }) || cx[ty].is_handle()) {
        return DefKind::Sunk;
    }
    if ALWAYS_NAMED.contains(&inst.opcode.name()) {
        return DefKind::Named;
    }
    DefKind::Combinatorial
}

/// Instructions whose lowering mentions (some of) their operands repeatedly.
fn needs_named_operands(module: &Module, inst: &spv::Inst) -> bool {
    let wk = &spv::spec::Spec::get().well_known;

    match inst.opcode.name() {
        "OpVectorShuffle" | "OpSMod" | "OpFMod" => true,
        _ if inst.opcode == wk.OpExtInst => {
            let glsl = &spv::spec::Spec::get().glsl_std_450;
            let is_glsl = inst
                .ids
                .first()
                .and_then(|set| module.ext_inst_imports.get(set))
                .is_some_and(|&name| &module.cx_ref()[name] == "GLSL.std.450");
            let ext_name = inst.word(0).and_then(|number| glsl.name(number));
            is_glsl && matches!(ext_name, Some("FaceForward" | "Reflect"))
        }
        _ => false,
    }
}

struct UseRecorder<'m, 'a> {
    module: &'m Module,
    func: &'a FuncDecl,
    cfg: &'m FuncCfg<'a>,
    defs: FxIndexMap<spv::Id, DefInfo<'a>>,
    unreachable_defs: FxHashSet<spv::Id>,
}

impl<'a> UseRecorder<'_, 'a> {
    fn is_module_level_or_param(&self, id: spv::Id) -> bool {
        let m = self.module;
        m.consts.contains_key(&id)
            || m.global_vars.contains_key(&id)
            || m.funcs.contains_key(&id)
            || m.ext_inst_imports.contains_key(&id)
            || self.func.params.iter().any(|p| p.id == id)
    }

    /// Record a use of `id`, by the instruction with `user_index` in the block
    /// at `use_pos` (or by the end of that block, for `user_index: None`).
    ///
    /// With `count: false`, only the definition is validated.
    fn record_use(
        &mut self,
        id: spv::Id,
        use_block: spv::Id,
        use_pos: Pos,
        user_index: Option<usize>,
        count: bool,
        r: Reporter,
    ) -> Result<()> {
        let use_construct = self.cfg.info(use_block).construct;
        let Some(def) = self.defs.get_mut(&id) else {
            if self.is_module_level_or_param(id) {
                return Ok(());
            }
            if self.unreachable_defs.contains(&id) {
                return Err(r.unresolved(format!("%{id} is defined in an unreachable block")));
            }
            return Err(r.unresolved(format!("%{id} is not defined")));
        };

        let used_before_def = def.block_pos > use_pos
            || (def.block_pos == use_pos && user_index.is_some_and(|i| i <= def.index));
        if used_before_def {
            return Err(r.unresolved(format!("%{id} is used before its definition")));
        }
        if !count {
            return Ok(());
        }

        def.num_uses += 1;
        def.first_use_pos = Some(def.first_use_pos.map_or(use_pos, |p| p.min(use_pos)));
        def.last_use_pos = Some(def.last_use_pos.map_or(use_pos, |p| p.max(use_pos)));
        if self.cfg.info(def.block_id).construct != use_construct {
            def.used_in_another_construct = true;
        }

        // Sunk values are re-materialized at every use, along with their operands.
        if def.kind == DefKind::Sunk {
            let inst = def.inst;
            for &operand in value_operands(inst) {
                self.record_use(operand, use_block, use_pos, None, true, r)?;
            }
        }
        Ok(())
    }
}

impl<'a> DefUse<'a> {
    pub fn analyze(
        module: &Module,
        func: &'a FuncDecl,
        cfg: &FuncCfg<'a>,
        constructs: &ConstructList,
    ) -> Result<Self> {
        let wk = &spv::spec::Spec::get().well_known;
        let r = Reporter::new(cfg.func_id);

        // Collect definitions.
        let mut unreachable_defs = FxHashSet::default();
        for info in cfg.blocks.values().filter(|info| info.pos.is_none()) {
            unreachable_defs.extend(info.block.insts.iter().filter_map(|inst| inst.result_id));
        }

        let mut defs = FxIndexMap::default();
        let mut index = 0;
        for (block_pos, &block_id) in cfg.order.iter().enumerate() {
            let block = cfg.info(block_id).block;
            for inst in &block.insts {
                index += 1;
                let Some(id) = inst.result_id else {
                    continue;
                };
                let r = r.at_block(block_id).at_inst(inst.opcode);

                let kind = def_kind(module, inst);
                if kind == DefKind::LocalVar && block_pos != 0 {
                    return Err(r.malformed("OpVariable outside the entry block"));
                }
                let def = DefInfo {
                    inst,
                    block_id,
                    block_pos,
                    index,
                    kind,
                    num_uses: 0,
                    first_use_pos: None,
                    last_use_pos: None,
                    used_in_another_construct: false,
                    requires_named: false,
                    requires_named_let: false,
                    hoisted_to: None,
                    phi_scope: None,
                };
                if defs.insert(id, def).is_some() {
                    return Err(r.malformed(format!("%{id} is defined more than once")));
                }
            }
        }

        // Record uses.
        let mut recorder = UseRecorder { module, func, cfg, defs, unreachable_defs };
        let mut phi_assignments: FxHashMap<_, SmallVec<[_; 2]>> = FxHashMap::default();
        let mut index = 0;
        for (block_pos, &block_id) in cfg.order.iter().enumerate() {
            let block = cfg.info(block_id).block;
            for inst in &block.insts {
                index += 1;
                let r = r.at_block(block_id).at_inst(inst.opcode);

                if inst.opcode == wk.OpPhi {
                    let phi_id = inst.result_id.ok_or_else(|| r.malformed("OpPhi without result"))?;
                    if inst.ids.len() % 2 != 0 {
                        return Err(r.malformed("OpPhi operands must come in pairs"));
                    }
                    for pair in inst.ids.chunks_exact(2) {
                        let (value_id, pred_id) = (pair[0], pair[1]);
                        if !cfg.blocks.contains_key(&pred_id) {
                            return Err(r.malformed(format!("unknown predecessor block %{pred_id}")));
                        }
                        // Predecessors left out of the block order never run.
                        let Some(pred_pos) = cfg.info(pred_id).pos else {
                            continue;
                        };
                        recorder.record_use(value_id, pred_id, pred_pos, None, true, r)?;
                        phi_assignments.entry(pred_id).or_default().push(PhiAssignment {
                            phi_id,
                            value_id,
                            succ: block_id,
                        });
                    }
                    continue;
                }

                let is_sunk =
                    inst.result_id.and_then(|id| recorder.defs.get(&id)).map(|def| def.kind)
                        == Some(DefKind::Sunk);
                for &operand in value_operands(inst) {
                    recorder.record_use(operand, block_id, block_pos, Some(index), !is_sunk, r)?;
                }

                if needs_named_operands(module, inst) {
                    for &operand in value_operands(inst) {
                        if let Some(def) = recorder.defs.get_mut(&operand) {
                            def.requires_named = true;
                        }
                    }
                }
            }
        }
        let mut defs = recorder.defs;

        // `OpPhi` copies happen at the very end of a block, so anything they
        // (or the terminator after them) read, must be evaluated before them.
        for (&pred_id, assignments) in &phi_assignments {
            let mut any_used = false;
            for a in assignments {
                if defs.get(&a.phi_id).is_some_and(|phi| phi.num_uses > 0) {
                    any_used = true;
                    if let Some(def) = defs.get_mut(&a.value_id) {
                        def.requires_named |= def.kind == DefKind::Combinatorial;
                    }
                }
            }
            let terminator = cfg.info(pred_id).block.terminator();
            let cond = terminator
                .filter(|inst| [wk.OpBranchConditional, wk.OpSwitch].contains(&inst.opcode))
                .and_then(|inst| inst.ids.first());
            if let (true, Some(cond)) = (any_used, cond) {
                if let Some(def) = defs.get_mut(cond) {
                    def.requires_named |= def.kind == DefKind::Combinatorial;
                }
            }
        }

        let mut hoisted_vars: FxHashMap<_, SmallVec<[_; 2]>> = FxHashMap::default();
        let mut phi_vars: FxHashMap<_, SmallVec<[_; 2]>> = FxHashMap::default();

        for (&id, def) in &mut defs {
            let Some(last_use_pos) = def.last_use_pos else {
                continue;
            };
            let first_pos = def.first_use_pos.map_or(def.block_pos, |p| p.min(def.block_pos));
            let r = r.at_block(def.block_id);

            let declare_in = match def.kind {
                DefKind::Phi => {
                    // The state variable is read at the `OpPhi` itself, and
                    // written at the end of every (reachable) predecessor.
                    let pred_positions = def
                        .inst
                        .ids
                        .chunks_exact(2)
                        .filter_map(|pair| cfg.info(pair[1]).pos);
                    let first_pos = pred_positions.clone().fold(first_pos, Pos::min);
                    let last_pos =
                        pred_positions.fold(last_use_pos.max(def.block_pos), Pos::max);

                    let scope = constructs.enclosing_scope(cfg, first_pos, last_pos);
                    verify_scope(constructs, scope, id, first_pos, last_pos, r)?;
                    def.phi_scope = Some(scope);
                    phi_vars.entry(scope).or_default().push(id);
                    continue;
                }
                DefKind::Combinatorial | DefKind::Named => {
                    Self::hoist_target(cfg, constructs, def, first_pos, last_use_pos)
                }
                DefKind::Sunk | DefKind::LocalVar => continue,
            };

            if let Some(scope) = declare_in {
                verify_scope(constructs, scope, id, first_pos, last_use_pos, r)?;
                def.hoisted_to = Some(scope);
                hoisted_vars.entry(scope).or_default().push(id);
            }
        }

        tracing::debug!(
            func = %cfg.func_id,
            values = defs.len(),
            hoisted = hoisted_vars.values().map(|ids| ids.len()).sum::<usize>(),
            phi_vars = phi_vars.values().map(|ids| ids.len()).sum::<usize>(),
            "def-use analysis"
        );

        Ok(DefUse { defs, hoisted_vars, phi_vars, phi_assignments })
    }

    /// Decide whether `def` needs a hoisted `var` (returning its construct),
    /// or a named `let` (setting `requires_named_let`), for its uses to see it.
    fn hoist_target(
        cfg: &FuncCfg<'_>,
        constructs: &ConstructList,
        def: &mut DefInfo<'_>,
        first_pos: Pos,
        last_pos: Pos,
    ) -> Option<ConstructIdx> {
        let mut def_in_construct = cfg.info(def.block_id).construct?;

        // The first block of a selection runs before the branch, so it's
        // really part of the surrounding construct.
        let c = &constructs[def_in_construct];
        if def.block_pos == c.begin_pos
            && matches!(c.kind, ConstructKind::IfSelection | ConstructKind::SwitchSelection)
        {
            def_in_construct = c.parent?;
        }
        let c = &constructs[def_in_construct];

        // Code from the premerge block onwards is emitted after the `if`, so
        // it can't see anything defined inside either clause.
        if c.kind == ConstructKind::IfSelection && def.block_pos > c.begin_pos {
            let premerge_pos = cfg.info(c.begin_id).premerge_head.map(|id| cfg.pos(id));
            if let Some(premerge_pos) = premerge_pos {
                if def.block_pos < premerge_pos && last_pos >= premerge_pos {
                    return Some(def_in_construct);
                }
            }
        }

        if c.contains_pos(first_pos) && c.contains_pos(last_pos) {
            return None;
        }
        let enclosing = constructs.enclosing_scope(cfg, first_pos, last_pos);
        if enclosing == def_in_construct {
            def.requires_named_let = true;
            None
        } else {
            Some(enclosing)
        }
    }
}

fn verify_scope(
    constructs: &ConstructList,
    scope: ConstructIdx,
    id: spv::Id,
    first_pos: Pos,
    last_pos: Pos,
    r: Reporter,
) -> Result<()> {
    let c = &constructs[scope];
    if c.scope_contains_pos(first_pos) && c.scope_contains_pos(last_pos) {
        Ok(())
    } else {
        Err(r.internal(format!(
            "declaration scope of %{id} (construct starting at block %{}) \
             doesn't cover all of its uses",
            c.begin_id
        )))
    }
}
