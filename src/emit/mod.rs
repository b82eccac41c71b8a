//! Building the statement tree of a function, by walking its blocks in block
//! order (see [`FuncCfg::order`]), while tracking the constructs being entered
//! and exited, as a stack of statement lists.
//!
//! Nested statements (`if`, `loop`, `switch`) are created as soon as their
//! header block is reached, but their bodies are only filled in later (as
//! the blocks of each clause are reached), so they're first recorded as
//! [`PendingStmt`]s, referring to "slots" for their bodies, and only turned
//! into the final [`ast::Statement`]s at the very end.

use crate::ast::{self, CaseSelector, Expr, Literal, Statement};
use crate::cfg::{self, EdgeKind, FuncCfg};
use crate::construct::{ConstructIdx, ConstructKind, ConstructList};
use crate::def_use::{DefKind, DefUse};
use crate::error::{Reporter, Result};
use crate::namer::Namer;
use crate::phi::{self, CopyOp, Source};
use crate::{spv, Context, FuncDecl, Module, Options, Type, TypeDef};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

mod expr;
mod image;

/// Structurize `func_id` from `module`, using `namer` (typically shared with
/// the other functions, see [`Namer::for_module`]) to pick identifiers.
pub fn structurize_func_with_names(
    module: &Module,
    func_id: spv::Id,
    options: &Options,
    mut namer: Namer,
) -> Result<ast::FunctionBody> {
    let r = Reporter::new(func_id);
    let func = module
        .funcs
        .get(&func_id)
        .ok_or_else(|| r.unresolved(format!("%{func_id} is not a function")))?;

    let (cfg, constructs) = cfg::analyze(func_id, func)?;
    let def_use = DefUse::analyze(module, func, &cfg, &constructs)?;

    let name = namer.name(func_id);
    let mut emitter = FunctionEmitter {
        module,
        cx: module.cx_ref(),
        options,
        func,
        cfg: &cfg,
        constructs: &constructs,
        def_use: &def_use,
        namer,
        r,
        stack: vec![],
        slots: vec![],
        inlined: FxHashMap::default(),
        phi_snapshots: FxHashMap::default(),
    };

    let params = func
        .params
        .iter()
        .map(|param| {
            Ok(ast::Param { name: emitter.namer.name(param.id), ty: emitter.type_name(param.ty)? })
        })
        .collect::<Result<_>>()?;
    let ret_type = match emitter.cx[func.ret_type] {
        TypeDef::Void => None,
        _ => Some(emitter.type_name(func.ret_type)?),
    };
    let entry_point = module.entry_points.iter().find(|ep| ep.func == func_id).and_then(|ep| {
        let stage = match ep.execution_model {
            0 => "vertex",
            4 => "fragment",
            5 => "compute",
            _ => return None,
        };
        Some(ast::EntryPointInfo {
            stage,
            workgroup_size: if stage == "compute" { ep.workgroup_size } else { None },
        })
    });

    let body = emitter.emit_body()?;

    tracing::debug!(
        func = %func_id,
        %name,
        blocks = cfg.order.len(),
        statements = body.len(),
        "structurized function"
    );

    Ok(ast::FunctionBody { func_id, name, params, ret_type, entry_point, body })
}

/// Statement not yet complete, because its nested bodies are still being
/// built (in the [`FunctionEmitter::slots`] they refer to).
enum PendingStmt {
    Done(Statement),
    If { cond: Expr, then_slot: usize, else_slot: usize },
    Loop { body_slot: usize, continuing_slot: Option<usize> },
    Switch { selector: Expr, cases: Vec<(Vec<CaseSelector>, usize)> },
}

/// Statement list being appended to, until the block `end_id` is reached.
struct StatementBlock {
    end_id: Option<spv::Id>,
    stmts: Vec<PendingStmt>,

    /// Where to move `stmts` to, once complete (`None` only for the function body).
    slot: Option<usize>,
}

pub(crate) struct FunctionEmitter<'a> {
    module: &'a Module,
    cx: &'a Context,
    options: &'a Options,
    func: &'a FuncDecl,
    cfg: &'a FuncCfg<'a>,
    constructs: &'a ConstructList,
    def_use: &'a DefUse<'a>,
    namer: Namer,

    /// Error context, updated with every block.
    r: Reporter,

    stack: Vec<StatementBlock>,
    slots: Vec<Option<Vec<PendingStmt>>>,

    /// Single-use values, waiting to be substituted into their only use.
    inlined: FxHashMap<spv::Id, Expr>,

    /// `OpPhi`s whose value (before the copies at the end of the current
    /// block) was saved in a `let`, and its name.
    phi_snapshots: FxHashMap<spv::Id, String>,
}

impl<'a> FunctionEmitter<'a> {
    fn emit_body(&mut self) -> Result<ast::Block> {
        self.stack.push(StatementBlock { end_id: None, stmts: vec![], slot: None });

        let cfg = self.cfg;
        if let Some(&entry_id) = cfg.order.first() {
            self.r = self.r.at_block(entry_id);
            self.emit_function_vars(entry_id)?;
        }
        for &block_id in &cfg.order {
            self.emit_basic_block(block_id)?;
        }

        let root = if self.stack.len() == 1 { self.stack.pop() } else { None };
        let root = root.ok_or_else(|| self.r.internal("statement blocks left open"))?;
        let mut body = self.resolve(root.stmts)?;

        if self.options.elide_trailing_return && body.last() == Some(&Statement::Return(None)) {
            body.pop();
        }
        Ok(body)
    }

    /// Declare the function-scope `OpVariable`s, followed by the hoisted
    /// values and `OpPhi`s whose scope is the whole function.
    fn emit_function_vars(&mut self, entry_id: spv::Id) -> Result<()> {
        let wk = &spv::spec::Spec::get().well_known;
        let cx = self.cx;
        let cfg = self.cfg;

        let entry = cfg.info(entry_id).block;
        for inst in entry.insts.iter().filter(|inst| inst.opcode == wk.OpVariable) {
            let r = self.r.at_inst(inst.opcode);
            let (Some(id), Some(ptr_ty)) =
                (inst.result_id, inst.result_type_id.and_then(|ty| self.module.types.get(&ty)))
            else {
                return Err(r.malformed("OpVariable without a result (pointer) type"));
            };
            let TypeDef::Pointer { pointee, .. } = cx[*ptr_ty] else {
                return Err(r.malformed("OpVariable result type isn't a pointer"));
            };

            let ty = self.type_name(pointee)?;
            let init = inst.ids.first().map(|&init| self.make_expr(init)).transpose()?;
            let name = self.namer.name(id);
            self.push_stmt(Statement::Var { name, ty, init });
        }

        self.declare_construct_vars(ConstructList::FUNCTION)
    }

    fn emit_basic_block(&mut self, block_id: spv::Id) -> Result<()> {
        self.r = Reporter::new(self.cfg.func_id).at_block(block_id);
        self.phi_snapshots.clear();

        while self.stack.last().is_some_and(|b| b.end_id == Some(block_id)) {
            self.finish_statement_block()?;
        }

        // Constructs starting at this block, innermost first. At most three:
        // a continue target can also head a nested loop, whose header can
        // also start an if-selection.
        let constructs = self.constructs;
        let mut entering = SmallVec::<[ConstructIdx; 3]>::new();
        let mut c = self.cfg.info(block_id).construct;
        while let Some(idx) = c {
            let construct = &constructs[idx];
            if construct.begin_id != block_id || construct.kind == ConstructKind::Function {
                break;
            }
            entering.push(idx);
            c = construct.parent;
        }
        if entering.len() > 3 {
            return Err(self.r.internal(format!(
                "{} constructs start at the same block",
                entering.len()
            )));
        }

        for &idx in entering.iter().rev() {
            self.enter_construct(idx)?;
            self.declare_construct_vars(idx)?;
        }

        self.emit_block_statements(block_id)?;

        match entering.first().map(|&idx| (idx, constructs[idx].kind)) {
            Some((idx, ConstructKind::IfSelection)) => self.emit_if_start(idx, block_id),
            Some((idx, ConstructKind::SwitchSelection)) => self.emit_switch_start(idx, block_id),
            _ => self.emit_terminator(block_id),
        }
    }

    fn enter_construct(&mut self, idx: ConstructIdx) -> Result<()> {
        let constructs = self.constructs;
        let c = &constructs[idx];
        match c.kind {
            ConstructKind::Loop => self.start_loop(c.end_id),
            ConstructKind::Continue if self.cfg.info(c.begin_id).is_continue_entire_loop => {
                self.start_loop(c.end_id)
            }
            ConstructKind::Continue => {
                let slot = self.new_slot();
                match self.top()?.stmts.last_mut() {
                    Some(PendingStmt::Loop { continuing_slot: continuing @ None, .. }) => {
                        *continuing = Some(slot);
                    }
                    _ => {
                        return Err(self.r.internal("continue construct doesn't follow its loop"));
                    }
                }
                self.stack.push(StatementBlock { end_id: c.end_id, stmts: vec![], slot: Some(slot) });
                Ok(())
            }
            ConstructKind::Function
            | ConstructKind::IfSelection
            | ConstructKind::SwitchSelection => Ok(()),
        }
    }

    fn start_loop(&mut self, body_end: Option<spv::Id>) -> Result<()> {
        let body_slot = self.new_slot();
        self.top()?.stmts.push(PendingStmt::Loop { body_slot, continuing_slot: None });
        self.stack.push(StatementBlock { end_id: body_end, stmts: vec![], slot: Some(body_slot) });
        Ok(())
    }

    fn declare_construct_vars(&mut self, idx: ConstructIdx) -> Result<()> {
        let def_use = self.def_use;
        let ids = def_use.hoisted_vars.get(&idx).into_iter().chain(def_use.phi_vars.get(&idx));
        for &id in ids.flatten() {
            let ty = self.type_of(id)?;
            let ty = self.type_name(ty)?;
            let name = self.namer.name(id);
            self.push_stmt(Statement::Var { name, ty, init: None });
        }
        Ok(())
    }

    /// Emit all the instructions of the block (other than `OpPhi`s, merges
    /// and its terminator), followed by its `OpPhi` copies (unless they have
    /// to be placed on each outgoing edge, see [`phi::split_per_edge`]).
    fn emit_block_statements(&mut self, block_id: spv::Id) -> Result<()> {
        let wk = &spv::spec::Spec::get().well_known;

        let block = self.cfg.info(block_id).block;
        let Some((terminator, insts)) = block.insts.split_last() else {
            return Err(self.r.malformed("empty block"));
        };
        for inst in insts {
            let skip = [wk.OpPhi, wk.OpVariable, wk.OpSelectionMerge, wk.OpLoopMerge, wk.OpNop]
                .contains(&inst.opcode);
            if !skip {
                self.emit_statement(inst)?;
            }
        }

        if !phi::split_per_edge(self.cfg, self.def_use, block_id) {
            let copies = phi::copies_at(self.def_use, block_id, None);

            // The condition/selector is evaluated after the copies.
            let cond = [wk.OpBranchConditional, wk.OpSwitch]
                .contains(&terminator.opcode)
                .then(|| terminator.ids.first().copied())
                .flatten();
            let extra_reads: SmallVec<[_; 1]> = cond.into_iter().collect();

            for stmt in self.phi_copy_statements(block_id, &copies, &extra_reads)? {
                self.push_stmt(stmt);
            }
        }
        Ok(())
    }

    fn emit_statement(&mut self, inst: &'a spv::Inst) -> Result<()> {
        let r = self.r.at_inst(inst.opcode);

        let Some(id) = inst.result_id else {
            return self.emit_effect(inst);
        };
        let def_use = self.def_use;
        let def = def_use
            .defs
            .get(&id)
            .ok_or_else(|| r.internal(format!("%{id} is missing from def-use analysis")))?;
        if !matches!(def.kind, DefKind::Combinatorial | DefKind::Named) {
            return Ok(());
        }

        let ty = self.type_of(id)?;
        let value = self.make_value(inst)?;
        if self.cx[ty] == TypeDef::Void {
            self.push_stmt(Statement::Expr(value));
        } else if def.hoisted_to.is_some() {
            let name = self.namer.name(id);
            self.push_stmt(Statement::Assign { lhs: Expr::ident(name), rhs: value });
        } else if def.needs_named_def() {
            let name = self.namer.name(id);
            let ty = Some(self.type_name(ty)?);
            self.push_stmt(Statement::Let { name, ty, value });
        } else {
            self.inlined.insert(id, value);
        }
        Ok(())
    }

    /// Instructions without a result, that are only executed for side-effects.
    fn emit_effect(&mut self, inst: &spv::Inst) -> Result<()> {
        let wk = &spv::spec::Spec::get().well_known;
        let r = self.r.at_inst(inst.opcode);

        let arg = |i: usize| inst.ids.get(i).copied().ok_or_else(|| r.malformed("missing operand"));
        let stmt = if inst.opcode == wk.OpStore {
            let (ptr, value) = (arg(0)?, arg(1)?);
            Statement::Assign { lhs: self.make_ref(ptr)?, rhs: self.make_expr(value)? }
        } else {
            match inst.opcode.name() {
                "OpCopyMemory" => {
                    let (dst, src) = (arg(0)?, arg(1)?);
                    Statement::Assign { lhs: self.make_ref(dst)?, rhs: self.make_ref(src)? }
                }
                "OpImageWrite" => self.image_write(inst)?,
                name => return Err(r.unsupported(format!("{name} has no statement form"))),
            }
        };
        self.push_stmt(stmt);
        Ok(())
    }

    /// Turn the `OpPhi` copies `(phi, value)` at the end of `block_id` into
    /// statements, reading every overwritten `OpPhi` through a snapshot.
    fn phi_copy_statements(
        &mut self,
        block_id: spv::Id,
        copies: &[(spv::Id, spv::Id)],
        extra_reads: &[spv::Id],
    ) -> Result<Vec<Statement>> {
        let mut stmts = vec![];
        for op in phi::sequentialize(copies, extra_reads) {
            match op {
                CopyOp::Snapshot(phi_id) => {
                    let phi_name = self.namer.name(phi_id);
                    let name = self.namer.make_derived_name(format!("{phi_name}_c{block_id}"));
                    stmts.push(Statement::Let {
                        name: name.clone(),
                        ty: None,
                        value: Expr::ident(phi_name),
                    });
                    self.phi_snapshots.insert(phi_id, name);
                }
                CopyOp::Assign { target, source } => {
                    let rhs = match source {
                        Source::Value(value_id) => self.make_expr(value_id)?,
                        Source::Snapshot(phi_id) => {
                            let name = self.phi_snapshots.get(&phi_id).cloned().ok_or_else(|| {
                                self.r.internal(format!("%{phi_id} read before its snapshot"))
                            })?;
                            Expr::ident(name)
                        }
                    };
                    stmts.push(Statement::Assign { lhs: Expr::ident(self.namer.name(target)), rhs });
                }
            }
        }
        Ok(stmts)
    }

    /// The statements for the edge `src -> dest`, when it's taken as one arm
    /// of a conditional branch (see also [`FunctionEmitter::make_branch`]).
    fn edge_statements(&mut self, src: spv::Id, dest: spv::Id, split: bool) -> Result<Vec<Statement>> {
        let mut stmts = vec![];
        if split {
            self.phi_snapshots.clear();
            let copies = phi::copies_at(self.def_use, src, Some(dest));
            stmts = self.phi_copy_statements(src, &copies, &[])?;
        }
        stmts.extend(self.make_branch(src, dest, false)?);
        Ok(stmts)
    }

    fn emit_if_start(&mut self, idx: ConstructIdx, header_id: spv::Id) -> Result<()> {
        let cfg = self.cfg;
        let constructs = self.constructs;
        let c = &constructs[idx];
        let info = cfg.info(header_id);

        let terminator = info.block.terminator().ok_or_else(|| self.r.internal("no terminator"))?;
        let [cond, true_id, false_id] = terminator.ids[..] else {
            return Err(self.r.malformed("conditional branch needs a condition and two targets"));
        };
        let end_id = c.end_id.ok_or_else(|| self.r.internal("if-selection without an end"))?;
        let cond = self.make_expr(cond)?;

        // Where the clauses end: the earlier one at the start of the later
        // one, and the later one at the premerge block (or merge block).
        let intended_merge = info.premerge_head.unwrap_or(end_id);
        let (then_end, else_end) = match (info.true_head, info.false_head) {
            (Some(t), Some(f)) if t != f && cfg.pos(t) < cfg.pos(f) => (f, intended_merge),
            (Some(t), Some(f)) if t != f => (intended_merge, t),
            _ => (intended_merge, intended_merge),
        };

        let split = phi::split_per_edge(cfg, self.def_use, header_id);
        let then_slot = self.new_slot();
        let else_slot = self.new_slot();
        self.top()?.stmts.push(PendingStmt::If { cond, then_slot, else_slot });

        let mut clauses = SmallVec::<[_; 2]>::new();
        for (head, target, end, slot) in [
            (info.true_head, true_id, then_end, then_slot),
            (info.false_head, false_id, else_end, else_slot),
        ] {
            match head.filter(|&head| head != end) {
                Some(head) => {
                    let mut stmts = vec![];
                    if split {
                        self.phi_snapshots.clear();
                        let copies = phi::copies_at(self.def_use, header_id, Some(head));
                        stmts = self.phi_copy_statements(header_id, &copies, &[])?;
                    }
                    clauses.push((cfg.pos(head), end, slot, stmts));
                }
                None => {
                    let mut stmts = vec![];
                    if split {
                        self.phi_snapshots.clear();
                        let copies = phi::copies_at(self.def_use, header_id, Some(target));
                        stmts = self.phi_copy_statements(header_id, &copies, &[])?;
                    }
                    stmts.extend(self.make_branch(header_id, target, true)?);
                    self.slots[slot] = Some(stmts.into_iter().map(PendingStmt::Done).collect());
                }
            }
        }

        // The clause that comes first in block order must be on top.
        clauses.sort_by_key(|&(head_pos, ..)| std::cmp::Reverse(head_pos));
        for (_, end, slot, stmts) in clauses {
            self.stack.push(StatementBlock {
                end_id: Some(end),
                stmts: stmts.into_iter().map(PendingStmt::Done).collect(),
                slot: Some(slot),
            });
        }
        Ok(())
    }

    fn emit_switch_start(&mut self, idx: ConstructIdx, header_id: spv::Id) -> Result<()> {
        let cfg = self.cfg;
        let cx = self.cx;
        let r = self.r;
        let constructs = self.constructs;
        let c = &constructs[idx];

        let switch = cfg.info(header_id).block.terminator().ok_or_else(|| r.internal("no terminator"))?;
        let r = r.at_inst(switch.opcode);
        let [selector_id, default_id, ref case_targets @ ..] = switch.ids[..] else {
            return Err(r.malformed("missing selector or default target"));
        };
        let end_id = c.end_id.ok_or_else(|| r.internal("switch without an end"))?;

        let selector_ty = self.type_of(selector_id)?;
        let signed = match cx[selector_ty] {
            TypeDef::Int { width: 32, signed } => signed,
            _ => return Err(r.unsupported("switch selector must be a 32-bit integer")),
        };
        let selector = self.make_expr(selector_id)?;

        let case_values = switch
            .imms
            .iter()
            .map(spv::Imm::as_u64)
            .collect::<Option<SmallVec<[u64; 4]>>>()
            .ok_or_else(|| r.malformed("invalid case literal"))?;

        // Group all the values (and the default) by target, sorted by value.
        let mut by_target: Vec<(spv::Id, Vec<i64>, bool)> = vec![];
        let mut add = |target: spv::Id, value: Option<u64>| {
            let i = by_target.iter().position(|&(t, ..)| t == target).unwrap_or_else(|| {
                by_target.push((target, vec![], false));
                by_target.len() - 1
            });
            match value {
                Some(v) if signed => by_target[i].1.push(i64::from(v as u32 as i32)),
                Some(v) => by_target[i].1.push(i64::from(v as u32)),
                None => by_target[i].2 = true,
            }
        };
        for (&value, &target) in case_values.iter().zip(case_targets) {
            add(target, Some(value));
        }
        add(default_id, None);
        by_target.sort_by_key(|&(target, ..)| cfg.pos(target));

        let mut cases = vec![];
        let mut clauses = vec![];
        for (i, (target, mut values, has_default)) in by_target.iter().cloned().enumerate() {
            values.sort_unstable();
            let mut selectors: Vec<_> = values
                .into_iter()
                .map(|v| {
                    CaseSelector::Value(if signed {
                        Literal::I32(v as i32)
                    } else {
                        Literal::U32(v as u32)
                    })
                })
                .collect();
            if has_default {
                selectors.push(CaseSelector::Default);
            }

            let slot = self.new_slot();
            cases.push((selectors, slot));
            if target == end_id {
                self.slots[slot] = Some(vec![]);
            } else {
                let end = by_target.get(i + 1).map_or(end_id, |&(next, ..)| next);
                clauses.push(StatementBlock { end_id: Some(end), stmts: vec![], slot: Some(slot) });
            }
        }

        self.top()?.stmts.push(PendingStmt::Switch { selector, cases });
        self.stack.extend(clauses.into_iter().rev());
        Ok(())
    }

    /// Emit the terminator of a block that doesn't start a selection.
    fn emit_terminator(&mut self, block_id: spv::Id) -> Result<()> {
        let wk = &spv::spec::Spec::get().well_known;

        let terminator =
            self.cfg.info(block_id).block.terminator().ok_or_else(|| self.r.internal("no terminator"))?;
        let r = self.r.at_inst(terminator.opcode);
        let arg = |i: usize| terminator.ids.get(i).copied().ok_or_else(|| r.malformed("missing operand"));

        let opcode = terminator.opcode;
        if opcode == wk.OpReturn {
            self.push_stmt(Statement::Return(None));
        } else if opcode == wk.OpReturnValue {
            let value = self.make_expr(arg(0)?)?;
            self.push_stmt(Statement::Return(Some(value)));
        } else if [wk.OpKill, wk.OpTerminateInvocation].contains(&opcode) {
            self.push_stmt(Statement::Discard);
        } else if opcode == wk.OpUnreachable {
            self.push_stmt(Statement::Loop { body: vec![], continuing: vec![] });
        } else if opcode == wk.OpBranch {
            if let Some(stmt) = self.make_branch(block_id, arg(0)?, false)? {
                self.push_stmt(stmt);
            }
        } else if opcode == wk.OpBranchConditional {
            let (cond, true_id, false_id) = (arg(0)?, arg(1)?, arg(2)?);
            if true_id == false_id {
                if let Some(stmt) = self.make_branch(block_id, true_id, false)? {
                    self.push_stmt(stmt);
                }
                return Ok(());
            }

            let split = phi::split_per_edge(self.cfg, self.def_use, block_id);
            let cond = self.make_expr(cond)?;
            let then_body = self.edge_statements(block_id, true_id, split)?;
            let else_body = self.edge_statements(block_id, false_id, split)?;
            if !then_body.is_empty() || !else_body.is_empty() {
                self.push_stmt(Statement::If { cond, then_body, else_body });
            }
        } else if opcode == wk.OpSwitch {
            return Err(r.malformed("OpSwitch without OpSelectionMerge"));
        } else {
            return Err(r.malformed("block doesn't end in a terminator"));
        }
        Ok(())
    }

    /// The statement (if any) needed to take the edge `src -> dest`, where
    /// `forced` requires it to be explicit, even if it could be implied by
    /// the structure (e.g. a `break` at the end of a `case`).
    fn make_branch(&self, src: spv::Id, dest: spv::Id, forced: bool) -> Result<Option<Statement>> {
        let cfg = self.cfg;
        let kind = cfg
            .edge_kind(src, dest)
            .ok_or_else(|| self.r.internal(format!("unclassified edge to %{dest}")))?;

        let next_id = cfg.pos(src).checked_add(1).and_then(|pos| cfg.order.get(pos)).copied();
        Ok(match kind {
            EdgeKind::Back | EdgeKind::IfBreak | EdgeKind::Forward => None,
            EdgeKind::SwitchBreak => {
                let falls_out = next_id.is_some_and(|next| {
                    let next_info = cfg.info(next);
                    next == dest || next_info.case_head_for.is_some() || next_info.default_head_for.is_some()
                });
                (forced || !falls_out).then_some(Statement::Break)
            }
            EdgeKind::LoopBreak => Some(Statement::Break),
            EdgeKind::LoopContinue => (forced || next_id != Some(dest)).then_some(Statement::Continue),
            EdgeKind::CaseFallThrough => {
                return Err(self.r.unsupported(format!("fall-through from switch case into %{dest}")));
            }
        })
    }

    fn new_slot(&mut self) -> usize {
        self.slots.push(None);
        self.slots.len() - 1
    }

    fn top(&mut self) -> Result<&mut StatementBlock> {
        let r = self.r;
        self.stack.last_mut().ok_or_else(|| r.internal("no open statement block"))
    }

    fn push_stmt(&mut self, stmt: Statement) {
        if let Some(top) = self.stack.last_mut() {
            top.stmts.push(PendingStmt::Done(stmt));
        }
    }

    fn finish_statement_block(&mut self) -> Result<()> {
        let block = self.stack.pop().ok_or_else(|| self.r.internal("no open statement block"))?;
        let slot = block.slot.ok_or_else(|| self.r.internal("function body ended early"))?;
        self.slots[slot] = Some(block.stmts);
        Ok(())
    }

    fn take_slot(&mut self, slot: usize) -> Result<ast::Block> {
        let stmts = self
            .slots
            .get_mut(slot)
            .and_then(Option::take)
            .ok_or_else(|| self.r.internal(format!("statement list #{slot} was never completed")))?;
        self.resolve(stmts)
    }

    fn resolve(&mut self, stmts: Vec<PendingStmt>) -> Result<ast::Block> {
        stmts
            .into_iter()
            .map(|stmt| {
                Ok(match stmt {
                    PendingStmt::Done(stmt) => stmt,
                    PendingStmt::If { cond, then_slot, else_slot } => Statement::If {
                        cond,
                        then_body: self.take_slot(then_slot)?,
                        else_body: self.take_slot(else_slot)?,
                    },
                    PendingStmt::Loop { body_slot, continuing_slot } => Statement::Loop {
                        body: self.take_slot(body_slot)?,
                        continuing: match continuing_slot {
                            Some(slot) => self.take_slot(slot)?,
                            None => vec![],
                        },
                    },
                    PendingStmt::Switch { selector, cases } => Statement::Switch {
                        selector,
                        cases: cases
                            .into_iter()
                            .map(|(selectors, slot)| {
                                Ok(ast::Case { selectors, body: self.take_slot(slot)? })
                            })
                            .collect::<Result<_>>()?,
                    },
                })
            })
            .collect()
    }

    /// The type of any value usable in this function.
    fn type_of(&self, id: spv::Id) -> Result<Type> {
        let m = self.module;
        if let Some(&ct) = m.consts.get(&id) {
            return Ok(self.cx[ct].ty);
        }
        if let Some(var) = m.global_vars.get(&id) {
            return Ok(var.ty);
        }
        if let Some(param) = self.func.params.iter().find(|p| p.id == id) {
            return Ok(param.ty);
        }
        self.def_use
            .defs
            .get(&id)
            .and_then(|def| def.inst.result_type_id)
            .and_then(|ty| m.types.get(&ty).copied())
            .ok_or_else(|| self.r.unresolved(format!("%{id} has no known type")))
    }

    /// An expression for the value `id`, consuming it if it was inlined.
    fn make_expr(&mut self, id: spv::Id) -> Result<Expr> {
        if let Some(name) = self.phi_snapshots.get(&id) {
            return Ok(Expr::ident(name.clone()));
        }
        if let Some(&ct) = self.module.consts.get(&id) {
            return self.const_expr(ct);
        }
        if self.module.global_vars.contains_key(&id) {
            return Ok(Expr::ident(self.namer.name(id)).addr_of());
        }
        if self.func.params.iter().any(|p| p.id == id) {
            return Ok(Expr::ident(self.namer.name(id)));
        }

        let def_use = self.def_use;
        let def = def_use
            .defs
            .get(&id)
            .ok_or_else(|| self.r.unresolved(format!("%{id} is not defined")))?;
        match def.kind {
            DefKind::Phi => Ok(Expr::ident(self.namer.name(id))),
            DefKind::LocalVar => Ok(Expr::ident(self.namer.name(id)).addr_of()),
            DefKind::Sunk => {
                let ty = self.type_of(id)?;
                if let TypeDef::Pointer { .. } = self.cx[ty] {
                    Ok(self.make_ref(id)?.addr_of())
                } else {
                    self.handle_expr(id)
                }
            }
            DefKind::Combinatorial | DefKind::Named => match self.inlined.remove(&id) {
                Some(expr) => Ok(expr),
                None => Ok(Expr::ident(self.namer.name(id))),
            },
        }
    }

    /// A reference expression (i.e. something that can be assigned to, or
    /// read from), for the memory pointed to by `ptr`.
    fn make_ref(&mut self, ptr: spv::Id) -> Result<Expr> {
        let wk = &spv::spec::Spec::get().well_known;
        let cx = self.cx;

        if self.module.global_vars.contains_key(&ptr) {
            return Ok(Expr::ident(self.namer.name(ptr)));
        }
        if let Some(param) = self.func.params.iter().find(|p| p.id == ptr) {
            return match cx[param.ty] {
                TypeDef::Pointer { .. } => Ok(Expr::ident(self.namer.name(ptr)).deref()),
                _ => Err(self.r.malformed(format!("parameter %{ptr} isn't a pointer"))),
            };
        }

        let def_use = self.def_use;
        let def = def_use
            .defs
            .get(&ptr)
            .ok_or_else(|| self.r.unresolved(format!("%{ptr} is not defined")))?;
        let inst = def.inst;
        let r = self.r.at_inst(inst.opcode);
        match def.kind {
            DefKind::LocalVar => return Ok(Expr::ident(self.namer.name(ptr))),
            DefKind::Sunk => {}
            _ => return Err(r.unsupported(format!("%{ptr} is not a pointer into a variable"))),
        }

        if [wk.OpAccessChain, wk.OpInBoundsAccessChain].contains(&inst.opcode) {
            let Some((&base, indices)) = inst.ids.split_first() else {
                return Err(r.malformed("access chain without a base"));
            };
            let mut ty = match cx[self.type_of(base)?] {
                TypeDef::Pointer { pointee, .. } => pointee,
                _ => return Err(r.malformed("access chain base isn't a pointer")),
            };
            let mut expr = self.make_ref(base)?;
            for &index in indices {
                let (next_expr, next_ty) = self.access_component(expr, ty, index)?;
                expr = next_expr;
                ty = next_ty;
            }
            Ok(expr)
        } else if inst.opcode == wk.OpCopyObject {
            let src = inst.ids.first().copied().ok_or_else(|| r.malformed("missing operand"))?;
            self.make_ref(src)
        } else {
            Err(r.unsupported("pointer can't be traced back to a variable"))
        }
    }

    /// Index into `base` (of type `ty`) with the value `index`, returning
    /// the resulting expression and its type.
    fn access_component(&mut self, base: Expr, ty: Type, index: spv::Id) -> Result<(Expr, Type)> {
        let cx = self.cx;
        let const_index = self.module.consts.get(&index).and_then(|&ct| match cx[ct].kind {
            crate::ConstKind::Scalar(x) => u32::try_from(x).ok(),
            _ => None,
        });

        match &cx[ty] {
            TypeDef::Struct { id, members } => {
                let i = const_index
                    .ok_or_else(|| self.r.malformed("struct member index must be a constant"))?;
                let member_ty = members.get(i as usize).copied().ok_or_else(|| {
                    self.r.malformed(format!("struct member index {i} out of range"))
                })?;
                Ok((base.member(self.member_name(*id, i)), member_ty))
            }
            &TypeDef::Vector { elem, count } => match const_index {
                Some(i) if i < count.min(4) => Ok((base.member(swizzle(i)), elem)),
                _ => Ok((base.index(self.make_expr(index)?), elem)),
            },
            &TypeDef::Matrix { column, .. } => Ok((base.index(self.make_expr(index)?), column)),
            &TypeDef::Array { elem, .. } => Ok((base.index(self.make_expr(index)?), elem)),
            _ => Err(self.r.malformed("indexing into a non-composite type")),
        }
    }

    fn member_name(&self, struct_id: spv::Id, i: u32) -> String {
        let debug_name = if self.options.use_debug_names {
            let names = &self.module.debug_names.member_names;
            names.get(&(struct_id, i)).and_then(|&name| crate::namer::sanitize(&self.cx[name]))
        } else {
            None
        };
        debug_name.unwrap_or_else(|| format!("field{i}"))
    }
}

/// Vector component name, for the component at index `i` (`0..4`).
fn swizzle(i: u32) -> &'static str {
    ["x", "y", "z", "w"].get(i as usize).copied().unwrap_or("x")
}
