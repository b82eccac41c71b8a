//! Control-flow graph (CFG) of a function: block order, merge metadata, and
//! the classification of every edge (as structured branches).

use crate::construct::{ConstructIdx, ConstructKind, ConstructList};
use crate::error::{Reporter, Result};
use crate::{spv, BasicBlock, FuncDecl, FxIndexMap};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

/// Position of a block in the block order (see [`FuncCfg::order`]).
pub type Pos = usize;

/// How a CFG edge is to be expressed in structured form.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EdgeKind {
    /// From the last block of a continue construct, back to its loop header.
    Back,

    /// To the merge block of the nearest enclosing switch.
    SwitchBreak,

    /// To the merge block of the nearest enclosing loop.
    LoopBreak,

    /// To the continue target of the nearest enclosing loop.
    LoopContinue,

    /// To the merge block of the construct the edge starts in (typically the
    /// end of an `if` clause, which needs no explicit statement).
    IfBreak,

    /// From the end of one switch case to the start of another.
    CaseFallThrough,

    /// Anything else (i.e. staying within the current construct).
    Forward,
}

/// Per-block analysis results, filled in by successive passes.
#[derive(Clone)]
pub struct BlockInfo<'a> {
    pub block: &'a BasicBlock,

    /// `None` for blocks not reachable through structured traversal.
    pub pos: Option<Pos>,

    // Set by the block's own merge instruction (if it's a header).
    pub merge_for_header: Option<spv::Id>,
    pub continue_for_header: Option<spv::Id>,

    // Set on merge blocks/continue targets, pointing back to their header.
    pub header_for_merge: Option<spv::Id>,
    pub header_for_continue: Option<spv::Id>,

    /// This block is both loop header and continue target (single-block loop).
    pub is_continue_entire_loop: bool,

    /// Innermost construct containing this block (set while labeling).
    pub construct: Option<ConstructIdx>,

    /// Unique successors, in terminator operand order, and their [`EdgeKind`]s.
    pub succ_edges: FxIndexMap<spv::Id, EdgeKind>,

    // Switch bookkeeping, for the blocks that start a case (or default) clause.
    pub case_head_for: Option<ConstructIdx>,
    pub default_head_for: Option<ConstructIdx>,
    pub default_is_merge: bool,
    pub case_values: SmallVec<[u64; 2]>,

    // If-selection bookkeeping, for if headers: the first block of each
    // clause (if inside the construct), and the "premerge" block, where the
    // two clauses rejoin before the actual merge block.
    pub true_head: Option<spv::Id>,
    pub false_head: Option<spv::Id>,
    pub premerge_head: Option<spv::Id>,
}

impl<'a> BlockInfo<'a> {
    fn new(block: &'a BasicBlock) -> Self {
        Self {
            block,
            pos: None,
            merge_for_header: None,
            continue_for_header: None,
            header_for_merge: None,
            header_for_continue: None,
            is_continue_entire_loop: false,
            construct: None,
            succ_edges: FxIndexMap::default(),
            case_head_for: None,
            default_head_for: None,
            default_is_merge: false,
            case_values: SmallVec::new(),
            true_head: None,
            false_head: None,
            premerge_head: None,
        }
    }
}

pub struct FuncCfg<'a> {
    pub func_id: spv::Id,

    /// All blocks, in declaration order (the entry block first).
    pub blocks: FxIndexMap<spv::Id, BlockInfo<'a>>,

    /// Reverse structured post-order: every header precedes its whole construct,
    /// and every construct is contiguous, ending just before its merge block
    /// (or continue target, for the body of a loop).
    ///
    /// Blocks only reachable through their own back-edges, or not at all, are
    /// left out (with the exception of merge blocks and continue targets of
    /// reachable headers, which are always included).
    pub order: Vec<spv::Id>,
}

/// Run all the CFG analyses on `func` (in dependency order).
pub fn analyze<'a>(
    func_id: spv::Id,
    func: &'a FuncDecl,
) -> Result<(FuncCfg<'a>, ConstructList)> {
    let r = Reporter::new(func_id);

    let mut cfg = FuncCfg::new(func_id, func)?;
    let constructs = ConstructList::label(&mut cfg, r)?;
    cfg.find_switch_case_headers(&constructs)?;
    cfg.classify_edges(&constructs)?;
    cfg.find_if_selection_internal_headers(&constructs)?;

    tracing::trace!(
        func = %func_id,
        blocks = cfg.order.len(),
        constructs = constructs.len(),
        "analyzed control-flow"
    );

    Ok((cfg, constructs))
}

impl<'a> FuncCfg<'a> {
    /// Collect the blocks of `func`, register merge information, and compute
    /// the block order (see [`FuncCfg::order`]).
    pub fn new(func_id: spv::Id, func: &'a FuncDecl) -> Result<Self> {
        let r = Reporter::new(func_id);

        let mut blocks = FxIndexMap::default();
        for block in &func.blocks {
            if blocks.insert(block.id, BlockInfo::new(block)).is_some() {
                return Err(r.malformed(format!("block %{} is defined more than once", block.id)));
            }
        }
        if blocks.is_empty() {
            return Err(r.malformed("function has no blocks"));
        }

        for info in blocks.values() {
            for target in info.block.successors() {
                if !blocks.contains_key(&target) {
                    return Err(r
                        .at_block(info.block.id)
                        .malformed(format!("branch to unknown block %{target}")));
                }
            }
        }

        let mut cfg = Self { func_id, blocks, order: vec![] };
        cfg.register_merges()?;
        cfg.compute_block_order();
        cfg.verify_header_continue_merge_order()?;
        Ok(cfg)
    }

    fn reporter(&self) -> Reporter {
        Reporter::new(self.func_id)
    }

    /// Only valid for IDs of blocks in this function, which are validated
    /// in [`FuncCfg::new`] for all branch targets, merges and continues.
    pub fn info(&self, id: spv::Id) -> &BlockInfo<'a> {
        &self.blocks[&id]
    }

    pub fn info_mut(&mut self, id: spv::Id) -> &mut BlockInfo<'a> {
        &mut self.blocks[&id]
    }

    /// Position in the block order (see [`FuncCfg::order`]), or `Pos::MAX`
    /// (i.e. "after everything") for blocks left out of the order.
    pub fn pos(&self, id: spv::Id) -> Pos {
        self.blocks.get(&id).and_then(|info| info.pos).unwrap_or(Pos::MAX)
    }

    pub fn edge_kind(&self, src: spv::Id, dest: spv::Id) -> Option<EdgeKind> {
        self.info(src).succ_edges.get(&dest).copied()
    }

    fn register_merges(&mut self) -> Result<()> {
        let wk = &spv::spec::Spec::get().well_known;

        let headers: SmallVec<[(spv::Id, &'a spv::Inst); 8]> = self
            .blocks
            .values()
            .filter_map(|info| Some((info.block.id, info.block.merge_inst()?)))
            .collect();

        for (header_id, merge_inst) in headers {
            let r = self.reporter().at_block(header_id).at_inst(merge_inst.opcode);
            let is_loop = merge_inst.opcode == wk.OpLoopMerge;

            let terminator = self.info(header_id).block.terminator().map(|inst| inst.opcode);
            let valid_terminators = if is_loop {
                [wk.OpBranch, wk.OpBranchConditional]
            } else {
                [wk.OpBranchConditional, wk.OpSwitch]
            };
            if !terminator.is_some_and(|opcode| valid_terminators.contains(&opcode)) {
                return Err(r.malformed(format!(
                    "{} must be followed by {} or {}",
                    merge_inst.opcode.name(),
                    valid_terminators[0].name(),
                    valid_terminators[1].name(),
                )));
            }

            let merge_id = *merge_inst.ids.first().ok_or_else(|| r.malformed("missing merge block"))?;
            if !self.blocks.contains_key(&merge_id) {
                return Err(r.malformed(format!("merge block %{merge_id} doesn't exist")));
            }
            if merge_id == header_id {
                return Err(r.malformed("a header can't be its own merge block"));
            }
            if let Some(other_header) = self.info(merge_id).header_for_merge {
                return Err(r.malformed(format!(
                    "block %{merge_id} is the merge block for more than one header \
                     (%{other_header} and %{header_id})"
                )));
            }
            self.info_mut(header_id).merge_for_header = Some(merge_id);
            self.info_mut(merge_id).header_for_merge = Some(header_id);

            if is_loop {
                let continue_id =
                    *merge_inst.ids.get(1).ok_or_else(|| r.malformed("missing continue target"))?;
                if !self.blocks.contains_key(&continue_id) {
                    return Err(r.malformed(format!("continue target %{continue_id} doesn't exist")));
                }
                if continue_id == merge_id {
                    return Err(r.malformed(format!(
                        "block %{merge_id} can't be both merge block and continue target"
                    )));
                }
                if let Some(other_header) = self.info(continue_id).header_for_continue {
                    return Err(r.malformed(format!(
                        "block %{continue_id} is the continue target for more than one header \
                         (%{other_header} and %{header_id})"
                    )));
                }
                self.info_mut(header_id).continue_for_header = Some(continue_id);
                let continue_info = self.info_mut(continue_id);
                continue_info.header_for_continue = Some(header_id);
                continue_info.is_continue_entire_loop = continue_id == header_id;
            }
        }
        Ok(())
    }

    /// Compute [`FuncCfg::order`] (and each block's `pos`), by reversing a
    /// post-order traversal, that visits (from every header) its merge block
    /// first, then its continue target, and finally its successors (in
    /// reverse), ensuring they all get placed before their merge in the end.
    ///
    /// The traversal keeps its own stack of partially visited blocks, so its
    /// depth is only bounded by the number of blocks.
    fn compute_block_order(&mut self) {
        struct Frame {
            id: spv::Id,
            targets: SmallVec<[spv::Id; 4]>,
            next: usize,
        }
        let frame = |cfg: &FuncCfg<'_>, id: spv::Id| {
            let info = cfg.info(id);
            let mut targets = SmallVec::new();
            if let Some(merge_id) = info.merge_for_header {
                targets.push(merge_id);
                targets.extend(info.continue_for_header);
            }
            targets.extend(info.block.successors().into_iter().rev());
            Frame { id, targets, next: 0 }
        };

        let mut visited = FxHashSet::default();
        let mut post_order = Vec::with_capacity(self.blocks.len());
        let mut stack = vec![];
        if let Some(&entry_id) = self.blocks.keys().next() {
            visited.insert(entry_id);
            stack.push(frame(self, entry_id));
        }
        while let Some(top) = stack.last_mut() {
            match top.targets.get(top.next).copied() {
                Some(target) => {
                    top.next += 1;
                    if self.blocks.contains_key(&target) && visited.insert(target) {
                        stack.push(frame(self, target));
                    }
                }
                None => {
                    post_order.push(top.id);
                    stack.pop();
                }
            }
        }

        post_order.reverse();
        for (pos, &id) in post_order.iter().enumerate() {
            self.info_mut(id).pos = Some(pos);
        }
        self.order = post_order;
    }

    fn verify_header_continue_merge_order(&self) -> Result<()> {
        for (header_pos, &header_id) in self.order.iter().enumerate() {
            let info = self.info(header_id);
            let Some(merge_id) = info.merge_for_header else {
                continue;
            };
            let r = self.reporter().at_block(header_id);

            let merge_pos = self.pos(merge_id);
            if merge_pos <= header_pos {
                return Err(r.malformed(format!(
                    "header %{header_id} doesn't strictly dominate its merge block %{merge_id}"
                )));
            }

            let Some(continue_id) = info.continue_for_header else {
                continue;
            };
            if continue_id == header_id {
                continue;
            }
            let continue_pos = self.pos(continue_id);
            if continue_pos <= header_pos {
                return Err(r.malformed(format!(
                    "loop header %{header_id} doesn't dominate its continue target %{continue_id}"
                )));
            }
            if merge_pos <= continue_pos {
                return Err(r.malformed(format!(
                    "merge block %{merge_id} for loop header %{header_id} \
                     should come after its continue target %{continue_id}"
                )));
            }
        }
        Ok(())
    }

    /// Record the heads of every `case`/`default` clause (with their values),
    /// and validate that each switch's targets stay inside its construct.
    pub fn find_switch_case_headers(&mut self, constructs: &ConstructList) -> Result<()> {
        let wk = &spv::spec::Spec::get().well_known;

        for (construct_idx, construct) in constructs.iter() {
            if construct.kind != ConstructKind::SwitchSelection {
                continue;
            }
            let header_id = construct.begin_id;
            let r = self.reporter().at_block(header_id).at_inst(wk.OpSwitch);

            let Some(switch) = self.info(header_id).block.terminator() else {
                return Err(r.internal("switch header lacks a terminator"));
            };
            let [_selector, default_id, ref case_targets @ ..] = switch.ids[..] else {
                return Err(r.malformed("missing selector or default target"));
            };
            let case_values = switch
                .imms
                .iter()
                .map(spv::Imm::as_u64)
                .collect::<Option<SmallVec<[u64; 4]>>>()
                .ok_or_else(|| r.malformed("non-numeric case literal"))?;
            if case_values.len() != case_targets.len() {
                return Err(r.malformed("mismatched case literals and targets"));
            }

            let check_target = |cfg: &FuncCfg<'_>, target_id: spv::Id| {
                let target_pos = cfg.pos(target_id);
                if target_pos <= construct.begin_pos {
                    return Err(r.malformed(format!(
                        "switch branches to itself, or to block %{target_id}, that precedes it"
                    )));
                }
                if target_pos > construct.end_pos {
                    return Err(r.malformed(format!(
                        "switch target %{target_id} escapes the selection construct"
                    )));
                }
                let target_info = cfg.info(target_id);
                if let Some(other_header) = target_info.header_for_merge {
                    if other_header != header_id {
                        return Err(r.malformed(format!(
                            "block %{target_id} is a switch target, but also the merge block \
                             for header %{other_header}"
                        )));
                    }
                }
                Ok(())
            };

            check_target(self, default_id)?;
            let default_info = self.info_mut(default_id);
            if default_info.default_head_for.is_some() {
                return Err(r.malformed(format!(
                    "block %{default_id} is the default target of more than one switch"
                )));
            }
            default_info.default_head_for = Some(construct_idx);
            default_info.default_is_merge = Some(default_id) == construct.end_id;

            let mut seen_values = FxHashSet::default();
            for (&value, &target_id) in case_values.iter().zip(case_targets) {
                if !seen_values.insert(value) {
                    return Err(r.malformed(format!("duplicate case value {value}")));
                }
                check_target(self, target_id)?;

                let target_info = self.info_mut(target_id);
                if target_info.case_head_for.is_some_and(|c| c != construct_idx) {
                    return Err(r.malformed(format!(
                        "block %{target_id} is a case target of more than one switch"
                    )));
                }
                target_info.case_head_for = Some(construct_idx);
                target_info.case_values.push(value);
            }
        }
        Ok(())
    }

    /// Classify every edge (see [`EdgeKind`]), rejecting those that don't fit
    /// in a structured control-flow form (e.g. jumping into the middle of a
    /// construct, or exiting one without going through its merge block).
    pub fn classify_edges(&mut self, constructs: &ConstructList) -> Result<()> {
        for src_pos in 0..self.order.len() {
            let src_id = self.order[src_pos];
            let r = self.reporter().at_block(src_id);

            let src_info = self.info(src_id);
            let src_construct_idx =
                src_info.construct.ok_or_else(|| r.internal("block lacks a construct"))?;
            let src_construct = &constructs[src_construct_idx];

            let mut successors = src_info.block.successors();
            {
                let mut seen = SmallVec::<[spv::Id; 4]>::new();
                successors.retain(|&mut id| {
                    let new = !seen.contains(&id);
                    seen.push(id);
                    new
                });
            }

            if successors.is_empty() {
                if let Some(continue_construct) = src_construct.enclosing_continue {
                    return Err(r.malformed(format!(
                        "function exit from continue construct starting at block %{}",
                        constructs[continue_construct].begin_id
                    )));
                }
            }

            let mut num_backedges = 0;
            let mut normal_forward_edges = SmallVec::<[spv::Id; 2]>::new();
            let mut if_break_edges = SmallVec::<[spv::Id; 2]>::new();
            let mut edges = FxIndexMap::default();

            for dest_id in successors {
                let dest_info = self.info(dest_id);
                let dest_pos = self.pos(dest_id);

                let kind = if src_pos >= dest_pos {
                    num_backedges += 1;

                    let Some(continue_construct) = src_construct.enclosing_continue else {
                        return Err(r.malformed(format!(
                            "back-edge to block %{dest_id} from outside a continue construct"
                        )));
                    };
                    let continue_construct = &constructs[continue_construct];
                    if src_pos + 1 != continue_construct.end_pos {
                        return Err(r.malformed(format!(
                            "back-edge to block %{dest_id} from a block that isn't the last \
                             in the continue construct starting at block %{}",
                            continue_construct.begin_id
                        )));
                    }
                    let expected_header = self.info(continue_construct.begin_id).header_for_continue;
                    if expected_header != Some(dest_id) {
                        return Err(r.malformed(format!(
                            "back-edge to block %{dest_id} doesn't target the loop header{}",
                            expected_header.map(|h| format!(" (%{h})")).unwrap_or_default()
                        )));
                    }

                    EdgeKind::Back
                } else {
                    if let Some(continue_construct) = src_construct.enclosing_continue {
                        let continue_construct = &constructs[continue_construct];
                        if continue_construct.contains_pos(src_pos)
                            && !continue_construct.contains_pos(dest_pos)
                            && src_pos + 1 != continue_construct.end_pos
                        {
                            return Err(r.malformed(format!(
                                "exit to block %{dest_id} from a block that isn't the last \
                                 in the continue construct starting at block %{}",
                                continue_construct.begin_id
                            )));
                        }
                    }

                    let breakable_header = constructs
                        .breakable_header(self, src_construct.enclosing_loop_or_continue_or_switch);
                    let loop_header = constructs.breakable_header(self, src_construct.enclosing_loop);
                    let switch_head_for = dest_info.case_head_for.or(dest_info.default_head_for);

                    let kind = if let Some(header_id) = breakable_header
                        .filter(|&h| self.info(h).merge_for_header == Some(dest_id))
                    {
                        if self.info(header_id).continue_for_header.is_some() {
                            EdgeKind::LoopBreak
                        } else {
                            EdgeKind::SwitchBreak
                        }
                    } else if loop_header
                        .is_some_and(|h| self.info(h).continue_for_header == Some(dest_id))
                    {
                        EdgeKind::LoopContinue
                    } else if self.info(src_construct.begin_id).merge_for_header == Some(dest_id) {
                        EdgeKind::IfBreak
                    } else if switch_head_for.is_some_and(|c| constructs[c].begin_id != src_id) {
                        EdgeKind::CaseFallThrough
                    } else {
                        EdgeKind::Forward
                    };

                    match kind {
                        EdgeKind::Forward | EdgeKind::CaseFallThrough => {
                            normal_forward_edges.push(dest_id);
                            self.check_forward_exit(constructs, src_id, dest_id, r)?;
                        }
                        EdgeKind::IfBreak => if_break_edges.push(dest_id),
                        _ => {}
                    }
                    kind
                };
                edges.insert(dest_id, kind);
            }

            if num_backedges > 1 {
                return Err(r.malformed(format!("block has {num_backedges} back-edges")));
            }
            let has_merge = self.info(src_id).merge_for_header.is_some();
            if !has_merge {
                if let [first, second, ..] = normal_forward_edges[..] {
                    return Err(r.malformed(format!(
                        "control flow diverges (to %{first} and %{second}) \
                         at a block that isn't a structured header"
                    )));
                }
                if !normal_forward_edges.is_empty() && !if_break_edges.is_empty() {
                    return Err(r.unsupported(format!(
                        "conditional early exit to merge block %{} (needs a guard variable)",
                        if_break_edges[0]
                    )));
                }
            }

            self.info_mut(src_id).succ_edges = edges;
        }
        Ok(())
    }

    /// Reject forward edges leaving the source construct (other than through
    /// its merge block), or entering a construct not through its header.
    fn check_forward_exit(
        &self,
        constructs: &ConstructList,
        src_id: spv::Id,
        dest_id: spv::Id,
        r: Reporter,
    ) -> Result<()> {
        let src_pos = self.pos(src_id);
        let dest_pos = self.pos(dest_id);
        let src_construct = self
            .info(src_id)
            .construct
            .map(|c| &constructs[c])
            .ok_or_else(|| r.internal("block lacks a construct"))?;

        if dest_pos > src_construct.end_pos {
            let mut bypassed = ("merge block", src_construct.end_id);
            if src_construct.kind == ConstructKind::Loop {
                let loop_merge = self.info(src_construct.begin_id).merge_for_header;
                if loop_merge.is_some_and(|merge| dest_pos < self.pos(merge)) {
                    bypassed.0 = "continue target";
                } else {
                    bypassed.1 = loop_merge;
                }
            }
            return Err(r.malformed(format!(
                "branch to block %{dest_id} exits the construct starting at block %{}, \
                 bypassing its {}{}",
                src_construct.begin_id,
                bypassed.0,
                bypassed.1.map(|id| format!(" %{id}")).unwrap_or_default(),
            )));
        }

        let dest_construct = self
            .info(dest_id)
            .construct
            .map(|c| &constructs[c])
            .ok_or_else(|| r.internal("block lacks a construct"))?;
        if dest_id != dest_construct.begin_id && !dest_construct.contains_pos(src_pos) {
            return Err(r.malformed(format!(
                "branch to block %{dest_id} bypasses header %{}",
                dest_construct.begin_id
            )));
        }
        Ok(())
    }

    /// Find, for every if-selection, the heads of its two clauses, and the
    /// "premerge" block (where the clauses rejoin, before the actual merge).
    pub fn find_if_selection_internal_headers(&mut self, constructs: &ConstructList) -> Result<()> {
        for (construct_idx, construct) in constructs.iter() {
            if construct.kind != ConstructKind::IfSelection {
                continue;
            }
            let header_id = construct.begin_id;
            let r = self.reporter().at_block(header_id);

            let Some(branch) = self.info(header_id).block.terminator() else {
                return Err(r.internal("if header lacks a terminator"));
            };
            let [_cond, true_id, false_id] = branch.ids[..] else {
                return Err(r.malformed("conditional branch needs a condition and two targets"));
            };
            let true_pos = self.pos(true_id);
            let false_pos = self.pos(false_id);
            let contains_true = construct.contains_pos(true_pos);
            let contains_false = construct.contains_pos(false_pos);

            for (contained, head_id, which) in
                [(contains_true, true_id, "true"), (contains_false, false_id, "false")]
            {
                if !contained {
                    continue;
                }
                if let Some(other_header) = self.info(head_id).header_for_merge {
                    if other_header != header_id {
                        return Err(r.malformed(format!(
                            "block %{head_id} is the {which} branch of an if-selection, \
                             but also the merge block for header %{other_header}"
                        )));
                    }
                }
            }

            let info = self.info_mut(header_id);
            info.true_head = contains_true.then_some(true_id);
            info.false_head = contains_false.then_some(false_id);

            if !(contains_true && contains_false) {
                continue;
            }

            // Both clauses start at the same block, which runs either way.
            if true_id == false_id {
                info.premerge_head = Some(true_id);
                continue;
            }

            let second_head_pos = true_pos.max(false_pos);
            let end_first_clause = self.order[second_head_pos - 1];
            let mut premerge_id = None;
            let mut if_break_id = None;
            for (&dest_id, &kind) in &self.info(end_first_clause).succ_edges {
                match kind {
                    EdgeKind::IfBreak => if_break_id = Some(dest_id),
                    EdgeKind::Forward if construct.contains_pos(self.pos(dest_id)) => {
                        if premerge_id.is_some() {
                            return Err(r.malformed(format!(
                                "block %{end_first_clause} has two forward edges \
                                 within the if-selection"
                            )));
                        }
                        if let Some(other_header) = self.info(dest_id).header_for_merge {
                            return Err(r.malformed(format!(
                                "block %{dest_id} is the merge block for header %{other_header}, \
                                 but is also reached from both clauses of the if-selection"
                            )));
                        }
                        premerge_id = Some(dest_id);
                    }
                    _ => {}
                }
            }
            if let (Some(if_break_id), Some(premerge_id)) = (if_break_id, premerge_id) {
                return Err(r.malformed(format!(
                    "block %{end_first_clause} branches both to the merge block %{if_break_id} \
                     and to block %{premerge_id}, later in the if-selection"
                )));
            }

            if let Some(premerge_id) = premerge_id {
                // The code from the premerge block onwards is emitted after the
                // `if`, so an early exit to the merge from either clause would
                // need a guard variable to skip it.
                let premerge_pos = self.pos(premerge_id);
                for pos in construct.begin_pos + 1..premerge_pos {
                    let id = self.order[pos];
                    let info = self.info(id);
                    let exits_early = info.construct == Some(construct_idx)
                        && info.succ_edges.values().any(|&kind| kind == EdgeKind::IfBreak);
                    if exits_early {
                        return Err(r.at_block(id).unsupported(format!(
                            "early exit to merge block, past premerge block %{premerge_id} \
                             (needs a guard variable)"
                        )));
                    }
                }
            }

            self.info_mut(header_id).premerge_head = premerge_id;
        }
        Ok(())
    }
}

/// Predecessors of every block in the block order, in block order (edges from
/// blocks outside the block order are ignored).
pub fn predecessors(cfg: &FuncCfg<'_>) -> FxHashMap<spv::Id, SmallVec<[spv::Id; 2]>> {
    let mut preds: FxHashMap<_, SmallVec<[_; 2]>> = FxHashMap::default();
    for &src_id in &cfg.order {
        for dest_id in cfg.info(src_id).block.successors() {
            let dest_preds = preds.entry(dest_id).or_default();
            if !dest_preds.contains(&src_id) {
                dest_preds.push(src_id);
            }
        }
    }
    preds
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, Module};
    use std::rc::Rc;

    const PRELUDE: &str = "
        OpCapability Shader
        OpMemoryModel Logical Simple
        OpEntryPoint Fragment %100 \"main\"
        %void = OpTypeVoid
        %voidfn = OpTypeFunction %void
        %bool = OpTypeBool
        %true = OpConstantTrue %bool
        %uint = OpTypeInt 32 0
        %uint_1 = OpConstant %uint 1
    ";

    fn lower(body: &str) -> Module {
        let src = format!("{PRELUDE}\n%100 = OpFunction %void None %voidfn\n{body}\nOpFunctionEnd");
        Module::lower_from_spv_asm(Rc::new(Context::new()), &src).unwrap()
    }

    fn ids(cfg: &FuncCfg<'_>) -> Vec<u32> {
        cfg.order.iter().map(|id| id.get()).collect()
    }

    #[test]
    fn block_order_places_merge_after_construct() {
        // Declaration order puts the merge block (99) first.
        let module = lower(
            "%10 = OpLabel
             OpSelectionMerge %99 None
             OpBranchConditional %true %30 %20
             %99 = OpLabel
             OpReturn
             %20 = OpLabel
             OpBranch %99
             %30 = OpLabel
             OpBranch %99",
        );
        let func = &module.funcs[0];
        let cfg = FuncCfg::new(spv::Id::new(100).unwrap(), func).unwrap();
        assert_eq!(ids(&cfg), [10, 30, 20, 99]);
    }

    #[test]
    fn long_straight_line_is_ordered_without_recursion() {
        // Block ids start after the function's own id (`%100`).
        const FIRST: u32 = 1000;
        const N: u32 = 100_000;
        let last = FIRST + N - 1;
        let mut body = String::new();
        for i in FIRST..last {
            body += &format!("%{i} = OpLabel\nOpBranch %{}\n", i + 1);
        }
        body += &format!("%{last} = OpLabel\nOpReturn");

        let module = lower(&body);
        let (cfg, constructs) = analyze(spv::Id::new(100).unwrap(), &module.funcs[0]).unwrap();
        assert_eq!(cfg.order.len(), N as usize);
        assert_eq!(ids(&cfg)[..3], [FIRST, FIRST + 1, FIRST + 2]);
        assert_eq!(ids(&cfg).last(), Some(&last));
        assert_eq!(constructs.len(), 1);
    }

    #[test]
    fn unreachable_blocks_are_left_out() {
        let module = lower(
            "%10 = OpLabel
             OpReturn
             %20 = OpLabel
             OpReturn",
        );
        let cfg = FuncCfg::new(spv::Id::new(100).unwrap(), &module.funcs[0]).unwrap();
        assert_eq!(ids(&cfg), [10]);
        assert_eq!(cfg.pos(spv::Id::new(20).unwrap()), Pos::MAX);
    }

    #[test]
    fn loop_edges_are_classified() {
        let module = lower(
            "%10 = OpLabel
             OpBranch %20
             %20 = OpLabel
             OpLoopMerge %99 %80 None
             OpBranchConditional %true %30 %99
             %30 = OpLabel
             OpBranch %80
             %80 = OpLabel
             OpBranch %20
             %99 = OpLabel
             OpReturn",
        );
        let (cfg, constructs) = analyze(spv::Id::new(100).unwrap(), &module.funcs[0]).unwrap();
        assert_eq!(ids(&cfg), [10, 20, 30, 80, 99]);

        let id = |x| spv::Id::new(x).unwrap();
        assert_eq!(cfg.edge_kind(id(20), id(99)), Some(EdgeKind::LoopBreak));
        assert_eq!(cfg.edge_kind(id(30), id(80)), Some(EdgeKind::LoopContinue));
        assert_eq!(cfg.edge_kind(id(80), id(20)), Some(EdgeKind::Back));

        let kinds: Vec<_> = constructs.iter().map(|(_, c)| c.kind).collect();
        assert_eq!(
            kinds,
            [ConstructKind::Function, ConstructKind::Continue, ConstructKind::Loop]
        );
    }

    #[test]
    fn rejects_shared_merge_block() {
        let module = lower(
            "%10 = OpLabel
             OpSelectionMerge %99 None
             OpBranchConditional %true %20 %99
             %20 = OpLabel
             OpSelectionMerge %99 None
             OpBranchConditional %true %30 %99
             %30 = OpLabel
             OpBranch %99
             %99 = OpLabel
             OpReturn",
        );
        let err = FuncCfg::new(spv::Id::new(100).unwrap(), &module.funcs[0]).err().unwrap();
        assert!(matches!(err, crate::Error::MalformedControlFlow { .. }), "{err}");
        assert!(err.message().contains("more than one header"), "{err}");
    }
}
