//! Constructs: the nested regions of structured control-flow.
//!
//! Every construct spans a contiguous range of the block order (see
//! [`crate::cfg::FuncCfg::order`]), starting at its header and ending (exclusively)
//! at its merge block (or, for loops, at the continue target). Constructs are
//! kept in an arena ([`ConstructList`]), and refer to each other by index.

use crate::cfg::{FuncCfg, Pos};
use crate::error::{Reporter, Result};
use crate::spv;
use smallvec::SmallVec;
use std::fmt;

#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConstructIdx(u32);

impl fmt::Debug for ConstructIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "construct#{}", self.0)
    }
}

impl ConstructIdx {
    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ConstructKind {
    /// The whole function body (always the first construct).
    Function,

    /// From an `OpBranchConditional` header, up to its merge block.
    IfSelection,

    /// From an `OpSwitch` header, up to its merge block.
    SwitchSelection,

    /// From a loop header, up to (but excluding) its continue target.
    Loop,

    /// From a continue target, up to the merge block of its loop.
    ///
    /// For single-block loops (the header is its own continue target), this
    /// is the only construct for the whole loop.
    Continue,
}

#[derive(Clone, Debug)]
pub struct Construct {
    pub kind: ConstructKind,

    /// The nearest enclosing construct (`None` only for the function).
    ///
    /// NOTE a `Loop` and its `Continue` are siblings, i.e. the `Loop`'s parent
    /// is not the `Continue`, even if it's pushed after it.
    pub parent: Option<ConstructIdx>,
    pub depth: usize,

    pub begin_id: spv::Id,

    /// The block just after the construct (`None` only for the function).
    pub end_id: Option<spv::Id>,

    pub begin_pos: Pos,
    pub end_pos: Pos,

    /// Where the construct's lexical scope (in the output) ends, which can
    /// be later than `end_pos` only for a `Loop`, whose scope also covers its
    /// `Continue` construct (i.e. `continuing` can see the loop body).
    pub scope_end_pos: Pos,

    pub enclosing_loop: Option<ConstructIdx>,
    pub enclosing_continue: Option<ConstructIdx>,
    pub enclosing_loop_or_continue_or_switch: Option<ConstructIdx>,
}

impl Construct {
    pub fn contains_pos(&self, pos: Pos) -> bool {
        self.begin_pos <= pos && pos < self.end_pos
    }

    pub fn scope_contains_pos(&self, pos: Pos) -> bool {
        self.begin_pos <= pos && pos < self.scope_end_pos
    }
}

/// All the constructs of a function, with parents always before children.
pub struct ConstructList {
    constructs: Vec<Construct>,
}

impl std::ops::Index<ConstructIdx> for ConstructList {
    type Output = Construct;

    fn index(&self, idx: ConstructIdx) -> &Construct {
        &self.constructs[idx.index()]
    }
}

impl ConstructList {
    pub const FUNCTION: ConstructIdx = ConstructIdx(0);

    pub fn len(&self) -> usize {
        self.constructs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.constructs.is_empty()
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = (ConstructIdx, &Construct)> + '_ {
        self.constructs.iter().enumerate().map(|(i, c)| (ConstructIdx(i as u32), c))
    }

    /// Scan the block order once, opening constructs at their headers, and
    /// closing them when reaching their end block, and record the innermost
    /// construct of each block (in [`crate::cfg::BlockInfo::construct`]).
    pub fn label(cfg: &mut FuncCfg<'_>, r: Reporter) -> Result<Self> {
        let wk = &spv::spec::Spec::get().well_known;

        let mut list = ConstructList { constructs: vec![] };

        let Some(&entry_id) = cfg.order.first() else {
            return Err(r.malformed("function has no blocks"));
        };
        let order_len = cfg.order.len();

        let mut enclosing = SmallVec::<[ConstructIdx; 8]>::new();
        list.push(cfg, &mut enclosing, 0, ConstructKind::Function, entry_id, None);

        for pos in 0..order_len {
            let block_id = cfg.order[pos];
            let r = r.at_block(block_id);

            // Close off constructs ending here.
            let mut top = *enclosing.last().ok_or_else(|| {
                r.malformed(format!("too many merge blocks before block %{block_id}"))
            })?;
            while list[top].end_id == Some(block_id) {
                enclosing.pop();
                top = *enclosing.last().ok_or_else(|| {
                    r.malformed(format!("too many merge blocks before block %{block_id}"))
                })?;
            }

            let info = cfg.info(block_id);
            if let Some(merge_id) = info.merge_for_header {
                let depth = list[top].depth + 1;
                if let Some(continue_id) = info.continue_for_header {
                    // The continue construct is after the loop construct in
                    // the block order, but is pushed first, so that the loop
                    // construct ends up at the top of the stack.
                    top = list.push(
                        cfg,
                        &mut enclosing,
                        depth,
                        ConstructKind::Continue,
                        continue_id,
                        Some(merge_id),
                    );

                    // A loop header that is its own continue target has an
                    // empty loop construct, so none is created.
                    if continue_id != block_id {
                        top = list.push(
                            cfg,
                            &mut enclosing,
                            depth,
                            ConstructKind::Loop,
                            block_id,
                            Some(continue_id),
                        );

                        // If the loop header branches to two different blocks
                        // inside the loop, that's an if-selection in disguise,
                        // spanning the same blocks as the loop construct.
                        let targets = cfg.info(block_id).block.successors();
                        if let [true_id, false_id] = targets[..] {
                            if true_id != false_id
                                && list[top].contains_pos(cfg.pos(true_id))
                                && list[top].contains_pos(cfg.pos(false_id))
                            {
                                top = list.push(
                                    cfg,
                                    &mut enclosing,
                                    depth + 1,
                                    ConstructKind::IfSelection,
                                    block_id,
                                    Some(continue_id),
                                );
                            }
                        }
                    }
                } else {
                    let is_if = cfg
                        .info(block_id)
                        .block
                        .terminator()
                        .is_some_and(|inst| inst.opcode == wk.OpBranchConditional);
                    let kind = if is_if {
                        ConstructKind::IfSelection
                    } else {
                        ConstructKind::SwitchSelection
                    };
                    top = list.push(cfg, &mut enclosing, depth, kind, block_id, Some(merge_id));
                }
            }

            cfg.info_mut(block_id).construct = Some(top);
        }

        // Only the function construct should remain.
        if enclosing.len() != 1 {
            return Err(r.malformed(format!(
                "construct headed by block %{} is never closed",
                enclosing.last().map_or(entry_id, |&c| list[c].begin_id)
            )));
        }

        Ok(list)
    }

    fn push(
        &mut self,
        cfg: &FuncCfg<'_>,
        enclosing: &mut SmallVec<[ConstructIdx; 8]>,
        depth: usize,
        kind: ConstructKind,
        begin_id: spv::Id,
        end_id: Option<spv::Id>,
    ) -> ConstructIdx {
        let idx = ConstructIdx(self.constructs.len() as u32);

        let begin_pos = cfg.pos(begin_id);
        let end_pos = end_id.map_or(cfg.order.len(), |end_id| cfg.pos(end_id));

        let mut parent = enclosing.last().copied();
        let mut scope_end_pos = end_pos;

        // A loop construct is pushed right after its continue construct, but
        // they're siblings (and the loop's scope includes the continue).
        if kind == ConstructKind::Loop {
            if let Some(continue_construct) = parent.map(|p| &self[p]) {
                scope_end_pos = continue_construct.end_pos;
                parent = continue_construct.parent;
            }
        }

        // Comparing depths, because a loop and its continue construct are
        // siblings, and it's incidental which is found on the stack first.
        let inherit = |get: fn(&Construct) -> Option<ConstructIdx>| {
            parent.map(|p| &self[p]).filter(|p| p.depth < depth).and_then(get)
        };
        let enclosing_loop = match kind {
            ConstructKind::Loop => Some(idx),
            _ => inherit(|c| c.enclosing_loop),
        };
        let enclosing_continue = match kind {
            ConstructKind::Continue => Some(idx),
            _ => inherit(|c| c.enclosing_continue),
        };
        let enclosing_loop_or_continue_or_switch = match kind {
            ConstructKind::Loop | ConstructKind::Continue | ConstructKind::SwitchSelection => {
                Some(idx)
            }
            _ => inherit(|c| c.enclosing_loop_or_continue_or_switch),
        };

        self.constructs.push(Construct {
            kind,
            parent,
            depth,
            begin_id,
            end_id,
            begin_pos,
            end_pos,
            scope_end_pos,
            enclosing_loop,
            enclosing_continue,
            enclosing_loop_or_continue_or_switch,
        });
        enclosing.push(idx);
        idx
    }

    /// Whether `outer` is `inner`, or one of its ancestors.
    pub fn encloses(&self, outer: ConstructIdx, inner: ConstructIdx) -> bool {
        let mut c = Some(inner);
        while let Some(idx) = c {
            if idx == outer {
                return true;
            }
            c = self[idx].parent;
        }
        false
    }

    /// The innermost construct whose lexical scope covers both the block at
    /// `first_pos` and the one at `last_pos` (`first_pos <= last_pos`).
    ///
    /// Starts from the construct of the block at `first_pos`, and walks up,
    /// except that a `Continue` construct is followed by its sibling `Loop`
    /// (whose scope covers the `Continue`).
    pub fn enclosing_scope(&self, cfg: &FuncCfg<'_>, first_pos: Pos, last_pos: Pos) -> ConstructIdx {
        let mut c = cfg.order.get(first_pos).and_then(|&id| cfg.info(id).construct);
        while let Some(idx) = c {
            if self[idx].scope_contains_pos(last_pos) {
                return idx;
            }
            c = self.sibling_loop(cfg, idx).or(self[idx].parent);
        }
        Self::FUNCTION
    }

    /// The `Loop` construct associated with a `Continue` construct, if any
    /// (a single-block loop only has the `Continue` construct).
    pub fn sibling_loop(&self, cfg: &FuncCfg<'_>, c: ConstructIdx) -> Option<ConstructIdx> {
        if self[c].kind != ConstructKind::Continue {
            return None;
        }
        let continue_id = self[c].begin_id;
        let header_id = cfg.info(continue_id).header_for_continue?;
        if header_id == continue_id {
            return None;
        }
        let mut candidate = cfg.info(header_id).construct;
        while let Some(idx) = candidate {
            if self[idx].kind == ConstructKind::Loop {
                return Some(idx);
            }
            candidate = self[idx].parent;
        }
        None
    }

    /// The loop/switch header a `break` out of `c` would refer to (for a
    /// `Continue` construct, that's its loop's header).
    pub fn breakable_header(&self, cfg: &FuncCfg<'_>, c: Option<ConstructIdx>) -> Option<spv::Id> {
        let c = &self[c?];
        match c.kind {
            ConstructKind::Loop | ConstructKind::SwitchSelection => Some(c.begin_id),
            ConstructKind::Continue => cfg.info(c.begin_id).header_for_continue,
            ConstructKind::Function | ConstructKind::IfSelection => None,
        }
    }
}

impl fmt::Debug for ConstructList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.constructs.iter()).finish()
    }
}
