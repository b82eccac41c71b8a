//! `OpPhi` lowering, as state variables assigned on every incoming edge.
//!
//! All the `OpPhi`s of a block form a group, which must be assigned as if
//! simultaneously: on the back-edge of a loop, `%a = OpPhi .. %b` and
//! `%b = OpPhi .. %a` swap values, so every `OpPhi` read by the copies (or
//! by the branch after them) is first snapshotted into a `let`.

use crate::cfg::FuncCfg;
use crate::def_use::DefUse;
use crate::spv;
use smallvec::SmallVec;

/// One `phi_id = value_id` copy, on the edge from the block it's keyed by
/// (see [`DefUse::phi_assignments`]), to `succ`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PhiAssignment {
    pub phi_id: spv::Id,
    pub value_id: spv::Id,
    pub succ: spv::Id,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Source<V> {
    /// The current value of `V` (which isn't written by the same group).
    Value(V),

    /// The value `V` had before any of the copies.
    Snapshot(V),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyOp<V> {
    /// Save the current value of `V`, for later use through [`Source::Snapshot`].
    Snapshot(V),

    Assign { target: V, source: Source<V> },
}

/// Turn the parallel copies `target <- source` (with unique targets) into
/// a sequence of operations with the same effect, snapshotting (all at the
/// start) every target that's also read, by a copy or through `extra_reads`.
pub fn sequentialize<V: Copy + PartialEq>(copies: &[(V, V)], extra_reads: &[V]) -> Vec<CopyOp<V>> {
    let is_read =
        |v: &V| copies.iter().any(|(_, source)| source == v) || extra_reads.contains(v);

    let snapshotted: SmallVec<[V; 4]> =
        copies.iter().map(|&(target, _)| target).filter(|v| is_read(v)).collect();

    let mut ops: Vec<_> = snapshotted.iter().map(|&v| CopyOp::Snapshot(v)).collect();
    for &(target, source) in copies {
        let source = if snapshotted.contains(&source) {
            Source::Snapshot(source)
        } else {
            Source::Value(source)
        };
        ops.push(CopyOp::Assign { target, source });
    }
    ops
}

/// The copies to perform at the end of `pred_id` (of `OpPhi`s that are used,
/// in definition order), optionally limited to those on the edge to `succ`.
pub fn copies_at(
    def_use: &DefUse<'_>,
    pred_id: spv::Id,
    succ: Option<spv::Id>,
) -> SmallVec<[(spv::Id, spv::Id); 4]> {
    let Some(assignments) = def_use.phi_assignments.get(&pred_id) else {
        return SmallVec::new();
    };
    let mut copies: SmallVec<[_; 4]> = assignments
        .iter()
        .filter(|a| succ.map_or(true, |succ| a.succ == succ))
        .filter(|a| def_use.defs.get(&a.phi_id).is_some_and(|phi| phi.num_uses > 0))
        .map(|a| (a.phi_id, a.value_id))
        .collect();

    // `phi_assignments` follow block order, sort them by `OpPhi` instead.
    copies.sort_by_key(|&(phi_id, _)| def_use.defs.get(&phi_id).map(|phi| phi.index));
    copies
}

/// Whether the copies at the end of `pred_id` must be split between the two
/// arms of its conditional branch, instead of happening before the branch.
///
/// That's only needed when some assigned `OpPhi` is also read later (in block
/// order) than `pred_id`, e.g. on a loop's back-edge, for an `OpPhi` in the
/// loop header that's also used after the loop, which the exiting edge would
/// otherwise see clobbered.
pub fn split_per_edge(cfg: &FuncCfg<'_>, def_use: &DefUse<'_>, pred_id: spv::Id) -> bool {
    let wk = &spv::spec::Spec::get().well_known;

    let info = cfg.info(pred_id);
    let Some(pred_pos) = info.pos else {
        return false;
    };
    let has_distinct_targets = info.block.terminator().is_some_and(|inst| {
        inst.opcode == wk.OpBranchConditional && inst.ids.get(1) != inst.ids.get(2)
    });
    if !has_distinct_targets {
        return false;
    }
    copies_at(def_use, pred_id, None).iter().any(|&(phi_id, _)| {
        def_use
            .defs
            .get(&phi_id)
            .and_then(|phi| phi.last_use_pos)
            .is_some_and(|last_use_pos| last_use_pos > pred_pos)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Execute `ops` on `state` (a tiny machine with named registers).
    fn run(ops: &[CopyOp<char>], state: &mut Vec<(char, i32)>) {
        let mut snapshots = vec![];
        let get = |state: &Vec<(char, i32)>, v| state.iter().find(|&&(k, _)| k == v).unwrap().1;
        for op in ops {
            match *op {
                CopyOp::Snapshot(v) => snapshots.push((v, get(state, v))),
                CopyOp::Assign { target, source } => {
                    let value = match source {
                        Source::Value(v) => get(state, v),
                        Source::Snapshot(v) => snapshots.iter().find(|&&(k, _)| k == v).unwrap().1,
                    };
                    state.iter_mut().find(|(k, _)| *k == target).unwrap().1 = value;
                }
            }
        }
    }

    #[test]
    fn swap_reads_before_writes() {
        let ops = sequentialize(&[('a', 'b'), ('b', 'a')], &[]);
        assert_eq!(
            ops,
            [
                CopyOp::Snapshot('a'),
                CopyOp::Snapshot('b'),
                CopyOp::Assign { target: 'a', source: Source::Snapshot('b') },
                CopyOp::Assign { target: 'b', source: Source::Snapshot('a') },
            ]
        );

        let mut state = vec![('a', 1), ('b', 2)];
        run(&ops, &mut state);
        assert_eq!(state, [('a', 2), ('b', 1)]);
    }

    #[test]
    fn rotation_and_independent_copies() {
        // a <- b <- c <- a, plus d <- x (no snapshot needed for either side).
        let copies = [('a', 'b'), ('b', 'c'), ('c', 'a'), ('d', 'x')];
        let ops = sequentialize(&copies, &[]);
        assert!(!ops.contains(&CopyOp::Snapshot('d')));
        assert!(!ops.contains(&CopyOp::Snapshot('x')));

        let mut state = vec![('a', 1), ('b', 2), ('c', 3), ('d', 4), ('x', 5)];
        run(&ops, &mut state);
        assert_eq!(state, [('a', 2), ('b', 3), ('c', 1), ('d', 5), ('x', 5)]);
    }

    #[test]
    fn extra_reads_are_snapshotted() {
        let ops = sequentialize(&[('a', 'x')], &['a']);
        assert_eq!(
            ops,
            [CopyOp::Snapshot('a'), CopyOp::Assign { target: 'a', source: Source::Value('x') }]
        );
    }
}
