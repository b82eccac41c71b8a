//! Structural properties checked over a set of structured functions.

mod common;

use common::{lower, main_function};
use spv_structurize::construct::ConstructList;
use spv_structurize::def_use::DefUse;
use spv_structurize::{cfg, print, Module, Options};

const FIXTURES: &[&str] = &[
    // `if` with both clauses.
    "%10 = OpLabel
     %11 = OpLoad %int %g
     %12 = OpSLessThan %bool %11 %int_0
     OpSelectionMerge %40 None
     OpBranchConditional %12 %20 %30
     %20 = OpLabel
     OpStore %g %int_1
     OpBranch %40
     %30 = OpLabel
     OpStore %g %int_10
     OpBranch %40
     %40 = OpLabel
     OpReturn",
    // `switch` nested in an `if`, with a value escaping the switch header.
    "%10 = OpLabel
     OpSelectionMerge %99 None
     OpBranchConditional %true %20 %99
     %20 = OpLabel
     %21 = OpLoad %int %g
     %22 = OpIAdd %int %21 %int_1
     OpSelectionMerge %50 None
     OpSwitch %21 %50 1 %30 2 %40
     %30 = OpLabel
     OpStore %g %int_0
     OpBranch %50
     %40 = OpLabel
     OpStore %g %int_10
     OpBranch %50
     %50 = OpLabel
     OpStore %g %22
     OpBranch %99
     %99 = OpLabel
     OpReturn",
    // Loop header value used after the loop.
    "%10 = OpLabel
     OpBranch %20
     %20 = OpLabel
     %21 = OpLoad %int %g
     %22 = OpSGreaterThan %bool %21 %int_10
     OpLoopMerge %90 %30 None
     OpBranchConditional %22 %90 %30
     %30 = OpLabel
     OpStore %g %int_1
     OpBranch %20
     %90 = OpLabel
     %91 = OpIAdd %int %21 %int_1
     OpStore %g %91
     OpReturn",
    // Continue target heading a nested loop.
    "%10 = OpLabel
     OpBranch %20
     %20 = OpLabel
     OpLoopMerge %99 %50 None
     OpBranch %30
     %30 = OpLabel
     OpStore %g %int_0
     OpBranch %50
     %50 = OpLabel
     OpLoopMerge %80 %70 None
     OpBranchConditional %true %60 %65
     %60 = OpLabel
     OpStore %g %int_1
     OpBranch %70
     %65 = OpLabel
     OpStore %g %int_10
     OpBranch %70
     %70 = OpLabel
     OpBranch %50
     %80 = OpLabel
     OpBranch %20
     %99 = OpLabel
     OpReturn",
    // Value from an `if` clause, used after the `if`.
    "%10 = OpLabel
     OpSelectionMerge %40 None
     OpBranchConditional %true %20 %30
     %20 = OpLabel
     %21 = OpLoad %int %g
     OpBranch %40
     %30 = OpLabel
     OpReturn
     %40 = OpLabel
     %41 = OpIAdd %int %21 %int_1
     OpStore %g %41
     OpReturn",
    // Value from a loop body, used in `continuing`, inside an `if`.
    "%10 = OpLabel
     OpSelectionMerge %99 None
     OpBranchConditional %true %20 %99
     %20 = OpLabel
     OpLoopMerge %90 %40 None
     OpBranch %30
     %30 = OpLabel
     %31 = OpLoad %int %g
     OpBranch %40
     %40 = OpLabel
     %41 = OpIAdd %int %31 %int_1
     OpStore %g %41
     OpBranchConditional %false %20 %90
     %90 = OpLabel
     OpBranch %99
     %99 = OpLabel
     OpReturn",
];

fn main_of(module: &Module) -> spv_structurize::spv::Id {
    module.entry_points[0].func
}

#[test]
fn constructs_form_a_forest() {
    for body in FIXTURES {
        let module = lower(&main_function(body));
        let func = &module.funcs[&main_of(&module)];
        let (_, constructs) = cfg::analyze(main_of(&module), func).unwrap();

        for (a, ca) in constructs.iter() {
            for (b, cb) in constructs.iter() {
                if a == b {
                    continue;
                }
                let disjoint = ca.end_pos <= cb.begin_pos || cb.end_pos <= ca.begin_pos;
                let relations = [constructs.encloses(a, b), constructs.encloses(b, a), disjoint];
                assert_eq!(
                    relations.iter().filter(|&&r| r).count(),
                    1,
                    "{a:?} and {b:?} in:\n{body}\n{constructs:?}"
                );
                if constructs.encloses(a, b) {
                    assert!(ca.begin_pos <= cb.begin_pos && cb.end_pos <= ca.end_pos, "{a:?} {b:?}");
                }
            }
        }
    }
}

#[test]
fn hoisted_values_go_to_innermost_covering_scope() {
    let mut hoisted = 0;
    for body in FIXTURES {
        let module = lower(&main_function(body));
        let func = &module.funcs[&main_of(&module)];
        let (cfg, constructs) = cfg::analyze(main_of(&module), func).unwrap();
        let def_use = DefUse::analyze(&module, func, &cfg, &constructs).unwrap();

        for (id, def) in &def_use.defs {
            let Some(target) = def.hoisted_to else {
                continue;
            };
            hoisted += 1;
            let first = def.first_use_pos.map_or(def.block_pos, |p| p.min(def.block_pos));
            let last = def.last_use_pos.unwrap();
            let covers = |c: &spv_structurize::construct::Construct| {
                c.scope_contains_pos(first) && c.scope_contains_pos(last)
            };

            assert!(covers(&constructs[target]), "%{id} in:\n{body}");
            for (other, c) in constructs.iter() {
                if other != target && constructs.encloses(target, other) {
                    assert!(!covers(c), "%{id} could be declared in {other:?}, in:\n{body}");
                }
            }
        }
    }
    assert!(hoisted >= 2);
}

#[test]
fn analysis_and_output_are_deterministic() {
    for body in FIXTURES {
        let module = lower(&main_function(body));
        let func = &module.funcs[&main_of(&module)];
        let (first, _) = cfg::analyze(main_of(&module), func).unwrap();
        let (second, _) = cfg::analyze(main_of(&module), func).unwrap();
        assert_eq!(first.order, second.order);

        let render = |module: &Module| {
            let func = module.structurize_func(main_of(module), &Options::default()).unwrap();
            print::function_to_wgsl(&func)
        };
        let relowered = lower(&main_function(body));
        assert_eq!(render(&module), render(&module));
        assert_eq!(render(&module), render(&relowered));
    }
}

#[test]
fn function_construct_is_the_root() {
    for body in FIXTURES {
        let module = lower(&main_function(body));
        let func = &module.funcs[&main_of(&module)];
        let (_, constructs) = cfg::analyze(main_of(&module), func).unwrap();
        for (idx, _) in constructs.iter() {
            assert!(constructs.encloses(ConstructList::FUNCTION, idx));
        }
    }
}
