mod common;

use common::{lower, main_function, structurize_main, TRIVIAL_MAIN};
use pretty_assertions::assert_eq;
use spv_structurize::{print, Error, Options};

#[test]
fn if_else() {
    let wgsl = structurize_main(
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
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  let x_11 : i32 = g;
  if ((x_11 < 0i)) {
    g = 1i;
  } else {
    g = 10i;
  }
}
"
    );
}

#[test]
fn early_return_from_then_clause() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         %11 = OpLoad %int %g
         %12 = OpIEqual %bool %11 %int_0
         OpSelectionMerge %40 None
         OpBranchConditional %12 %20 %40
         %20 = OpLabel
         OpReturn
         %40 = OpLabel
         OpStore %g %int_1
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  let x_11 : i32 = g;
  if ((x_11 == 0i)) {
    return;
  }
  g = 1i;
}
"
    );
}

#[test]
fn switch_cases_share_targets() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         %11 = OpLoad %int %g
         OpSelectionMerge %90 None
         OpSwitch %11 %80 1 %20 2 %20 5 %30
         %20 = OpLabel
         OpStore %g %int_1
         OpBranch %90
         %30 = OpLabel
         OpStore %g %int_10
         OpBranch %90
         %80 = OpLabel
         OpStore %g %int_0
         OpBranch %90
         %90 = OpLabel
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  let x_11 : i32 = g;
  switch(x_11) {
    default: {
      g = 0i;
    }
    case 1i, 2i: {
      g = 1i;
    }
    case 5i: {
      g = 10i;
    }
  }
}
"
    );
}

#[test]
fn loop_with_break_and_continuing() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpBranch %20
         %20 = OpLabel
         %21 = OpLoad %int %g
         %22 = OpSGreaterThan %bool %21 %int_10
         OpLoopMerge %90 %30 None
         OpBranchConditional %22 %90 %25
         %25 = OpLabel
         OpStore %g %int_0
         OpBranch %30
         %30 = OpLabel
         OpStore %g %int_1
         OpBranch %20
         %90 = OpLabel
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  loop {
    let x_21 : i32 = g;
    if ((x_21 > 10i)) {
      break;
    }
    g = 0i;
    continuing {
      g = 1i;
    }
  }
}
"
    );
}

#[test]
fn case_fall_through_is_unsupported() {
    let err = structurize_main(
        "%10 = OpLabel
         %11 = OpLoad %int %g
         OpSelectionMerge %90 None
         OpSwitch %11 %90 1 %20 2 %30
         %20 = OpLabel
         OpStore %g %int_1
         OpBranch %30
         %30 = OpLabel
         OpStore %g %int_10
         OpBranch %90
         %90 = OpLabel
         OpReturn",
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnsupportedConstruct { .. }), "{err}");
}

#[test]
fn back_edge_outside_loop_is_malformed() {
    let err = structurize_main(
        "%10 = OpLabel
         OpBranch %20
         %20 = OpLabel
         OpBranch %10",
    )
    .unwrap_err();
    assert!(matches!(err, Error::MalformedControlFlow { .. }), "{err}");
    assert!(err.message().contains("back-edge"), "{err}");
}

#[test]
fn failures_are_reported_per_function() {
    let broken = "
        %60 = OpFunction %void None %voidfn
        %61 = OpLabel
        OpBranch %62
        %62 = OpLabel
        OpBranch %61
        OpFunctionEnd
    ";
    let module = lower(&format!("{TRIVIAL_MAIN}\n{broken}"));
    let results = module.structurize_all(&Options::default());
    assert_eq!(results.len(), 2);
    assert!(results[0].1.is_ok());
    assert!(results[1].1.is_err());

    let wgsl = print::module_to_wgsl(&results);
    assert!(wgsl.starts_with("@fragment\nfn main() {\n}\n\n// error: function %60"), "{wgsl}");
}

#[test]
fn trailing_return_can_be_kept() {
    let module = lower(&main_function(
        "%10 = OpLabel
         OpReturn",
    ));
    let options = Options { elide_trailing_return: false, ..Options::default() };
    let func = module.structurize_func(module.entry_points[0].func, &options).unwrap();
    assert_eq!(print::function_to_wgsl(&func), "@fragment\nfn main() {\n  return;\n}\n");
}

#[test]
fn continue_target_heading_nested_loop_with_selection() {
    let wgsl = structurize_main(
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
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  loop {
    g = 0i;
    continuing {
      loop {
        if (true) {
          g = 1i;
          continue;
        } else {
          g = 10i;
        }
      }
    }
  }
}
"
    );
}

#[test]
fn unreachable_becomes_empty_loop() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpSelectionMerge %40 None
         OpBranchConditional %true %20 %40
         %20 = OpLabel
         OpUnreachable
         %40 = OpLabel
         OpStore %g %int_1
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  if (true) {
    loop {
    }
  }
  g = 1i;
}
"
    );
}

#[test]
fn use_of_undefined_value_is_unresolved() {
    let err = structurize_main(
        "%10 = OpLabel
         %11 = OpIAdd %int %int_1 %99
         OpStore %g %11
         OpReturn",
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnresolvedValue { .. }), "{err}");
    assert!(err.message().contains("%99 is not defined"), "{err}");
    assert_eq!(err.context().block.map(|b| b.get()), Some(10));
}

#[test]
fn use_of_value_from_unreachable_block_is_unresolved() {
    let err = structurize_main(
        "%10 = OpLabel
         OpBranch %20
         %20 = OpLabel
         OpStore %g %31
         OpReturn
         %30 = OpLabel
         %31 = OpLoad %int %g
         OpReturn",
    )
    .unwrap_err();
    assert!(matches!(err, Error::UnresolvedValue { .. }), "{err}");
    assert!(err.message().contains("unreachable"), "{err}");
}
