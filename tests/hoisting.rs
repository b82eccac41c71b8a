mod common;

use common::structurize_main;
use pretty_assertions::assert_eq;

#[test]
fn value_from_loop_header_used_after_loop() {
    let wgsl = structurize_main(
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
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  var x_21 : i32;
  loop {
    x_21 = g;
    if ((x_21 > 10i)) {
      break;
    }
    continuing {
      g = 1i;
    }
  }
  g = (x_21 + 1i);
}
"
    );
}

#[test]
fn value_used_in_both_clauses_stays_a_let() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         %11 = OpLoad %int %g
         %12 = OpIAdd %int %11 %int_1
         OpSelectionMerge %40 None
         OpBranchConditional %true %20 %30
         %20 = OpLabel
         OpStore %g %12
         OpBranch %40
         %30 = OpLabel
         %31 = OpIMul %int %12 %12
         OpStore %g %31
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
  let x_12 : i32 = (x_11 + 1i);
  if (true) {
    g = x_12;
  } else {
    g = (x_12 * x_12);
  }
}
"
    );
}

#[test]
fn value_from_nested_if_header_stays_in_outer_if() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpSelectionMerge %99 None
         OpBranchConditional %true %20 %99
         %20 = OpLabel
         %21 = OpLoad %int %g
         %22 = OpIAdd %int %21 %int_1
         OpSelectionMerge %50 None
         OpBranchConditional %true %30 %50
         %30 = OpLabel
         OpStore %g %int_0
         OpBranch %50
         %50 = OpLabel
         OpStore %g %22
         OpBranch %99
         %99 = OpLabel
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  if (true) {
    let x_21 : i32 = g;
    let x_22 : i32 = (x_21 + 1i);
    if (true) {
      g = 0i;
    }
    g = x_22;
  }
}
"
    );
}

#[test]
fn value_from_switch_header_stays_in_outer_if() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpSelectionMerge %99 None
         OpBranchConditional %true %20 %99
         %20 = OpLabel
         %21 = OpLoad %int %g
         %22 = OpIAdd %int %21 %int_1
         OpSelectionMerge %50 None
         OpSwitch %21 %50 1 %30
         %30 = OpLabel
         OpStore %g %int_0
         OpBranch %50
         %50 = OpLabel
         OpStore %g %22
         OpBranch %99
         %99 = OpLabel
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  if (true) {
    let x_21 : i32 = g;
    let x_22 : i32 = (x_21 + 1i);
    switch(x_21) {
      case 1i: {
        g = 0i;
      }
      default: {
      }
    }
    g = x_22;
  }
}
"
    );
}

#[test]
fn value_from_clause_is_hoisted_when_other_clause_returns() {
    let wgsl = structurize_main(
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
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  var x_21 : i32;
  if (true) {
    x_21 = g;
  } else {
    return;
  }
  g = (x_21 + 1i);
}
"
    );
}
