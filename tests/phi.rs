mod common;

use common::structurize_main;
use pretty_assertions::assert_eq;

#[test]
fn loop_counter() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpBranch %20
         %20 = OpLabel
         %21 = OpPhi %int %int_0 %10 %31 %30
         %22 = OpSLessThan %bool %21 %int_10
         OpLoopMerge %90 %30 None
         OpBranchConditional %22 %25 %90
         %25 = OpLabel
         OpStore %g %21
         OpBranch %30
         %30 = OpLabel
         %31 = OpIAdd %int %21 %int_1
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
  var x_21 : i32;
  x_21 = 0i;
  loop {
    if ((x_21 < 10i)) {
    } else {
      break;
    }
    g = x_21;
    continuing {
      let x_31 : i32 = (x_21 + 1i);
      x_21 = x_31;
    }
  }
}
"
    );
}

#[test]
fn swapped_phis_read_snapshots() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpBranch %20
         %20 = OpLabel
         %21 = OpPhi %int %int_0 %10 %22 %30
         %22 = OpPhi %int %int_1 %10 %21 %30
         %23 = OpSLessThan %bool %21 %int_10
         OpLoopMerge %90 %30 None
         OpBranchConditional %23 %30 %90
         %30 = OpLabel
         OpBranch %20
         %90 = OpLabel
         OpStore %g %22
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  var x_21 : i32;
  var x_22 : i32;
  x_21 = 0i;
  x_22 = 1i;
  loop {
    if ((x_21 < 10i)) {
    } else {
      break;
    }
    continuing {
      let x_21_c30 = x_21;
      let x_22_c30 = x_22;
      x_21 = x_22_c30;
      x_22 = x_21_c30;
    }
  }
  g = x_22;
}
"
    );
}

#[test]
fn copies_split_across_conditional_back_edge() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpBranch %20
         %20 = OpLabel
         %21 = OpPhi %int %int_0 %10 %31 %30
         OpLoopMerge %90 %30 None
         OpBranch %30
         %30 = OpLabel
         %31 = OpIAdd %int %21 %int_1
         %32 = OpSLessThan %bool %31 %int_10
         OpBranchConditional %32 %20 %90
         %90 = OpLabel
         OpStore %g %21
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  var x_21 : i32;
  x_21 = 0i;
  loop {
    continuing {
      let x_31 : i32 = (x_21 + 1i);
      let x_32 : bool = (x_31 < 10i);
      if (x_32) {
        x_21 = x_31;
      } else {
        break;
      }
    }
  }
  g = x_21;
}
"
    );
}

#[test]
fn unused_phi_gets_no_variable() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpSelectionMerge %40 None
         OpBranchConditional %true %20 %40
         %20 = OpLabel
         OpStore %g %int_1
         OpBranch %40
         %40 = OpLabel
         %41 = OpPhi %int %int_0 %10 %int_1 %20
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  if (true) {
    g = 1i;
  }
}
"
    );
}

#[test]
fn single_block_loop_swaps_simultaneously() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         OpBranch %20
         %20 = OpLabel
         %101 = OpPhi %bool %true %10 %102 %20
         %102 = OpPhi %bool %false %10 %101 %20
         OpLoopMerge %99 %20 None
         OpBranchConditional %true %99 %20
         %99 = OpLabel
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  var x_101 : bool;
  var x_102 : bool;
  x_101 = true;
  x_102 = false;
  loop {
    let x_101_c20 = x_101;
    let x_102_c20 = x_102;
    x_101 = x_102_c20;
    x_102 = x_101_c20;
    if (true) {
      break;
    }
  }
}
"
    );
}
