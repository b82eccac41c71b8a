mod common;

use common::{main_function, PRELUDE};
use spv_structurize::{print, spv, Context, Module, Options};
use std::rc::Rc;

const BODY: &str = "%10 = OpLabel
     %11 = OpLoad %int %g
     %12 = OpSLessThan %bool %11 %int_0
     OpSelectionMerge %40 None
     OpBranchConditional %12 %20 %40
     %20 = OpLabel
     OpStore %g %int_1
     OpBranch %40
     %40 = OpLabel
     OpReturn";

fn render(module: &Module) -> String {
    print::module_to_wgsl(&module.structurize_all(&Options::default()))
}

fn words() -> Vec<u32> {
    spv::asm::assemble(&format!("{PRELUDE}\n{}", main_function(BODY))).unwrap()
}

#[test]
fn binary_matches_assembly() {
    let from_asm = Module::lower_from_spv_asm(
        Rc::new(Context::new()),
        &format!("{PRELUDE}\n{}", main_function(BODY)),
    )
    .unwrap();

    let native = words().iter().flat_map(|w| w.to_ne_bytes()).collect::<Vec<u8>>();
    let swapped = words().iter().flat_map(|w| w.swap_bytes().to_ne_bytes()).collect::<Vec<u8>>();
    for bytes in [native, swapped] {
        let from_binary = Module::lower_from_spv_bytes(Rc::new(Context::new()), &bytes).unwrap();
        assert_eq!(render(&from_binary), render(&from_asm));
    }
}

#[test]
fn bad_magic_is_rejected() {
    let mut words = words();
    words[0] = 0x1234_5678;
    let bytes = words.iter().flat_map(|w| w.to_ne_bytes()).collect::<Vec<u8>>();
    assert!(Module::lower_from_spv_bytes(Rc::new(Context::new()), &bytes).is_err());
}

#[test]
fn truncated_input_is_rejected() {
    assert!(Module::lower_from_spv_bytes(Rc::new(Context::new()), &[0x03, 0x02, 0x23]).is_err());
    assert!(Module::lower_from_spv_bytes(Rc::new(Context::new()), &[0; 8]).is_err());
}
