#![allow(dead_code)]

use spv_structurize::{print, Context, Module, Options};
use std::rc::Rc;

/// Module-level declarations shared by all tests, with the `%main` entry-point
/// function left to each test (see [`structurize_main`]).
pub const PRELUDE: &str = r#"
    OpCapability Shader
    %glsl = OpExtInstImport "GLSL.std.450"
    OpMemoryModel Logical GLSL450
    OpEntryPoint Fragment %main "main"
    OpExecutionMode %main OriginUpperLeft
    OpName %main "main"
    OpName %g "g"
    OpName %Light "Light"
    OpMemberName %Light 0 "color"
    %void = OpTypeVoid
    %voidfn = OpTypeFunction %void
    %bool = OpTypeBool
    %true = OpConstantTrue %bool
    %false = OpConstantFalse %bool
    %int = OpTypeInt 32 1
    %uint = OpTypeInt 32 0
    %float = OpTypeFloat 32
    %v4float = OpTypeVector %float 4
    %int_0 = OpConstant %int 0
    %int_1 = OpConstant %int 1
    %int_10 = OpConstant %int 10
    %uint_0 = OpConstant %uint 0
    %uint_1 = OpConstant %uint 1
    %float_1 = OpConstant %float 1
    %float_2 = OpConstant %float 2
    %int_int_fn = OpTypeFunction %int %int %int
    %Light = OpTypeStruct %v4float %int
    %ptr_Function_Light = OpTypePointer Function %Light
    %ptr_Function_float = OpTypePointer Function %float
    %ptr_Private_int = OpTypePointer Private %int
    %g = OpVariable %ptr_Private_int Private
"#;

/// A trivial `%main`, for tests focusing on other functions.
pub const TRIVIAL_MAIN: &str = "
    %main = OpFunction %void None %voidfn
    %5 = OpLabel
    OpReturn
    OpFunctionEnd
";

pub fn lower(funcs: &str) -> Module {
    Module::lower_from_spv_asm(Rc::new(Context::new()), &format!("{PRELUDE}\n{funcs}")).unwrap()
}

pub fn main_function(body: &str) -> String {
    format!("%main = OpFunction %void None %voidfn\n{body}\nOpFunctionEnd")
}

/// Structurize `%main` (with `body` as its blocks), and render it.
pub fn structurize_main(body: &str) -> Result<String, spv_structurize::Error> {
    let module = lower(&main_function(body));
    let main_id = module.entry_points[0].func;
    let func = module.structurize_func(main_id, &Options::default())?;
    Ok(print::function_to_wgsl(&func))
}

/// Structurize the function `%func_id` from `funcs` (which must also define `%main`).
pub fn structurize(funcs: &str, func_id: u32) -> Result<String, spv_structurize::Error> {
    let module = lower(funcs);
    let func_id = spv_structurize::spv::Id::new(func_id).unwrap();
    let func = module.structurize_func(func_id, &Options::default())?;
    Ok(print::function_to_wgsl(&func))
}
