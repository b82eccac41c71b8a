mod common;

use common::{structurize, structurize_main, TRIVIAL_MAIN};
use pretty_assertions::assert_eq;
use spv_structurize::{print, Context, Module, Options};
use std::rc::Rc;

#[test]
fn signed_modulo_takes_sign_of_divisor() {
    let funcs = format!(
        "{TRIVIAL_MAIN}
         %60 = OpFunction %int None %int_int_fn
         %61 = OpFunctionParameter %int
         %62 = OpFunctionParameter %int
         %63 = OpLabel
         %64 = OpSMod %int %61 %62
         OpReturnValue %64
         OpFunctionEnd"
    );
    assert_eq!(
        structurize(&funcs, 60).unwrap(),
        "\
fn x_60(x_61 : i32, x_62 : i32) -> i32 {
  return (((x_61 % x_62) + x_62) % x_62);
}
"
    );
}

#[test]
fn logical_shift_reinterprets_signed_operand() {
    let funcs = format!(
        "{TRIVIAL_MAIN}
         %70 = OpFunction %int None %int_int_fn
         %71 = OpFunctionParameter %int
         %72 = OpFunctionParameter %int
         %73 = OpLabel
         %74 = OpShiftRightLogical %int %71 %uint_1
         OpReturnValue %74
         OpFunctionEnd"
    );
    assert_eq!(
        structurize(&funcs, 70).unwrap(),
        "\
fn x_70(x_71 : i32, x_72 : i32) -> i32 {
  return bitcast<i32>((bitcast<u32>(x_71) >> 1u));
}
"
    );
}

#[test]
fn access_chain_uses_member_names_and_swizzles() {
    let wgsl = structurize_main(
        "%10 = OpLabel
         %30 = OpVariable %ptr_Function_Light Function
         %31 = OpAccessChain %ptr_Function_float %30 %int_0 %uint_1
         OpStore %31 %float_2
         OpReturn",
    )
    .unwrap();
    assert_eq!(
        wgsl,
        "\
@fragment
fn main() {
  var x_30 : Light;
  x_30.color.y = 2.0f;
}
"
    );
}

const TEXTURE_MODULE: &str = r#"
    OpCapability Shader
    OpMemoryModel Logical GLSL450
    OpEntryPoint Fragment %main "main"
    OpExecutionMode %main OriginUpperLeft
    OpName %tex "tex"
    OpName %samp "samp"
    OpName %frag_color "frag_color"
    OpName %dims "dims"
    %void = OpTypeVoid
    %voidfn = OpTypeFunction %void
    %int = OpTypeInt 32 1
    %float = OpTypeFloat 32
    %v2int = OpTypeVector %int 2
    %v2float = OpTypeVector %float 2
    %v4float = OpTypeVector %float 4
    %int_0 = OpConstant %int 0
    %int_1 = OpConstant %int 1
    %float_half = OpConstant %float 0.5
    %float_1 = OpConstant %float 1
    %uv = OpConstantComposite %v2float %float_half %float_half
    %texel = OpConstantComposite %v2int %int_1 %int_1
    %image = OpTypeImage %float 2D 0 0 0 1 Unknown
    %sampler = OpTypeSampler
    %sampled_image = OpTypeSampledImage %image
    %ptr_image = OpTypePointer UniformConstant %image
    %ptr_sampler = OpTypePointer UniformConstant %sampler
    %ptr_Private_v4float = OpTypePointer Private %v4float
    %ptr_Private_v2int = OpTypePointer Private %v2int
    %tex = OpVariable %ptr_image UniformConstant
    %samp = OpVariable %ptr_sampler UniformConstant
    %frag_color = OpVariable %ptr_Private_v4float Private
    %dims = OpVariable %ptr_Private_v2int Private
    %main = OpFunction %void None %voidfn
    %10 = OpLabel
    %11 = OpLoad %image %tex
    %12 = OpLoad %sampler %samp
    %13 = OpSampledImage %sampled_image %11 %12
    %14 = OpImageSampleImplicitLod %v4float %13 %uv
    OpStore %frag_color %14
    %15 = OpImageSampleExplicitLod %v4float %13 %uv Lod %float_1
    OpStore %frag_color %15
    %16 = OpImageFetch %v4float %11 %texel Lod %int_1
    OpStore %frag_color %16
    %17 = OpImageQuerySizeLod %v2int %11 %int_0
    OpStore %dims %17
    OpReturn
    OpFunctionEnd
"#;

#[test]
fn texture_sampling_fetch_and_queries() {
    let module = Module::lower_from_spv_asm(Rc::new(Context::new()), TEXTURE_MODULE).unwrap();
    let func = module.structurize_func(module.entry_points[0].func, &Options::default()).unwrap();
    assert_eq!(
        print::function_to_wgsl(&func),
        "\
@fragment
fn main() {
  let x_14 : vec4<f32> = textureSample(tex, samp, vec2<f32>(0.5f, 0.5f));
  frag_color = x_14;
  let x_15 : vec4<f32> = textureSampleLevel(tex, samp, vec2<f32>(0.5f, 0.5f), 1.0f);
  frag_color = x_15;
  let x_16 : vec4<f32> = textureLoad(tex, vec2<i32>(1i, 1i), 1i);
  frag_color = x_16;
  let x_17 : vec2<i32> = bitcast<vec2<i32>>(textureDimensions(tex, 0i));
  dims = x_17;
}
"
    );
}
