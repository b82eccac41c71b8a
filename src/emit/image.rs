//! Textures and samplers: handle tracing, texture types, and the image
//! instructions (sampling, loads/stores, and queries).

use super::expr::Operands;
use super::{swizzle, FunctionEmitter};
use crate::ast::{Expr, Literal, Statement};
use crate::error::Result;
use crate::{spv, ImageType, Type, TypeDef};
use smallvec::SmallVec;

/// The optional operands of an image instruction, from its `ImageOperands` mask.
#[derive(Default)]
struct ImageOperands {
    bias: Option<spv::Id>,
    lod: Option<spv::Id>,
    grad: Option<(spv::Id, spv::Id)>,
    offset: Option<spv::Id>,
    sample: Option<spv::Id>,
}

/// SPIR-V `ImageFormat`s usable for storage textures, by their WGSL name.
const STORAGE_FORMATS: &[(u32, &str)] = &[
    (1, "rgba32float"),
    (2, "rgba16float"),
    (3, "r32float"),
    (4, "rgba8unorm"),
    (5, "rgba8snorm"),
    (6, "rg32float"),
    (21, "rgba32sint"),
    (22, "rgba16sint"),
    (23, "rgba8sint"),
    (24, "r32sint"),
    (25, "rg32sint"),
    (30, "rgba32uint"),
    (31, "rgba16uint"),
    (32, "rgba8uint"),
    (33, "r32uint"),
    (35, "rg32uint"),
];

impl<'a> FunctionEmitter<'a> {
    pub(super) fn texture_type_name(&self, image: &ImageType) -> Result<String> {
        let unsupported = || self.r.unsupported(format!("image type {image:?}"));

        let dim = match (image.dim, image.arrayed) {
            (0, false) => "1d",
            (1, false) => "2d",
            (1, true) => "2d_array",
            (2, false) => "3d",
            (3, false) => "cube",
            (3, true) => "cube_array",
            _ => return Err(unsupported()),
        };

        if image.sampled == 2 {
            let format = STORAGE_FORMATS
                .iter()
                .find(|&&(format, _)| format == image.format)
                .map(|&(_, name)| name)
                .ok_or_else(unsupported)?;
            let access = match image.access {
                Some(0) => "read",
                Some(2) => "read_write",
                _ => "write",
            };
            return Ok(format!("texture_storage_{dim}<{format}, {access}>"));
        }

        if image.depth == 1 {
            return match (dim, image.multisampled) {
                ("2d", true) => Ok("texture_depth_multisampled_2d".into()),
                ("2d" | "2d_array" | "cube" | "cube_array", false) => {
                    Ok(format!("texture_depth_{dim}"))
                }
                _ => Err(unsupported()),
            };
        }

        let sampled_type = self.type_name(image.sampled_type)?;
        match (dim, image.multisampled) {
            ("2d", true) => Ok(format!("texture_multisampled_2d<{sampled_type}>")),
            (_, true) => Err(unsupported()),
            (_, false) => Ok(format!("texture_{dim}<{sampled_type}>")),
        }
    }

    fn def_inst(&self, id: spv::Id) -> Option<&'a spv::Inst> {
        let def_use = self.def_use;
        def_use.defs.get(&id).map(|def| def.inst)
    }

    /// The texture or sampler (variable) that the handle `id` was loaded from.
    pub(super) fn handle_expr(&mut self, id: spv::Id) -> Result<Expr> {
        let wk = &spv::spec::Spec::get().well_known;

        if self.func.params.iter().any(|p| p.id == id) {
            return Ok(Expr::ident(self.namer.name(id)));
        }
        let inst = self
            .def_inst(id)
            .ok_or_else(|| self.r.unresolved(format!("%{id} is not a known handle")))?;
        let r = self.r.at_inst(inst.opcode);
        let operand = |i: usize| inst.ids.get(i).copied().ok_or_else(|| r.malformed("missing operand"));

        if inst.opcode == wk.OpLoad {
            self.make_ref(operand(0)?)
        } else if inst.opcode == wk.OpCopyObject {
            self.handle_expr(operand(0)?)
        } else if inst.opcode == wk.OpImage {
            let (image, _) = self.split_sampled_image(operand(0)?)?;
            self.handle_expr(image)
        } else if inst.opcode == wk.OpSampledImage {
            Err(r.unsupported("sampled image used outside of an image instruction"))
        } else {
            Err(r.unsupported("handle can't be traced back to a variable"))
        }
    }

    /// The image and sampler that `sampled_image` was created from.
    fn split_sampled_image(&self, sampled_image: spv::Id) -> Result<(spv::Id, spv::Id)> {
        let wk = &spv::spec::Spec::get().well_known;

        let mut id = sampled_image;
        while let Some(inst) = self.def_inst(id) {
            if inst.opcode == wk.OpCopyObject {
                id = inst.ids.first().copied().ok_or_else(|| self.r.malformed("missing operand"))?;
                continue;
            }
            if let (true, [image, sampler]) = (inst.opcode == wk.OpSampledImage, &inst.ids[..]) {
                return Ok((*image, *sampler));
            }
            break;
        }
        Err(self.r.unsupported("combined image samplers"))
    }

    fn image_type(&self, id: spv::Id) -> Result<ImageType> {
        let cx = self.cx;
        match &cx[self.type_of(id)?] {
            TypeDef::Image(image) => Ok(image.clone()),
            &TypeDef::SampledImage { image } => match &cx[image] {
                TypeDef::Image(image) => Ok(image.clone()),
                _ => Err(self.r.malformed("sampled image of a non-image type")),
            },
            _ => Err(self.r.malformed(format!("%{id} isn't an image"))),
        }
    }

    fn image_operands(&self, inst: &spv::Inst, first: usize) -> Result<ImageOperands> {
        let wk = &spv::spec::Spec::get().well_known;
        let r = self.r.at_inst(inst.opcode);

        let mask = inst.word(0).unwrap_or(0);
        let known = wk.Bias | wk.Lod | wk.Grad | wk.ConstOffset | wk.Offset | wk.Sample | wk.MinLod;
        if mask & !known != 0 {
            return Err(r.unsupported(format!("image operands {:#x}", mask & !known)));
        }

        let mut ids = inst.ids.get(first..).unwrap_or(&[]).iter().copied();
        let mut next = || ids.next().ok_or_else(|| r.malformed("missing image operand"));
        let mut operands = ImageOperands::default();
        if mask & wk.Bias != 0 {
            operands.bias = Some(next()?);
        }
        if mask & wk.Lod != 0 {
            operands.lod = Some(next()?);
        }
        if mask & wk.Grad != 0 {
            operands.grad = Some((next()?, next()?));
        }
        if mask & wk.ConstOffset != 0 {
            operands.offset = Some(next()?);
        }
        if mask & wk.Offset != 0 {
            let offset = next()?;
            if !self.module.consts.contains_key(&offset) {
                return Err(r.unsupported("non-constant image offsets"));
            }
            operands.offset = Some(offset);
        }
        if mask & wk.Sample != 0 {
            operands.sample = Some(next()?);
        }
        if mask & wk.MinLod != 0 {
            return Err(r.unsupported("MinLod image operand"));
        }
        Ok(operands)
    }

    /// The coordinates of an image access, with the array layer (if any)
    /// split off into its own (integer) argument.
    fn coordinate_args(
        &mut self,
        coords: spv::Id,
        image: &ImageType,
        float_coords: bool,
    ) -> Result<SmallVec<[Expr; 2]>> {
        let e = self.make_expr(coords)?;
        if !image.arrayed {
            return Ok([e].into_iter().collect());
        }
        let count = match self.cx[self.type_of(coords)?] {
            TypeDef::Vector { count, .. } if (2..=4).contains(&count) => count,
            _ => return Err(self.r.malformed("arrayed image coordinates must be a vector")),
        };
        let base = e.clone().member(&"xyzw"[..(count - 1) as usize]);
        let layer = e.member(swizzle(count - 1));
        let layer = if float_coords {
            Expr::call("i32", [Expr::call("round", [layer])])
        } else {
            layer
        };
        Ok([base, layer].into_iter().collect())
    }

    /// `vec4<f32>(depth, 0.0f, 0.0f, 0.0f)` for depth textures, which return
    /// a scalar in place of the vector SPIR-V expects.
    fn widen_depth(&self, e: Expr, image: &ImageType, result_ty: Type) -> Result<Expr> {
        match self.cx[result_ty] {
            TypeDef::Vector { elem, count } if image.depth == 1 => {
                let mut args = vec![e];
                for _ in 1..count {
                    args.push(self.zero_value(elem)?);
                }
                Ok(Expr::call(self.type_name(result_ty)?, args))
            }
            _ => Ok(e),
        }
    }

    pub(super) fn image_access(&mut self, inst: &spv::Inst, result_ty: Type) -> Result<Expr> {
        let r = self.r.at_inst(inst.opcode);
        let name = inst.opcode.name();
        let arg = |i: usize| inst.ids.get(i).copied().ok_or_else(|| r.malformed("missing operand"));

        match name {
            "OpImageSampleImplicitLod"
            | "OpImageSampleExplicitLod"
            | "OpImageSampleDrefImplicitLod"
            | "OpImageSampleDrefExplicitLod"
            | "OpImageGather"
            | "OpImageDrefGather" => {
                let (sampled_image, coords) = (arg(0)?, arg(1)?);
                let image = self.image_type(sampled_image)?;
                let (texture, sampler) = self.split_sampled_image(sampled_image)?;

                // Depth reference, or gathered component.
                let has_extra_operand = !name.starts_with("OpImageSample") || name.contains("Dref");
                let operands = self.image_operands(inst, if has_extra_operand { 3 } else { 2 })?;

                let mut args = vec![self.handle_expr(texture)?, self.handle_expr(sampler)?];
                args.extend(self.coordinate_args(coords, &image, true)?);
                if has_extra_operand && name != "OpImageGather" {
                    args.push(self.make_expr(arg(2)?)?);
                }

                let func = match name {
                    "OpImageSampleImplicitLod" => match operands.bias {
                        Some(bias) => {
                            args.push(self.make_expr(bias)?);
                            "textureSampleBias"
                        }
                        None => "textureSample",
                    },
                    "OpImageSampleExplicitLod" => match (operands.grad, operands.lod) {
                        (Some((dx, dy)), _) => {
                            args.push(self.make_expr(dx)?);
                            args.push(self.make_expr(dy)?);
                            "textureSampleGrad"
                        }
                        (None, Some(lod)) => {
                            let lod = self.make_expr(lod)?;
                            args.push(if image.depth == 1 { Expr::call("i32", [lod]) } else { lod });
                            "textureSampleLevel"
                        }
                        (None, None) => return Err(r.malformed("explicit-LOD sampling without Lod or Grad")),
                    },
                    "OpImageSampleDrefImplicitLod" => "textureSampleCompare",
                    "OpImageSampleDrefExplicitLod" => "textureSampleCompareLevel",
                    "OpImageGather" => {
                        if image.depth != 1 {
                            let component = self.make_expr(arg(2)?)?;
                            args.insert(0, component);
                        }
                        "textureGather"
                    }
                    _ => "textureGatherCompare",
                };
                if let Some(offset) = operands.offset {
                    args.push(self.make_expr(offset)?);
                }

                let e = Expr::call(func, args);
                if name.contains("Dref") || name == "OpImageGather" {
                    Ok(e)
                } else {
                    self.widen_depth(e, &image, result_ty)
                }
            }

            "OpImageFetch" | "OpImageRead" => {
                let (texture, coords) = (arg(0)?, arg(1)?);
                let image = self.image_type(texture)?;
                let operands = self.image_operands(inst, 2)?;

                let mut args = vec![self.handle_expr(texture)?];
                args.extend(self.coordinate_args(coords, &image, false)?);
                if image.sampled != 2 {
                    args.push(match operands.sample.or(operands.lod) {
                        Some(level) => self.make_expr(level)?,
                        None => Expr::Literal(Literal::I32(0)),
                    });
                }
                let e = Expr::call("textureLoad", args);
                self.widen_depth(e, &image, result_ty)
            }

            "OpImageQuerySize" | "OpImageQuerySizeLod" => {
                let texture = arg(0)?;
                let image = self.image_type(texture)?;
                let t = self.handle_expr(texture)?;

                let mut args = vec![t.clone()];
                if name == "OpImageQuerySizeLod" {
                    args.push(self.make_expr(arg(1)?)?);
                }
                let mut size = Expr::call("textureDimensions", args);
                let unsigned_ty = self.forced_type(result_ty, Operands::Unsigned);
                if image.arrayed {
                    let layers = Expr::call("textureNumLayers", [t]);
                    size = Expr::call(self.type_name(unsigned_ty)?, [size, layers]);
                }
                self.cast_to(size, unsigned_ty, result_ty)
            }
            "OpImageQueryLevels" | "OpImageQuerySamples" => {
                let t = self.handle_expr(arg(0)?)?;
                let func =
                    if name == "OpImageQueryLevels" { "textureNumLevels" } else { "textureNumSamples" };
                let unsigned_ty = self.forced_type(result_ty, Operands::Unsigned);
                self.cast_to(Expr::call(func, [t]), unsigned_ty, result_ty)
            }

            _ => Err(r.unsupported(format!("{name} has no texture builtin equivalent"))),
        }
    }

    /// `OpImageWrite`, as a `textureStore(...)` call statement.
    pub(super) fn image_write(&mut self, inst: &spv::Inst) -> Result<Statement> {
        let r = self.r.at_inst(inst.opcode);
        let [texture, coords, texel, ..] = inst.ids[..] else {
            return Err(r.malformed("OpImageWrite takes an image, coordinates and a texel"));
        };
        let image = self.image_type(texture)?;

        let mut args = vec![self.handle_expr(texture)?];
        args.extend(self.coordinate_args(coords, &image, false)?);
        args.push(self.make_expr(texel)?);
        Ok(Statement::Expr(Expr::call("textureStore", args)))
    }
}
