//! Expressions for values (and their types), i.e. everything that doesn't
//! affect control-flow.

use super::{swizzle, FunctionEmitter};
use crate::ast::{BinaryOp, Expr, Literal, Statement, UnaryOp};
use crate::error::Result;
use crate::{spv, Const, ConstKind, Type, TypeDef};

/// Signedness required of the operands of an integer operation.
#[derive(Copy, Clone, PartialEq, Eq)]
pub(super) enum Operands {
    /// Same type as the result.
    LikeResult,
    Signed,
    Unsigned,
}

impl FunctionEmitter<'_> {
    /// Expression computing the result of `inst` (which can't be a pointer
    /// or handle, see [`DefKind::Sunk`](crate::def_use::DefKind::Sunk)).
    ///
    /// May emit additional statements (e.g. for `OpCompositeInsert`).
    pub(super) fn make_value(&mut self, inst: &spv::Inst) -> Result<Expr> {
        let wk = &spv::spec::Spec::get().well_known;
        let cx = self.cx;
        let r = self.r.at_inst(inst.opcode);

        let result_id = inst.result_id.ok_or_else(|| r.malformed("missing result"))?;
        let result_ty = self.type_of(result_id)?;
        let arg = |i: usize| inst.ids.get(i).copied().ok_or_else(|| r.malformed("missing operand"));

        if inst.opcode == wk.OpExtInst {
            return self.make_ext_inst(inst, result_ty);
        }

        use BinaryOp as B;
        let name = inst.opcode.name();
        let int_binary_op = match name {
            "OpIAdd" => Some((B::Add, Operands::LikeResult)),
            "OpISub" => Some((B::Sub, Operands::LikeResult)),
            "OpIMul" => Some((B::Mul, Operands::LikeResult)),
            "OpUDiv" => Some((B::Div, Operands::Unsigned)),
            "OpSDiv" => Some((B::Div, Operands::Signed)),
            "OpUMod" => Some((B::Rem, Operands::Unsigned)),
            "OpSRem" => Some((B::Rem, Operands::Signed)),
            "OpBitwiseAnd" => Some((B::And, Operands::LikeResult)),
            "OpBitwiseOr" => Some((B::Or, Operands::LikeResult)),
            "OpBitwiseXor" => Some((B::Xor, Operands::LikeResult)),
            _ => None,
        };
        if let Some((op, operands)) = int_binary_op {
            return self.int_binary(op, arg(0)?, arg(1)?, operands, result_ty);
        }

        let float_binary_op = match name {
            "OpFAdd" => Some(B::Add),
            "OpFSub" => Some(B::Sub),
            "OpFMul"
            | "OpVectorTimesScalar"
            | "OpMatrixTimesScalar"
            | "OpVectorTimesMatrix"
            | "OpMatrixTimesVector"
            | "OpMatrixTimesMatrix" => Some(B::Mul),
            "OpFDiv" => Some(B::Div),
            "OpFRem" => Some(B::Rem),
            "OpLogicalAnd" => Some(B::And),
            "OpLogicalOr" => Some(B::Or),
            "OpLogicalEqual" | "OpFOrdEqual" => Some(B::Equal),
            "OpLogicalNotEqual" | "OpFOrdNotEqual" => Some(B::NotEqual),
            "OpFOrdLessThan" => Some(B::LessThan),
            "OpFOrdLessThanEqual" => Some(B::LessThanEqual),
            "OpFOrdGreaterThan" => Some(B::GreaterThan),
            "OpFOrdGreaterThanEqual" => Some(B::GreaterThanEqual),
            _ => None,
        };
        if let Some(op) = float_binary_op {
            let (a, b) = (self.make_expr(arg(0)?)?, self.make_expr(arg(1)?)?);
            return Ok(Expr::binary(op, a, b));
        }

        // Unordered comparisons are the negation of the inverse ordered ones.
        let unordered_inverse = match name {
            "OpFUnordEqual" => Some(B::NotEqual),
            "OpFUnordNotEqual" => Some(B::Equal),
            "OpFUnordLessThan" => Some(B::GreaterThanEqual),
            "OpFUnordLessThanEqual" => Some(B::GreaterThan),
            "OpFUnordGreaterThan" => Some(B::LessThanEqual),
            "OpFUnordGreaterThanEqual" => Some(B::LessThan),
            _ => None,
        };
        if let Some(op) = unordered_inverse {
            let (a, b) = (self.make_expr(arg(0)?)?, self.make_expr(arg(1)?)?);
            return Ok(Expr::unary(UnaryOp::Not, Expr::binary(op, a, b)));
        }

        let int_compare = match name {
            "OpIEqual" => Some((B::Equal, Operands::LikeResult)),
            "OpINotEqual" => Some((B::NotEqual, Operands::LikeResult)),
            "OpULessThan" => Some((B::LessThan, Operands::Unsigned)),
            "OpULessThanEqual" => Some((B::LessThanEqual, Operands::Unsigned)),
            "OpUGreaterThan" => Some((B::GreaterThan, Operands::Unsigned)),
            "OpUGreaterThanEqual" => Some((B::GreaterThanEqual, Operands::Unsigned)),
            "OpSLessThan" => Some((B::LessThan, Operands::Signed)),
            "OpSLessThanEqual" => Some((B::LessThanEqual, Operands::Signed)),
            "OpSGreaterThan" => Some((B::GreaterThan, Operands::Signed)),
            "OpSGreaterThanEqual" => Some((B::GreaterThanEqual, Operands::Signed)),
            _ => None,
        };
        if let Some((op, operands)) = int_compare {
            // The result is `bool`, so the operands are matched to the first one.
            let (a, b) = (arg(0)?, arg(1)?);
            let operand_ty = self.forced_type(self.type_of(a)?, operands);
            let lhs = self.operand_as(a, operand_ty)?;
            let rhs = self.operand_as(b, operand_ty)?;
            return Ok(Expr::binary(op, lhs, rhs));
        }

        let builtin = match name {
            "OpDot" => Some("dot"),
            "OpTranspose" => Some("transpose"),
            "OpDPdx" => Some("dpdx"),
            "OpDPdy" => Some("dpdy"),
            "OpFwidth" => Some("fwidth"),
            "OpDPdxFine" => Some("dpdxFine"),
            "OpDPdyFine" => Some("dpdyFine"),
            "OpFwidthFine" => Some("fwidthFine"),
            "OpDPdxCoarse" => Some("dpdxCoarse"),
            "OpDPdyCoarse" => Some("dpdyCoarse"),
            "OpFwidthCoarse" => Some("fwidthCoarse"),
            "OpAny" => Some("any"),
            "OpAll" => Some("all"),
            "OpBitCount" => Some("countOneBits"),
            "OpBitReverse" => Some("reverseBits"),
            _ => None,
        };
        if let Some(builtin) = builtin {
            let args = inst.ids.iter().map(|&id| self.make_expr(id)).collect::<Result<Vec<_>>>()?;
            return Ok(Expr::call(builtin, args));
        }

        Ok(match name {
            "OpSMod" => {
                // `(((a % b) + b) % b)`, i.e. the result has the sign of `b`.
                let ty = self.forced_type(result_ty, Operands::Signed);
                let (a, b) = (self.operand_as(arg(0)?, ty)?, self.operand_as(arg(1)?, ty)?);
                let rem = Expr::binary(B::Rem, a, b.clone());
                let e = Expr::binary(B::Rem, Expr::binary(B::Add, rem, b.clone()), b);
                self.cast_to(e, ty, result_ty)?
            }
            "OpFMod" => {
                // `(a - (b * floor((a / b))))`, i.e. the result has the sign of `b`.
                let (a, b) = (self.make_expr(arg(0)?)?, self.make_expr(arg(1)?)?);
                let quotient = Expr::call("floor", [Expr::binary(B::Div, a.clone(), b.clone())]);
                Expr::binary(B::Sub, a, Expr::binary(B::Mul, b, quotient))
            }

            "OpShiftLeftLogical" => self.shift(B::ShiftLeft, inst, Operands::LikeResult, result_ty)?,
            "OpShiftRightLogical" => self.shift(B::ShiftRight, inst, Operands::Unsigned, result_ty)?,
            "OpShiftRightArithmetic" => {
                self.shift(B::ShiftRight, inst, Operands::Signed, result_ty)?
            }

            "OpFNegate" => Expr::unary(UnaryOp::Negate, self.make_expr(arg(0)?)?),
            "OpSNegate" => {
                let ty = self.forced_type(result_ty, Operands::Signed);
                let e = Expr::unary(UnaryOp::Negate, self.operand_as(arg(0)?, ty)?);
                self.cast_to(e, ty, result_ty)?
            }
            "OpNot" => Expr::unary(UnaryOp::Complement, self.operand_as(arg(0)?, result_ty)?),
            "OpLogicalNot" => Expr::unary(UnaryOp::Not, self.make_expr(arg(0)?)?),

            "OpConvertFToU" | "OpConvertFToS" => {
                let operands =
                    if name == "OpConvertFToU" { Operands::Unsigned } else { Operands::Signed };
                let ty = self.forced_type(result_ty, operands);
                let e = Expr::call(self.type_name(ty)?, [self.make_expr(arg(0)?)?]);
                self.cast_to(e, ty, result_ty)?
            }
            "OpConvertSToF" | "OpConvertUToF" => {
                let operands =
                    if name == "OpConvertUToF" { Operands::Unsigned } else { Operands::Signed };
                let a = arg(0)?;
                let operand_ty = self.forced_type(self.type_of(a)?, operands);
                let e = self.operand_as(a, operand_ty)?;
                Expr::call(self.type_name(result_ty)?, [e])
            }
            "OpFConvert" => Expr::call(self.type_name(result_ty)?, [self.make_expr(arg(0)?)?]),
            "OpBitcast" => {
                let e = self.make_expr(arg(0)?)?;
                Expr::call(format!("bitcast<{}>", self.type_name(result_ty)?), [e])
            }
            "OpUConvert" | "OpSConvert" => {
                return Err(r.unsupported("integer width conversions"));
            }

            "OpSelect" => {
                let (c, t, f) = (arg(0)?, arg(1)?, arg(2)?);
                let (c, t, f) = (self.make_expr(c)?, self.make_expr(t)?, self.make_expr(f)?);
                Expr::call("select", [f, t, c])
            }

            "OpCompositeConstruct" => {
                let args = inst.ids.iter().map(|&id| self.make_expr(id)).collect::<Result<Vec<_>>>()?;
                Expr::call(self.type_name(result_ty)?, args)
            }
            "OpCompositeExtract" => {
                let composite = arg(0)?;
                let mut ty = self.type_of(composite)?;
                let mut e = self.make_expr(composite)?;
                for index in inst.words() {
                    (e, ty) = self.extract_component(e, ty, index)?;
                }
                e
            }
            "OpCompositeInsert" => {
                // `var tmp : T = composite; tmp.path = object;`
                let (object, composite) = (arg(0)?, arg(1)?);
                let tmp = self.make_temporary_copy(result_id, composite, result_ty)?;
                let mut ty = result_ty;
                let mut lhs = Expr::ident(tmp.clone());
                for index in inst.words() {
                    (lhs, ty) = self.extract_component(lhs, ty, index)?;
                }
                let rhs = self.make_expr(object)?;
                self.push_stmt(Statement::Assign { lhs, rhs });
                Expr::ident(tmp)
            }
            "OpVectorExtractDynamic" => {
                let (v, i) = (self.make_expr(arg(0)?)?, self.make_expr(arg(1)?)?);
                v.index(i)
            }
            "OpVectorInsertDynamic" => {
                // `var tmp : T = vector; tmp[index] = component;`
                let (vector, component, index) = (arg(0)?, arg(1)?, arg(2)?);
                let tmp = self.make_temporary_copy(result_id, vector, result_ty)?;
                let lhs = Expr::ident(tmp.clone()).index(self.make_expr(index)?);
                let rhs = self.make_expr(component)?;
                self.push_stmt(Statement::Assign { lhs, rhs });
                Expr::ident(tmp)
            }
            "OpVectorShuffle" => {
                let (v1, v2) = (arg(0)?, arg(1)?);
                let TypeDef::Vector { elem, .. } = cx[result_ty] else {
                    return Err(r.malformed("OpVectorShuffle result isn't a vector"));
                };
                let v1_len = match cx[self.type_of(v1)?] {
                    TypeDef::Vector { count, .. } => count,
                    _ => return Err(r.malformed("OpVectorShuffle operand isn't a vector")),
                };
                let components = inst
                    .words()
                    .map(|component| match component {
                        u32::MAX => self.zero_value(elem),
                        i if i < v1_len => Ok(self.make_expr(v1)?.member(swizzle(i))),
                        i => Ok(self.make_expr(v2)?.member(swizzle(i - v1_len))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Expr::call(self.type_name(result_ty)?, components)
            }

            "OpArrayLength" => {
                let ptr = arg(0)?;
                let member = inst.word(0).ok_or_else(|| r.malformed("missing member index"))?;
                let struct_id = match cx[self.type_of(ptr)?] {
                    TypeDef::Pointer { pointee, .. } => match cx[pointee] {
                        TypeDef::Struct { id, .. } => id,
                        _ => return Err(r.malformed("OpArrayLength of a non-struct")),
                    },
                    _ => return Err(r.malformed("OpArrayLength of a non-pointer")),
                };
                let array = self.make_ref(ptr)?.member(self.member_name(struct_id, member));
                Expr::call("arrayLength", [array.addr_of()])
            }

            "OpLoad" => self.make_ref(arg(0)?)?,
            "OpCopyObject" => self.make_expr(arg(0)?)?,
            "OpUndef" => self.zero_value(result_ty)?,
            "OpFunctionCall" => {
                let callee = self.namer.name(arg(0)?);
                let args =
                    inst.ids[1..].iter().map(|&id| self.make_expr(id)).collect::<Result<Vec<_>>>()?;
                Expr::call(callee, args)
            }

            "OpImageSampleImplicitLod"
            | "OpImageSampleExplicitLod"
            | "OpImageSampleDrefImplicitLod"
            | "OpImageSampleDrefExplicitLod"
            | "OpImageGather"
            | "OpImageDrefGather"
            | "OpImageFetch"
            | "OpImageRead"
            | "OpImageQuerySize"
            | "OpImageQuerySizeLod"
            | "OpImageQueryLevels"
            | "OpImageQuerySamples" => self.image_access(inst, result_ty)?,

            "OpIsNan" | "OpIsInf" | "OpOuterProduct" => {
                return Err(r.unsupported(format!("{name} has no builtin equivalent")));
            }
            _ => return Err(r.unsupported(format!("{name} has no expression form"))),
        })
    }

    fn int_binary(
        &mut self,
        op: BinaryOp,
        a: spv::Id,
        b: spv::Id,
        operands: Operands,
        result_ty: Type,
    ) -> Result<Expr> {
        let ty = self.forced_type(result_ty, operands);
        let e = Expr::binary(op, self.operand_as(a, ty)?, self.operand_as(b, ty)?);
        self.cast_to(e, ty, result_ty)
    }

    /// Shifts always take an unsigned shift amount, while the base is
    /// converted according to `operands` (i.e. logical vs arithmetic).
    fn shift(
        &mut self,
        op: BinaryOp,
        inst: &spv::Inst,
        operands: Operands,
        result_ty: Type,
    ) -> Result<Expr> {
        let [base, amount] = inst.ids[..] else {
            return Err(self.r.at_inst(inst.opcode).malformed("shifts take two operands"));
        };
        let ty = self.forced_type(result_ty, operands);
        let amount_ty = self.forced_type(self.type_of(amount)?, Operands::Unsigned);
        let e = Expr::binary(op, self.operand_as(base, ty)?, self.operand_as(amount, amount_ty)?);
        self.cast_to(e, ty, result_ty)
    }

    /// `var tmp : T = value;`, returning the name of `tmp` (derived from the
    /// name of `result_id`, which is what `tmp` will hold in the end).
    fn make_temporary_copy(&mut self, result_id: spv::Id, value: spv::Id, ty: Type) -> Result<String> {
        let base = self.namer.name(result_id);
        let tmp = self.namer.make_derived_name(base);
        let init = Some(self.make_expr(value)?);
        let ty = self.type_name(ty)?;
        self.push_stmt(Statement::Var { name: tmp.clone(), ty, init });
        Ok(tmp)
    }

    /// Access the component at (constant) index `i` of `base` (of type `ty`).
    fn extract_component(&self, base: Expr, ty: Type, i: u32) -> Result<(Expr, Type)> {
        let out_of_range = || self.r.malformed(format!("composite index {i} out of range"));
        match &self.cx[ty] {
            TypeDef::Struct { id, members } => {
                let member_ty = members.get(i as usize).copied().ok_or_else(out_of_range)?;
                Ok((base.member(self.member_name(*id, i)), member_ty))
            }
            &TypeDef::Vector { elem, count } if i < count.min(4) => Ok((base.member(swizzle(i)), elem)),
            &TypeDef::Matrix { column, count } if i < count => {
                Ok((base.index(Expr::Literal(Literal::U32(i))), column))
            }
            &TypeDef::Array { elem, .. } => Ok((base.index(Expr::Literal(Literal::U32(i))), elem)),
            _ => Err(out_of_range()),
        }
    }

    /// `OpExtInst`, of which only the `GLSL.std.450` set is supported.
    fn make_ext_inst(&mut self, inst: &spv::Inst, result_ty: Type) -> Result<Expr> {
        use BinaryOp as B;

        let cx = self.cx;
        let r = self.r.at_inst(inst.opcode);

        let Some((&set, args)) = inst.ids.split_first() else {
            return Err(r.malformed("OpExtInst without an instruction set"));
        };
        let set_name = self.module.ext_inst_imports.get(&set).map(|&name| &cx[name]);
        if set_name != Some("GLSL.std.450") {
            return Err(r.unsupported(format!(
                "extended instruction set {}",
                set_name.map_or_else(|| format!("%{set}"), |name| format!("{name:?}"))
            )));
        }
        let glsl = &spv::spec::Spec::get().glsl_std_450;
        let name = inst
            .word(0)
            .and_then(|number| glsl.name(number))
            .ok_or_else(|| r.malformed("unknown GLSL.std.450 instruction"))?;

        let is_scalar = matches!(cx[result_ty], TypeDef::Float { .. });
        let builtin = match name {
            "Round" | "RoundEven" => "round",
            "Trunc" => "trunc",
            "FAbs" | "SAbs" => "abs",
            "FSign" | "SSign" => "sign",
            "Floor" => "floor",
            "Ceil" => "ceil",
            "Fract" => "fract",
            "Radians" => "radians",
            "Degrees" => "degrees",
            "Sin" => "sin",
            "Cos" => "cos",
            "Tan" => "tan",
            "Asin" => "asin",
            "Acos" => "acos",
            "Atan" => "atan",
            "Sinh" => "sinh",
            "Cosh" => "cosh",
            "Tanh" => "tanh",
            "Asinh" => "asinh",
            "Acosh" => "acosh",
            "Atanh" => "atanh",
            "Atan2" => "atan2",
            "Pow" => "pow",
            "Exp" => "exp",
            "Log" => "log",
            "Exp2" => "exp2",
            "Log2" => "log2",
            "Sqrt" => "sqrt",
            "InverseSqrt" => "inverseSqrt",
            "Determinant" => "determinant",
            "FMin" | "NMin" | "UMin" | "SMin" => "min",
            "FMax" | "NMax" | "UMax" | "SMax" => "max",
            "FClamp" | "NClamp" | "UClamp" | "SClamp" => "clamp",
            "FMix" => "mix",
            "Step" => "step",
            "SmoothStep" => "smoothstep",
            "Fma" => "fma",
            "Ldexp" => "ldexp",
            "PackSnorm4x8" => "pack4x8snorm",
            "PackUnorm4x8" => "pack4x8unorm",
            "PackSnorm2x16" => "pack2x16snorm",
            "PackUnorm2x16" => "pack2x16unorm",
            "PackHalf2x16" => "pack2x16float",
            "UnpackSnorm4x8" => "unpack4x8snorm",
            "UnpackUnorm4x8" => "unpack4x8unorm",
            "UnpackSnorm2x16" => "unpack2x16snorm",
            "UnpackUnorm2x16" => "unpack2x16unorm",
            "UnpackHalf2x16" => "unpack2x16float",
            "Length" => "length",
            "Distance" => "distance",
            "Cross" => "cross",
            "Normalize" => "normalize",
            "FaceForward" if !is_scalar => "faceForward",
            "Reflect" if !is_scalar => "reflect",
            "Refract" => "refract",
            "FindILsb" => "firstTrailingBit",
            "FindSMsb" | "FindUMsb" => "firstLeadingBit",

            "FaceForward" => {
                // `select(-(n), n, ((nref * i) < 0.0))`
                let [n, i, nref] = args[..] else {
                    return Err(r.malformed("FaceForward takes three operands"));
                };
                let (n, i, nref) = (self.make_expr(n)?, self.make_expr(i)?, self.make_expr(nref)?);
                let zero = self.zero_value(result_ty)?;
                let facing = Expr::binary(B::LessThan, Expr::binary(B::Mul, nref, i), zero);
                let flipped = Expr::unary(UnaryOp::Negate, n.clone());
                return Ok(Expr::call("select", [flipped, n, facing]));
            }
            "Reflect" => {
                // `(i - ((2.0 * (n * i)) * n))`
                let [i, n] = args[..] else {
                    return Err(r.malformed("Reflect takes two operands"));
                };
                let (i, n) = (self.make_expr(i)?, self.make_expr(n)?);
                let two = self.float_literal(result_ty, 2.0)?;
                let scale = Expr::binary(B::Mul, two, Expr::binary(B::Mul, n.clone(), i.clone()));
                return Ok(Expr::binary(B::Sub, i, Expr::binary(B::Mul, scale, n)));
            }

            _ => return Err(r.unsupported(format!("GLSL.std.450 {name}"))),
        };

        let operands = match name {
            "SAbs" | "SSign" | "SMin" | "SMax" | "SClamp" | "FindSMsb" => Operands::Signed,
            "UMin" | "UMax" | "UClamp" | "FindUMsb" => Operands::Unsigned,
            _ => Operands::LikeResult,
        };
        if operands == Operands::LikeResult {
            let args = args.iter().map(|&id| self.make_expr(id)).collect::<Result<Vec<_>>>()?;
            return Ok(Expr::call(builtin, args));
        }
        let ty = self.forced_type(result_ty, operands);
        let args = args.iter().map(|&id| self.operand_as(id, ty)).collect::<Result<Vec<_>>>()?;
        self.cast_to(Expr::call(builtin, args), ty, result_ty)
    }

    /// `ty`, or its signed/unsigned variant (for integer scalars/vectors).
    pub(super) fn forced_type(&self, ty: Type, operands: Operands) -> Type {
        let cx = self.cx;
        let signed = match operands {
            Operands::LikeResult => return ty,
            Operands::Signed => true,
            Operands::Unsigned => false,
        };
        match cx[ty] {
            TypeDef::Int { width, .. } => cx.intern(TypeDef::Int { width, signed }),
            TypeDef::Vector { elem, count } => {
                cx.intern(TypeDef::Vector { elem: self.forced_type(elem, operands), count })
            }
            _ => ty,
        }
    }

    /// The value `id`, bitcast to `ty` if its type differs (in signedness).
    fn operand_as(&mut self, id: spv::Id, ty: Type) -> Result<Expr> {
        let id_ty = self.type_of(id)?;
        let e = self.make_expr(id)?;
        self.cast_to(e, id_ty, ty)
    }

    /// `e` (of type `from`) as `to`, through `bitcast` if they differ.
    pub(super) fn cast_to(&self, e: Expr, from: Type, to: Type) -> Result<Expr> {
        if from == to {
            return Ok(e);
        }
        Ok(Expr::call(format!("bitcast<{}>", self.type_name(to)?), [e]))
    }

    /// The "zero value" of a type (e.g. for `OpConstantNull`).
    pub(super) fn zero_value(&self, ty: Type) -> Result<Expr> {
        Ok(match self.cx[ty] {
            TypeDef::Bool => Expr::Literal(Literal::Bool(false)),
            TypeDef::Int { .. } | TypeDef::Float { .. } => self.scalar_literal(ty, 0)?,
            _ => Expr::call(self.type_name(ty)?, []),
        })
    }

    fn float_literal(&self, ty: Type, x: f32) -> Result<Expr> {
        match self.cx[ty] {
            TypeDef::Float { width: 32 } => Ok(Expr::Literal(Literal::F32(x))),
            TypeDef::Float { width: 16 } => Ok(Expr::Literal(Literal::F16(x))),
            _ => Err(self.r.unsupported("expected a 16-bit or 32-bit float type")),
        }
    }

    pub(super) fn const_expr(&mut self, ct: Const) -> Result<Expr> {
        let cx = self.cx;
        let def = &cx[ct];
        match &def.kind {
            &ConstKind::Bool(b) => Ok(Expr::Literal(Literal::Bool(b))),
            &ConstKind::Scalar(bits) => self.scalar_literal(def.ty, bits),
            ConstKind::Composite(elems) => {
                let args = elems.iter().map(|&elem| self.const_expr(elem)).collect::<Result<Vec<_>>>()?;
                Ok(Expr::call(self.type_name(def.ty)?, args))
            }
            ConstKind::Null | ConstKind::Undef => self.zero_value(def.ty),
        }
    }

    fn scalar_literal(&self, ty: Type, bits: u64) -> Result<Expr> {
        let literal = match self.cx[ty] {
            TypeDef::Int { width: 32, signed: true } => Literal::I32(bits as u32 as i32),
            TypeDef::Int { width: 32, signed: false } => Literal::U32(bits as u32),
            TypeDef::Float { width: 32 } => {
                let x = f32::from_bits(bits as u32);
                if !x.is_finite() {
                    return Ok(Expr::call("bitcast<f32>", [Expr::Literal(Literal::U32(bits as u32))]));
                }
                Literal::F32(x)
            }
            TypeDef::Float { width: 16 } => {
                let x = f16_bits_to_f32(bits as u16);
                if !x.is_finite() {
                    return Err(self.r.unsupported("non-finite f16 constant"));
                }
                Literal::F16(x)
            }
            _ => return Err(self.r.unsupported("scalars other than 32-bit integers and floats")),
        };
        Ok(Expr::Literal(literal))
    }

    pub(super) fn type_name(&self, ty: Type) -> Result<String> {
        let cx = self.cx;
        Ok(match &cx[ty] {
            TypeDef::Bool => "bool".into(),
            TypeDef::Int { width: 32, signed: true } => "i32".into(),
            TypeDef::Int { width: 32, signed: false } => "u32".into(),
            TypeDef::Float { width: 32 } => "f32".into(),
            TypeDef::Float { width: 16 } => "f16".into(),
            TypeDef::Vector { elem, count } => format!("vec{count}<{}>", self.type_name(*elem)?),
            TypeDef::Matrix { column, count } => match cx[*column] {
                TypeDef::Vector { elem, count: rows } => {
                    format!("mat{count}x{rows}<{}>", self.type_name(elem)?)
                }
                _ => return Err(self.r.malformed("matrix column isn't a vector")),
            },
            TypeDef::Array { elem, len: Some(len) } => {
                format!("array<{}, {len}>", self.type_name(*elem)?)
            }
            TypeDef::Array { elem, len: None } => format!("array<{}>", self.type_name(*elem)?),
            &TypeDef::Struct { id, .. } => match self.namer.get(id) {
                Some(name) => name.to_string(),
                None => return Err(self.r.internal(format!("struct %{id} wasn't named"))),
            },
            &TypeDef::Pointer { storage_class, pointee } => {
                let wk = &spv::spec::Spec::get().well_known;
                let address_space = if storage_class == wk.Function {
                    "function"
                } else if storage_class == wk.Private {
                    "private"
                } else if storage_class == wk.Workgroup {
                    "workgroup"
                } else if storage_class == wk.Uniform {
                    "uniform"
                } else if storage_class == wk.StorageBuffer {
                    "storage"
                } else {
                    return Err(self.r.unsupported(format!("pointers in storage class {storage_class}")));
                };
                format!("ptr<{address_space}, {}>", self.type_name(pointee)?)
            }
            TypeDef::Image(image) => self.texture_type_name(image)?,
            TypeDef::Sampler => "sampler".into(),
            TypeDef::Int { width, .. } | TypeDef::Float { width } => {
                return Err(self.r.unsupported(format!("{width}-bit scalar types")));
            }
            TypeDef::Void | TypeDef::Function { .. } | TypeDef::SampledImage { .. } => {
                return Err(self.r.unsupported(format!("{:?} has no type name", cx[ty])));
            }
        })
    }
}

/// Widen the IEEE binary16 `bits` to an `f32` (exactly, as every `f16` is
/// representable as an `f32`).
fn f16_bits_to_f32(bits: u16) -> f32 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = i32::from((bits >> 10) & 0x1f);
    let mantissa = f32::from(bits & 0x3ff);
    let magnitude = match exp {
        0 => mantissa * 2f32.powi(-24),
        0x1f if mantissa == 0.0 => f32::INFINITY,
        0x1f => f32::NAN,
        _ => (1.0 + mantissa / 1024.0) * 2f32.powi(exp - 15),
    };
    sign * magnitude
}

#[cfg(test)]
mod tests {
    use super::f16_bits_to_f32;

    #[test]
    fn f16_widening() {
        assert_eq!(f16_bits_to_f32(0x3c00), 1.0);
        assert_eq!(f16_bits_to_f32(0xc000), -2.0);
        assert_eq!(f16_bits_to_f32(0x3800), 0.5);
        assert_eq!(f16_bits_to_f32(0x0001), 2f32.powi(-24));
        assert_eq!(f16_bits_to_f32(0x7c00), f32::INFINITY);
        assert!(f16_bits_to_f32(0x7e00).is_nan());
    }
}
