//! WGSL-like text rendering of the statement tree (see [`ast`]).
//!
//! Statements are rendered to [`pretty::Fragment`]s (for indentation), while
//! expressions, which always stay on one line, are rendered straight to text.

// FIXME stop using `itertools` for methods like `intersperse` when they
// get stabilized on `Iterator` instead.
#![allow(unstable_name_collisions)]
use itertools::Itertools as _;

use crate::ast::{self, CaseSelector, Expr, Literal, Statement};
use crate::{spv, Error};
use std::fmt::Write as _;

pub mod pretty;

pub trait Print {
    type Output;
    fn print(&self) -> Self::Output;
}

/// Render a sequence of statements, each followed by a newline.
pub fn statements_to_string(stmts: &[Statement]) -> String {
    let mut out = String::new();
    for stmt in stmts {
        // Writing to a `String` can't fail.
        let _ = writeln!(out, "{}", stmt.print());
    }
    out
}

/// Render only the body of a function (see also [`statements_to_string`]).
pub fn function_body_to_string(func: &ast::FunctionBody) -> String {
    statements_to_string(&func.body)
}

/// Render a whole function, including its signature (and entry-point attributes).
pub fn function_to_wgsl(func: &ast::FunctionBody) -> String {
    format!("{}\n", func.print())
}

/// Render all the successfully structurized functions, in order, with the
/// failures replaced by a comment each.
pub fn module_to_wgsl(results: &[(spv::Id, Result<ast::FunctionBody, Error>)]) -> String {
    results
        .iter()
        .map(|(func_id, result)| match result {
            Ok(func) => function_to_wgsl(func),
            Err(e) => format!("// error: function %{func_id} failed to structurize: {e}\n"),
        })
        .intersperse("\n".to_string())
        .collect()
}

impl Print for ast::FunctionBody {
    type Output = pretty::Fragment;
    fn print(&self) -> pretty::Fragment {
        let Self { func_id: _, name, params, ret_type, entry_point, body } = self;

        let mut attrs = String::new();
        if let Some(ast::EntryPointInfo { stage, workgroup_size }) = entry_point {
            attrs += &format!("@{stage}");
            if let Some([x, y, z]) = workgroup_size {
                attrs += &format!(" @workgroup_size({x}, {y}, {z})");
            }
        }

        let params = params.iter().map(|p| format!("{} : {}", p.name, p.ty)).join(", ");
        let mut header = format!("fn {name}({params})");
        if let Some(ret_type) = ret_type {
            header += &format!(" -> {ret_type}");
        }

        let def = pretty::braced_block(header, body.iter().map(|stmt| stmt.print()));
        if attrs.is_empty() {
            def
        } else {
            pretty::Fragment::new([
                pretty::Fragment::from(attrs),
                pretty::Node::ForceLineSeparation.into(),
                def,
            ])
        }
    }
}

impl Print for Statement {
    type Output = pretty::Fragment;
    fn print(&self) -> pretty::Fragment {
        let block = |stmts: &[Statement]| stmts.iter().map(|stmt| stmt.print()).collect::<Vec<_>>();

        match self {
            Statement::Var { name, ty, init: None } => format!("var {name} : {ty};").into(),
            Statement::Var { name, ty, init: Some(init) } => {
                format!("var {name} : {ty} = {};", init.print()).into()
            }
            Statement::Let { name, ty: Some(ty), value } => {
                format!("let {name} : {ty} = {};", value.print()).into()
            }
            Statement::Let { name, ty: None, value } => {
                format!("let {name} = {};", value.print()).into()
            }
            Statement::Assign { lhs, rhs } => format!("{} = {};", lhs.print(), rhs.print()).into(),
            Statement::Expr(e) => format!("{};", e.print()).into(),

            Statement::If { cond, then_body, else_body } => {
                let if_then = pretty::braced_block(format!("if ({})", cond.print()), block(then_body));
                if else_body.is_empty() {
                    if_then
                } else {
                    pretty::Fragment::new([
                        if_then,
                        " ".into(),
                        pretty::braced_block("else", block(else_body)),
                    ])
                }
            }
            Statement::Loop { body, continuing } => {
                let mut contents = block(body);
                if !continuing.is_empty() {
                    contents.push(pretty::braced_block("continuing", block(continuing)));
                }
                pretty::braced_block("loop", contents)
            }
            Statement::Switch { selector, cases } => pretty::braced_block(
                format!("switch({})", selector.print()),
                cases.iter().map(|case| {
                    let values = case.selectors.iter().filter_map(|sel| match sel {
                        CaseSelector::Value(lit) => Some(lit.print()),
                        CaseSelector::Default => None,
                    });
                    let has_default = case.selectors.contains(&CaseSelector::Default);
                    let labels = values
                        .map(|value| format!("case {value}"))
                        .chain(has_default.then(|| "default".to_string()))
                        .reduce(|a, b| format!("{a}, {}", b.trim_start_matches("case ")))
                        .unwrap_or_default();
                    pretty::braced_block(format!("{labels}:"), block(&case.body))
                }),
            ),

            Statement::Break => "break;".into(),
            Statement::Continue => "continue;".into(),
            Statement::Return(None) => "return;".into(),
            Statement::Return(Some(e)) => format!("return {};", e.print()).into(),
            Statement::Discard => "discard;".into(),
        }
    }
}

impl Print for Expr {
    type Output = String;
    fn print(&self) -> String {
        match self {
            Expr::Ident(name) => name.clone(),
            Expr::Literal(lit) => lit.print(),
            Expr::Binary { op, lhs, rhs } => {
                format!("({} {} {})", lhs.print(), op.token(), rhs.print())
            }
            Expr::Unary { op, operand } => format!("{}({})", op.token(), operand.print()),
            Expr::Call { callee, args } => {
                format!("{callee}({})", args.iter().map(|arg| arg.print()).join(", "))
            }
            Expr::Member { base, member } => format!("{}.{member}", base.print()),
            Expr::Index { base, index } => format!("{}[{}]", base.print(), index.print()),
            Expr::AddrOf(e) => format!("&{}", e.print()),
            Expr::Deref(e) => format!("(*{})", e.print()),
        }
    }
}

impl Print for Literal {
    type Output = String;
    fn print(&self) -> String {
        match *self {
            Literal::Bool(b) => b.to_string(),
            // `-2147483648i` would be parsed as the negation of an out of range literal.
            Literal::I32(i32::MIN) => "i32(-2147483648)".to_string(),
            Literal::I32(x) => format!("{x}i"),
            Literal::U32(x) => format!("{x}u"),
            Literal::F32(x) => format!("{}f", float_text(x)),
            Literal::F16(x) => format!("{}h", float_text(x)),
        }
    }
}

/// Shortest text for a (finite) float, which always includes a `.` or exponent.
fn float_text(x: f32) -> String {
    if x.fract() == 0.0 && x.abs() < 1e16 {
        format!("{x:.1}")
    } else {
        format!("{x:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{BinaryOp, Case, UnaryOp};

    #[test]
    fn literals() {
        assert_eq!(Literal::F32(1.0).print(), "1.0f");
        assert_eq!(Literal::F32(-0.5).print(), "-0.5f");
        assert_eq!(Literal::F32(0.0).print(), "0.0f");
        assert_eq!(Literal::I32(-1).print(), "-1i");
        assert_eq!(Literal::I32(i32::MIN).print(), "i32(-2147483648)");
        assert_eq!(Literal::U32(7).print(), "7u");
        assert_eq!(Literal::Bool(false).print(), "false");
    }

    #[test]
    fn expressions_are_parenthesized() {
        let e = Expr::unary(
            UnaryOp::Not,
            Expr::binary(BinaryOp::NotEqual, Expr::ident("a"), Expr::ident("b")),
        );
        assert_eq!(e.print(), "!((a != b))");

        let ptr = Expr::ident("p").deref().member("x");
        assert_eq!(ptr.print(), "(*p).x");
        assert_eq!(Expr::ident("p").deref().addr_of().print(), "p");
    }

    #[test]
    fn switch_labels() {
        let stmt = Statement::Switch {
            selector: Expr::Literal(Literal::U32(1)),
            cases: vec![
                Case { selectors: vec![CaseSelector::Value(Literal::U32(0))], body: vec![] },
                Case {
                    selectors: vec![CaseSelector::Value(Literal::U32(1)), CaseSelector::Default],
                    body: vec![Statement::Break],
                },
            ],
        };
        assert_eq!(
            statements_to_string(&[stmt]),
            "switch(1u) {\n  case 0u: {\n  }\n  case 1u, default: {\n    break;\n  }\n}\n"
        );
    }

    #[test]
    fn if_else_and_loop() {
        let stmt = Statement::Loop {
            body: vec![Statement::If {
                cond: Expr::ident("c"),
                then_body: vec![],
                else_body: vec![Statement::Break],
            }],
            continuing: vec![Statement::Assign {
                lhs: Expr::ident("x"),
                rhs: Expr::Literal(Literal::I32(1)),
            }],
        };
        assert_eq!(
            statements_to_string(&[stmt]),
            "loop {\n  if (c) {\n  } else {\n    break;\n  }\n  continuing {\n    x = 1i;\n  }\n}\n"
        );
    }
}
