// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Canonical printing: one statement per line

use std::fmt::Write;

use super::ast::*;
use crate::value::Value;

/// Print one statement without a trailing newline
pub fn print_statement(stmt: &Statement) -> String {
    let mut out = String::new();
    match &stmt.kind {
        StatementKind::Import { bindings, source } => {
            out.push_str("import ");
            match bindings.as_slice() {
                [] => {}
                [ImportBinding::Namespace(local)] => {
                    let _ = write!(out, "* as {} from ", local);
                }
                bindings => {
                    let names: Vec<String> = bindings
                        .iter()
                        .map(|binding| match binding {
                            ImportBinding::Named { imported, local } if imported == local => {
                                imported.clone()
                            }
                            ImportBinding::Named { imported, local } => {
                                format!("{} as {}", imported, local)
                            }
                            ImportBinding::Namespace(local) => format!("* as {}", local),
                        })
                        .collect();
                    let _ = write!(out, "{{{}}} from ", names.join(", "));
                }
            }
            out.push_str(&quote(source));
        }
        StatementKind::ModuleImport { local, source } => {
            let _ = write!(out, "module {} from {}", local, quote(source));
        }
        StatementKind::ExportVar(declarators) => {
            out.push_str("export ");
            print_declarators(&mut out, declarators);
        }
        StatementKind::ExportNamed { specifiers, source } => {
            let names: Vec<String> = specifiers
                .iter()
                .map(|s| {
                    if s.local == s.exported {
                        s.local.clone()
                    } else {
                        format!("{} as {}", s.local, s.exported)
                    }
                })
                .collect();
            let _ = write!(out, "export {{{}}}", names.join(", "));
            if let Some(source) = source {
                let _ = write!(out, " from {}", quote(source));
            }
        }
        StatementKind::ExportAll(source) => {
            let _ = write!(out, "export * from {}", quote(source));
        }
        StatementKind::ExportDefault(expr) => {
            out.push_str("export default ");
            print_expression(&mut out, expr);
        }
        StatementKind::Var(declarators) => print_declarators(&mut out, declarators),
        StatementKind::Expression(expr) => print_expression(&mut out, expr),
    }
    out.push(';');
    out
}

fn print_declarators(out: &mut String, declarators: &[Declarator]) {
    out.push_str("var ");
    for (i, declarator) in declarators.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&declarator.name);
        if let Some(init) = &declarator.init {
            out.push_str(" = ");
            print_expression(out, init);
        }
    }
}

/// Print an expression, parenthesizing every compound operand
pub fn print_expression(out: &mut String, expr: &Expression) {
    match expr {
        Expression::Number(n) => out.push_str(&Value::Number(*n).to_string()),
        Expression::String(s) => out.push_str(&quote(s)),
        Expression::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        Expression::Null => out.push_str("null"),
        Expression::Identifier(name) => out.push_str(name),
        Expression::This => out.push_str("this"),
        Expression::Array(elements) => {
            out.push('[');
            for (i, element) in elements.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expression(out, element);
            }
            out.push(']');
        }
        Expression::Member { object, property } => {
            print_operand(out, object);
            out.push('.');
            out.push_str(property);
        }
        Expression::Index { object, index } => {
            print_operand(out, object);
            out.push('[');
            print_expression(out, index);
            out.push(']');
        }
        Expression::Negate(operand) => {
            out.push('-');
            print_operand(out, operand);
        }
        Expression::Binary { op, left, right } => {
            print_operand(out, left);
            let _ = write!(out, " {} ", op.as_str());
            print_operand(out, right);
        }
        Expression::Assign { add, target, value } => {
            print_expression(out, target);
            out.push_str(if *add { " += " } else { " = " });
            print_expression(out, value);
        }
        Expression::Increment(target) => {
            print_expression(out, target);
            out.push_str("++");
        }
    }
}

fn print_operand(out: &mut String, expr: &Expression) {
    let compound = matches!(
        expr,
        Expression::Binary { .. }
            | Expression::Assign { .. }
            | Expression::Negate(_)
            | Expression::Increment(_)
    ) || matches!(expr, Expression::Number(n) if *n < 0.0);
    if compound {
        out.push('(');
        print_expression(out, expr);
        out.push(')');
    } else {
        print_expression(out, expr);
    }
}

/// Double-quoted string literal
pub fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}
