// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Syntax tree of the module dialect

use super::lexer::Span;

/// A parsed compilation unit
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Top-level statements in source order
    pub body: Vec<Statement>,
}

impl Program {
    /// Specifiers this program requests, in order of first appearance
    pub fn requests(&self) -> Vec<String> {
        let mut requests: Vec<String> = Vec::new();
        for stmt in &self.body {
            if let Some(source) = stmt.kind.module_source() {
                if !requests.iter().any(|r| r == source) {
                    requests.push(source.to_string());
                }
            }
        }
        requests
    }
}

/// A statement with its source span
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// What the statement is
    pub kind: StatementKind,
    /// Where it was written
    pub span: Span,
}

/// `name = init` inside a `var`
#[derive(Debug, Clone, PartialEq)]
pub struct Declarator {
    /// Bound name
    pub name: String,
    /// Initializer
    pub init: Option<Expression>,
}

/// One binding of an import clause
#[derive(Debug, Clone, PartialEq)]
pub enum ImportBinding {
    /// `{imported as local}`
    Named {
        /// Export name in the source module
        imported: String,
        /// Local binding
        local: String,
    },
    /// `* as local`
    Namespace(String),
}

/// `local as exported` inside an export clause
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSpecifier {
    /// Local (or re-exported) name
    pub local: String,
    /// Name visible to importers
    pub exported: String,
}

/// Statement kinds
#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    /// `import {...} from "s";`, `import * as ns from "s";` or `import "s";`
    Import {
        /// Bindings, empty for a side-effect import
        bindings: Vec<ImportBinding>,
        /// Requested specifier
        source: String,
    },
    /// `module ns from "s";`
    ModuleImport {
        /// Local namespace binding
        local: String,
        /// Requested specifier
        source: String,
    },
    /// `export var ...;`
    ExportVar(Vec<Declarator>),
    /// `export {...} [from "s"];`
    ExportNamed {
        /// Exported bindings
        specifiers: Vec<ExportSpecifier>,
        /// Source module for re-exports
        source: Option<String>,
    },
    /// `export * from "s";`
    ExportAll(String),
    /// `export default e;`
    ExportDefault(Expression),
    /// `var ...;`
    Var(Vec<Declarator>),
    /// Expression statement
    Expression(Expression),
}

impl StatementKind {
    /// Whether this statement is only legal in module code
    pub fn is_module_syntax(&self) -> bool {
        !matches!(self, StatementKind::Var(_) | StatementKind::Expression(_))
    }

    /// The specifier this statement requests, if any
    pub fn module_source(&self) -> Option<&str> {
        match self {
            StatementKind::Import { source, .. }
            | StatementKind::ModuleImport { source, .. }
            | StatementKind::ExportAll(source) => Some(source),
            StatementKind::ExportNamed { source, .. } => source.as_deref(),
            _ => None,
        }
    }
}

/// Binary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
}

impl BinaryOp {
    /// Source form
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
        }
    }
}

/// Expressions
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Numeric literal
    Number(f64),
    /// String literal
    String(String),
    /// `true` / `false`
    Boolean(bool),
    /// `null`
    Null,
    /// Identifier reference
    Identifier(String),
    /// `this`
    This,
    /// `[a, b]`
    Array(Vec<Expression>),
    /// `object.property`
    Member {
        /// Object
        object: Box<Expression>,
        /// Property name
        property: String,
    },
    /// `object[index]`
    Index {
        /// Object
        object: Box<Expression>,
        /// Index expression
        index: Box<Expression>,
    },
    /// `-e`
    Negate(Box<Expression>),
    /// `left op right`
    Binary {
        /// Operator
        op: BinaryOp,
        /// Left operand
        left: Box<Expression>,
        /// Right operand
        right: Box<Expression>,
    },
    /// `target = value` or `target += value`
    Assign {
        /// Whether this is `+=`
        add: bool,
        /// Identifier, member or index target
        target: Box<Expression>,
        /// Assigned value
        value: Box<Expression>,
    },
    /// `target++`
    Increment(Box<Expression>),
}

impl Expression {
    /// Whether this expression can be assigned to
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            Expression::Identifier(_) | Expression::Member { .. } | Expression::Index { .. }
        )
    }
}
