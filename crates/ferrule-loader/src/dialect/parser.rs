// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Recursive descent parser for the module dialect

use thiserror::Error;

use super::ast::*;
use super::lexer::{Scanner, Span, Token, TokenKind};

/// A syntax error at a byte offset
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SyntaxError {
    /// What went wrong
    pub message: String,
    /// Byte offset of the offending token
    pub offset: usize,
}

/// A recursive descent parser with one token of lookahead.
pub struct Parser<'a> {
    scanner: Scanner<'a>,
    current: Token,
    next: Token,
    previous: Token,
}

impl<'a> Parser<'a> {
    /// Creates a new parser for the given source code.
    pub fn new(source: &'a str) -> Self {
        let mut scanner = Scanner::new(source);
        let current = scanner.next_token();
        let next = scanner.next_token();
        Self {
            scanner,
            current,
            next,
            previous: Token::new(TokenKind::Eof, Span::default()),
        }
    }

    /// Parses the whole source.
    pub fn parse_program(&mut self) -> Result<Program, SyntaxError> {
        let mut body = Vec::new();
        while !self.is_at_end() {
            if self.check(&TokenKind::Semicolon) {
                self.advance();
                continue;
            }
            body.push(self.parse_statement()?);
        }
        Ok(Program { body })
    }

    fn parse_statement(&mut self) -> Result<Statement, SyntaxError> {
        let start = self.current.span.start;
        let kind = match &self.current.kind {
            TokenKind::Import => self.parse_import()?,
            TokenKind::Export => self.parse_export()?,
            TokenKind::Var => {
                self.advance();
                StatementKind::Var(self.parse_declarators()?)
            }
            TokenKind::Identifier(word)
                if word == "module" && matches!(self.next.kind, TokenKind::Identifier(_)) =>
            {
                self.parse_module_import()?
            }
            _ => StatementKind::Expression(self.parse_expression()?),
        };
        self.expect_semicolon()?;
        Ok(Statement {
            kind,
            span: Span::new(start, self.previous.span.end),
        })
    }

    fn parse_import(&mut self) -> Result<StatementKind, SyntaxError> {
        self.advance(); // consume 'import'

        if let TokenKind::String(source) = &self.current.kind {
            let source = source.clone();
            self.advance();
            return Ok(StatementKind::Import {
                bindings: Vec::new(),
                source,
            });
        }

        let bindings = if self.check(&TokenKind::Star) {
            self.advance();
            self.expect_word("as")?;
            vec![ImportBinding::Namespace(self.expect_identifier()?)]
        } else {
            self.expect(&TokenKind::LeftBrace)?;
            let mut bindings = Vec::new();
            while !self.check(&TokenKind::RightBrace) {
                let imported = self.expect_property_name()?;
                let local = if self.check_word("as") {
                    self.advance();
                    self.expect_identifier()?
                } else {
                    imported.clone()
                };
                bindings.push(ImportBinding::Named { imported, local });
                if !self.check(&TokenKind::Comma) {
                    break;
                }
                self.advance();
            }
            self.expect(&TokenKind::RightBrace)?;
            bindings
        };

        self.expect_word("from")?;
        let source = self.expect_string()?;
        Ok(StatementKind::Import { bindings, source })
    }

    fn parse_module_import(&mut self) -> Result<StatementKind, SyntaxError> {
        self.advance(); // consume 'module'
        let local = self.expect_identifier()?;
        self.expect_word("from")?;
        let source = self.expect_string()?;
        Ok(StatementKind::ModuleImport { local, source })
    }

    fn parse_export(&mut self) -> Result<StatementKind, SyntaxError> {
        self.advance(); // consume 'export'

        match &self.current.kind {
            TokenKind::Var => {
                self.advance();
                Ok(StatementKind::ExportVar(self.parse_declarators()?))
            }
            TokenKind::Default => {
                self.advance();
                Ok(StatementKind::ExportDefault(self.parse_expression()?))
            }
            TokenKind::Star => {
                self.advance();
                self.expect_word("from")?;
                Ok(StatementKind::ExportAll(self.expect_string()?))
            }
            TokenKind::LeftBrace => {
                self.advance();
                let mut specifiers = Vec::new();
                while !self.check(&TokenKind::RightBrace) {
                    let local = self.expect_property_name()?;
                    let exported = if self.check_word("as") {
                        self.advance();
                        self.expect_property_name()?
                    } else {
                        local.clone()
                    };
                    specifiers.push(ExportSpecifier { local, exported });
                    if !self.check(&TokenKind::Comma) {
                        break;
                    }
                    self.advance();
                }
                self.expect(&TokenKind::RightBrace)?;

                let source = if self.check_word("from") {
                    self.advance();
                    Some(self.expect_string()?)
                } else {
                    None
                };
                Ok(StatementKind::ExportNamed { specifiers, source })
            }
            _ => Err(self.error_here("expected 'var', 'default', '*' or '{' after 'export'")),
        }
    }

    fn parse_declarators(&mut self) -> Result<Vec<Declarator>, SyntaxError> {
        let mut declarators = Vec::new();
        loop {
            let name = self.expect_identifier()?;
            let init = if self.check(&TokenKind::Equal) {
                self.advance();
                Some(self.parse_expression()?)
            } else {
                None
            };
            declarators.push(Declarator { name, init });

            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        Ok(declarators)
    }

    /// Parses an expression.
    pub fn parse_expression(&mut self) -> Result<Expression, SyntaxError> {
        let start = self.current.span.start;
        let target = self.parse_additive()?;

        let add = match self.current.kind {
            TokenKind::Equal => false,
            TokenKind::PlusEqual => true,
            _ => return Ok(target),
        };
        if !target.is_assignable() {
            return Err(SyntaxError {
                message: "invalid assignment target".to_string(),
                offset: start,
            });
        }
        self.advance();
        let value = self.parse_expression()?;
        Ok(Expression::Assign {
            add,
            target: Box::new(target),
            value: Box::new(value),
        })
    }

    fn parse_additive(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let right = self.parse_multiplicative()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expression, SyntaxError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.current.kind {
                TokenKind::Star => BinaryOp::Mul,
                TokenKind::Slash => BinaryOp::Div,
                _ => break,
            };
            self.advance();
            let right = self.parse_unary()?;
            left = Expression::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expression, SyntaxError> {
        if self.check(&TokenKind::Minus) {
            self.advance();
            return Ok(Expression::Negate(Box::new(self.parse_unary()?)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> Result<Expression, SyntaxError> {
        let start = self.current.span.start;
        let mut expr = self.parse_primary()?;

        loop {
            match &self.current.kind {
                TokenKind::Dot => {
                    self.advance();
                    let property = self.expect_property_name()?;
                    expr = Expression::Member {
                        object: Box::new(expr),
                        property,
                    };
                }
                TokenKind::LeftBracket => {
                    self.advance();
                    let index = self.parse_expression()?;
                    self.expect(&TokenKind::RightBracket)?;
                    expr = Expression::Index {
                        object: Box::new(expr),
                        index: Box::new(index),
                    };
                }
                _ => break,
            }
        }

        if self.check(&TokenKind::PlusPlus) {
            if !expr.is_assignable() {
                return Err(SyntaxError {
                    message: "invalid increment operand".to_string(),
                    offset: start,
                });
            }
            self.advance();
            expr = Expression::Increment(Box::new(expr));
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expression, SyntaxError> {
        let expr = match &self.current.kind {
            TokenKind::Number(n) => Expression::Number(*n),
            TokenKind::String(s) => Expression::String(s.clone()),
            TokenKind::True => Expression::Boolean(true),
            TokenKind::False => Expression::Boolean(false),
            TokenKind::Null => Expression::Null,
            TokenKind::This => Expression::This,
            TokenKind::Identifier(name) => Expression::Identifier(name.clone()),
            TokenKind::LeftBracket => return self.parse_array_literal(),
            TokenKind::LeftParen => {
                self.advance();
                let inner = self.parse_expression()?;
                self.expect(&TokenKind::RightParen)?;
                return Ok(inner);
            }
            _ => return Err(self.unexpected()),
        };
        self.advance();
        Ok(expr)
    }

    fn parse_array_literal(&mut self) -> Result<Expression, SyntaxError> {
        self.advance(); // consume '['
        let mut elements = Vec::new();
        while !self.check(&TokenKind::RightBracket) {
            elements.push(self.parse_expression()?);
            if !self.check(&TokenKind::Comma) {
                break;
            }
            self.advance();
        }
        self.expect(&TokenKind::RightBracket)?;
        Ok(Expression::Array(elements))
    }

    // Token helpers

    fn advance(&mut self) {
        let next = std::mem::replace(&mut self.next, self.scanner.next_token());
        self.previous = std::mem::replace(&mut self.current, next);
    }

    fn check(&self, kind: &TokenKind) -> bool {
        &self.current.kind == kind
    }

    fn check_word(&self, word: &str) -> bool {
        matches!(&self.current.kind, TokenKind::Identifier(name) if name == word)
    }

    fn is_at_end(&self) -> bool {
        self.current.kind == TokenKind::Eof
    }

    fn expect(&mut self, kind: &TokenKind) -> Result<(), SyntaxError> {
        if self.check(kind) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(format!(
                "expected {}, found {}",
                kind.describe(),
                self.current.kind.describe()
            )))
        }
    }

    fn expect_semicolon(&mut self) -> Result<(), SyntaxError> {
        // A final statement may omit its semicolon.
        if self.is_at_end() {
            return Ok(());
        }
        self.expect(&TokenKind::Semicolon)
    }

    fn expect_word(&mut self, word: &str) -> Result<(), SyntaxError> {
        if self.check_word(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.error_here(format!(
                "expected '{}', found {}",
                word,
                self.current.kind.describe()
            )))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, SyntaxError> {
        if let TokenKind::Identifier(name) = &self.current.kind {
            let name = name.clone();
            self.advance();
            Ok(name)
        } else {
            Err(self.error_here(format!(
                "expected identifier, found {}",
                self.current.kind.describe()
            )))
        }
    }

    /// Identifiers and keywords are both valid property and export names.
    fn expect_property_name(&mut self) -> Result<String, SyntaxError> {
        let name = match &self.current.kind {
            TokenKind::Identifier(name) => name.clone(),
            TokenKind::Import => "import".to_string(),
            TokenKind::Export => "export".to_string(),
            TokenKind::Var => "var".to_string(),
            TokenKind::Default => "default".to_string(),
            TokenKind::This => "this".to_string(),
            TokenKind::True => "true".to_string(),
            TokenKind::False => "false".to_string(),
            TokenKind::Null => "null".to_string(),
            _ => {
                return Err(self.error_here(format!(
                    "expected name, found {}",
                    self.current.kind.describe()
                )));
            }
        };
        self.advance();
        Ok(name)
    }

    fn expect_string(&mut self) -> Result<String, SyntaxError> {
        if let TokenKind::String(value) = &self.current.kind {
            let value = value.clone();
            self.advance();
            Ok(value)
        } else {
            Err(self.error_here(format!(
                "expected module specifier string, found {}",
                self.current.kind.describe()
            )))
        }
    }

    fn unexpected(&self) -> SyntaxError {
        self.error_here(format!("unexpected {}", self.current.kind.describe()))
    }

    fn error_here(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: message.into(),
            offset: self.current.span.start,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Program {
        Parser::new(src).parse_program().expect("should parse")
    }

    fn parse_err(src: &str) -> SyntaxError {
        Parser::new(src).parse_program().expect_err("should fail")
    }

    #[test]
    fn test_parse_imports() {
        let program = parse_ok(
            "import {a, b as c} from './x';\nimport * as ns from 'y';\nimport 'z';\nmodule m from './x';",
        );
        assert_eq!(program.body.len(), 4);
        assert_eq!(
            program.body[0].kind,
            StatementKind::Import {
                bindings: vec![
                    ImportBinding::Named {
                        imported: "a".into(),
                        local: "a".into()
                    },
                    ImportBinding::Named {
                        imported: "b".into(),
                        local: "c".into()
                    },
                ],
                source: "./x".into(),
            }
        );
        assert_eq!(
            program.body[3].kind,
            StatementKind::ModuleImport {
                local: "m".into(),
                source: "./x".into()
            }
        );
        assert_eq!(program.requests(), vec!["./x", "y", "z"]);
    }

    #[test]
    fn test_parse_exports() {
        let program = parse_ok(
            "export var d = 4, e;\nexport {name as a} from './test_a';\nexport * from 'b';\nexport default 1 + 2;\nexport {d as default};",
        );
        assert!(program.body.iter().all(|s| s.kind.is_module_syntax()));
        assert_eq!(
            program.body[1].kind,
            StatementKind::ExportNamed {
                specifiers: vec![ExportSpecifier {
                    local: "name".into(),
                    exported: "a".into()
                }],
                source: Some("./test_a".into()),
            }
        );
        assert_eq!(program.requests(), vec!["./test_a", "b"]);
    }

    #[test]
    fn test_module_is_contextual() {
        let program = parse_ok("var module = 1; module + 1;");
        assert!(program.body.iter().all(|s| !s.kind.is_module_syntax()));
    }

    #[test]
    fn test_parse_expressions() {
        let program = parse_ok("this.sideEffect++; x += [1, 'a'][0] * -2; a.b[c] = (1 + 2) / 3");
        assert!(matches!(program.body[0].kind, StatementKind::Expression(Expression::Increment(_))));
        assert!(matches!(
            program.body[1].kind,
            StatementKind::Expression(Expression::Assign { add: true, .. })
        ));
        assert!(matches!(
            program.body[2].kind,
            StatementKind::Expression(Expression::Assign { add: false, .. })
        ));
    }

    #[test]
    fn test_statement_spans() {
        let program = parse_ok("  var a = 1;\nexport var b = a;");
        assert_eq!(program.body[0].span, Span::new(2, 12));
        assert_eq!(program.body[1].span.start, 13);
    }

    #[test]
    fn test_syntax_errors() {
        let err = parse_err("syntax error");
        assert_eq!(err.offset, 7);

        let err = parse_err("['test', SYNTAX ERROR a.name];");
        assert_eq!(err.offset, 16);

        assert!(parse_err("1 = 2;").message.contains("assignment"));
        assert!(parse_err("import {a} 'x';").message.contains("'from'"));
        assert!(parse_err("export 5;").message.contains("after 'export'"));
        assert!(parse_err("'open").message.contains("unterminated"));
    }
}
