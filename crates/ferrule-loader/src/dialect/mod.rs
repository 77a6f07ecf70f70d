// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Default compiler and execution engine
//!
//! A compact module dialect: `import`/`export`/`module ... from` declarations,
//! `var` statements and simple expressions. [`DialectCompiler`] checks and
//! canonicalizes source text, [`Interpreter`] links and runs the result.
//!
//! ```rust
//! use ferrule_loader::dialect::DialectCompiler;
//! use ferrule_loader::module_system::{CompileOptions, Compiler, SourceKind};
//!
//! let options = CompileOptions {
//!     kind: SourceKind::Module,
//!     emit_source_map: true,
//!     name: "m".to_string(),
//!     source_url: "m.js".to_string(),
//! };
//! let compiled = DialectCompiler::new().compile("export var x = 1 + 2;", &options).unwrap();
//! assert_eq!(compiled.code, "export var x = 1 + 2;\n");
//! assert!(compiled.source_map.is_some());
//! ```

pub mod ast;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod printer;

pub use interpreter::{Interpreter, Realm};
pub use parser::{Parser, SyntaxError};

use crate::error::{LoaderError, Position, Result};
use crate::module_system::pipeline::{CompileOptions, Compiled, Compiler, SourceKind};
use crate::module_system::source_map::SourceMapBuilder;

/// Compiler collaborator for the dialect
#[derive(Debug, Clone, Copy, Default)]
pub struct DialectCompiler;

impl DialectCompiler {
    /// Create a compiler
    pub fn new() -> Self {
        Self
    }
}

impl Compiler for DialectCompiler {
    fn compile(&self, source: &str, options: &CompileOptions) -> Result<Compiled> {
        let program = Parser::new(source).parse_program().map_err(|e| {
            LoaderError::compile(
                &options.name,
                Some(Position::from_offset(source, e.offset)),
                e.message,
            )
        })?;

        if options.kind == SourceKind::Script {
            if let Some(stmt) = program.body.iter().find(|s| s.kind.is_module_syntax()) {
                return Err(LoaderError::compile(
                    &options.name,
                    Some(Position::from_offset(source, stmt.span.start)),
                    "module syntax is not allowed in a script",
                ));
            }
        }

        let mut code = String::new();
        let mut map = options
            .emit_source_map
            .then(|| SourceMapBuilder::new(&options.name, &options.source_url, source));
        for stmt in &program.body {
            code.push_str(&printer::print_statement(stmt));
            code.push('\n');
            if let Some(map) = &mut map {
                map.add_line(Some(Position::from_offset(source, stmt.span.start)));
            }
        }

        Ok(Compiled {
            code,
            source_map: map.map(SourceMapBuilder::build),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn options(kind: SourceKind, emit_source_map: bool) -> CompileOptions {
        CompileOptions {
            kind,
            emit_source_map,
            name: "unit".to_string(),
            source_url: "http://example.org/unit.js".to_string(),
        }
    }

    #[test]
    fn test_compile_module_with_source_map() {
        let src = "export {name as a} from './test_a';\nexport var d = 4;\n";
        let compiled = DialectCompiler::new()
            .compile(src, &options(SourceKind::Module, true))
            .unwrap();

        assert_eq!(
            compiled.code,
            "export {name as a} from \"./test_a\";\nexport var d = 4;\n"
        );
        let map = compiled.source_map.unwrap();
        assert_eq!(map.file, "unit");
        assert_eq!(map.source_content_for("http://example.org/unit.js"), Some(src));
        assert_eq!(map.original_position_for(2).map(|p| p.line), Some(2));
    }

    #[test]
    fn test_compile_without_source_map() {
        let compiled = DialectCompiler::new()
            .compile("  var   x=1", &options(SourceKind::Script, false))
            .unwrap();
        assert_eq!(compiled.code, "var x = 1;\n");
        assert!(compiled.source_map.is_none());
    }

    #[test]
    fn test_script_mode_rejects_export() {
        let err = DialectCompiler::new()
            .compile("export var x = 5;", &options(SourceKind::Script, false))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
        match err {
            LoaderError::Compile { position, .. } => {
                assert_eq!(position, Some(Position { line: 1, column: 1 }))
            }
            other => panic!("unexpected error {other:?}"),
        }

        assert!(
            DialectCompiler::new()
                .compile("export var x = 5;", &options(SourceKind::Module, false))
                .is_ok()
        );
    }

    #[test]
    fn test_syntax_error_position() {
        let err = DialectCompiler::new()
            .compile("var a = 1;\nsyntax error", &options(SourceKind::Module, false))
            .unwrap_err();
        assert_eq!(err.to_string(), "CompileError: unit:2:8: expected ';', found identifier 'error'");
    }
}
