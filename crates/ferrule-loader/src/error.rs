// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use std::fmt;
use thiserror::Error;

/// Result type for loader operations
pub type Result<T> = std::result::Result<T, LoaderError>;

/// A 1-based position inside a source text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Position {
    /// Line number, starting at 1
    pub line: usize,
    /// Column number, starting at 1
    pub column: usize,
}

impl Position {
    /// Compute the position of a byte offset in `source`
    pub fn from_offset(source: &str, offset: usize) -> Self {
        let offset = offset.min(source.len());
        let before = &source[..offset];
        let line = before.matches('\n').count() + 1;
        let line_start = before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        let column = before[line_start..].chars().count() + 1;
        Self { line, column }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Coarse classification of a [`LoaderError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed specifier or mapping cycle
    Resolution,
    /// Address unreachable
    Fetch,
    /// Syntax or semantic failure while translating
    Compile,
    /// Failure in an instantiate hook or while evaluating a body
    Instantiate,
    /// Invalid loader options
    Config,
}

/// Errors that can occur while loading modules
///
/// Errors are `Clone` so that one failed load can reject every waiter that
/// joined it.
#[derive(Debug, Clone, Error)]
pub enum LoaderError {
    /// Specifier could not be turned into a canonical name
    #[error("ResolutionError: cannot resolve '{specifier}': {reason}")]
    Resolution {
        /// The specifier being resolved
        specifier: String,
        /// Reason for failure
        reason: String,
    },

    /// Source text could not be retrieved
    #[error("FetchError: cannot fetch '{address}': {reason}")]
    Fetch {
        /// The located address
        address: String,
        /// Reason for failure
        reason: String,
    },

    /// Source text is not valid code
    #[error("CompileError: {name}{}: {message}", .position.map(|p| format!(":{p}")).unwrap_or_default())]
    Compile {
        /// Name of the compiled unit
        name: String,
        /// Where the problem was found, if known
        position: Option<Position>,
        /// Description of the problem
        message: String,
    },

    /// Instantiation or evaluation failed
    #[error("InstantiateError: {name}: {reason}")]
    Instantiate {
        /// Name of the module being instantiated
        name: String,
        /// Reason for failure
        reason: String,
    },

    /// Loader options are invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoaderError {
    /// Create a resolution error
    pub fn resolution(specifier: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolution {
            specifier: specifier.into(),
            reason: reason.into(),
        }
    }

    /// Create a fetch error
    pub fn fetch(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Fetch {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// Create a compile error
    pub fn compile(
        name: impl Into<String>,
        position: Option<Position>,
        message: impl Into<String>,
    ) -> Self {
        Self::Compile {
            name: name.into(),
            position,
            message: message.into(),
        }
    }

    /// Create an instantiate error
    pub fn instantiate(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Instantiate {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// The kind of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Resolution { .. } => ErrorKind::Resolution,
            Self::Fetch { .. } => ErrorKind::Fetch,
            Self::Compile { .. } => ErrorKind::Compile,
            Self::Instantiate { .. } => ErrorKind::Instantiate,
            Self::Config(_) => ErrorKind::Config,
        }
    }
}

impl From<serde_json::Error> for LoaderError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_position_from_offset() {
        let src = "var a = 1;\nvar b = ;\n";
        assert_eq!(Position::from_offset(src, 0), Position { line: 1, column: 1 });
        assert_eq!(Position::from_offset(src, 19), Position { line: 2, column: 9 });
    }

    #[test]
    fn test_compile_error_display() {
        let err = LoaderError::compile("a", Some(Position { line: 2, column: 3 }), "unexpected ';'");
        assert_eq!(err.to_string(), "CompileError: a:2:3: unexpected ';'");
        assert_eq!(err.kind(), ErrorKind::Compile);

        let err = LoaderError::compile("b", None, "bad");
        assert_eq!(err.to_string(), "CompileError: b: bad");
    }
}
