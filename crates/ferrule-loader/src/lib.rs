// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # Ferrule Loader
//!
//! An asynchronous module loader. Requests name modules by specifier; the
//! loader normalizes them against a referrer, rewrites them through a package
//! map, then drives each one through a four stage pipeline (locate, fetch,
//! translate, instantiate) before evaluating the dependency graph exactly once.
//!
//! ## Features
//!
//! - **Normalization**: relative specifiers, `..` segments, absolute URLs
//! - **Package maps**: prefix aliasing with per-referrer rules and semver names
//! - **Pluggable stages**: every pipeline step is a replaceable async hook
//! - **Coalescing**: concurrent requests for one module share a single load
//! - **Source maps**: generated per compile and queryable by module name
//!
//! ## Usage
//!
//! ```rust,no_run
//! use ferrule_loader::{Loader, LoaderOptions};
//!
//! # async fn run() -> ferrule_loader::Result<()> {
//! let loader = Loader::new(LoaderOptions::default())?;
//! let ns = loader.import("./main", Default::default()).await?;
//! println!("{:?}", ns.get("default"));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dialect;
pub mod error;
pub mod module_system;
pub mod reporter;
pub mod value;

// Re-exports
pub use config::{LoaderOptions, ModuleMode};
pub use error::{ErrorKind, LoaderError, Result};
pub use module_system::{LoadOptions, Loader, LoaderBuilder};
pub use reporter::{ErrorReporter, MutedErrorReporter, TracingReporter};
pub use value::{Namespace, Value};

/// Version of the loader crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
