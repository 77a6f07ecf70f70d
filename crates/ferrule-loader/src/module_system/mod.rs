// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module resolution and loading
//!
//! - [`Normalizer`] turns a specifier plus referrer into a canonical name
//! - [`PackageMap`] rewrites canonical names by prefix, with semver aliases
//! - [`LoaderPipeline`] runs locate, fetch, translate and instantiate
//! - [`ModuleRegistry`] holds one record per canonical name and evaluates it once
//! - [`SourceMapIndex`] keeps the source maps generated by compiles
//! - [`Loader`] ties them together behind the request surface

pub mod fetcher;
mod loader;
pub mod normalizer;
pub mod package_map;
pub mod pipeline;
pub mod registry;
pub mod source_map;

pub use fetcher::{FileLoader, FsFileLoader, MemoryFileLoader};
pub use loader::{HOST_MODULE, LoadOptions, Loader, LoaderBuilder};
pub use normalizer::{Normalizer, SpecifierKind, is_absolute_url};
pub use package_map::{
    MapEntry, PackageMap, VersionError, VersionedName, parse_versioned, prefix_matches,
    semver_map,
};
pub use pipeline::{
    CompileOptions, Compiled, Compiler, DefaultFetch, DefaultInstantiate, DefaultLocate,
    DefaultTranslate, Engine, FetchHook, Instantiation, InstantiateHook, LinkedModule, Load,
    LoaderPipeline, LocateHook, Metadata, ModuleBody, ModuleImports, SourceKind, TranslateHook,
};
pub use registry::{Dependency, EvaluationState, ModuleRecord, ModuleRegistry};
pub use source_map::{OriginalPosition, SourceMap, SourceMapBuilder, SourceMapEntry, SourceMapIndex};
