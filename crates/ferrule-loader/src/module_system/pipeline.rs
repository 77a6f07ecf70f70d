// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The locate -> fetch -> translate -> instantiate pipeline
//!
//! Each stage is a hook object; [`LoaderPipeline`] runs them in order for one
//! [`Load`]. This module also declares the compiler and execution-engine
//! collaborators the default hooks and the registry talk to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::debug;
use url::Url;

use crate::error::{LoaderError, Result};
use crate::module_system::fetcher::FileLoader;
use crate::module_system::normalizer::is_absolute_url;
use crate::module_system::source_map::SourceMap;
use crate::value::{Namespace, Value};

/// How source text is compiled and evaluated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Non-module top-level code
    Script,
    /// Module code with import/export declarations
    Module,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Script => write!(f, "script"),
            SourceKind::Module => write!(f, "module"),
        }
    }
}

/// Per-load metadata
#[derive(Debug, Clone, Default)]
pub struct Metadata {
    /// Base that `locate` resolves the canonical name against
    pub base_url: String,
    /// Whether translate should emit a source map
    pub source_maps: bool,
    /// Anything else a hook wants to carry along
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl Metadata {
    /// Metadata with the given base URL
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            ..Self::default()
        }
    }
}

/// One resolution/compilation attempt
///
/// Owned by the pipeline run that created it and dropped when it finishes.
#[derive(Debug, Clone)]
pub struct Load {
    /// Canonical name
    pub name: String,
    /// Canonical name of the requesting code
    pub referrer: Option<String>,
    /// Per-load metadata
    pub metadata: Metadata,
    /// Located address
    pub address: Option<String>,
    /// Fetched source text
    pub source: Option<String>,
    /// Translated text
    pub translated: Option<String>,
    /// Source map emitted by translate
    pub source_map: Option<SourceMap>,
    /// Script or module
    pub kind: SourceKind,
    /// Explicit result of the instantiate stage
    pub instantiation: Option<Instantiation>,
}

impl Load {
    /// Create a load for `name`
    pub fn new(name: impl Into<String>, kind: SourceKind, metadata: Metadata) -> Self {
        Self {
            name: name.into(),
            referrer: None,
            metadata,
            address: None,
            source: None,
            translated: None,
            source_map: None,
            kind,
            instantiation: None,
        }
    }

    /// Set the referrer
    pub fn with_referrer(mut self, referrer: Option<String>) -> Self {
        self.referrer = referrer;
        self
    }

    /// Set the address, skipping locate
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    /// Set the source text, skipping fetch
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// The address, or the name when the unit was never located
    pub fn url(&self) -> &str {
        self.address.as_deref().unwrap_or(&self.name)
    }
}

/// Options passed to the compiler collaborator
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// Script or module
    pub kind: SourceKind,
    /// Whether to produce a source map
    pub emit_source_map: bool,
    /// Name of the unit, used in diagnostics and as the map's `file`
    pub name: String,
    /// URL the original source is listed under in the map
    pub source_url: String,
}

/// Output of the compiler collaborator
#[derive(Debug, Clone)]
pub struct Compiled {
    /// Executable text
    pub code: String,
    /// Source map, when one was requested
    pub source_map: Option<SourceMap>,
}

/// Compiler collaborator: turns source text into executable text
pub trait Compiler: Send + Sync {
    /// Compile `source`; fails with a positioned `CompileError` on invalid input
    fn compile(&self, source: &str, options: &CompileOptions) -> Result<Compiled>;
}

/// Namespaces of a module's dependencies, keyed by the specifier as written
#[derive(Debug, Clone, Default)]
pub struct ModuleImports {
    namespaces: HashMap<String, Namespace>,
}

impl ModuleImports {
    /// Create an empty set of imports
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `specifier` to `namespace`
    pub fn insert(&mut self, specifier: impl Into<String>, namespace: Namespace) {
        self.namespaces.insert(specifier.into(), namespace);
    }

    /// Namespace requested under `specifier`
    pub fn get(&self, specifier: &str) -> Option<&Namespace> {
        self.namespaces.get(specifier)
    }
}

/// An executable module body
pub trait ModuleBody: Send + Sync {
    /// Run the body once and return its exports
    fn evaluate(&self, imports: &ModuleImports) -> Result<Namespace>;
}

/// A module's dependency requests plus its body
#[derive(Clone)]
pub struct LinkedModule {
    /// Specifiers the body imports, in source order, without duplicates
    pub requests: Vec<String>,
    /// The body
    pub body: Arc<dyn ModuleBody>,
}

impl fmt::Debug for LinkedModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkedModule")
            .field("requests", &self.requests)
            .finish_non_exhaustive()
    }
}

/// Execution-engine collaborator
pub trait Engine: Send + Sync {
    /// Parse translated module text into requests and a body
    fn link(&self, name: &str, code: &str) -> Result<LinkedModule>;

    /// Run translated script text and return its completion value
    fn run_script(&self, name: &str, code: &str) -> Result<Value>;
}

/// Explicit result of an instantiate hook
#[derive(Debug, Clone)]
pub enum Instantiation {
    /// A module body supplied by the hook
    Module(LinkedModule),
    /// The completion value of a script the hook already ran
    Value(Value),
}

/// Computes an address for a load
#[async_trait]
pub trait LocateHook: Send + Sync {
    /// Address of `load`
    async fn locate(&self, load: &Load) -> Result<String>;
}

/// Retrieves source text for a located load
#[async_trait]
pub trait FetchHook: Send + Sync {
    /// Source text of `load`
    async fn fetch(&self, load: &Load) -> Result<String>;
}

/// Turns fetched source into executable text
#[async_trait]
pub trait TranslateHook: Send + Sync {
    /// Translated text (and optional source map) of `load`
    async fn translate(&self, load: &Load) -> Result<Compiled>;
}

/// Optionally produces an explicit execution result
#[async_trait]
pub trait InstantiateHook: Send + Sync {
    /// `None` lets the registry run the translated text itself
    async fn instantiate(&self, load: &Load) -> Result<Option<Instantiation>>;
}

/// Default locate: `baseURL` + name + default extension
#[derive(Debug, Clone)]
pub struct DefaultLocate {
    extension: String,
}

impl DefaultLocate {
    /// Locate with the given default extension (e.g. `.js`)
    pub fn new(extension: impl Into<String>) -> Self {
        Self {
            extension: extension.into(),
        }
    }

    /// Compute the address of `name` under `base`
    pub fn address(&self, base: &str, name: &str) -> Result<String> {
        let mut path = name.to_string();
        if !self.extension.is_empty() && !path.ends_with(&self.extension) {
            path.push_str(&self.extension);
        }

        if is_absolute_url(&path) {
            return Ok(path);
        }

        if is_absolute_url(base) {
            let mut base = base.to_string();
            if !base.ends_with('/') {
                base.push('/');
            }
            let base = Url::parse(&base).map_err(|e| LoaderError::fetch(name, e.to_string()))?;
            // Keep scoped names (`@org/pkg`) and names containing ':' as plain
            // relative paths rather than letting the URL parser reinterpret them.
            let relative = if path.starts_with('/') {
                path
            } else {
                format!("./{}", path)
            };
            let joined = base
                .join(&relative)
                .map_err(|e| LoaderError::fetch(name, e.to_string()))?;
            return Ok(joined.to_string());
        }

        if path.starts_with('/') || base.is_empty() {
            return Ok(path);
        }
        let separator = if base.ends_with('/') { "" } else { "/" };
        let base = base.strip_prefix("./").unwrap_or(base);
        if base.is_empty() {
            return Ok(path);
        }
        Ok(format!("{}{}{}", base, separator, path))
    }
}

#[async_trait]
impl LocateHook for DefaultLocate {
    async fn locate(&self, load: &Load) -> Result<String> {
        self.address(&load.metadata.base_url, &load.name)
    }
}

/// Default fetch: reads through a [`FileLoader`]
#[derive(Clone)]
pub struct DefaultFetch {
    io: Arc<dyn FileLoader>,
}

impl DefaultFetch {
    /// Fetch through `io`
    pub fn new(io: Arc<dyn FileLoader>) -> Self {
        Self { io }
    }
}

#[async_trait]
impl FetchHook for DefaultFetch {
    async fn fetch(&self, load: &Load) -> Result<String> {
        let address = load
            .address
            .as_deref()
            .ok_or_else(|| LoaderError::fetch(&load.name, "load has no address"))?;
        self.io.fetch_text(address).await
    }
}

/// Default translate: the compiler collaborator, or identity without one
#[derive(Clone, Default)]
pub struct DefaultTranslate {
    compiler: Option<Arc<dyn Compiler>>,
}

impl DefaultTranslate {
    /// Translate with `compiler`, or pass source through when `None`
    pub fn new(compiler: Option<Arc<dyn Compiler>>) -> Self {
        Self { compiler }
    }
}

#[async_trait]
impl TranslateHook for DefaultTranslate {
    async fn translate(&self, load: &Load) -> Result<Compiled> {
        let source = load
            .source
            .as_deref()
            .ok_or_else(|| LoaderError::compile(&load.name, None, "load has no source text"))?;

        match &self.compiler {
            Some(compiler) => {
                let options = CompileOptions {
                    kind: load.kind,
                    emit_source_map: load.metadata.source_maps,
                    name: load.name.clone(),
                    source_url: load.url().to_string(),
                };
                compiler.compile(source, &options)
            }
            None => Ok(Compiled {
                code: source.to_string(),
                source_map: None,
            }),
        }
    }
}

/// Default instantiate: no explicit result
#[derive(Debug, Clone, Default)]
pub struct DefaultInstantiate;

#[async_trait]
impl InstantiateHook for DefaultInstantiate {
    async fn instantiate(&self, _load: &Load) -> Result<Option<Instantiation>> {
        Ok(None)
    }
}

/// Runs the four stages for one load
#[derive(Clone)]
pub struct LoaderPipeline {
    locate: Arc<dyn LocateHook>,
    fetch: Arc<dyn FetchHook>,
    translate: Arc<dyn TranslateHook>,
    instantiate: Arc<dyn InstantiateHook>,
}

impl LoaderPipeline {
    /// Compose a pipeline from stage hooks
    pub fn new(
        locate: Arc<dyn LocateHook>,
        fetch: Arc<dyn FetchHook>,
        translate: Arc<dyn TranslateHook>,
        instantiate: Arc<dyn InstantiateHook>,
    ) -> Self {
        Self {
            locate,
            fetch,
            translate,
            instantiate,
        }
    }

    /// Run locate
    pub async fn locate(&self, load: &Load) -> Result<String> {
        self.locate.locate(load).await
    }

    /// Run fetch
    pub async fn fetch(&self, load: &Load) -> Result<String> {
        self.fetch.fetch(load).await
    }

    /// Run translate
    pub async fn translate(&self, load: &Load) -> Result<Compiled> {
        self.translate.translate(load).await
    }

    /// Run instantiate
    pub async fn instantiate(&self, load: &Load) -> Result<Option<Instantiation>> {
        self.instantiate.instantiate(load).await
    }

    /// Run every stage in order.
    ///
    /// Locate is skipped when the load already has an address, fetch when it
    /// already has source text. The first failing stage rejects the load.
    pub async fn load(&self, mut load: Load) -> Result<Load> {
        if load.source.is_none() {
            if load.address.is_none() {
                let address = self.locate(&load).await?;
                debug!("Located {} at {}", load.name, address);
                load.address = Some(address);
            }
            let source = self.fetch(&load).await?;
            debug!("Fetched {} ({} bytes)", load.url(), source.len());
            load.source = Some(source);
        }

        let compiled = self.translate(&load).await?;
        load.translated = Some(compiled.code);
        load.source_map = compiled.source_map;

        load.instantiation = self.instantiate(&load).await?;
        Ok(load)
    }
}

impl fmt::Debug for LoaderPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoaderPipeline").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::module_system::fetcher::MemoryFileLoader;

    fn pipeline(io: MemoryFileLoader) -> LoaderPipeline {
        LoaderPipeline::new(
            Arc::new(DefaultLocate::new(".js")),
            Arc::new(DefaultFetch::new(Arc::new(io))),
            Arc::new(DefaultTranslate::new(None)),
            Arc::new(DefaultInstantiate),
        )
    }

    #[test]
    fn test_locate_address() {
        let locate = DefaultLocate::new(".js");
        let base = "http://example.org/a/";

        assert_eq!(
            locate.address(base, "@abc/def").unwrap(),
            "http://example.org/a/@abc/def.js"
        );
        assert_eq!(
            locate.address(base, "abc/def").unwrap(),
            "http://example.org/a/abc/def.js"
        );
        assert_eq!(
            locate.address(base, "abc/def.js").unwrap(),
            "http://example.org/a/abc/def.js"
        );
        assert_eq!(
            locate.address("http://example.org/a", "x").unwrap(),
            "http://example.org/a/x.js"
        );
    }

    #[test]
    fn test_locate_plain_paths() {
        let locate = DefaultLocate::new(".js");
        assert_eq!(locate.address("./", "lib/x").unwrap(), "lib/x.js");
        assert_eq!(locate.address("fixtures", "lib/x").unwrap(), "fixtures/lib/x.js");
        assert_eq!(locate.address("/srv/", "@org/y").unwrap(), "/srv/@org/y.js");
        assert_eq!(locate.address("/srv", "/abs/z").unwrap(), "/abs/z.js");
        assert_eq!(
            locate.address("/srv", "http://cdn.example/m").unwrap(),
            "http://cdn.example/m.js"
        );
    }

    #[tokio::test]
    async fn test_load_runs_stages() {
        let io = MemoryFileLoader::new().with("lib/a.js", "export var a = 1;");
        let load = Load::new("lib/a", SourceKind::Module, Metadata::new("./"));

        let load = pipeline(io).load(load).await.unwrap();
        assert_eq!(load.address.as_deref(), Some("lib/a.js"));
        assert_eq!(load.source.as_deref(), Some("export var a = 1;"));
        assert_eq!(load.translated, load.source);
        assert!(load.instantiation.is_none());
        assert!(load.source_map.is_none());
    }

    #[tokio::test]
    async fn test_load_fetch_failure() {
        let load = Load::new("missing", SourceKind::Module, Metadata::new("./"));
        let err = pipeline(MemoryFileLoader::new()).load(load).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Fetch);
    }

    #[tokio::test]
    async fn test_load_with_source_skips_fetch() {
        let load = Load::new("inline", SourceKind::Script, Metadata::default()).with_source("1 + 1;");
        let load = pipeline(MemoryFileLoader::new()).load(load).await.unwrap();
        assert!(load.address.is_none());
        assert_eq!(load.translated.as_deref(), Some("1 + 1;"));
        assert_eq!(load.url(), "inline");
    }

    struct FixedInstantiate;

    #[async_trait]
    impl InstantiateHook for FixedInstantiate {
        async fn instantiate(&self, _load: &Load) -> Result<Option<Instantiation>> {
            Ok(Some(Instantiation::Value(Value::from(7.0))))
        }
    }

    #[tokio::test]
    async fn test_custom_instantiate_hook() {
        let pipeline = LoaderPipeline::new(
            Arc::new(DefaultLocate::new(".js")),
            Arc::new(DefaultFetch::new(Arc::new(MemoryFileLoader::new()))),
            Arc::new(DefaultTranslate::new(None)),
            Arc::new(FixedInstantiate),
        );
        let load = Load::new("x", SourceKind::Script, Metadata::default()).with_source("");
        let load = pipeline.load(load).await.unwrap();
        assert!(matches!(load.instantiation, Some(Instantiation::Value(Value::Number(n))) if n == 7.0));
    }
}
