// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The loader: request surface over normalizer, pipeline and registry
//!
//! A [`Loader`] owns its registry, package map, source-map index and
//! collaborators. Cloning it is cheap and every clone shares that state.
//!
//! Module graphs load in two phases. Every unit of the graph is fetched,
//! translated and linked first; only when the whole graph has succeeded are
//! its records committed and the requested module evaluated. A failure
//! anywhere commits nothing.
//!
//! A name stays in the pending table from the start of its load until its
//! record is committed, so every request arriving in between joins the same
//! load instead of running the pipeline again.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, FutureExt, Shared, try_join_all};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

use crate::config::{LoaderOptions, ModuleMode};
use crate::dialect::{DialectCompiler, Interpreter};
use crate::error::{LoaderError, Result};
use crate::module_system::fetcher::{FileLoader, FsFileLoader};
use crate::module_system::normalizer::Normalizer;
use crate::module_system::package_map::PackageMap;
use crate::module_system::pipeline::{
    Compiled, Compiler, DefaultFetch, DefaultInstantiate, DefaultLocate, DefaultTranslate, Engine,
    FetchHook, Instantiation, InstantiateHook, Load, LoaderPipeline, LocateHook, Metadata,
    ModuleBody, SourceKind, TranslateHook,
};
use crate::module_system::registry::{Dependency, EvaluationState, ModuleRecord, ModuleRegistry};
use crate::module_system::source_map::{SourceMapEntry, SourceMapIndex};
use crate::reporter::{ErrorReporter, TracingReporter};
use crate::value::{Namespace, Value};

/// Name of the host module every loader starts with
pub const HOST_MODULE: &str = "ferrule@";

/// Per-request options
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Name for a `script` (normalized; keys its source map)
    pub name: Option<String>,
    /// Canonical name of the requesting code
    pub referrer_name: Option<String>,
    /// Overrides the loader's `baseURL` for this request
    pub base_url: Option<String>,
    /// Address reported for inline source
    pub address: Option<String>,
    /// Overrides the loader's module mode for `define`
    pub mode: Option<ModuleMode>,
    /// Extra metadata handed to hooks
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl LoadOptions {
    /// Empty options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the script name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the referrer
    pub fn referrer(mut self, referrer: impl Into<String>) -> Self {
        self.referrer_name = Some(referrer.into());
        self
    }

    /// Set the module mode
    pub fn mode(mut self, mode: ModuleMode) -> Self {
        self.mode = Some(mode);
        self
    }
}

/// A fetched, translated and linked module not yet committed
struct LinkedUnit {
    name: String,
    address: Option<String>,
    dependencies: Vec<Dependency>,
    body: Arc<dyn ModuleBody>,
}

impl LinkedUnit {
    fn record(&self) -> ModuleRecord {
        ModuleRecord::defined(
            self.name.clone(),
            self.address.clone(),
            self.dependencies.clone(),
            Arc::clone(&self.body),
        )
    }
}

type SharedUnit = Shared<BoxFuture<'static, Result<Arc<LinkedUnit>>>>;

struct LoaderInner {
    options: RwLock<LoaderOptions>,
    map: RwLock<Arc<PackageMap>>,
    pipeline: LoaderPipeline,
    engine: Arc<dyn Engine>,
    registry: ModuleRegistry,
    pending: DashMap<String, SharedUnit>,
    defining: DashMap<String, ()>,
    source_maps: SourceMapIndex,
    reporter: Arc<dyn ErrorReporter>,
    anonymous: AtomicUsize,
}

/// Asynchronous module loader
#[derive(Clone)]
pub struct Loader {
    inner: Arc<LoaderInner>,
}

/// Releases an in-flight `define` claim
struct DefineClaim<'a> {
    defining: &'a DashMap<String, ()>,
    name: String,
}

impl Drop for DefineClaim<'_> {
    fn drop(&mut self) {
        self.defining.remove(&self.name);
    }
}

impl Loader {
    /// Start building a loader
    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::new()
    }

    /// A loader with default collaborators over the local filesystem
    pub fn new(options: LoaderOptions) -> Result<Self> {
        LoaderBuilder::new().options(options).build()
    }

    // Configuration

    /// Snapshot of the current options
    pub fn options(&self) -> LoaderOptions {
        self.inner.options.read().clone()
    }

    /// Toggle source-map generation for later compiles
    pub fn set_source_maps(&self, enabled: bool) {
        self.inner.options.write().source_maps = enabled;
    }

    /// Change how `define` evaluates bodies
    pub fn set_module_mode(&self, mode: ModuleMode) {
        self.inner.options.write().modules = mode;
    }

    /// Change the base that `locate` resolves against
    pub fn set_base_url(&self, base_url: impl Into<String>) {
        self.inner.options.write().base_url = base_url.into();
    }

    /// The current package map
    pub fn map(&self) -> Arc<PackageMap> {
        Arc::clone(&self.inner.map.read())
    }

    /// Replace the package map as a whole
    pub fn set_map(&self, map: PackageMap) {
        *self.inner.map.write() = Arc::new(map);
    }

    /// The failure reporter
    pub fn reporter(&self) -> &Arc<dyn ErrorReporter> {
        &self.inner.reporter
    }

    // Hook API

    /// Resolve `specifier` requested by `referrer` to a canonical name
    pub fn normalize(&self, specifier: &str, referrer: Option<&str>) -> Result<String> {
        self.reported(self.normalize_quiet(specifier, referrer))
    }

    /// A load for `name` carrying this loader's metadata
    pub fn new_load(&self, name: impl Into<String>, kind: SourceKind) -> Load {
        Load::new(name, kind, self.metadata(&LoadOptions::default()))
    }

    /// Run the locate stage on `load`
    pub async fn locate(&self, load: &Load) -> Result<String> {
        self.reported(self.inner.pipeline.locate(load).await)
    }

    /// Run the fetch stage on `load`
    pub async fn fetch(&self, load: &Load) -> Result<String> {
        self.reported(self.inner.pipeline.fetch(load).await)
    }

    /// Run the translate stage on `load`
    pub async fn translate(&self, load: &Load) -> Result<Compiled> {
        self.reported(self.inner.pipeline.translate(load).await)
    }

    /// Run the instantiate stage on `load`
    pub async fn instantiate(&self, load: &Load) -> Result<Option<Instantiation>> {
        self.reported(self.inner.pipeline.instantiate(load).await)
    }

    // Requests

    /// Compile and run `source` as a script, returning its completion value
    pub async fn script(&self, source: &str, options: LoadOptions) -> Result<Value> {
        let result = async {
            let name = match &options.name {
                Some(name) => self.normalize_quiet(name, options.referrer_name.as_deref())?,
                None => self.anonymous_name(),
            };
            let mut load = Load::new(name, SourceKind::Script, self.metadata(&options))
                .with_referrer(options.referrer_name.clone())
                .with_source(source);
            load.address = options.address.clone();
            self.run_script(load).await
        }
        .await;
        self.reported(result)
    }

    /// Locate, fetch and run `specifier` as a script
    pub async fn load_as_script(&self, specifier: &str, options: LoadOptions) -> Result<Value> {
        let result = async {
            let name = self.normalize_quiet(specifier, options.referrer_name.as_deref())?;
            let load = Load::new(name, SourceKind::Script, self.metadata(&options))
                .with_referrer(options.referrer_name.clone());
            self.run_script(load).await
        }
        .await;
        self.reported(result)
    }

    /// Compile and evaluate `source` as an anonymous module.
    ///
    /// The module itself is never registered; its dependencies are.
    pub async fn module(&self, source: &str, options: LoadOptions) -> Result<Namespace> {
        let result = async {
            let name = self.anonymous_name();
            let referrer = options.referrer_name.clone();
            let metadata = self.metadata(&options);
            let mut load = Load::new(&name, SourceKind::Module, metadata.clone())
                .with_referrer(referrer.clone())
                .with_source(source);
            load.address = options.address.clone();

            let root = Arc::new(self.load_unit(load, referrer).await?);
            let units = self.load_graph(Arc::clone(&root), &metadata).await?;
            self.commit(&units[1..]);
            self.inner.registry.evaluate_detached(root.record())
        }
        .await;
        self.reported(result)
    }

    /// Register `source` under `name`.
    ///
    /// In [`ModuleMode::Register`] the body runs as part of the call; in
    /// [`ModuleMode::Instantiate`] it runs on first import. A name that is
    /// already registered, or being defined, is rejected.
    pub async fn define(&self, name: &str, source: &str, options: LoadOptions) -> Result<()> {
        let result = async {
            let name = self.normalize_quiet(name, options.referrer_name.as_deref())?;
            let already = || LoaderError::instantiate(&name, "already defined");
            if self.inner.registry.has(&name) {
                return Err(already());
            }
            let _claim = match self.inner.defining.entry(name.clone()) {
                Entry::Occupied(_) => return Err(already()),
                Entry::Vacant(slot) => {
                    slot.insert(());
                    DefineClaim {
                        defining: &self.inner.defining,
                        name: name.clone(),
                    }
                }
            };

            let metadata = self.metadata(&options);
            let mut load = Load::new(&name, SourceKind::Module, metadata.clone())
                .with_referrer(options.referrer_name.clone())
                .with_source(source);
            load.address = options.address.clone();

            let root = Arc::new(self.load_unit(load, Some(name.clone())).await?);
            let units = self.load_graph(root, &metadata).await?;
            let (_, inserted) = self.inner.registry.commit(units[0].record());
            if !inserted {
                return Err(already());
            }
            self.commit(&units[1..]);
            info!("Defined {}", name);

            let mode = options.mode.unwrap_or(self.inner.options.read().modules);
            if mode == ModuleMode::Register {
                self.inner.registry.evaluate(&name)?;
            }
            Ok::<(), LoaderError>(())
        }
        .await;
        self.reported(result)
    }

    /// Load, link and evaluate `specifier`, returning its namespace
    pub async fn import(&self, specifier: &str, options: LoadOptions) -> Result<Namespace> {
        let result = async {
            let name = self.normalize_quiet(specifier, options.referrer_name.as_deref())?;
            let metadata = self.metadata(&options);
            if self.inner.registry.has(&name) {
                self.load_missing(&name, &metadata).await?;
                return self.inner.registry.evaluate(&name);
            }

            let root = self.shared_unit(name.clone(), metadata.clone()).await?;
            let units = self.load_graph(root, &metadata).await?;
            self.commit(&units);
            self.inner.registry.evaluate(&name)
        }
        .await;
        self.reported(result)
    }

    // Registry access

    /// Install an already evaluated namespace under `name`
    pub fn set(&self, name: &str, namespace: Namespace) {
        self.inner.registry.set_evaluated(name, namespace);
    }

    /// Namespace of a registered module, evaluating it on first access
    pub fn get(&self, name: &str) -> Result<Option<Namespace>> {
        if !self.inner.registry.has(name) {
            return Ok(None);
        }
        self.reported(self.inner.registry.evaluate(name)).map(Some)
    }

    /// Remove the record for `name`
    pub fn delete(&self, name: &str) -> bool {
        self.inner.registry.delete(name)
    }

    /// Whether `name` has a record
    pub fn has(&self, name: &str) -> bool {
        self.inner.registry.has(name)
    }

    /// Evaluation state of `name`
    pub fn state(&self, name: &str) -> Option<EvaluationState> {
        self.inner.registry.state(name)
    }

    /// The source map recorded for `(name, kind)`
    pub fn source_map_info(&self, name: &str, kind: SourceKind) -> Option<Arc<SourceMapEntry>> {
        self.inner.source_maps.query(name, kind)
    }

    // Internals

    fn reported<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(err) = &result {
            self.inner.reporter.report(err);
        }
        result
    }

    fn normalize_quiet(&self, specifier: &str, referrer: Option<&str>) -> Result<String> {
        let map = self.map();
        let normalizer = Normalizer::new(self.inner.options.read().base_name.clone());
        normalizer.normalize(specifier, referrer, &map)
    }

    fn metadata(&self, options: &LoadOptions) -> Metadata {
        let current = self.inner.options.read();
        Metadata {
            base_url: options
                .base_url
                .clone()
                .unwrap_or_else(|| current.base_url.clone()),
            source_maps: current.source_maps,
            extra: options.extra.clone(),
        }
    }

    fn anonymous_name(&self) -> String {
        let n = self.inner.anonymous.fetch_add(1, Ordering::SeqCst) + 1;
        format!("<anonymous {}>", n)
    }

    fn record_source_map(&self, load: &Load) {
        if let Some(map) = &load.source_map {
            self.inner
                .source_maps
                .record(&load.name, load.kind, map.clone(), load.url());
        }
    }

    async fn run_script(&self, load: Load) -> Result<Value> {
        let load = self.inner.pipeline.load(load).await?;
        self.record_source_map(&load);
        match load.instantiation {
            Some(Instantiation::Value(value)) => Ok(value),
            Some(Instantiation::Module(_)) => Err(LoaderError::instantiate(
                &load.name,
                "instantiate produced a module for a script",
            )),
            None => self
                .inner
                .engine
                .run_script(&load.name, load.translated.as_deref().unwrap_or_default()),
        }
    }

    /// Run the pipeline for one module and resolve its requests.
    ///
    /// Requests resolve against `referrer`, which is the unit's own name for
    /// named modules.
    async fn load_unit(&self, load: Load, referrer: Option<String>) -> Result<LinkedUnit> {
        let load = self.inner.pipeline.load(load).await?;
        self.record_source_map(&load);

        let linked = match load.instantiation {
            Some(Instantiation::Module(linked)) => linked,
            Some(Instantiation::Value(_)) => {
                return Err(LoaderError::instantiate(
                    &load.name,
                    "instantiate produced a script value for a module",
                ));
            }
            None => self
                .inner
                .engine
                .link(&load.name, load.translated.as_deref().unwrap_or_default())?,
        };

        let dependencies = linked
            .requests
            .iter()
            .map(|specifier| {
                Ok(Dependency {
                    specifier: specifier.clone(),
                    name: self.normalize_quiet(specifier, referrer.as_deref())?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(LinkedUnit {
            name: load.name,
            address: load.address,
            dependencies,
            body: linked.body,
        })
    }

    /// The pending load of `name`, starting one if there is none.
    ///
    /// A failed load leaves the table at once; a linked unit stays until
    /// [`commit`](Self::commit) registers it or its graph fails.
    fn shared_unit(&self, name: String, metadata: Metadata) -> SharedUnit {
        match self.inner.pending.entry(name.clone()) {
            Entry::Occupied(entry) => {
                debug!("Joining in-flight load of {}", name);
                entry.get().clone()
            }
            Entry::Vacant(entry) => {
                let loader = self.clone();
                let future = async move {
                    let load = Load::new(&name, SourceKind::Module, metadata);
                    let result = loader
                        .load_unit(load, Some(name.clone()))
                        .await
                        .map(Arc::new);
                    if result.is_err() {
                        loader.inner.pending.remove(&name);
                    }
                    result
                }
                .boxed()
                .shared();
                entry.insert(future.clone());
                future
            }
        }
    }

    /// Load every unit reachable from `root` that is not registered yet.
    ///
    /// Dependencies load with the root request's `metadata`. `root` comes
    /// first in the result. On failure, finished loads of this graph leave the
    /// pending table so a retry starts from scratch.
    async fn load_graph(
        &self,
        root: Arc<LinkedUnit>,
        metadata: &Metadata,
    ) -> Result<Vec<Arc<LinkedUnit>>> {
        let mut seen = HashSet::from([root.name.clone()]);
        let mut units = vec![Arc::clone(&root)];
        let mut frontier = vec![root];

        while !frontier.is_empty() {
            let mut wanted = Vec::new();
            for unit in &frontier {
                for dep in &unit.dependencies {
                    if self.inner.registry.has(&dep.name) || !seen.insert(dep.name.clone()) {
                        continue;
                    }
                    wanted.push(self.shared_unit(dep.name.clone(), metadata.clone()));
                }
            }
            frontier = match try_join_all(wanted).await {
                Ok(frontier) => frontier,
                Err(err) => {
                    for name in &seen {
                        self.inner
                            .pending
                            .remove_if(name, |_, load| load.peek().is_some());
                    }
                    return Err(err);
                }
            };
            units.extend(frontier.iter().cloned());
        }
        Ok(units)
    }

    /// Load the unregistered dependencies of the registered module `name`,
    /// for instance after an earlier evaluation failure removed them
    async fn load_missing(&self, name: &str, metadata: &Metadata) -> Result<()> {
        let missing = self.inner.registry.missing_dependencies(name);
        if missing.is_empty() {
            return Ok(());
        }
        debug!("Reloading {:?} for {}", missing, name);

        let graphs = missing.into_iter().map(move |dep| {
            let root = self.shared_unit(dep, metadata.clone());
            async move { self.load_graph(root.await?, metadata).await }
        });
        for units in try_join_all(graphs).await? {
            self.commit(&units);
        }
        Ok(())
    }

    /// Register `units` and release their pending loads
    fn commit(&self, units: &[Arc<LinkedUnit>]) {
        for unit in units {
            self.inner.registry.commit(unit.record());
            self.inner.pending.remove(&unit.name);
        }
    }
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("options", &*self.inner.options.read())
            .field("registry", &self.inner.registry)
            .finish_non_exhaustive()
    }
}

/// Builds a [`Loader`]
pub struct LoaderBuilder {
    options: LoaderOptions,
    file_loader: Arc<dyn FileLoader>,
    compiler: Option<Arc<dyn Compiler>>,
    engine: Arc<dyn Engine>,
    reporter: Arc<dyn ErrorReporter>,
    locate: Option<Arc<dyn LocateHook>>,
    fetch: Option<Arc<dyn FetchHook>>,
    translate: Option<Arc<dyn TranslateHook>>,
    instantiate: Option<Arc<dyn InstantiateHook>>,
}

impl Default for LoaderBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LoaderBuilder {
    /// Defaults: filesystem I/O, the dialect compiler and interpreter,
    /// tracing-backed error reporting
    pub fn new() -> Self {
        Self {
            options: LoaderOptions::default(),
            file_loader: Arc::new(FsFileLoader::new()),
            compiler: Some(Arc::new(DialectCompiler::new())),
            engine: Arc::new(Interpreter::new()),
            reporter: Arc::new(TracingReporter::new()),
            locate: None,
            fetch: None,
            translate: None,
            instantiate: None,
        }
    }

    /// Set the options
    pub fn options(mut self, options: LoaderOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the I/O collaborator used by the default fetch
    pub fn file_loader(mut self, file_loader: Arc<dyn FileLoader>) -> Self {
        self.file_loader = file_loader;
        self
    }

    /// Set the compiler used by the default translate
    pub fn compiler(mut self, compiler: Arc<dyn Compiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    /// Make the default translate an identity transform
    pub fn without_compiler(mut self) -> Self {
        self.compiler = None;
        self
    }

    /// Set the execution engine
    pub fn engine(mut self, engine: Arc<dyn Engine>) -> Self {
        self.engine = engine;
        self
    }

    /// Set the error reporter
    pub fn reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Override the locate stage
    pub fn locate_hook(mut self, hook: Arc<dyn LocateHook>) -> Self {
        self.locate = Some(hook);
        self
    }

    /// Override the fetch stage
    pub fn fetch_hook(mut self, hook: Arc<dyn FetchHook>) -> Self {
        self.fetch = Some(hook);
        self
    }

    /// Override the translate stage
    pub fn translate_hook(mut self, hook: Arc<dyn TranslateHook>) -> Self {
        self.translate = Some(hook);
        self
    }

    /// Override the instantiate stage
    pub fn instantiate_hook(mut self, hook: Arc<dyn InstantiateHook>) -> Self {
        self.instantiate = Some(hook);
        self
    }

    /// Build the loader
    pub fn build(self) -> Result<Loader> {
        self.options.validate()?;

        let extension = self.options.default_extension.clone();
        let pipeline = LoaderPipeline::new(
            self.locate
                .unwrap_or_else(|| Arc::new(DefaultLocate::new(extension))),
            self.fetch
                .unwrap_or_else(|| Arc::new(DefaultFetch::new(self.file_loader))),
            self.translate
                .unwrap_or_else(|| Arc::new(DefaultTranslate::new(self.compiler))),
            self.instantiate
                .unwrap_or_else(|| Arc::new(DefaultInstantiate)),
        );

        let map = Arc::new(self.options.map.clone());
        let registry = ModuleRegistry::new();
        let host: Namespace = [("version".to_string(), Value::from(crate::VERSION))]
            .into_iter()
            .collect();
        registry.set_evaluated(HOST_MODULE, host);

        Ok(Loader {
            inner: Arc::new(LoaderInner {
                options: RwLock::new(self.options),
                map: RwLock::new(map),
                pipeline,
                engine: self.engine,
                registry,
                pending: DashMap::new(),
                defining: DashMap::new(),
                source_maps: SourceMapIndex::new(),
                reporter: self.reporter,
                anonymous: AtomicUsize::new(0),
            }),
        })
    }
}
