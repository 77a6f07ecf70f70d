// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module registry and the evaluation model
//!
//! The registry maps canonical names to [`ModuleRecord`]s. A record is
//! committed once its whole dependency graph has been loaded and is evaluated
//! at most once, depth-first, under a registry-wide lock.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{LoaderError, Result};
use crate::module_system::pipeline::{ModuleBody, ModuleImports};
use crate::value::Namespace;

/// Observable evaluation state of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationState {
    /// Compiled and linked, body not yet run
    Defined,
    /// Body currently running
    Evaluating,
    /// Body finished; the namespace is final
    Evaluated,
}

enum Slot {
    Defined(Arc<dyn ModuleBody>),
    Evaluating,
    Evaluated(Namespace),
}

impl Slot {
    fn state(&self) -> EvaluationState {
        match self {
            Slot::Defined(_) => EvaluationState::Defined,
            Slot::Evaluating => EvaluationState::Evaluating,
            Slot::Evaluated(_) => EvaluationState::Evaluated,
        }
    }
}

/// A dependency edge: the specifier as written and the name it resolved to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    /// Specifier as written in the importing module
    pub specifier: String,
    /// Canonical name it normalized to
    pub name: String,
}

/// Registry entry for one canonical name
pub struct ModuleRecord {
    name: String,
    address: Option<String>,
    dependencies: Vec<Dependency>,
    slot: RwLock<Slot>,
}

impl ModuleRecord {
    /// A linked record waiting for evaluation
    pub fn defined(
        name: impl Into<String>,
        address: Option<String>,
        dependencies: Vec<Dependency>,
        body: Arc<dyn ModuleBody>,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            dependencies,
            slot: RwLock::new(Slot::Defined(body)),
        }
    }

    /// An already evaluated record
    pub fn evaluated(name: impl Into<String>, namespace: Namespace) -> Self {
        Self {
            name: name.into(),
            address: None,
            dependencies: Vec::new(),
            slot: RwLock::new(Slot::Evaluated(namespace)),
        }
    }

    /// Canonical name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Address the source was fetched from
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Dependencies in request order
    pub fn dependencies(&self) -> &[Dependency] {
        &self.dependencies
    }

    /// Current evaluation state
    pub fn state(&self) -> EvaluationState {
        self.slot.read().state()
    }

    /// The namespace, once evaluated
    pub fn namespace(&self) -> Option<Namespace> {
        match &*self.slot.read() {
            Slot::Evaluated(ns) => Some(ns.clone()),
            _ => None,
        }
    }
}

impl fmt::Debug for ModuleRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRecord")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("dependencies", &self.dependencies)
            .field("state", &self.state())
            .finish()
    }
}

/// Thread-safe canonical-name -> record table
#[derive(Default)]
pub struct ModuleRegistry {
    records: DashMap<String, Arc<ModuleRecord>>,
    /// Serialises evaluation passes
    eval_lock: Mutex<()>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record for `name`
    pub fn get(&self, name: &str) -> Option<Arc<ModuleRecord>> {
        self.records.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Check if `name` has a record
    pub fn has(&self, name: &str) -> bool {
        self.records.contains_key(name)
    }

    /// Evaluation state of `name`
    pub fn state(&self, name: &str) -> Option<EvaluationState> {
        self.records.get(name).map(|entry| entry.state())
    }

    /// Insert `record` unless its name is taken.
    ///
    /// Returns the record that ends up registered and whether it is `record`.
    pub fn commit(&self, record: ModuleRecord) -> (Arc<ModuleRecord>, bool) {
        match self.records.entry(record.name.clone()) {
            Entry::Occupied(existing) => (Arc::clone(existing.get()), false),
            Entry::Vacant(slot) => {
                debug!("Committed {}", record.name);
                let record = Arc::new(record);
                slot.insert(Arc::clone(&record));
                (record, true)
            }
        }
    }

    /// Install an evaluated namespace, replacing any record under `name`
    pub fn set_evaluated(&self, name: &str, namespace: Namespace) {
        self.records
            .insert(name.to_string(), Arc::new(ModuleRecord::evaluated(name, namespace)));
    }

    /// Remove the record for `name`
    pub fn delete(&self, name: &str) -> bool {
        self.records.remove(name).is_some()
    }

    /// Registered names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.records.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Check if the registry is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Evaluate `name` and its dependencies, returning its namespace.
    ///
    /// An evaluated record returns its namespace without running anything.
    /// On failure, every record this pass touched that did not reach
    /// `Evaluated` is removed.
    pub fn evaluate(&self, name: &str) -> Result<Namespace> {
        let record = self
            .get(name)
            .ok_or_else(|| LoaderError::instantiate(name, "module is not loaded"))?;
        if let Some(ns) = record.namespace() {
            return Ok(ns);
        }
        self.evaluate_pass(record)
    }

    /// Evaluate a record that is not (and will not be) registered, such as an
    /// anonymous module. Its registered dependencies are evaluated as usual.
    pub fn evaluate_detached(&self, record: ModuleRecord) -> Result<Namespace> {
        self.evaluate_pass(Arc::new(record))
    }

    /// Dependency names, reachable from `name` through unevaluated records,
    /// that have no record. Sorted.
    pub fn missing_dependencies(&self, name: &str) -> Vec<String> {
        match self.get(name) {
            Some(record) => self.missing_from(&record),
            None => vec![name.to_string()],
        }
    }

    fn missing_from(&self, root: &ModuleRecord) -> Vec<String> {
        let mut missing = Vec::new();
        if root.state() == EvaluationState::Evaluated {
            return missing;
        }
        let mut seen = HashSet::from([root.name.clone()]);
        let mut stack: Vec<String> = root.dependencies.iter().map(|d| d.name.clone()).collect();
        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            match self.get(&name) {
                Some(record) if record.state() != EvaluationState::Evaluated => {
                    stack.extend(record.dependencies.iter().map(|d| d.name.clone()));
                }
                Some(_) => {}
                None => missing.push(name),
            }
        }
        missing.sort();
        missing
    }

    fn evaluate_pass(&self, record: Arc<ModuleRecord>) -> Result<Namespace> {
        let _guard = self.eval_lock.lock();
        // An incomplete graph is not a body failure: reject without touching records.
        if let Some(name) = self.missing_from(&record).first() {
            return Err(LoaderError::instantiate(
                record.name(),
                format!("dependency '{}' is not loaded", name),
            ));
        }
        let mut touched = Vec::new();
        let mut stack = Vec::new();
        let result = self.evaluate_record(Arc::clone(&record), &mut stack, &mut touched);

        if let Err(err) = &result {
            warn!("Evaluation of {} failed: {}", record.name(), err);
            for record in touched {
                if record.state() != EvaluationState::Evaluated {
                    self.records
                        .remove_if(record.name(), |_, current| Arc::ptr_eq(current, &record));
                }
            }
        }
        result
    }

    fn evaluate_record(
        &self,
        record: Arc<ModuleRecord>,
        stack: &mut Vec<String>,
        touched: &mut Vec<Arc<ModuleRecord>>,
    ) -> Result<Namespace> {
        let name = record.name();
        let body = {
            let mut slot = record.slot.write();
            let body = match &*slot {
                Slot::Evaluated(ns) => return Ok(ns.clone()),
                Slot::Evaluating => {
                    let start = stack.iter().position(|n| n == name).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(name.to_string());
                    return Err(LoaderError::instantiate(
                        name,
                        format!("cyclic dependency: {}", cycle.join(" -> ")),
                    ));
                }
                Slot::Defined(body) => Arc::clone(body),
            };
            *slot = Slot::Evaluating;
            body
        };
        touched.push(Arc::clone(&record));
        stack.push(name.to_string());

        let mut imports = ModuleImports::new();
        for dep in &record.dependencies {
            let dependency = self.get(&dep.name).ok_or_else(|| {
                LoaderError::instantiate(name, format!("dependency '{}' is not loaded", dep.name))
            })?;
            let ns = self.evaluate_record(dependency, stack, touched)?;
            imports.insert(dep.specifier.clone(), ns);
        }

        debug!("Evaluating {}", name);
        let namespace = body.evaluate(&imports)?;
        *record.slot.write() = Slot::Evaluated(namespace.clone());
        stack.pop();
        Ok(namespace)
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRegistry")
            .field("names", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::value::Value;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Exports `value = <n>` plus every import's `value` under its specifier.
    struct CountingBody {
        runs: Arc<AtomicUsize>,
        value: f64,
        fail: bool,
    }

    impl ModuleBody for CountingBody {
        fn evaluate(&self, imports: &ModuleImports) -> Result<Namespace> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(LoaderError::instantiate("body", "boom"));
            }
            let mut exports = BTreeMap::new();
            exports.insert("value".to_string(), Value::from(self.value));
            for spec in ["a", "b"] {
                if let Some(ns) = imports.get(spec) {
                    exports.insert(spec.to_string(), ns.get("value").cloned().unwrap_or_default());
                }
            }
            Ok(Namespace::new(exports))
        }
    }

    fn body(runs: &Arc<AtomicUsize>, value: f64, fail: bool) -> Arc<dyn ModuleBody> {
        Arc::new(CountingBody {
            runs: Arc::clone(runs),
            value,
            fail,
        })
    }

    fn dep(name: &str) -> Dependency {
        Dependency {
            specifier: name.to_string(),
            name: name.to_string(),
        }
    }

    #[test]
    fn test_evaluates_once_dependencies_first() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = ModuleRegistry::new();
        registry.commit(ModuleRecord::defined("a", None, vec![], body(&runs, 1.0, false)));
        registry.commit(ModuleRecord::defined("main", None, vec![dep("a")], body(&runs, 2.0, false)));

        assert_eq!(registry.state("main"), Some(EvaluationState::Defined));
        let ns = registry.evaluate("main").unwrap();
        assert_eq!(ns.get("a"), Some(&Value::from(1.0)));
        assert_eq!(registry.state("a"), Some(EvaluationState::Evaluated));

        let again = registry.evaluate("main").unwrap();
        assert!(ns.ptr_eq(&again));
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_commit_is_insert_if_absent() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = ModuleRegistry::new();
        let (_, inserted) = registry.commit(ModuleRecord::defined("x", None, vec![], body(&runs, 1.0, false)));
        assert!(inserted);
        let (existing, inserted) =
            registry.commit(ModuleRecord::defined("x", None, vec![], body(&runs, 2.0, false)));
        assert!(!inserted);
        assert_eq!(existing.name(), "x");
        assert_eq!(registry.evaluate("x").unwrap().get("value"), Some(&Value::from(1.0)));
    }

    #[test]
    fn test_failure_removes_unevaluated_records() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = ModuleRegistry::new();
        registry.commit(ModuleRecord::defined("a", None, vec![], body(&runs, 1.0, false)));
        registry.commit(ModuleRecord::defined("b", None, vec![], body(&runs, 2.0, true)));
        registry.commit(ModuleRecord::defined(
            "main",
            None,
            vec![dep("a"), dep("b")],
            body(&runs, 3.0, false),
        ));

        let err = registry.evaluate("main").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Instantiate);
        assert!(!registry.has("main"));
        assert!(!registry.has("b"));
        assert_eq!(registry.state("a"), Some(EvaluationState::Evaluated));
    }

    #[test]
    fn test_missing_dependency_keeps_records() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = ModuleRegistry::new();
        registry.commit(ModuleRecord::defined("mid", None, vec![dep("leaf")], body(&runs, 1.0, false)));
        registry.commit(ModuleRecord::defined("top", None, vec![dep("mid")], body(&runs, 2.0, false)));
        assert_eq!(registry.missing_dependencies("top"), vec!["leaf".to_string()]);

        let err = registry.evaluate("top").unwrap_err();
        assert!(err.to_string().contains("dependency 'leaf' is not loaded"), "{}", err);
        assert_eq!(registry.state("top"), Some(EvaluationState::Defined));
        assert_eq!(registry.state("mid"), Some(EvaluationState::Defined));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        registry.commit(ModuleRecord::defined("leaf", None, vec![], body(&runs, 3.0, false)));
        assert!(registry.missing_dependencies("top").is_empty());
        assert_eq!(registry.evaluate("top").unwrap().get("value"), Some(&Value::from(2.0)));
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(registry.missing_dependencies("top").is_empty());
    }

    #[test]
    fn test_cycle_is_rejected() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = ModuleRegistry::new();
        registry.commit(ModuleRecord::defined("a", None, vec![dep("b")], body(&runs, 1.0, false)));
        registry.commit(ModuleRecord::defined("b", None, vec![dep("a")], body(&runs, 2.0, false)));

        let err = registry.evaluate("a").unwrap_err();
        assert!(err.to_string().contains("a -> b -> a"), "{}", err);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_detached_record_is_not_registered() {
        let runs = Arc::new(AtomicUsize::new(0));
        let registry = ModuleRegistry::new();
        registry.commit(ModuleRecord::defined("a", None, vec![], body(&runs, 1.0, false)));

        let anonymous = ModuleRecord::defined("<anonymous 1>", None, vec![dep("a")], body(&runs, 5.0, false));
        let ns = registry.evaluate_detached(anonymous).unwrap();
        assert_eq!(ns.get("a"), Some(&Value::from(1.0)));
        assert_eq!(registry.names(), vec!["a".to_string()]);
    }

    #[test]
    fn test_set_evaluated_and_delete() {
        let registry = ModuleRegistry::new();
        let ns: Namespace = [("v".to_string(), Value::from("x"))].into_iter().collect();
        registry.set_evaluated("host@", ns.clone());

        assert!(registry.evaluate("host@").unwrap().ptr_eq(&ns));
        assert_eq!(registry.names(), vec!["host@".to_string()]);
        assert!(registry.delete("host@"));
        assert!(!registry.delete("host@"));
        assert_eq!(
            registry.evaluate("host@").unwrap_err().kind(),
            ErrorKind::Instantiate
        );
    }
}
