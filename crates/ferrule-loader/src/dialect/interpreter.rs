// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Tree-walking execution engine for the module dialect

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use super::ast::*;
use super::parser::Parser;
use crate::error::{LoaderError, Position, Result};
use crate::module_system::pipeline::{Engine, LinkedModule, ModuleBody, ModuleImports};
use crate::value::{Namespace, Value};

/// Global bindings shared by every script and module of one engine
#[derive(Debug, Clone, Default)]
pub struct Realm {
    globals: Arc<Mutex<BTreeMap<String, Value>>>,
}

impl Realm {
    /// Create an empty realm
    pub fn new() -> Self {
        Self::default()
    }

    /// Read a global
    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals.lock().get(name).cloned()
    }

    /// Write a global
    pub fn set_global(&self, name: impl Into<String>, value: Value) {
        self.globals.lock().insert(name.into(), value);
    }

    fn snapshot(&self) -> Namespace {
        Namespace::new(self.globals.lock().clone())
    }
}

/// Execution-engine collaborator for the dialect
#[derive(Debug, Clone, Default)]
pub struct Interpreter {
    realm: Realm,
}

impl Interpreter {
    /// Create an interpreter with a fresh realm
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an interpreter sharing `realm`
    pub fn with_realm(realm: Realm) -> Self {
        Self { realm }
    }

    /// The realm scripts and modules run in
    pub fn realm(&self) -> &Realm {
        &self.realm
    }

    fn parse(name: &str, code: &str) -> Result<Program> {
        Parser::new(code).parse_program().map_err(|e| {
            LoaderError::compile(name, Some(Position::from_offset(code, e.offset)), e.message)
        })
    }
}

impl Engine for Interpreter {
    fn link(&self, name: &str, code: &str) -> Result<LinkedModule> {
        let program = Self::parse(name, code)?;
        let requests = program.requests();
        debug!("Linked {} with {} request(s)", name, requests.len());
        Ok(LinkedModule {
            requests,
            body: Arc::new(ModuleProgram {
                name: name.to_string(),
                program,
                realm: self.realm.clone(),
            }),
        })
    }

    fn run_script(&self, name: &str, code: &str) -> Result<Value> {
        let program = Self::parse(name, code)?;
        if let Some(stmt) = program.body.iter().find(|s| s.kind.is_module_syntax()) {
            return Err(LoaderError::compile(
                name,
                Some(Position::from_offset(code, stmt.span.start)),
                "module syntax is not allowed in a script",
            ));
        }

        let mut scope = Scope::script(name, &self.realm);
        let mut completion = Value::Undefined;
        for stmt in &program.body {
            match &stmt.kind {
                StatementKind::Var(declarators) => scope.declare(declarators)?,
                StatementKind::Expression(expr) => completion = scope.eval(expr)?,
                _ => {}
            }
        }
        Ok(completion)
    }
}

/// A linked module body
struct ModuleProgram {
    name: String,
    program: Program,
    realm: Realm,
}

impl ModuleBody for ModuleProgram {
    fn evaluate(&self, imports: &ModuleImports) -> Result<Namespace> {
        let name = self.name.as_str();
        let mut scope = Scope::module(name, &self.realm);

        for stmt in &self.program.body {
            match &stmt.kind {
                StatementKind::Import { bindings, source } => {
                    let ns = import_of(name, imports, source)?;
                    for binding in bindings {
                        match binding {
                            ImportBinding::Named { imported, local } => {
                                let value = export_of(name, ns, imported, source)?;
                                scope.bind(local, value);
                            }
                            ImportBinding::Namespace(local) => {
                                scope.bind(local, Value::Namespace(ns.clone()));
                            }
                        }
                    }
                }
                StatementKind::ModuleImport { local, source } => {
                    let ns = import_of(name, imports, source)?;
                    scope.bind(local, Value::Namespace(ns.clone()));
                }
                _ => {}
            }
        }

        for stmt in &self.program.body {
            match &stmt.kind {
                StatementKind::Var(declarators) | StatementKind::ExportVar(declarators) => {
                    scope.declare(declarators)?
                }
                StatementKind::Expression(expr) => {
                    scope.eval(expr)?;
                }
                StatementKind::ExportDefault(expr) => {
                    let value = scope.eval(expr)?;
                    scope.bind("*default*", value);
                }
                _ => {}
            }
        }

        let mut exports = BTreeMap::new();
        let mut star_sources = Vec::new();
        for stmt in &self.program.body {
            match &stmt.kind {
                StatementKind::ExportVar(declarators) => {
                    for d in declarators {
                        exports.insert(d.name.clone(), scope.lookup(&d.name)?);
                    }
                }
                StatementKind::ExportDefault(_) => {
                    exports.insert("default".to_string(), scope.lookup("*default*")?);
                }
                StatementKind::ExportNamed {
                    specifiers,
                    source: None,
                } => {
                    for s in specifiers {
                        exports.insert(s.exported.clone(), scope.lookup(&s.local)?);
                    }
                }
                StatementKind::ExportNamed {
                    specifiers,
                    source: Some(source),
                } => {
                    let ns = import_of(name, imports, source)?;
                    for s in specifiers {
                        exports.insert(s.exported.clone(), export_of(name, ns, &s.local, source)?);
                    }
                }
                StatementKind::ExportAll(source) => {
                    star_sources.push(import_of(name, imports, source)?)
                }
                _ => {}
            }
        }

        // Explicit exports shadow star exports; `default` is never re-exported.
        for ns in star_sources {
            for (key, value) in ns.iter() {
                if key != "default" && !exports.contains_key(key) {
                    exports.insert(key.to_string(), value.clone());
                }
            }
        }

        Ok(Namespace::new(exports))
    }
}

fn import_of<'i>(name: &str, imports: &'i ModuleImports, source: &str) -> Result<&'i Namespace> {
    imports
        .get(source)
        .ok_or_else(|| LoaderError::instantiate(name, format!("'{}' was not loaded", source)))
}

fn export_of(name: &str, ns: &Namespace, export: &str, source: &str) -> Result<Value> {
    ns.get(export).cloned().ok_or_else(|| {
        LoaderError::instantiate(
            name,
            format!("module '{}' does not export '{}'", source, export),
        )
    })
}

/// Variable environment of one running unit
struct Scope<'a> {
    name: &'a str,
    realm: &'a Realm,
    /// `None` for scripts, whose `var`s are globals
    locals: Option<BTreeMap<String, Value>>,
}

impl<'a> Scope<'a> {
    fn script(name: &'a str, realm: &'a Realm) -> Self {
        Self {
            name,
            realm,
            locals: None,
        }
    }

    fn module(name: &'a str, realm: &'a Realm) -> Self {
        Self {
            name,
            realm,
            locals: Some(BTreeMap::new()),
        }
    }

    fn error(&self, reason: impl Into<String>) -> LoaderError {
        LoaderError::instantiate(self.name, reason)
    }

    fn bind(&mut self, name: &str, value: Value) {
        match &mut self.locals {
            Some(locals) => {
                locals.insert(name.to_string(), value);
            }
            None => self.realm.set_global(name, value),
        }
    }

    fn declare(&mut self, declarators: &[Declarator]) -> Result<()> {
        for d in declarators {
            let value = match &d.init {
                Some(init) => self.eval(init)?,
                None => Value::Undefined,
            };
            self.bind(&d.name, value);
        }
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<Value> {
        if let Some(value) = self.locals.as_ref().and_then(|l| l.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.realm.global(name) {
            return Ok(value);
        }
        if name == "undefined" {
            return Ok(Value::Undefined);
        }
        Err(self.error(format!("{} is not defined", name)))
    }

    /// Assign to an existing local, otherwise to a global
    fn store(&mut self, name: &str, value: Value) {
        if let Some(locals) = &mut self.locals {
            if let Some(slot) = locals.get_mut(name) {
                *slot = value;
                return;
            }
        }
        self.realm.set_global(name, value);
    }

    fn eval(&mut self, expr: &Expression) -> Result<Value> {
        match expr {
            Expression::Number(n) => Ok(Value::Number(*n)),
            Expression::String(s) => Ok(Value::String(s.clone())),
            Expression::Boolean(b) => Ok(Value::Boolean(*b)),
            Expression::Null => Ok(Value::Null),
            Expression::Identifier(name) => self.lookup(name),
            Expression::This => Ok(Value::Namespace(self.realm.snapshot())),
            Expression::Array(elements) => {
                let mut items = Vec::with_capacity(elements.len());
                for element in elements {
                    items.push(self.eval(element)?);
                }
                Ok(Value::array(items))
            }
            Expression::Member { object, property } => {
                if matches!(**object, Expression::This) {
                    return Ok(self.realm.global(property).unwrap_or_default());
                }
                let object = self.eval(object)?;
                self.property(&object, property)
            }
            Expression::Index { object, index } => {
                let index = self.eval(index)?;
                if matches!(**object, Expression::This) {
                    return Ok(self.realm.global(&index.to_string()).unwrap_or_default());
                }
                let object = self.eval(object)?;
                match (&object, &index) {
                    (Value::Array(items), Value::Number(n)) => {
                        let i = *n as usize;
                        if n.fract() == 0.0 && *n >= 0.0 && i < items.len() {
                            Ok(items[i].clone())
                        } else {
                            Ok(Value::Undefined)
                        }
                    }
                    _ => self.property(&object, &index.to_string()),
                }
            }
            Expression::Negate(operand) => Ok(Value::Number(-to_number(&self.eval(operand)?))),
            Expression::Binary { op, left, right } => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                Ok(binary(*op, &left, &right))
            }
            Expression::Assign { add, target, value } => {
                let mut value = self.eval(value)?;
                if *add {
                    let current = self.eval(target)?;
                    value = binary(BinaryOp::Add, &current, &value);
                }
                self.assign(target, value.clone())?;
                Ok(value)
            }
            Expression::Increment(target) => {
                let old = to_number(&self.eval(target)?);
                self.assign(target, Value::Number(old + 1.0))?;
                Ok(Value::Number(old))
            }
        }
    }

    fn property(&self, object: &Value, property: &str) -> Result<Value> {
        match object {
            Value::Undefined | Value::Null => Err(self.error(format!(
                "cannot read property '{}' of {}",
                property, object
            ))),
            Value::Namespace(ns) => Ok(ns.get(property).cloned().unwrap_or_default()),
            Value::Array(items) if property == "length" => Ok(Value::Number(items.len() as f64)),
            Value::String(s) if property == "length" => {
                Ok(Value::Number(s.chars().count() as f64))
            }
            _ => Ok(Value::Undefined),
        }
    }

    fn assign(&mut self, target: &Expression, value: Value) -> Result<()> {
        match target {
            Expression::Identifier(name) => {
                self.store(name, value);
                Ok(())
            }
            Expression::Member { object, property } if matches!(**object, Expression::This) => {
                self.realm.set_global(property.as_str(), value);
                Ok(())
            }
            Expression::Index { object, index } if matches!(**object, Expression::This) => {
                let key = self.eval(index)?.to_string();
                self.realm.set_global(key, value);
                Ok(())
            }
            _ => Err(self.error("cannot assign to a property of an immutable value")),
        }
    }
}

fn to_number(value: &Value) -> f64 {
    match value {
        Value::Number(n) => *n,
        Value::Boolean(b) => f64::from(u8::from(*b)),
        Value::Null => 0.0,
        Value::String(s) if s.trim().is_empty() => 0.0,
        Value::String(s) => s.trim().parse().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let numeric = |v: &Value| {
                matches!(
                    v,
                    Value::Number(_) | Value::Boolean(_) | Value::Null | Value::Undefined
                )
            };
            if numeric(left) && numeric(right) {
                Value::Number(to_number(left) + to_number(right))
            } else {
                Value::String(format!("{}{}", left, right))
            }
        }
        BinaryOp::Sub => Value::Number(to_number(left) - to_number(right)),
        BinaryOp::Mul => Value::Number(to_number(left) * to_number(right)),
        BinaryOp::Div => Value::Number(to_number(left) / to_number(right)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn ns(pairs: &[(&str, Value)]) -> Namespace {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_script_completion_and_globals() {
        let engine = Interpreter::new();
        let value = engine
            .run_script("s", "var a = 40; a + 2; 'done';")
            .unwrap();
        assert_eq!(value, Value::from("done"));
        assert_eq!(engine.realm().global("a"), Some(Value::from(40.0)));

        let value = engine.run_script("s2", "a += 2; a;").unwrap();
        assert_eq!(value, Value::from(42.0));
        assert_eq!(engine.run_script("s3", "var x = 1;").unwrap(), Value::Undefined);
    }

    #[test]
    fn test_script_rejects_module_syntax() {
        let err = Interpreter::new()
            .run_script("s", "var a = 1;\nexport var x = 5;")
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
        assert!(err.to_string().contains("s:2:1"), "{}", err);
    }

    #[test]
    fn test_module_exports_and_imports() {
        let engine = Interpreter::new();
        let linked = engine
            .link(
                "m",
                "module a from \"./a\";\nimport {name as n} from \"./a\";\nvar hidden = 1;\n\
                 export var arr = [\"t\", a.name, n];\nexport {hidden as shown};\nexport default arr.length;",
            )
            .unwrap();
        assert_eq!(linked.requests, vec!["./a".to_string()]);

        let mut imports = ModuleImports::new();
        imports.insert("./a", ns(&[("name", Value::from("A"))]));
        let exports = linked.body.evaluate(&imports).unwrap();

        assert_eq!(
            exports.get("arr"),
            Some(&Value::array([Value::from("t"), Value::from("A"), Value::from("A")]))
        );
        assert_eq!(exports.get("shown"), Some(&Value::from(1.0)));
        assert_eq!(exports.get("default"), Some(&Value::from(3.0)));
        assert!(!exports.has("hidden"));
        assert_eq!(exports.keys().collect::<Vec<_>>(), vec!["arr", "default", "shown"]);
    }

    #[test]
    fn test_reexports() {
        let engine = Interpreter::new();
        let linked = engine
            .link(
                "m",
                "export {name as a} from './a';\nexport * from './b';\nexport var x = 0;",
            )
            .unwrap();

        let mut imports = ModuleImports::new();
        imports.insert("./a", ns(&[("name", Value::from("A"))]));
        imports.insert(
            "./b",
            ns(&[
                ("x", Value::from("shadowed")),
                ("y", Value::from(2.0)),
                ("default", Value::from(9.0)),
            ]),
        );
        let exports = linked.body.evaluate(&imports).unwrap();
        assert_eq!(exports.get("a"), Some(&Value::from("A")));
        assert_eq!(exports.get("x"), Some(&Value::from(0.0)));
        assert_eq!(exports.get("y"), Some(&Value::from(2.0)));
        assert!(!exports.has("default"));
    }

    #[test]
    fn test_side_effects_on_realm() {
        let engine = Interpreter::new();
        engine.realm().set_global("sideEffect", Value::from(6.0));
        let linked = engine.link("m", "this.sideEffect++;\nexport var d = 4;").unwrap();

        assert_eq!(engine.realm().global("sideEffect"), Some(Value::from(6.0)));
        linked.body.evaluate(&ModuleImports::new()).unwrap();
        assert_eq!(engine.realm().global("sideEffect"), Some(Value::from(7.0)));
    }

    #[test]
    fn test_runtime_failures() {
        let engine = Interpreter::new();

        let linked = engine.link("m", "import {nope} from './a';").unwrap();
        let mut imports = ModuleImports::new();
        imports.insert("./a", ns(&[("name", Value::from("A"))]));
        let err = linked.body.evaluate(&imports).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Instantiate);
        assert!(err.to_string().contains("does not export 'nope'"));

        let err = engine.run_script("s", "missing + 1;").unwrap_err();
        assert!(err.to_string().contains("missing is not defined"));

        let err = engine.run_script("s", "null.x;").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Instantiate);

        let err = engine.link("m", "var = 1;").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Compile);
    }

    #[test]
    fn test_arithmetic() {
        let engine = Interpreter::new();
        let eval = |src: &str| engine.run_script("s", src).unwrap();
        assert_eq!(eval("1 + 2 * 3;"), Value::from(7.0));
        assert_eq!(eval("(1 + 2) * 3;"), Value::from(9.0));
        assert_eq!(eval("'a' + 1;"), Value::from("a1"));
        assert_eq!(eval("-4 / 2;"), Value::from(-2.0));
        assert_eq!(eval("[1, 2][1];"), Value::from(2.0));
        assert_eq!(eval("undefined;"), Value::Undefined);
    }
}
