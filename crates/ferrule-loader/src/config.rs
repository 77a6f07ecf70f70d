// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::{LoaderError, Result};
use crate::module_system::PackageMap;

/// Default base URL for `locate`
pub const DEFAULT_BASE_URL: &str = "./";

/// Default extension appended by `locate`
pub const DEFAULT_EXTENSION: &str = ".js";

/// How `define` treats a module body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleMode {
    /// Evaluate the body (and its dependencies) as part of `define`
    #[default]
    Register,
    /// Record the compiled shape only; evaluate on first import
    Instantiate,
}

impl FromStr for ModuleMode {
    type Err = LoaderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "register" => Ok(ModuleMode::Register),
            "instantiate" => Ok(ModuleMode::Instantiate),
            other => Err(LoaderError::Config(format!(
                "unknown module mode '{}' (expected 'register' or 'instantiate')",
                other
            ))),
        }
    }
}

/// Options for a [`Loader`](crate::Loader).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderOptions {
    /// Base URL (or directory) that `locate` resolves canonical names against
    #[serde(rename = "baseURL")]
    pub base_url: String,

    /// Directory used for relative specifiers when no referrer is known
    pub base_name: String,

    /// Extension appended to located addresses
    pub default_extension: String,

    /// Whether compiles emit source maps
    pub source_maps: bool,

    /// Evaluation policy for `define`
    pub modules: ModuleMode,

    /// Initial package map
    pub map: PackageMap,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            base_name: String::new(),
            default_extension: DEFAULT_EXTENSION.to_string(),
            source_maps: false,
            modules: ModuleMode::Register,
            map: PackageMap::default(),
        }
    }
}

impl LoaderOptions {
    /// Parse options from a JSON document.
    pub fn from_json_str(content: &str) -> Result<Self> {
        let options: LoaderOptions = serde_json::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            LoaderError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&content)
    }

    /// Override options from environment variables.
    pub fn load_from_env(&mut self) -> Result<()> {
        if let Ok(base_url) = std::env::var("FERRULE_BASE_URL") {
            self.base_url = base_url;
        }

        if let Ok(source_maps) = std::env::var("FERRULE_SOURCE_MAPS") {
            self.source_maps = parse_bool(&source_maps).ok_or_else(|| {
                LoaderError::Config(format!("FERRULE_SOURCE_MAPS: not a boolean: '{}'", source_maps))
            })?;
        }

        if let Ok(modules) = std::env::var("FERRULE_MODULES") {
            self.modules = modules.parse()?;
        }

        self.validate()
    }

    /// Check option values for consistency.
    pub fn validate(&self) -> Result<()> {
        if !self.default_extension.is_empty() && !self.default_extension.starts_with('.') {
            return Err(LoaderError::Config(format!(
                "defaultExtension must start with '.', got '{}'",
                self.default_extension
            )));
        }
        if self.base_name.starts_with("./") || self.base_name.starts_with("../") {
            return Err(LoaderError::Config(format!(
                "baseName must not be relative, got '{}'",
                self.base_name
            )));
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = LoaderOptions::default();
        assert_eq!(options.base_url, "./");
        assert_eq!(options.default_extension, ".js");
        assert!(!options.source_maps);
        assert_eq!(options.modules, ModuleMode::Register);
    }

    #[test]
    fn test_from_json() {
        let options = LoaderOptions::from_json_str(
            r#"{
                "baseURL": "http://example.org/a/",
                "sourceMaps": true,
                "modules": "instantiate",
                "map": { "jquery": "jquery@2.0.0" }
            }"#,
        )
        .unwrap();

        assert_eq!(options.base_url, "http://example.org/a/");
        assert!(options.source_maps);
        assert_eq!(options.modules, ModuleMode::Instantiate);
        assert_eq!(options.map.get("jquery"), Some("jquery@2.0.0"));
        assert_eq!(options.default_extension, ".js");
    }

    #[test]
    fn test_invalid_options() {
        let err = LoaderOptions::from_json_str(r#"{ "defaultExtension": "js" }"#).unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));

        let err = LoaderOptions::from_json_str(r#"{ "modules": "eager" }"#).unwrap_err();
        assert!(matches!(err, LoaderError::Config(_)));
    }

    #[test]
    fn test_module_mode_from_str() {
        assert_eq!("register".parse::<ModuleMode>().unwrap(), ModuleMode::Register);
        assert_eq!("instantiate".parse::<ModuleMode>().unwrap(), ModuleMode::Instantiate);
        assert!("other".parse::<ModuleMode>().is_err());
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
