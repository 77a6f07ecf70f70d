// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Package map: prefix aliasing and semver-derived equivalence classes

use semver::Version;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tracing::debug;

use crate::error::{LoaderError, Result};

/// One entry of a package map
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MapEntry {
    /// `prefix -> target`, applies to every referrer
    Target(String),
    /// Rules that only apply to referrers under the entry's key
    Contextual(BTreeMap<String, String>),
}

/// Prefix-based aliasing rules
///
/// Serialised as a flat JSON object: string values are global rules and
/// object values hold rules scoped to a referrer prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageMap {
    entries: BTreeMap<String, MapEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RuleId {
    context: Option<String>,
    prefix: String,
}

impl PackageMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a global rule
    pub fn insert(&mut self, prefix: impl Into<String>, target: impl Into<String>) {
        self.entries.insert(prefix.into(), MapEntry::Target(target.into()));
    }

    /// Add a rule that only applies when the referrer is under `referrer_prefix`
    pub fn insert_contextual(
        &mut self,
        referrer_prefix: impl Into<String>,
        prefix: impl Into<String>,
        target: impl Into<String>,
    ) {
        let entry = self
            .entries
            .entry(referrer_prefix.into())
            .or_insert_with(|| MapEntry::Contextual(BTreeMap::new()));
        match entry {
            MapEntry::Contextual(rules) => {
                rules.insert(prefix.into(), target.into());
            }
            MapEntry::Target(_) => {
                let mut rules = BTreeMap::new();
                rules.insert(prefix.into(), target.into());
                *entry = MapEntry::Contextual(rules);
            }
        }
    }

    /// Target of a global rule
    pub fn get(&self, prefix: &str) -> Option<&str> {
        match self.entries.get(prefix) {
            Some(MapEntry::Target(target)) => Some(target),
            _ => None,
        }
    }

    /// Merge every entry of `other` into this map
    pub fn extend(&mut self, other: PackageMap) {
        self.entries.extend(other.entries);
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the map has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply the map to a name.
    ///
    /// Returns the name unchanged when no rule matches. Each rule fires at most
    /// once; reaching a name seen earlier is a mapping cycle.
    pub fn apply(&self, name: &str, referrer: Option<&str>) -> Result<String> {
        let mut current = name.to_string();
        let mut seen: HashSet<String> = HashSet::from([current.clone()]);
        let mut fired: HashSet<RuleId> = HashSet::new();

        while let Some((rule, target)) = self.lookup(&current, referrer) {
            if fired.contains(&rule) {
                break;
            }
            let next = format!("{}{}", target, &current[rule.prefix.len()..]);
            if next == current {
                break;
            }
            if !seen.insert(next.clone()) {
                return Err(LoaderError::resolution(
                    name,
                    format!("package map cycle through '{}'", next),
                ));
            }
            debug!("Mapped {} -> {}", current, next);
            fired.insert(rule);
            current = next;
        }

        Ok(current)
    }

    /// Find the rule for `name`: contextual rules for the longest matching
    /// referrer prefix first, then the longest global prefix.
    fn lookup(&self, name: &str, referrer: Option<&str>) -> Option<(RuleId, &str)> {
        if let Some(referrer) = referrer {
            let mut contexts: Vec<(&String, &BTreeMap<String, String>)> = self
                .entries
                .iter()
                .filter_map(|(key, entry)| match entry {
                    MapEntry::Contextual(rules) if prefix_matches(key, referrer) => {
                        Some((key, rules))
                    }
                    _ => None,
                })
                .collect();
            contexts.sort_by_key(|(key, _)| std::cmp::Reverse(key.len()));

            for (context, rules) in contexts {
                if let Some((prefix, target)) = longest_match(rules.iter(), name) {
                    let rule = RuleId {
                        context: Some(context.clone()),
                        prefix: prefix.to_string(),
                    };
                    return Some((rule, target));
                }
            }
        }

        let globals = self.entries.iter().filter_map(|(key, entry)| match entry {
            MapEntry::Target(target) => Some((key, target)),
            MapEntry::Contextual(_) => None,
        });
        longest_match(globals, name).map(|(prefix, target)| {
            let rule = RuleId {
                context: None,
                prefix: prefix.to_string(),
            };
            (rule, target)
        })
    }
}

impl From<BTreeMap<String, String>> for PackageMap {
    fn from(rules: BTreeMap<String, String>) -> Self {
        Self {
            entries: rules
                .into_iter()
                .map(|(k, v)| (k, MapEntry::Target(v)))
                .collect(),
        }
    }
}

/// Whether `prefix` matches `name` on a path-segment boundary
pub fn prefix_matches(prefix: &str, name: &str) -> bool {
    if prefix.is_empty() {
        return false;
    }
    if name == prefix {
        return true;
    }
    match name.strip_prefix(prefix) {
        Some(rest) => prefix.ends_with('/') || rest.starts_with('/'),
        None => false,
    }
}

fn longest_match<'a>(
    rules: impl Iterator<Item = (&'a String, &'a String)>,
    name: &str,
) -> Option<(&'a str, &'a str)> {
    rules
        .filter(|(prefix, _)| prefix_matches(prefix, name))
        .max_by_key(|(prefix, _)| prefix.len())
        .map(|(prefix, target)| (prefix.as_str(), target.as_str()))
}

/// Failure to read a version out of a versioned name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// The package segment has no `@version` part
    #[error("no version in '{0}'")]
    MissingVersion(String),

    /// The version text is not `MAJOR.MINOR.PATCH[-pre][+build]`
    #[error("invalid version '{version}': {reason}")]
    Invalid {
        /// The version text
        version: String,
        /// Parser message
        reason: String,
    },
}

/// A name of the form `pkg@X.Y.Z[-pre][+build][/subpath]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedName {
    /// Package name, including any `@scope/`
    pub package: String,
    /// Parsed version
    pub version: Version,
    /// Version text as written
    pub version_text: String,
    /// Path after the package segment, without the leading `/`
    pub subpath: Option<String>,
}

impl VersionedName {
    /// `pkg@X.Y.Z...` exactly as written
    pub fn package_id(&self) -> String {
        format!("{}@{}", self.package, self.version_text)
    }
}

/// Split a versioned name into package, version and subpath.
pub fn parse_versioned(name: &str) -> std::result::Result<VersionedName, VersionError> {
    // Scoped packages keep their first segment: @scope/pkg@1.0.0/sub
    let (head_len, rest) = if let Some(scoped) = name.strip_prefix('@') {
        match scoped.find('/') {
            Some(slash) => (slash + 2, &name[slash + 2..]),
            None => return Err(VersionError::MissingVersion(name.to_string())),
        }
    } else {
        (0, name)
    };

    let (segment, subpath) = match rest.find('/') {
        Some(slash) => (&rest[..slash], Some(rest[slash + 1..].to_string())),
        None => (rest, None),
    };

    let Some(at) = segment.find('@') else {
        return Err(VersionError::MissingVersion(name.to_string()));
    };
    if at == 0 {
        return Err(VersionError::MissingVersion(name.to_string()));
    }

    let package = format!("{}{}", &name[..head_len], &segment[..at]);
    let version_text = &segment[at + 1..];
    let version = Version::parse(version_text).map_err(|e| VersionError::Invalid {
        version: version_text.to_string(),
        reason: e.to_string(),
    })?;

    Ok(VersionedName {
        package,
        version,
        version_text: version_text.to_string(),
        subpath,
    })
}

/// Build aliases `pkg`, `pkg@X` and `pkg@X.Y` for `pkg@X.Y.Z...`.
///
/// An unparseable version yields an empty map.
pub fn semver_map(versioned: &str) -> PackageMap {
    let mut map = PackageMap::new();
    match parse_versioned(versioned) {
        Ok(parsed) => {
            let target = parsed.package_id();
            let version = &parsed.version;
            map.insert(parsed.package.clone(), target.clone());
            map.insert(format!("{}@{}", parsed.package, version.major), target.clone());
            map.insert(
                format!("{}@{}.{}", parsed.package, version.major, version.minor),
                target,
            );
        }
        Err(e) => debug!("No semver alias for {}: {}", versioned, e),
    }
    map
}
