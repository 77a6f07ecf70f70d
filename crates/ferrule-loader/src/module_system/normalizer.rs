// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Specifier normalization
//!
//! Turns a specifier plus an optional referrer into a canonical name. Pure
//! string manipulation; nothing here touches the network or the filesystem.

use tracing::debug;
use url::Url;

use crate::error::{LoaderError, Result};
use crate::module_system::package_map::PackageMap;

/// Shape of a specifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecifierKind {
    /// `./x`, `../x`, `.` or `..`
    Relative,
    /// `@org/pkg[/sub]`
    Scoped,
    /// `pkg[/sub]` or `/abs/path`
    Bare,
    /// `scheme://...`
    Url,
}

impl SpecifierKind {
    /// Classify a specifier
    pub fn of(specifier: &str) -> Self {
        if specifier == "."
            || specifier == ".."
            || specifier.starts_with("./")
            || specifier.starts_with("../")
        {
            SpecifierKind::Relative
        } else if specifier.starts_with('@') {
            SpecifierKind::Scoped
        } else if is_absolute_url(specifier) {
            SpecifierKind::Url
        } else {
            SpecifierKind::Bare
        }
    }
}

/// Resolves specifiers to canonical names
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    /// Directory that relative specifiers resolve against when there is no referrer
    base_name: String,
}

impl Normalizer {
    /// Create a normalizer resolving referrer-less relative names against `base_name`
    pub fn new(base_name: impl Into<String>) -> Self {
        Self {
            base_name: base_name.into(),
        }
    }

    /// The directory used when no referrer is known
    pub fn base_name(&self) -> &str {
        &self.base_name
    }

    /// Normalize `specifier` requested by `referrer`, then apply `map`.
    pub fn normalize(
        &self,
        specifier: &str,
        referrer: Option<&str>,
        map: &PackageMap,
    ) -> Result<String> {
        validate(specifier)?;

        let resolved = match SpecifierKind::of(specifier) {
            SpecifierKind::Url => canonical_url(specifier)?,
            SpecifierKind::Relative => self.resolve_relative(specifier, referrer)?,
            SpecifierKind::Scoped => {
                validate_scoped(specifier)?;
                clean_segments(specifier, Vec::new(), specifier)?
            }
            SpecifierKind::Bare => {
                let root = if specifier.starts_with('/') { vec![""] } else { Vec::new() };
                clean_segments(specifier.trim_start_matches('/'), root, specifier)?
            }
        };

        let mapped = map.apply(&resolved, referrer)?;
        debug!("Normalized {} (referrer {:?}) -> {}", specifier, referrer, mapped);
        Ok(mapped)
    }

    fn resolve_relative(&self, specifier: &str, referrer: Option<&str>) -> Result<String> {
        match referrer {
            Some(referrer) if is_absolute_url(referrer) => {
                let base = Url::parse(referrer)
                    .map_err(|e| LoaderError::resolution(specifier, format!("bad referrer: {}", e)))?;
                let joined = base
                    .join(specifier)
                    .map_err(|e| LoaderError::resolution(specifier, e.to_string()))?;
                Ok(joined.to_string())
            }
            Some(referrer) => {
                let mut dir: Vec<&str> = referrer.split('/').collect();
                dir.pop();
                clean_segments(specifier, dir, specifier)
            }
            None => {
                if is_absolute_url(&self.base_name) {
                    let mut base = self.base_name.clone();
                    if !base.ends_with('/') {
                        base.push('/');
                    }
                    return self.resolve_relative(specifier, Some(&base));
                }
                let dir: Vec<&str> = self
                    .base_name
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .collect();
                let dir = if self.base_name.starts_with('/') {
                    std::iter::once("").chain(dir).collect::<Vec<_>>()
                } else {
                    dir
                };
                clean_segments(specifier, dir, specifier)
            }
        }
    }
}

/// Whether `s` starts with `scheme://`
pub fn is_absolute_url(s: &str) -> bool {
    match s.find("://") {
        Some(idx) if idx > 0 => {
            let scheme = &s[..idx];
            scheme
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_alphabetic())
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        _ => false,
    }
}

fn validate(specifier: &str) -> Result<()> {
    if specifier.is_empty() {
        return Err(LoaderError::resolution(specifier, "empty specifier"));
    }
    if let Some(c) = specifier
        .chars()
        .find(|c| c.is_whitespace() || c.is_control() || *c == '\\')
    {
        return Err(LoaderError::resolution(
            specifier,
            format!("illegal character {:?}", c),
        ));
    }
    if specifier.len() > 1 && specifier.ends_with('/') {
        return Err(LoaderError::resolution(specifier, "trailing '/'"));
    }
    Ok(())
}

fn validate_scoped(specifier: &str) -> Result<()> {
    let mut parts = specifier[1..].splitn(2, '/');
    let scope = parts.next().unwrap_or_default();
    let package = parts.next().unwrap_or_default();
    if scope.is_empty() || package.is_empty() || package.starts_with('/') {
        return Err(LoaderError::resolution(
            specifier,
            "scoped name needs the form @scope/name",
        ));
    }
    Ok(())
}

fn canonical_url(specifier: &str) -> Result<String> {
    Url::parse(specifier)
        .map(|url| url.to_string())
        .map_err(|e| LoaderError::resolution(specifier, e.to_string()))
}

/// Push the segments of `path` onto `dir`, folding `.` and `..`.
fn clean_segments<'a>(path: &'a str, mut dir: Vec<&'a str>, specifier: &str) -> Result<String> {
    let absolute = dir.first() == Some(&"");
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                let at_root = dir.is_empty() || (absolute && dir.len() == 1);
                if at_root {
                    return Err(LoaderError::resolution(
                        specifier,
                        "'..' climbs above the root",
                    ));
                }
                dir.pop();
            }
            segment => dir.push(segment),
        }
    }

    let joined = dir.join("/");
    if joined.is_empty() {
        return Err(LoaderError::resolution(specifier, "resolves to an empty name"));
    }
    Ok(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn normalize(specifier: &str, referrer: Option<&str>) -> Result<String> {
        Normalizer::default().normalize(specifier, referrer, &PackageMap::new())
    }

    #[test]
    fn test_specifier_kind() {
        assert_eq!(SpecifierKind::of("./x"), SpecifierKind::Relative);
        assert_eq!(SpecifierKind::of("../x"), SpecifierKind::Relative);
        assert_eq!(SpecifierKind::of("@org/pkg"), SpecifierKind::Scoped);
        assert_eq!(SpecifierKind::of("pkg/sub"), SpecifierKind::Bare);
        assert_eq!(SpecifierKind::of("http://example.org/x"), SpecifierKind::Url);
        assert_eq!(SpecifierKind::of(".hidden"), SpecifierKind::Bare);
    }

    #[test]
    fn test_relative_against_referrer() {
        assert_eq!(normalize("./b", Some("pkg/lib/a")).unwrap(), "pkg/lib/b");
        assert_eq!(normalize("../b", Some("pkg/lib/a")).unwrap(), "pkg/b");
        assert_eq!(normalize("./sub/./c", Some("pkg/a")).unwrap(), "pkg/sub/c");
        assert_eq!(normalize("../b", Some("/abs/dir/a")).unwrap(), "/abs/b");
    }

    #[test]
    fn test_relative_across_pseudo_root() {
        let up = normalize("../sibling", Some("pkg@0.0.1/bin")).unwrap();
        let here = normalize("./sibling", Some("pkg@0.0.1")).unwrap();
        assert_eq!(up, "sibling");
        assert_eq!(up, here);
    }

    #[test]
    fn test_relative_without_referrer_uses_base() {
        let normalizer = Normalizer::new("tests/unit");
        let map = PackageMap::new();
        assert_eq!(
            normalizer.normalize("./test_a", None, &map).unwrap(),
            "tests/unit/test_a"
        );
        assert_eq!(
            normalizer.normalize("../x", None, &map).unwrap(),
            "tests/x"
        );
        assert_eq!(normalize("./test_a", None).unwrap(), "test_a");
    }

    #[test]
    fn test_relative_against_url_referrer() {
        assert_eq!(
            normalize("../c", Some("http://example.org/a/b/x.js")).unwrap(),
            "http://example.org/a/c"
        );

        let normalizer = Normalizer::new("http://example.org/root");
        assert_eq!(
            normalizer.normalize("./m", None, &PackageMap::new()).unwrap(),
            "http://example.org/root/m"
        );
    }

    #[test]
    fn test_bare_and_scoped() {
        assert_eq!(normalize("pkg", None).unwrap(), "pkg");
        assert_eq!(normalize("pkg/./a/../b", None).unwrap(), "pkg/b");
        assert_eq!(normalize("@org/name", Some("x/y")).unwrap(), "@org/name");
        assert_eq!(normalize("/abs/x", None).unwrap(), "/abs/x");
    }

    #[test]
    fn test_malformed() {
        assert!(normalize("", None).is_err());
        assert!(normalize("a b", None).is_err());
        assert!(normalize("a\\b", None).is_err());
        assert!(normalize("@org", None).is_err());
        assert!(normalize("@org/", None).is_err());
        assert!(normalize("pkg/", None).is_err());
        assert!(normalize("../x", Some("top")).is_err());
        assert!(normalize("../../x", Some("/a/b")).is_err());
        assert!(normalize(".", None).is_err());
    }

    #[test]
    fn test_map_applied_after_relative_resolution() {
        let mut map = PackageMap::new();
        map.insert("vendor", "vendor@1.0.0");
        let normalizer = Normalizer::default();

        assert_eq!(
            normalizer.normalize("../vendor/x", Some("app/main"), &map).unwrap(),
            "vendor@1.0.0/x"
        );
        assert_eq!(
            normalizer.normalize("vendor", None, &map).unwrap(),
            "vendor@1.0.0"
        );
    }

    #[test]
    fn test_is_absolute_url() {
        assert!(is_absolute_url("http://x"));
        assert!(is_absolute_url("file:///tmp/x"));
        assert!(!is_absolute_url("pkg@1.0.0/x"));
        assert!(!is_absolute_url("://x"));
    }
}
