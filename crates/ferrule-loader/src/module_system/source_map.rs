// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Source maps for translated units and the index that serves them

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::{Position, Result};
use crate::module_system::pipeline::SourceKind;

const BASE64: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789+/";

/// A Source Map v3 document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceMap {
    /// Format version, always 3
    pub version: u8,
    /// Name of the generated file
    pub file: String,
    /// Original sources
    pub sources: Vec<String>,
    /// Original source texts, parallel to `sources`
    #[serde(default)]
    pub sources_content: Vec<Option<String>>,
    /// Symbol names referenced by mappings
    #[serde(default)]
    pub names: Vec<String>,
    /// Base64 VLQ mappings
    pub mappings: String,
}

/// Original location of a generated line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginalPosition {
    /// Source the line came from
    pub source: String,
    /// 1-based line
    pub line: usize,
    /// 1-based column
    pub column: usize,
}

impl SourceMap {
    /// Parse a JSON source map
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialise to JSON
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// The embedded text of `source`, if the map carries it
    pub fn source_content_for(&self, source: &str) -> Option<&str> {
        let idx = self.sources.iter().position(|s| s == source)?;
        self.sources_content.get(idx)?.as_deref()
    }

    /// Where generated line `line` (1-based) came from
    pub fn original_position_for(&self, line: usize) -> Option<OriginalPosition> {
        let decoded = decode_mappings(&self.mappings)?;
        let segment = decoded.get(line.checked_sub(1)?)?.first().copied()??;
        let (source_idx, src_line, src_col) = segment;
        Some(OriginalPosition {
            source: self.sources.get(source_idx)?.clone(),
            line: src_line + 1,
            column: src_col + 1,
        })
    }
}

/// Builds a single-source map one generated line at a time
#[derive(Debug)]
pub struct SourceMapBuilder {
    file: String,
    source: String,
    content: String,
    lines: Vec<Option<Position>>,
}

impl SourceMapBuilder {
    /// Start a map for `file` generated from `source` with text `content`
    pub fn new(file: impl Into<String>, source: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            source: source.into(),
            content: content.into(),
            lines: Vec::new(),
        }
    }

    /// Record the next generated line and where it came from
    pub fn add_line(&mut self, original: Option<Position>) {
        self.lines.push(original);
    }

    /// Finish the map
    pub fn build(self) -> SourceMap {
        let mut mappings = String::new();
        let mut prev_line = 0i64;
        let mut prev_col = 0i64;

        for (i, original) in self.lines.iter().enumerate() {
            if i > 0 {
                mappings.push(';');
            }
            if let Some(pos) = original {
                let line = pos.line as i64 - 1;
                let col = pos.column as i64 - 1;
                // generated column, source index, original line, original column
                encode_vlq(&mut mappings, 0);
                encode_vlq(&mut mappings, 0);
                encode_vlq(&mut mappings, line - prev_line);
                encode_vlq(&mut mappings, col - prev_col);
                prev_line = line;
                prev_col = col;
            }
        }

        SourceMap {
            version: 3,
            file: self.file,
            sources: vec![self.source],
            sources_content: vec![Some(self.content)],
            names: Vec::new(),
            mappings,
        }
    }
}

fn encode_vlq(out: &mut String, value: i64) {
    let mut vlq = if value < 0 {
        ((-value) << 1) | 1
    } else {
        value << 1
    };
    loop {
        let mut digit = (vlq & 0b11111) as usize;
        vlq >>= 5;
        if vlq > 0 {
            digit |= 0b100000;
        }
        out.push(BASE64[digit] as char);
        if vlq == 0 {
            break;
        }
    }
}

type Segment = Option<(usize, usize, usize)>;

/// Decode `mappings` into per-line segments of (source, line, column), all 0-based.
/// A malformed digit anywhere yields `None`.
fn decode_mappings(mappings: &str) -> Option<Vec<Vec<Segment>>> {
    let mut lines = Vec::new();
    let (mut source, mut line, mut col) = (0i64, 0i64, 0i64);

    for group in mappings.split(';') {
        let mut segments = Vec::new();
        for raw in group.split(',').filter(|s| !s.is_empty()) {
            let fields = decode_vlq(raw)?;
            if fields.len() >= 4 {
                source += fields[1];
                line += fields[2];
                col += fields[3];
                segments.push(Some((source as usize, line as usize, col as usize)));
            } else {
                segments.push(None);
            }
        }
        lines.push(segments);
    }
    Some(lines)
}

fn decode_vlq(segment: &str) -> Option<Vec<i64>> {
    let mut values = Vec::new();
    let mut value = 0i64;
    let mut shift = 0;
    for byte in segment.bytes() {
        let digit = BASE64.iter().position(|&b| b == byte)? as i64;
        value += (digit & 0b11111) << shift;
        if digit & 0b100000 != 0 {
            shift += 5;
        } else {
            let negative = value & 1 == 1;
            value >>= 1;
            values.push(if negative { -value } else { value });
            value = 0;
            shift = 0;
        }
    }
    Some(values)
}

/// A recorded source map
#[derive(Debug, Clone)]
pub struct SourceMapEntry {
    /// Canonical name of the compiled unit
    pub name: String,
    /// Whether the unit was compiled as a script or a module
    pub kind: SourceKind,
    /// The map itself
    pub source_map: SourceMap,
    /// URL under which the original source is listed in the map
    pub url: String,
}

/// Source maps keyed by (canonical name, kind)
#[derive(Debug, Default)]
pub struct SourceMapIndex {
    entries: DashMap<(String, SourceKind), Arc<SourceMapEntry>>,
}

impl SourceMapIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the map generated for a compile
    pub fn record(&self, name: &str, kind: SourceKind, source_map: SourceMap, url: &str) {
        debug!("Recorded {:?} source map for {}", kind, name);
        let entry = SourceMapEntry {
            name: name.to_string(),
            kind,
            source_map,
            url: url.to_string(),
        };
        self.entries.insert((name.to_string(), kind), Arc::new(entry));
    }

    /// Look up the map recorded for (name, kind)
    pub fn query(&self, name: &str, kind: SourceKind) -> Option<Arc<SourceMapEntry>> {
        self.entries
            .get(&(name.to_string(), kind))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of recorded maps
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vlq_encoding() {
        let mut out = String::new();
        for v in [0, 1, -1, 15, 16, -16, 123] {
            encode_vlq(&mut out, v);
            out.push(',');
        }
        assert_eq!(out, "A,C,D,e,gB,hB,2H,");
        assert_eq!(decode_vlq("gB").unwrap(), vec![16]);
        assert_eq!(decode_vlq("AACD").unwrap(), vec![0, 0, 1, -1]);
    }

    #[test]
    fn test_malformed_mappings_have_no_positions() {
        assert_eq!(decode_vlq("A!"), None);

        let mut map = SourceMapBuilder::new("m", "m.js", "x;").build();
        map.mappings = "AAAA;A*AA".to_string();
        assert_eq!(map.original_position_for(1), None);
        assert_eq!(map.original_position_for(2), None);
    }

    #[test]
    fn test_builder_and_lookup() {
        let src = "var a = 1;\n\n  var b = a;\n";
        let mut builder = SourceMapBuilder::new("m.js", "m.src.js", src);
        builder.add_line(Some(Position { line: 1, column: 1 }));
        builder.add_line(Some(Position { line: 3, column: 3 }));
        builder.add_line(None);
        let map = builder.build();

        assert_eq!(map.mappings, "AAAA;AAEE;");
        assert_eq!(map.source_content_for("m.src.js"), Some(src));
        assert_eq!(map.source_content_for("other"), None);
        assert_eq!(
            map.original_position_for(2),
            Some(OriginalPosition {
                source: "m.src.js".to_string(),
                line: 3,
                column: 3
            })
        );
        assert_eq!(map.original_position_for(3), None);
    }

    #[test]
    fn test_json_roundtrip_keeps_content() {
        let src = "export var d = 4;\n";
        let mut builder = SourceMapBuilder::new("d", "d", src);
        builder.add_line(Some(Position { line: 1, column: 1 }));
        let map = builder.build();

        let json = map.to_json();
        assert!(json.contains("\"sourcesContent\""));
        let parsed = SourceMap::from_json(&json).unwrap();
        assert_eq!(parsed, map);
        assert_eq!(parsed.source_content_for("d"), Some(src));
    }

    #[test]
    fn test_index_query() {
        let index = SourceMapIndex::new();
        assert!(index.query("a", SourceKind::Module).is_none());

        let map = SourceMapBuilder::new("a", "a.js", "x;").build();
        index.record("a", SourceKind::Module, map, "a.js");

        let entry = index.query("a", SourceKind::Module).unwrap();
        assert_eq!(entry.url, "a.js");
        assert!(index.query("a", SourceKind::Script).is_none());
        assert_eq!(index.len(), 1);
    }
}
