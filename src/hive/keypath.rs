//! Dotted/bracket key-path parsing and resolution over a [`Value`] tree.
//!
//! # Responsibilities
//! - Split `"SESSION.foo"`, `"GET['bar']"`, `"a->b[0]"` into segments
//! - Read-only resolution that never mutates the tree
//! - Mutating resolution that creates missing intermediate containers
//!
//! # Design Decisions
//! - `.`/`->`/brackets are interchangeable separators; the container shape is
//!   decided by the segment (numeric segments materialize sequences)
//! - The first segment must be a bare identifier; anything else is an
//!   `InvalidKey` error at parse time

use std::collections::BTreeMap;

use crate::error::FrameworkError;
use crate::hive::value::Value;

/// A parsed hive key path.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyPath {
    pub segments: Vec<String>,
}

impl KeyPath {
    /// Split a key on `.`, `->` and `[...]` (quotes optional inside
    /// brackets). Fails unless the first segment matches `\w+`.
    pub fn parse(key: &str) -> Result<Self, FrameworkError> {
        let mut segments = Vec::new();
        let mut current = String::new();
        let mut chars = key.chars().peekable();
        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                }
                '-' if chars.peek() == Some(&'>') => {
                    chars.next();
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                }
                '[' => {
                    if !current.is_empty() {
                        segments.push(std::mem::take(&mut current));
                    }
                    let mut inner = String::new();
                    for ch in chars.by_ref() {
                        if ch == ']' {
                            break;
                        }
                        inner.push(ch);
                    }
                    let inner = inner.trim().trim_matches(|c| c == '\'' || c == '"');
                    if !inner.is_empty() {
                        segments.push(inner.to_string());
                    }
                }
                _ => current.push(ch),
            }
        }
        if !current.is_empty() {
            segments.push(current);
        }
        match segments.first() {
            Some(head)
                if !head.is_empty()
                    && head.chars().all(|c| c.is_alphanumeric() || c == '_') => {}
            _ => return Err(FrameworkError::InvalidKey(key.to_string())),
        }
        Ok(Self { segments })
    }

    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    pub fn is_top_level(&self) -> bool {
        self.segments.len() == 1
    }
}

/// Read-only resolution: missing elements yield `None`, nothing is created.
pub fn resolve_ref<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    let mut cur = root;
    for seg in segments {
        cur = match cur {
            Value::Map(map) => map.get(seg)?,
            Value::Seq(seq) => seq.get(seg.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(cur)
}

/// Mutating resolution: missing intermediates are created, as a sequence
/// when the next segment looks numeric and a mapping otherwise.
pub fn resolve_mut<'a>(root: &'a mut Value, segments: &[String]) -> &'a mut Value {
    let mut cur = root;
    for seg in segments {
        cur = descend(cur, seg);
    }
    cur
}

fn descend<'a>(cur: &'a mut Value, seg: &str) -> &'a mut Value {
    if let Ok(idx) = seg.parse::<usize>() {
        if !matches!(cur, Value::Seq(_) | Value::Map(_)) {
            *cur = Value::Seq(Vec::new());
        }
        match cur {
            Value::Seq(seq) => {
                if idx >= seq.len() {
                    seq.resize(idx + 1, Value::Null);
                }
                &mut seq[idx]
            }
            Value::Map(map) => map.entry(seg.to_string()).or_insert(Value::Null),
            _ => unreachable!(),
        }
    } else {
        if !matches!(cur, Value::Map(_)) {
            *cur = Value::Map(BTreeMap::new());
        }
        match cur {
            Value::Map(map) => map.entry(seg.to_string()).or_insert(Value::Null),
            _ => unreachable!(),
        }
    }
}

/// Remove the element addressed by the path, returning it if present.
pub fn remove(root: &mut Value, segments: &[String]) -> Option<Value> {
    let (last, parents) = segments.split_last()?;
    let parent = {
        let mut cur = root;
        for seg in parents {
            cur = match cur {
                Value::Map(map) => map.get_mut(seg)?,
                Value::Seq(seq) => seq.get_mut(seg.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        cur
    };
    match parent {
        Value::Map(map) => map.remove(last),
        Value::Seq(seq) => {
            let idx = last.parse::<usize>().ok()?;
            if idx < seq.len() {
                Some(seq.remove(idx))
            } else {
                None
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(key: &str) -> Vec<String> {
        KeyPath::parse(key).unwrap().segments
    }

    #[test]
    fn splits_dots_arrows_and_brackets() {
        assert_eq!(path("SESSION.foo"), vec!["SESSION", "foo"]);
        assert_eq!(path("GET['bar']"), vec!["GET", "bar"]);
        assert_eq!(path("GET[\"bar\"]"), vec!["GET", "bar"]);
        assert_eq!(path("a->b.c[0]"), vec!["a", "b", "c", "0"]);
    }

    #[test]
    fn rejects_non_identifier_head() {
        assert!(KeyPath::parse("[foo]").is_err());
        assert!(KeyPath::parse("a b.c").is_err());
        assert!(KeyPath::parse("").is_err());
    }

    #[test]
    fn read_only_resolution_does_not_mutate() {
        let root = Value::Map(Default::default());
        assert!(resolve_ref(&root, &path("a.b.c")).is_none());
        assert_eq!(root, Value::Map(Default::default()));
    }

    #[test]
    fn mutable_resolution_creates_intermediates() {
        let mut root = Value::Map(Default::default());
        *resolve_mut(&mut root, &path("a.b.1")) = Value::Str("deep".into());
        let got = resolve_ref(&root, &path("a.b.1")).unwrap();
        assert_eq!(got, &Value::Str("deep".into()));
        // numeric segment materialized a padded sequence
        let seq = resolve_ref(&root, &path("a.b")).unwrap().as_seq().unwrap();
        assert_eq!(seq.len(), 2);
        assert_eq!(seq[0], Value::Null);
    }

    #[test]
    fn remove_leaves_siblings() {
        let mut root = Value::Map(Default::default());
        *resolve_mut(&mut root, &path("m.x")) = Value::Int(1);
        *resolve_mut(&mut root, &path("m.y")) = Value::Int(2);
        assert_eq!(remove(&mut root, &path("m.x")), Some(Value::Int(1)));
        assert!(resolve_ref(&root, &path("m.x")).is_none());
        assert!(resolve_ref(&root, &path("m.y")).is_some());
    }
}
