//! Route pattern grammar and URL mask matching.
//!
//! # Responsibilities
//! - Parse the registration DSL:
//!   `"GET|POST [alias: or @alias] /path/@token/* [sync|ajax|cli]"`
//! - Compile URL templates to regexes (`@token` -> named capture, `*` ->
//!   greedy segment run) and match request paths against them
//! - Derive the specificity key used to order the route table
//!
//! # Design Decisions
//! - Compiled regexes are cached per (pattern, caseless) pair; route tables
//!   are match-heavy and registration-light
//! - Matching tolerates one trailing slash on the URL, nothing more

use parking_lot::Mutex;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use crate::error::FrameworkError;
use crate::hive::store::VERBS;
use crate::hive::value::Value;

/// Request context a route is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum RequestKind {
    /// Matches in any context.
    #[default]
    Any,
    Sync,
    Ajax,
    Cli,
}

impl RequestKind {
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "sync" => Some(RequestKind::Sync),
            "ajax" => Some(RequestKind::Ajax),
            "cli" => Some(RequestKind::Cli),
            _ => None,
        }
    }
}

/// A parsed route declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteSpec {
    pub verbs: Vec<String>,
    /// URL template, or the name of the alias it references.
    pub pattern: PatternRef,
    /// Alias declared inline (`name: /path`).
    pub alias: Option<String>,
    pub kind: RequestKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PatternRef {
    Template(String),
    Alias(String),
}

impl RouteSpec {
    /// Parse `"VERB1|VERB2 [alias:] PATTERN [context]"`.
    pub fn parse(input: &str) -> Result<Self, FrameworkError> {
        static GRAMMAR: OnceLock<Regex> = OnceLock::new();
        let grammar = GRAMMAR.get_or_init(|| {
            Regex::new(
                r"^\s*([|\w]+)\s+(?:@?(\S+?)\s*:\s*)?(\S+)(?:\s+\[(\w+)\])?\s*$",
            )
            .expect("route grammar regex")
        });
        let caps = grammar
            .captures(input)
            .ok_or_else(|| FrameworkError::InvalidPattern(input.to_string()))?;

        let alias = match caps.get(2) {
            Some(name) => {
                let name = name.as_str();
                if !is_identifier(name) {
                    return Err(FrameworkError::InvalidAlias(name.to_string()));
                }
                Some(name.to_string())
            }
            None => None,
        };

        let raw = caps.get(3).map(|m| m.as_str()).unwrap_or("");
        if raw.is_empty() {
            return Err(FrameworkError::InvalidPattern(input.to_string()));
        }
        let pattern = match raw.strip_prefix('@') {
            Some(name) if alias.is_none() && is_identifier(name) => {
                PatternRef::Alias(name.to_string())
            }
            _ => PatternRef::Template(raw.to_string()),
        };

        let kind = match caps.get(4) {
            Some(tag) => RequestKind::parse(tag.as_str())
                .ok_or_else(|| FrameworkError::InvalidPattern(input.to_string()))?,
            None => RequestKind::Any,
        };

        let mut verbs = Vec::new();
        for verb in caps[1].split('|').filter(|v| !v.is_empty()) {
            let verb = verb.to_uppercase();
            if !VERBS.contains(&verb.as_str()) {
                return Err(FrameworkError::UnsupportedVerb(verb));
            }
            verbs.push(verb);
        }
        if verbs.is_empty() {
            return Err(FrameworkError::InvalidPattern(input.to_string()));
        }

        Ok(Self {
            verbs,
            pattern,
            alias,
            kind,
        })
    }
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

/// Apply a URL template to a path. `@token` captures one segment, `*`
/// captures across segments; repeated wildcards collect into a sequence
/// under the `*` key. `None` on mismatch.
pub fn mask(pattern: &str, url: &str, caseless: bool) -> Option<BTreeMap<String, Value>> {
    let regex = compiled(pattern, caseless)?;
    let caps = regex.captures(url)?;
    let mut args = BTreeMap::new();
    let mut wildcards: Vec<Value> = Vec::new();
    for name in regex.capture_names().flatten() {
        let Some(cap) = caps.name(name) else {
            continue;
        };
        if let Some(rest) = name.strip_prefix('_') {
            if rest.chars().all(|c| c.is_ascii_digit()) {
                wildcards.push(Value::Str(cap.as_str().to_string()));
                continue;
            }
        }
        args.insert(name.to_string(), Value::Str(cap.as_str().to_string()));
    }
    match wildcards.len() {
        0 => {}
        1 => {
            args.insert("*".to_string(), wildcards.remove(0));
        }
        _ => {
            args.insert("*".to_string(), Value::Seq(wildcards));
        }
    }
    Some(args)
}

fn compiled(pattern: &str, caseless: bool) -> Option<Regex> {
    static COMPILED: OnceLock<Mutex<HashMap<(String, bool), Option<Regex>>>> =
        OnceLock::new();
    let cache = COMPILED.get_or_init(|| Mutex::new(HashMap::new()));
    let key = (pattern.to_string(), caseless);
    let mut cache = cache.lock();
    if let Some(entry) = cache.get(&key) {
        return entry.clone();
    }
    let entry = Regex::new(&template_regex(pattern, caseless)).ok();
    cache.insert(key, entry.clone());
    entry
}

/// Translate a URL template into regex source.
fn template_regex(pattern: &str, caseless: bool) -> String {
    let mut out = String::from(if caseless { "(?i)^" } else { "^" });
    let mut wildcard = 0;
    let mut chars = pattern.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '*' => {
                out.push_str(&format!("(?P<_{wildcard}>[^?]*)"));
                wildcard += 1;
            }
            '@' => {
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if name.is_empty() {
                    out.push_str("@");
                } else {
                    out.push_str(&format!("(?P<{name}>[^/?]+)"));
                }
            }
            '{' if chars.peek() == Some(&'@') => {
                chars.next();
                let mut name = String::new();
                while let Some(&next) = chars.peek() {
                    if next.is_alphanumeric() || next == '_' {
                        name.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if chars.peek() == Some(&'}') {
                    chars.next();
                }
                out.push_str(&format!("(?P<{name}>[^/?]+)"));
            }
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push_str("/?$");
    out
}

/// Specificity key for dispatch ordering: tokens degrade to wildcards, a
/// terminal marker ranks literal tails above wildcard tails. Tables sort
/// descending on this key.
pub fn specificity(pattern: &str) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN.get_or_init(|| Regex::new(r"@\w+").expect("token regex"));
    let mut path = token.replace_all(pattern, "*@").into_owned();
    if !path.ends_with('*') {
        path.push('+');
    }
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_verbs_pattern_and_context() {
        let spec = RouteSpec::parse("GET|HEAD /items/@id [ajax]").unwrap();
        assert_eq!(spec.verbs, vec!["GET", "HEAD"]);
        assert_eq!(spec.pattern, PatternRef::Template("/items/@id".into()));
        assert_eq!(spec.kind, RequestKind::Ajax);
        assert_eq!(spec.alias, None);
    }

    #[test]
    fn parses_alias_declaration_and_reference() {
        let spec = RouteSpec::parse("GET item: /items/@id").unwrap();
        assert_eq!(spec.alias.as_deref(), Some("item"));
        assert_eq!(spec.pattern, PatternRef::Template("/items/@id".into()));

        let spec = RouteSpec::parse("POST @item").unwrap();
        assert_eq!(spec.pattern, PatternRef::Alias("item".into()));
    }

    #[test]
    fn rejects_bad_declarations() {
        assert!(matches!(
            RouteSpec::parse("GET"),
            Err(FrameworkError::InvalidPattern(_))
        ));
        assert!(matches!(
            RouteSpec::parse("GET bad-alias: /x"),
            Err(FrameworkError::InvalidAlias(_))
        ));
        assert!(matches!(
            RouteSpec::parse("BREW /coffee"),
            Err(FrameworkError::UnsupportedVerb(_))
        ));
    }

    #[test]
    fn mask_extracts_tokens() {
        let args = mask("/user/@id", "/user/42", true).unwrap();
        assert_eq!(args.get("id"), Some(&Value::Str("42".into())));
        assert!(mask("/user/@id", "/user/", true).is_none());
        assert!(mask("/user/@id", "/user/42/extra", true).is_none());
    }

    #[test]
    fn mask_braced_tokens_and_trailing_slash() {
        let args = mask("/user/{@id}", "/user/7/", true).unwrap();
        assert_eq!(args.get("id"), Some(&Value::Str("7".into())));
    }

    #[test]
    fn mask_collects_wildcards() {
        let args = mask("/files/*", "/files/a/b/c", true).unwrap();
        assert_eq!(args.get("*"), Some(&Value::Str("a/b/c".into())));

        let args = mask("/x/*/y/*", "/x/1/y/2", true).unwrap();
        assert_eq!(
            args.get("*"),
            Some(&Value::Seq(vec![
                Value::Str("1".into()),
                Value::Str("2".into())
            ]))
        );
    }

    #[test]
    fn mask_case_sensitivity_follows_flag() {
        assert!(mask("/About", "/about", true).is_some());
        assert!(mask("/About", "/about", false).is_none());
    }

    #[test]
    fn specificity_ranks_literal_tails_first() {
        // literal suffix outranks trailing wildcard for the same prefix
        let literal = specificity("/user/list");
        let wild = specificity("/user/*");
        assert!(literal > wild);
        // token degrades like a wildcard but keeps the terminal marker
        let token = specificity("/user/@id");
        assert!(token > wild);
    }
}
