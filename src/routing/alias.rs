//! Named routes and reverse URL building.
//!
//! # Responsibilities
//! - Keep the alias name -> URL template registry
//! - Substitute `@token`/`{@token}`/`*` placeholders with parameter values
//! - Assemble full URLs (template + query + fragment) from an alias
//!
//! # Design Decisions
//! - Missing parameters stay in place as literal placeholders; reverse
//!   building never fails on an incomplete parameter set
//! - The `"key=value,list=[a,b,c]"` parameter shorthand is parsed by hand:
//!   the grammar needs lookahead a linear scan provides for free

use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;

use crate::error::FrameworkError;
use crate::hive::store::url_encode;
use crate::hive::value::Value;

/// Registry of named URL templates.
#[derive(Debug, Clone, Default)]
pub struct AliasMap {
    aliases: BTreeMap<String, String>,
}

impl AliasMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn declare(&mut self, name: &str, template: &str) {
        self.aliases.insert(name.to_string(), template.to_string());
    }

    pub fn template(&self, name: &str) -> Result<&str, FrameworkError> {
        self.aliases
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| FrameworkError::UnknownAlias(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Assemble a URL from an alias: build the template, append query
    /// string and fragment.
    pub fn assemble(
        &self,
        name: &str,
        params: &BTreeMap<String, Value>,
        query: Option<&str>,
        fragment: Option<&str>,
    ) -> Result<String, FrameworkError> {
        let mut url = build(self.template(name)?, params);
        if let Some(query) = query.filter(|q| !q.is_empty()) {
            url.push('?');
            url.push_str(query);
        }
        if let Some(fragment) = fragment.filter(|f| !f.is_empty()) {
            url.push('#');
            url.push_str(fragment);
        }
        Ok(url)
    }
}

/// Replace tokenized URL placeholders with parameter values. Wildcards
/// substitute sequentially from a sequence under the `*` key.
pub fn build(template: &str, args: &BTreeMap<String, Value>) -> String {
    static TOKEN: OnceLock<Regex> = OnceLock::new();
    let token = TOKEN
        .get_or_init(|| Regex::new(r"\{@(\w+)\}|@(\w+)|(\*)").expect("token regex"));
    let mut wildcard = 0usize;
    token
        .replace_all(template, |caps: &regex::Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str());
            if let Some(name) = name {
                return match args.get(name) {
                    Some(val) => val.to_display(),
                    None => caps[0].to_string(),
                };
            }
            match args.get("*") {
                Some(Value::Seq(seq)) => {
                    let val = seq
                        .get(wildcard)
                        .map(Value::to_display)
                        .unwrap_or_else(|| caps[0].to_string());
                    wildcard += 1;
                    val
                }
                Some(val) => val.to_display(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Build with the current route parameters merged in as defaults, each
/// value urlencoded per path segment.
pub fn build_with_params(
    template: &str,
    args: &BTreeMap<String, Value>,
    params: &Value,
) -> String {
    let mut merged: BTreeMap<String, Value> = BTreeMap::new();
    if let Some(map) = params.as_map() {
        for (key, val) in map {
            let encoded = val
                .to_display()
                .split('/')
                .map(url_encode)
                .collect::<Vec<_>>()
                .join("/");
            merged.insert(key.clone(), Value::Str(encoded));
        }
    }
    merged.extend(args.clone());
    build(template, &merged)
}

/// Parse the `"key=value,list=[a,b,c]"` parameter shorthand.
pub fn parse_args(input: &str) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    let mut rest = input.trim();
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else {
            break;
        };
        let key = rest[..eq].trim().to_string();
        rest = &rest[eq + 1..];
        let value;
        if rest.starts_with('[') {
            match rest.find(']') {
                Some(close) => {
                    let items = rest[1..close]
                        .split(',')
                        .map(|item| Value::Str(item.trim().to_string()))
                        .collect();
                    value = Value::Seq(items);
                    rest = rest[close + 1..].trim_start_matches(',').trim_start();
                }
                None => {
                    value = Value::Str(rest.to_string());
                    rest = "";
                }
            }
        } else {
            match rest.find(',') {
                Some(comma) => {
                    value = Value::Str(rest[..comma].trim().to_string());
                    rest = rest[comma + 1..].trim_start();
                }
                None => {
                    value = Value::Str(rest.trim().to_string());
                    rest = "";
                }
            }
        }
        if !key.is_empty() {
            out.insert(key, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, &str)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn build_substitutes_tokens() {
        assert_eq!(
            build("/items/@id", &args(&[("id", "7")])),
            "/items/7"
        );
        assert_eq!(
            build("/items/{@id}/edit", &args(&[("id", "7")])),
            "/items/7/edit"
        );
        // missing parameters stay literal
        assert_eq!(build("/items/@id", &args(&[])), "/items/@id");
    }

    #[test]
    fn build_wildcards_pull_from_sequence() {
        let mut params = BTreeMap::new();
        params.insert(
            "*".to_string(),
            Value::Seq(vec![Value::Str("a".into()), Value::Str("b".into())]),
        );
        assert_eq!(build("/x/*/y/*", &params), "/x/a/y/b");
    }

    #[test]
    fn assemble_appends_query_and_fragment() {
        let mut aliases = AliasMap::new();
        aliases.declare("item", "/items/@id");
        let url = aliases
            .assemble("item", &args(&[("id", "7")]), Some("tab=info"), Some("top"))
            .unwrap();
        assert_eq!(url, "/items/7?tab=info#top");
    }

    #[test]
    fn unknown_alias_is_an_error() {
        let aliases = AliasMap::new();
        assert!(matches!(
            aliases.assemble("nope", &BTreeMap::new(), None, None),
            Err(FrameworkError::UnknownAlias(_))
        ));
    }

    #[test]
    fn parse_args_grammar() {
        let parsed = parse_args("id=7,tags=[a,b,c],name=x y");
        assert_eq!(parsed.get("id"), Some(&Value::Str("7".into())));
        assert_eq!(
            parsed.get("tags"),
            Some(&Value::Seq(vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ]))
        );
        assert_eq!(parsed.get("name"), Some(&Value::Str("x y".into())));
    }

    #[test]
    fn params_merge_as_encoded_defaults() {
        let params = Value::from_iter([("id".to_string(), Value::Str("a b".into()))]);
        assert_eq!(
            build_with_params("/items/@id", &BTreeMap::new(), &params),
            "/items/a%20b"
        );
        // explicit arguments win over route parameters
        assert_eq!(
            build_with_params(
                "/items/@id",
                &args(&[("id", "9")]),
                &params
            ),
            "/items/9"
        );
    }
}
