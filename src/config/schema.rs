//! Configuration schema definitions.
//!
//! App config files are TOML: a `[globals]` table merged into the hive
//! defaults, plus route and redirect declaration lists reusing the
//! registration DSL.

use serde::Deserialize;

use crate::hive::value::Value;

/// Root configuration for an application.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Hive defaults applied to every request.
    pub globals: toml::Table,

    /// Route declarations: `"GET|POST [alias:] /path -> handler [| ttl kbps]"`.
    /// Handler names resolve against the app's handler registry.
    pub routes: Vec<String>,

    /// Redirect declarations: `"GET /old -> /new"`.
    pub redirects: Vec<String>,
}

/// Convert a TOML value into a hive value.
pub fn toml_value(val: &toml::Value) -> Value {
    match val {
        toml::Value::String(s) => Value::Str(s.clone()),
        toml::Value::Integer(i) => Value::Int(*i),
        toml::Value::Float(f) => Value::Float(*f),
        toml::Value::Boolean(b) => Value::Bool(*b),
        toml::Value::Datetime(dt) => Value::Str(dt.to_string()),
        toml::Value::Array(items) => {
            Value::Seq(items.iter().map(toml_value).collect())
        }
        toml::Value::Table(table) => Value::Map(
            table
                .iter()
                .map(|(k, v)| (k.clone(), toml_value(v)))
                .collect(),
        ),
    }
}
