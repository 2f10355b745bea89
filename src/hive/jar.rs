//! Cookie policy ("JAR") and Set-Cookie formatting.

use chrono::{TimeZone, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};

use crate::hive::value::Value;

const COOKIE_VALUE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b';')
    .add(b',')
    .add(b'%')
    .add(b'=');

/// Cookie attributes applied to every cookie the framework emits.
#[derive(Debug, Clone, PartialEq)]
pub struct CookieJar {
    pub expire: f64,
    pub lifetime: i64,
    pub path: String,
    pub domain: String,
    pub secure: bool,
    pub httponly: bool,
    pub samesite: String,
}

impl Default for CookieJar {
    fn default() -> Self {
        Self {
            expire: 0.0,
            lifetime: 0,
            path: "/".to_string(),
            domain: String::new(),
            secure: false,
            httponly: true,
            samesite: "Lax".to_string(),
        }
    }
}

impl CookieJar {
    /// Read the policy out of the hive's `JAR` map, falling back to
    /// defaults for missing or mistyped fields.
    pub fn from_value(val: &Value) -> Self {
        let defaults = Self::default();
        let Some(map) = val.as_map() else {
            return defaults;
        };
        Self {
            expire: map
                .get("expire")
                .and_then(Value::as_float)
                .unwrap_or(defaults.expire),
            lifetime: map
                .get("lifetime")
                .and_then(Value::as_int)
                .unwrap_or(defaults.lifetime),
            path: map
                .get("path")
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or(defaults.path),
            domain: map
                .get("domain")
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or(defaults.domain),
            secure: map
                .get("secure")
                .and_then(Value::as_bool)
                .unwrap_or(defaults.secure),
            httponly: map
                .get("httponly")
                .and_then(Value::as_bool)
                .unwrap_or(defaults.httponly),
            samesite: map
                .get("samesite")
                .and_then(|v| v.as_str().map(String::from))
                .unwrap_or(defaults.samesite),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::from_iter([
            ("expire".to_string(), Value::Float(self.expire)),
            ("lifetime".to_string(), Value::Int(self.lifetime)),
            ("path".to_string(), Value::Str(self.path.clone())),
            ("domain".to_string(), Value::Str(self.domain.clone())),
            ("secure".to_string(), Value::Bool(self.secure)),
            ("httponly".to_string(), Value::Bool(self.httponly)),
            ("samesite".to_string(), Value::Str(self.samesite.clone())),
        ])
    }

    /// Render a Set-Cookie header value. `expires_at` of 0 expires the
    /// cookie immediately; `None` emits a session cookie.
    pub fn set_cookie(&self, name: &str, value: &str, expires_at: Option<f64>) -> String {
        let mut out = format!(
            "{}={}",
            name,
            utf8_percent_encode(value, COOKIE_VALUE)
        );
        if let Some(at) = expires_at {
            let when = Utc
                .timestamp_opt(at.max(0.0) as i64, 0)
                .single()
                .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap());
            out.push_str(&format!(
                "; Expires={}",
                when.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        if !self.domain.is_empty() {
            out.push_str(&format!("; Domain={}", self.domain));
        }
        out.push_str(&format!("; Path={}", self.path));
        if self.secure {
            out.push_str("; Secure");
        }
        if self.httponly {
            out.push_str("; HttpOnly");
        }
        if !self.samesite.is_empty() {
            out.push_str(&format!("; SameSite={}", self.samesite));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_through_hive_value() {
        let jar = CookieJar {
            domain: "example.com".into(),
            secure: true,
            ..Default::default()
        };
        assert_eq!(CookieJar::from_value(&jar.to_value()), jar);
    }

    #[test]
    fn set_cookie_attributes() {
        let jar = CookieJar {
            domain: "example.com".into(),
            secure: true,
            ..Default::default()
        };
        let header = jar.set_cookie("sid", "a b", None);
        assert!(header.starts_with("sid=a%20b"));
        assert!(header.contains("; Domain=example.com"));
        assert!(header.contains("; Secure"));
        assert!(header.contains("; HttpOnly"));
        assert!(header.contains("; SameSite=Lax"));
        assert!(!header.contains("Expires"));
    }

    #[test]
    fn expired_cookie_points_at_epoch() {
        let jar = CookieJar::default();
        let header = jar.set_cookie("sid", "", Some(0.0));
        assert!(header.contains("Expires=Thu, 01 Jan 1970"));
    }
}
