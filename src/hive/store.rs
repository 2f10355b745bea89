//! The hive: per-request configuration and state container.
//!
//! # Responsibilities
//! - Hold every framework/application variable as a [`Value`] tree
//! - Key-path get/set/exists/clear plus the array-style helpers
//! - Startup defaults derived from the inbound request, snapshotted so
//!   `clear` restores rather than deletes
//! - Side-effecting keys: CACHE reconnects the backend, COOKIE writes
//!   Set-Cookie, JAR recomputes the cookie policy, LANGUAGE/LOCALES reload
//!   the lexicon, SESSION lazily starts a session
//! - Spill-to-cache: values set with a TTL survive the request in the
//!   external cache and are transparently read back
//!
//! # Design Decisions
//! - No ambient global: one `Hive` per request, collaborators injected
//! - Mutating operations return `Result` (an invalid key is a programming
//!   error); read operations treat invalid keys as absent

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cache::{key_hash, now, Cache};
use crate::error::FrameworkError;
use crate::hive::jar::CookieJar;
use crate::hive::keypath::{self, KeyPath};
use crate::hive::value::Value;
use crate::session::{SessionManager, SESSION_COOKIE};

/// Package name advertised in X-Powered-By.
pub const PACKAGE: &str = "apiary";
/// Crate version recorded under the VERSION key.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Verbs the route grammar accepts.
pub const VERBS: [&str; 8] = [
    "GET", "HEAD", "POST", "PUT", "PATCH", "DELETE", "CONNECT", "OPTIONS",
];

/// Facts about the inbound request, extracted once by the server glue (or
/// synthesized by `mock`).
#[derive(Debug, Clone, Default)]
pub struct RequestFacts {
    pub verb: String,
    pub path: String,
    pub query: String,
    pub fragment: String,
    pub headers: Vec<(String, String)>,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub ip: String,
    pub body: Vec<u8>,
    pub base: String,
    pub cli: bool,
}

impl RequestFacts {
    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn ajax(&self) -> bool {
        self.header("X-Requested-With")
            .map(|v| v == "XMLHttpRequest")
            .unwrap_or(false)
    }

    pub fn agent(&self) -> String {
        self.header("User-Agent").unwrap_or("").to_string()
    }

    /// Client address, honoring forwarding headers.
    pub fn client_ip(&self) -> String {
        if let Some(ip) = self.header("Client-IP") {
            return ip.to_string();
        }
        if let Some(fwd) = self.header("X-Forwarded-For") {
            if let Some(first) = fwd.split(',').next() {
                return first.trim().to_string();
            }
        }
        self.ip.clone()
    }

    pub fn uri(&self) -> String {
        let mut uri = format!("{}{}", self.base, self.path);
        if !self.query.is_empty() {
            uri.push('?');
            uri.push_str(&self.query);
        }
        uri
    }
}

/// Response under construction: status, headers and the buffered body.
#[derive(Debug, Clone)]
pub struct ResponseState {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
    /// Output pacing in KiB/s; 0 = unthrottled.
    pub kbps: u64,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: Vec::new(),
            kbps: 0,
        }
    }
}

impl ResponseState {
    pub fn header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.push((name.to_string(), value.into()));
    }

    pub fn header_remove(&mut self, name: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        self.body.extend_from_slice(bytes.as_ref());
    }
}

/// The state store. One instance per request.
pub struct Hive {
    root: Value,
    init: Value,
    pub response: ResponseState,
    cache: Cache,
    sessions: Arc<SessionManager>,
    session: Option<String>,
}

impl Hive {
    pub fn new(facts: &RequestFacts, cache: Cache, sessions: Arc<SessionManager>) -> Self {
        let mut root = BTreeMap::new();
        let time = now();
        let get_vars = parse_query(&facts.query);
        let cookie_vars = parse_cookies(facts.header("Cookie").unwrap_or(""));
        let post_vars = if facts
            .header("Content-Type")
            .map(|ct| ct.starts_with("application/x-www-form-urlencoded"))
            .unwrap_or(false)
        {
            parse_query(&String::from_utf8_lossy(&facts.body))
        } else {
            BTreeMap::new()
        };
        let mut request_vars = get_vars.clone();
        request_vars.extend(post_vars.clone());
        request_vars.extend(cookie_vars.clone());

        let jar = CookieJar {
            path: if facts.base.is_empty() {
                "/".to_string()
            } else {
                facts.base.clone()
            },
            domain: if facts.host.contains('.')
                && facts.host.parse::<std::net::IpAddr>().is_err()
            {
                facts.host.clone()
            } else {
                String::new()
            },
            secure: facts.scheme == "https",
            ..Default::default()
        };
        let port_part = if facts.port == 80 || facts.port == 443 {
            String::new()
        } else {
            format!(":{}", facts.port)
        };
        let realm = format!(
            "{}://{}{}{}",
            facts.scheme,
            facts.host,
            port_part,
            facts.uri()
        );
        let seed = key_hash(&format!("{}{}", facts.host, facts.base));

        let defaults: Vec<(&str, Value)> = vec![
            ("AGENT", facts.agent().into()),
            ("AJAX", facts.ajax().into()),
            ("ALIAS", Value::Null),
            ("BASE", facts.base.clone().into()),
            ("BODY", String::from_utf8_lossy(&facts.body).to_string().into()),
            ("CACHE", Value::Bool(false)),
            ("CASELESS", Value::Bool(true)),
            ("CLI", facts.cli.into()),
            (
                "CORS",
                Value::from_iter([
                    ("headers".to_string(), Value::Str(String::new())),
                    ("origin".to_string(), Value::Bool(false)),
                    ("credentials".to_string(), Value::Bool(false)),
                    ("expose".to_string(), Value::Bool(false)),
                    ("ttl".to_string(), Value::Int(0)),
                ]),
            ),
            ("DEBUG", Value::Int(0)),
            ("DNSBL", Value::Str(String::new())),
            ("ENCODING", "UTF-8".into()),
            ("ERROR", Value::Null),
            ("EXEMPT", Value::Null),
            ("FALLBACK", "en".into()),
            ("FRAGMENT", facts.fragment.clone().into()),
            ("HALT", Value::Bool(true)),
            ("HOST", facts.host.clone().into()),
            ("IP", facts.client_ip().into()),
            ("JAR", jar.to_value()),
            (
                "LANGUAGE",
                negotiate_language(facts.header("Accept-Language").unwrap_or(""), "en").into(),
            ),
            ("LOCALES", "./".into()),
            ("LOGGABLE", "*".into()),
            ("PACKAGE", PACKAGE.into()),
            ("PARAMS", Value::Map(BTreeMap::new())),
            ("PATH", facts.path.clone().into()),
            ("PATTERN", Value::Null),
            ("PORT", facts.port.into()),
            ("PREFIX", Value::Str(String::new())),
            ("QUERY", facts.query.clone().into()),
            ("QUIET", Value::Bool(false)),
            ("REALM", realm.into()),
            ("RESPONSE", Value::Str(String::new())),
            ("SCHEME", facts.scheme.clone().into()),
            ("SEED", seed.into()),
            ("TEMP", "tmp/".into()),
            ("TIME", Value::Float(time)),
            ("TZ", "UTC".into()),
            ("URI", facts.uri().into()),
            ("VERB", facts.verb.clone().into()),
            ("VERSION", VERSION.into()),
        ];
        for (key, val) in defaults {
            root.insert(key.to_string(), val);
        }
        root.insert("XFRAME".to_string(), "SAMEORIGIN".into());

        // Defaults snapshot: request globals reset to empty, not to the
        // inbound values.
        let mut init = root.clone();
        for global in ["GET", "POST", "COOKIE", "REQUEST", "SESSION"] {
            init.insert(global.to_string(), Value::Map(BTreeMap::new()));
        }

        root.insert("GET".to_string(), Value::Map(get_vars));
        root.insert("POST".to_string(), Value::Map(post_vars));
        root.insert("COOKIE".to_string(), Value::Map(cookie_vars));
        root.insert("REQUEST".to_string(), Value::Map(request_vars));

        Self {
            root: Value::Map(root),
            init: Value::Map(init),
            response: ResponseState::default(),
            cache,
            sessions,
            session: None,
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    // ---- read operations -------------------------------------------------

    /// Contents of a hive key; `Null` when absent. Falls back to a spilled
    /// cache entry when the in-memory slot is empty.
    pub fn get(&mut self, key: &str) -> Value {
        let Ok(path) = KeyPath::parse(key) else {
            return Value::Null;
        };
        if path.head() == "SESSION" {
            self.ensure_session();
        }
        match keypath::resolve_ref(&self.root, &path.segments) {
            Some(val) if !val.is_null() => val.clone(),
            _ => self
                .cache
                .get::<Value>(&format!("{}.var", key_hash(key)))
                .unwrap_or(Value::Null),
        }
    }

    pub fn exists(&mut self, key: &str) -> bool {
        let Ok(path) = KeyPath::parse(key) else {
            return false;
        };
        if path.head() == "SESSION" {
            self.ensure_session();
        }
        match keypath::resolve_ref(&self.root, &path.segments) {
            Some(val) if !val.is_null() => true,
            _ => self
                .cache
                .exists(&format!("{}.var", key_hash(key)))
                .is_some(),
        }
    }

    /// TRUE if the key is falsy in memory and not truthy in the cache.
    pub fn devoid(&mut self, key: &str) -> bool {
        !self.get(key).truthy()
    }

    pub fn checked(&mut self, key: &str) -> bool {
        let val = self.get(key);
        val.as_str() == Some("on") || val.as_bool() == Some(true)
    }

    pub fn get_str(&mut self, key: &str) -> String {
        match self.get(key) {
            Value::Null => String::new(),
            other => other.to_display(),
        }
    }

    pub fn get_int(&mut self, key: &str) -> i64 {
        self.get(key).as_int().unwrap_or(0)
    }

    pub fn get_float(&mut self, key: &str) -> f64 {
        self.get(key).as_float().unwrap_or(0.0)
    }

    pub fn truthy(&mut self, key: &str) -> bool {
        self.get(key).truthy()
    }

    // ---- write operations ------------------------------------------------

    pub fn set(&mut self, key: &str, val: impl Into<Value>) -> Result<(), FrameworkError> {
        self.set_ttl(key, val, 0)
    }

    /// Bind a value; a nonzero TTL also persists it in the external cache
    /// so it outlives this request.
    pub fn set_ttl(
        &mut self,
        key: &str,
        val: impl Into<Value>,
        ttl: u64,
    ) -> Result<(), FrameworkError> {
        let mut val = val.into();
        let path = KeyPath::parse(key)?;
        let time = self.time();

        if matches!(path.head(), "GET" | "POST" | "COOKIE") && !path.is_top_level() {
            let rest = key[path.head().len()..].to_string();
            self.set_ttl(&format!("REQUEST{rest}"), val.clone(), 0)?;
            if path.head() == "COOKIE" {
                let jar = CookieJar::from_value(&self.root_get("JAR"));
                let expires = if ttl > 0 { Some(time + ttl as f64) } else { None };
                let header =
                    jar.set_cookie(&path.segments[1], &val.to_display(), expires);
                self.response.header("Set-Cookie", header);
            }
        } else if path.is_top_level() {
            match path.head() {
                "CACHE" => {
                    let seed = self.get_str("SEED");
                    let dsn = match &val {
                        Value::Bool(true) => "folder=tmp/cache/".to_string(),
                        Value::Bool(false) | Value::Null => String::new(),
                        other => other.to_display(),
                    };
                    let resolved = self.cache.ensure(&dsn, &seed);
                    val = if resolved.is_empty() {
                        Value::Bool(false)
                    } else {
                        Value::Str(resolved)
                    };
                }
                "FALLBACK" => {
                    let fallback = val.to_display();
                    let language = self.get_str("LANGUAGE");
                    let chain = negotiate_language(&language, &fallback);
                    *keypath::resolve_mut(&mut self.root, &path.segments) =
                        Value::Str(fallback);
                    self.set_language_chain(chain, ttl)?;
                    return Ok(());
                }
                "LANGUAGE" => {
                    let fallback = self.get_str("FALLBACK");
                    let chain = negotiate_language(&val.to_display(), &fallback);
                    self.set_language_chain(chain, ttl)?;
                    return Ok(());
                }
                "LOCALES" => {
                    *keypath::resolve_mut(&mut self.root, &path.segments) =
                        val.clone();
                    self.load_lexicon(ttl);
                    return Ok(());
                }
                "SESSION" => {
                    if !val.truthy() {
                        self.session_destroy();
                        return Ok(());
                    }
                    self.ensure_session();
                }
                _ => {}
            }
        } else if path.head() == "SESSION" {
            self.ensure_session();
        }

        *keypath::resolve_mut(&mut self.root, &path.segments) = val.clone();

        if path.head() == "JAR" && !path.is_top_level() {
            match path.segments[1].as_str() {
                "lifetime" => {
                    let lifetime = val.as_int().unwrap_or(0);
                    let expire = if lifetime == 0 {
                        0.0
                    } else {
                        time + lifetime as f64
                    };
                    *keypath::resolve_mut(
                        &mut self.root,
                        &["JAR".to_string(), "expire".to_string()],
                    ) = Value::Float(expire);
                }
                "expire" => {
                    let expire = val.as_float().unwrap_or(0.0);
                    let lifetime = (expire - time).max(0.0) as i64;
                    *keypath::resolve_mut(
                        &mut self.root,
                        &["JAR".to_string(), "lifetime".to_string()],
                    ) = Value::Int(lifetime);
                }
                _ => {}
            }
        }

        if ttl > 0 {
            self.cache
                .set(&format!("{}.var", key_hash(key)), &val, ttl);
        }
        Ok(())
    }

    /// Reset a top-level key to its startup default, or remove a nested
    /// element (evicting any spilled cache entry).
    pub fn clear(&mut self, key: &str) -> Result<(), FrameworkError> {
        let path = KeyPath::parse(key)?;
        if key == "CACHE" {
            self.cache.reset(None);
        } else if matches!(path.head(), "GET" | "POST" | "COOKIE") && !path.is_top_level()
        {
            let rest = key[path.head().len()..].to_string();
            self.clear(&format!("REQUEST{rest}"))?;
            if path.head() == "COOKIE" {
                let jar = CookieJar::from_value(&self.root_get("JAR"));
                let header = jar.set_cookie(&path.segments[1], "", Some(0.0));
                self.response.header("Set-Cookie", header);
            }
            keypath::remove(&mut self.root, &path.segments);
            return Ok(());
        } else if path.head() == "SESSION" {
            self.ensure_session();
            if path.is_top_level() {
                self.session_destroy();
                return Ok(());
            }
        }
        if path.is_top_level() {
            if let Some(default) = self
                .init
                .as_map()
                .and_then(|m| m.get(path.head()))
                .cloned()
            {
                *keypath::resolve_mut(&mut self.root, &path.segments) = default;
                return Ok(());
            }
        }
        keypath::remove(&mut self.root, &path.segments);
        let hash = format!("{}.var", key_hash(key));
        if self.cache.exists(&hash).is_some() {
            self.cache.clear(&hash);
        }
        Ok(())
    }

    /// Multi-variable assignment with an optional key prefix.
    pub fn mset(
        &mut self,
        vars: BTreeMap<String, Value>,
        prefix: &str,
        ttl: u64,
    ) -> Result<(), FrameworkError> {
        for (key, val) in vars {
            self.set_ttl(&format!("{prefix}{key}"), val, ttl)?;
        }
        Ok(())
    }

    pub fn copy(&mut self, src: &str, dst: &str) -> Result<(), FrameworkError> {
        let val = self.get(src);
        self.set(dst, val)
    }

    pub fn concat(&mut self, key: &str, val: &str) -> Result<String, FrameworkError> {
        let mut current = self.get_str(key);
        current.push_str(val);
        self.set(key, current.clone())?;
        Ok(current)
    }

    pub fn push(&mut self, key: &str, val: impl Into<Value>) -> Result<(), FrameworkError> {
        let path = KeyPath::parse(key)?;
        let slot = keypath::resolve_mut(&mut self.root, &path.segments);
        if !matches!(slot, Value::Seq(_)) {
            *slot = Value::Seq(Vec::new());
        }
        if let Value::Seq(seq) = slot {
            seq.push(val.into());
        }
        Ok(())
    }

    pub fn pop(&mut self, key: &str) -> Result<Value, FrameworkError> {
        let path = KeyPath::parse(key)?;
        let slot = keypath::resolve_mut(&mut self.root, &path.segments);
        match slot {
            Value::Seq(seq) => Ok(seq.pop().unwrap_or(Value::Null)),
            _ => Ok(Value::Null),
        }
    }

    pub fn unshift(&mut self, key: &str, val: impl Into<Value>) -> Result<(), FrameworkError> {
        let path = KeyPath::parse(key)?;
        let slot = keypath::resolve_mut(&mut self.root, &path.segments);
        if !matches!(slot, Value::Seq(_)) {
            *slot = Value::Seq(Vec::new());
        }
        if let Value::Seq(seq) = slot {
            seq.insert(0, val.into());
        }
        Ok(())
    }

    pub fn shift(&mut self, key: &str) -> Result<Value, FrameworkError> {
        let path = KeyPath::parse(key)?;
        let slot = keypath::resolve_mut(&mut self.root, &path.segments);
        match slot {
            Value::Seq(seq) if !seq.is_empty() => Ok(seq.remove(0)),
            _ => Ok(Value::Null),
        }
    }

    /// Merge `src` into the addressed container: sequences append, mappings
    /// overwrite. With `keep` the result is written back.
    pub fn merge(
        &mut self,
        key: &str,
        src: Value,
        keep: bool,
    ) -> Result<Value, FrameworkError> {
        let current = self.get(key);
        let out = match (current, src) {
            (Value::Seq(mut a), Value::Seq(b)) => {
                a.extend(b);
                Value::Seq(a)
            }
            (Value::Map(mut a), Value::Map(b)) => {
                a.extend(b);
                Value::Map(a)
            }
            (Value::Null, src) => src,
            (current, _) => current,
        };
        if keep {
            self.set(key, out.clone())?;
        }
        Ok(out)
    }

    /// Extend the addressed mapping with defaults from `src`: existing
    /// entries win, recursively.
    pub fn extend(
        &mut self,
        key: &str,
        src: Value,
        keep: bool,
    ) -> Result<Value, FrameworkError> {
        let current = self.get(key);
        let out = replace_recursive(src, current);
        if keep {
            self.set(key, out.clone())?;
        }
        Ok(out)
    }

    // ---- sessions --------------------------------------------------------

    /// Lazily start a session: load (or mint) the map for the request's
    /// session cookie and sync it under `SESSION`.
    pub fn ensure_session(&mut self) {
        if self.session.is_some() {
            return;
        }
        let existing = self
            .root_get("COOKIE")
            .as_map()
            .and_then(|m| m.get(SESSION_COOKIE))
            .and_then(|v| v.as_str().map(String::from));
        let (sid, data, fresh) = self.sessions.open(existing.as_deref());
        if fresh {
            let jar = CookieJar::from_value(&self.root_get("JAR"));
            let expires = if jar.lifetime > 0 {
                Some(self.time() + jar.lifetime as f64)
            } else {
                None
            };
            let header = jar.set_cookie(SESSION_COOKIE, &sid, expires);
            self.response.header("Set-Cookie", header);
            if let Some(map) = self.root.as_map_mut() {
                if let Some(Value::Map(cookies)) = map.get_mut("COOKIE") {
                    cookies.insert(SESSION_COOKIE.to_string(), Value::Str(sid.clone()));
                }
            }
        }
        if let Some(map) = self.root.as_map_mut() {
            map.insert("SESSION".to_string(), Value::Map(data));
        }
        self.session = Some(sid);
    }

    /// Write the session map back to the store. Called at request teardown
    /// and at long-poll yield points.
    pub fn session_commit(&mut self) {
        if let Some(sid) = &self.session {
            if let Some(data) = self.root_get("SESSION").as_map() {
                self.sessions.commit(sid, data.clone());
            }
        }
    }

    fn session_destroy(&mut self) {
        self.ensure_session();
        if let Some(sid) = self.session.take() {
            self.sessions.destroy(&sid);
        }
        let jar = CookieJar::from_value(&self.root_get("JAR"));
        let header = jar.set_cookie(SESSION_COOKIE, "", Some(0.0));
        self.response.header("Set-Cookie", header);
        if let Some(map) = self.root.as_map_mut() {
            map.insert("SESSION".to_string(), Value::Map(BTreeMap::new()));
        }
    }

    pub fn session_active(&self) -> bool {
        self.session.is_some()
    }

    // ---- internals -------------------------------------------------------

    fn root_get(&self, key: &str) -> Value {
        self.root
            .as_map()
            .and_then(|m| m.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn time(&self) -> f64 {
        self.root
            .as_map()
            .and_then(|m| m.get("TIME"))
            .and_then(Value::as_float)
            .unwrap_or_else(now)
    }

    fn set_language_chain(&mut self, chain: String, ttl: u64) -> Result<(), FrameworkError> {
        if let Some(map) = self.root.as_map_mut() {
            map.insert("LANGUAGE".to_string(), Value::Str(chain));
        }
        self.load_lexicon(ttl);
        Ok(())
    }

    /// Read `<dir>/<lang>.toml` for every language in the negotiated chain
    /// and merge the entries (first language wins) under PREFIX.
    fn load_lexicon(&mut self, _ttl: u64) {
        let locales = self.get_str("LOCALES");
        let chain = self.get_str("LANGUAGE");
        let prefix = self.get_str("PREFIX");
        let mut lexicon: BTreeMap<String, String> = BTreeMap::new();
        for dir in locales.split([',', ';', '|']).map(str::trim) {
            if dir.is_empty() {
                continue;
            }
            for lang in chain.split(',').map(str::trim) {
                if lang.is_empty() {
                    continue;
                }
                let file = std::path::Path::new(dir).join(format!("{lang}.toml"));
                let Ok(content) = std::fs::read_to_string(&file) else {
                    continue;
                };
                let Ok(table) = content.parse::<toml::Table>() else {
                    tracing::warn!(file = %file.display(), "unparseable lexicon file");
                    continue;
                };
                flatten_toml(&table, "", &mut lexicon);
            }
        }
        for (key, text) in lexicon {
            let Ok(path) = KeyPath::parse(&format!("{prefix}{key}")) else {
                continue;
            };
            *keypath::resolve_mut(&mut self.root, &path.segments) = Value::Str(text);
        }
    }
}

/// Entries already present win; later files only fill gaps.
fn flatten_toml(table: &toml::Table, prefix: &str, out: &mut BTreeMap<String, String>) {
    for (key, val) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match val {
            toml::Value::Table(inner) => flatten_toml(inner, &full, out),
            toml::Value::String(s) => {
                out.entry(full).or_insert_with(|| s.clone());
            }
            other => {
                out.entry(full).or_insert_with(|| other.to_string());
            }
        }
    }
}

fn replace_recursive(base: Value, over: Value) -> Value {
    match (base, over) {
        (Value::Map(mut base), Value::Map(over)) => {
            for (key, val) in over {
                let slot = base.remove(&key);
                base.insert(
                    key,
                    match slot {
                        Some(existing) => replace_recursive(existing, val),
                        None => val,
                    },
                );
            }
            Value::Map(base)
        }
        (base, Value::Null) => base,
        (_, over) => over,
    }
}

/// Accept-Language negotiation: specific codes first, base languages after,
/// fallback appended, duplicates removed.
pub fn negotiate_language(header: &str, fallback: &str) -> String {
    let mut chain: Vec<String> = Vec::new();
    for part in header.split(',') {
        let code = part.split(';').next().unwrap_or("").trim();
        if code.is_empty() || code == "*" {
            continue;
        }
        if !chain.iter().any(|c| c == code) {
            chain.push(code.to_string());
        }
        if let Some(base) = code.split(['-', '_']).next() {
            if base != code && !chain.iter().any(|c| c == base) {
                chain.push(base.to_string());
            }
        }
    }
    if !fallback.is_empty() && !chain.iter().any(|c| c == fallback) {
        chain.push(fallback.to_string());
    }
    chain.join(",")
}

/// Decode an application/x-www-form-urlencoded pair list.
pub fn parse_query(query: &str) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for pair in query.split('&') {
        if pair.is_empty() {
            continue;
        }
        let mut split = pair.splitn(2, '=');
        let key = url_decode(split.next().unwrap_or(""));
        let val = url_decode(split.next().unwrap_or(""));
        if !key.is_empty() {
            out.insert(key, Value::Str(val));
        }
    }
    out
}

fn parse_cookies(header: &str) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    for pair in header.split(';') {
        let mut split = pair.trim().splitn(2, '=');
        let key = split.next().unwrap_or("").trim();
        let val = url_decode(split.next().unwrap_or(""));
        if !key.is_empty() {
            out.insert(key.to_string(), Value::Str(val));
        }
    }
    out
}

pub fn url_decode(input: &str) -> String {
    let plus_fixed = input.replace('+', " ");
    percent_encoding::percent_decode_str(&plus_fixed)
        .decode_utf8_lossy()
        .into_owned()
}

pub fn url_encode(input: &str) -> String {
    percent_encoding::utf8_percent_encode(
        input,
        percent_encoding::NON_ALPHANUMERIC,
    )
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hive() -> Hive {
        let facts = RequestFacts {
            verb: "GET".into(),
            path: "/".into(),
            scheme: "http".into(),
            host: "localhost".into(),
            port: 80,
            ..Default::default()
        };
        Hive::new(&facts, Cache::new(), SessionManager::new())
    }

    #[test]
    fn defaults_are_populated() {
        let mut hive = hive();
        assert_eq!(hive.get_str("PACKAGE"), PACKAGE);
        assert_eq!(hive.get_str("VERB"), "GET");
        assert!(hive.truthy("HALT"));
        assert_eq!(hive.get_int("DEBUG"), 0);
    }

    #[test]
    fn clear_restores_startup_default() {
        let mut hive = hive();
        hive.set("PACKAGE", "other").unwrap();
        assert_eq!(hive.get_str("PACKAGE"), "other");
        hive.clear("PACKAGE").unwrap();
        assert_eq!(hive.get_str("PACKAGE"), PACKAGE);
    }

    #[test]
    fn nested_set_and_subpath_clear() {
        let mut hive = hive();
        hive.set("app.db.host", "db1").unwrap();
        hive.set("app.db.port", 5432).unwrap();
        hive.clear("app.db.host").unwrap();
        assert!(!hive.exists("app.db.host"));
        assert_eq!(hive.get_int("app.db.port"), 5432);
    }

    #[test]
    fn request_globals_mirror() {
        let mut hive = hive();
        hive.set("GET.page", "2").unwrap();
        assert_eq!(hive.get_str("REQUEST.page"), "2");
        hive.clear("GET.page").unwrap();
        assert!(!hive.exists("REQUEST.page"));
    }

    #[test]
    fn cookie_set_emits_header() {
        let mut hive = hive();
        hive.set("COOKIE.theme", "dark").unwrap();
        assert_eq!(hive.get_str("REQUEST.theme"), "dark");
        let cookie = hive
            .response
            .headers
            .iter()
            .find(|(k, _)| k == "Set-Cookie")
            .unwrap();
        assert!(cookie.1.starts_with("theme=dark"));
        hive.clear("COOKIE.theme").unwrap();
        let expired = hive
            .response
            .headers
            .iter()
            .filter(|(k, _)| k == "Set-Cookie")
            .last()
            .unwrap();
        assert!(expired.1.contains("Expires=Thu, 01 Jan 1970"));
    }

    #[test]
    fn session_lazy_start_and_destroy() {
        let mut hive = hive();
        hive.set("SESSION.hello", "world").unwrap();
        assert!(hive.session_active());
        assert_eq!(hive.get_str("SESSION.hello"), "world");
        // destroying via an empty assignment
        hive.set("SESSION", Value::Map(BTreeMap::new())).unwrap();
        assert!(!hive.exists("SESSION.hello"));
    }

    #[test]
    fn session_commit_round_trips_through_manager() {
        let sessions = SessionManager::new();
        let facts = RequestFacts {
            verb: "GET".into(),
            path: "/".into(),
            scheme: "http".into(),
            host: "localhost".into(),
            port: 80,
            ..Default::default()
        };
        let mut first = Hive::new(&facts, Cache::new(), sessions.clone());
        first.set("SESSION.n", 1).unwrap();
        first.session_commit();
        let sid = first
            .response
            .headers
            .iter()
            .find(|(k, _)| k == "Set-Cookie")
            .and_then(|(_, v)| v.split(['=', ';']).nth(1).map(String::from))
            .unwrap();

        let mut facts = facts;
        facts.headers.push(("Cookie".into(), format!("sid={sid}")));
        let mut second = Hive::new(&facts, Cache::new(), sessions);
        assert_eq!(second.get_int("SESSION.n"), 1);
    }

    #[test]
    fn spill_to_cache_survives_memory_clear() {
        let cache = Cache::new();
        cache.load("memory", "seed");
        let facts = RequestFacts {
            verb: "GET".into(),
            path: "/".into(),
            scheme: "http".into(),
            host: "localhost".into(),
            port: 80,
            ..Default::default()
        };
        let mut hive = Hive::new(&facts, cache.clone(), SessionManager::new());
        hive.set_ttl("counter", 42, 60).unwrap();
        // a second hive (fresh memory) sees the spilled entry
        let mut other = Hive::new(&facts, cache, SessionManager::new());
        assert_eq!(other.get_int("counter"), 42);
        assert!(other.exists("counter"));
    }

    #[test]
    fn jar_lifetime_and_expire_recompute_each_other() {
        let mut hive = hive();
        let time = hive.time();
        hive.set("JAR.lifetime", 3600).unwrap();
        let expire = hive.get_float("JAR.expire");
        assert!((expire - time - 3600.0).abs() < 1.0);
        hive.set("JAR.expire", time + 60.0).unwrap();
        assert_eq!(hive.get_int("JAR.lifetime"), 60);
        hive.set("JAR.lifetime", 0).unwrap();
        assert_eq!(hive.get_float("JAR.expire"), 0.0);
    }

    #[test]
    fn array_helpers() {
        let mut hive = hive();
        hive.push("list", 1).unwrap();
        hive.push("list", 2).unwrap();
        hive.unshift("list", 0).unwrap();
        assert_eq!(hive.shift("list").unwrap(), Value::Int(0));
        assert_eq!(hive.pop("list").unwrap(), Value::Int(2));
        assert_eq!(hive.pop("list").unwrap(), Value::Int(1));
        assert_eq!(hive.pop("list").unwrap(), Value::Null);
    }

    #[test]
    fn merge_and_extend() {
        let mut hive = hive();
        hive.set("cfg.a", 1).unwrap();
        let merged = hive
            .merge(
                "cfg",
                Value::from_iter([("b".to_string(), Value::Int(2))]),
                true,
            )
            .unwrap();
        assert_eq!(merged.as_map().unwrap().len(), 2);
        let extended = hive
            .extend(
                "cfg",
                Value::from_iter([
                    ("a".to_string(), Value::Int(9)),
                    ("c".to_string(), Value::Int(3)),
                ]),
                false,
            )
            .unwrap();
        let map = extended.as_map().unwrap();
        // existing entries win over defaults
        assert_eq!(map.get("a"), Some(&Value::Int(1)));
        assert_eq!(map.get("c"), Some(&Value::Int(3)));
    }

    #[test]
    fn language_negotiation() {
        assert_eq!(
            negotiate_language("en-US,en;q=0.9,fr;q=0.8", "de"),
            "en-US,en,fr,de"
        );
        assert_eq!(negotiate_language("", "en"), "en");
    }
}
