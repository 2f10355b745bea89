//! Application facade: registration surface and dispatch entry points.
//!
//! # Responsibilities
//! - Route/alias/handler registration (programmatic and from config files)
//! - App-level hive defaults applied to every request
//! - Build a request context and run it through the dispatcher
//! - Synthetic requests (`mock`) incl. internal replay of CLI reroutes
//!
//! # Design Decisions
//! - Registration happens before serving; dispatch takes read locks only
//! - Handlers referenced by name (config files) resolve at registration,
//!   never during a request

use parking_lot::RwLock;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use crate::cache::Cache;
use crate::config::{self, AppConfig};
use crate::dispatch::context::{ErrorHook, RequestContext, RerouteHook};
use crate::dispatch::handler::RouteHandler;
use crate::error::FrameworkError;
use crate::hive::keypath::KeyPath;
use crate::hive::store::VERBS;
use crate::hive::{Hive, RequestFacts, Value};
use crate::routing::pattern::{PatternRef, RouteSpec};
use crate::routing::table::{RouteEntry, RouteTable};
use crate::routing::AliasMap;
use crate::session::SessionManager;

struct AppInner {
    routes: RwLock<RouteTable>,
    aliases: RwLock<AliasMap>,
    registry: RwLock<BTreeMap<String, Arc<dyn RouteHandler>>>,
    overrides: RwLock<Vec<(String, Value)>>,
    cache: Cache,
    sessions: Arc<SessionManager>,
    on_error: RwLock<Option<Arc<dyn ErrorHook>>>,
    on_reroute: RwLock<Option<Arc<dyn RerouteHook>>>,
}

/// The application. Cheap to clone; clones share all registration state.
#[derive(Clone)]
pub struct App {
    inner: Arc<AppInner>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(AppInner {
                routes: RwLock::new(RouteTable::new()),
                aliases: RwLock::new(AliasMap::new()),
                registry: RwLock::new(BTreeMap::new()),
                overrides: RwLock::new(Vec::new()),
                cache: Cache::new(),
                sessions: SessionManager::new(),
                on_error: RwLock::new(None),
                on_reroute: RwLock::new(None),
            }),
        }
    }

    pub fn cache(&self) -> &Cache {
        &self.inner.cache
    }

    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.inner.sessions
    }

    /// Hive default applied to every request, in declaration order.
    pub fn set(&self, key: &str, val: impl Into<Value>) -> Result<(), FrameworkError> {
        KeyPath::parse(key)?;
        let mut overrides = self.inner.overrides.write();
        let val = val.into();
        if let Some(slot) = overrides.iter_mut().find(|(k, _)| k == key) {
            slot.1 = val;
        } else {
            overrides.push((key.to_string(), val));
        }
        Ok(())
    }

    /// Register a named handler for config-file route declarations.
    pub fn handler(&self, name: &str, handler: impl RouteHandler + 'static) {
        self.inner
            .registry
            .write()
            .insert(name.to_string(), Arc::new(handler));
    }

    /// Bind a handler to a route pattern.
    pub fn route(
        &self,
        pattern: &str,
        handler: impl RouteHandler + 'static,
    ) -> Result<(), FrameworkError> {
        self.route_entry(pattern, Arc::new(handler), 0, 0)
    }

    /// [`route`](App::route) with a response cache TTL (seconds) and an
    /// output rate cap (KiB/s).
    pub fn route_with(
        &self,
        pattern: &str,
        handler: impl RouteHandler + 'static,
        ttl: u64,
        kbps: u64,
    ) -> Result<(), FrameworkError> {
        self.route_entry(pattern, Arc::new(handler), ttl, kbps)
    }

    /// Bind a registered named handler to a route pattern.
    pub fn route_named(
        &self,
        pattern: &str,
        name: &str,
        ttl: u64,
        kbps: u64,
    ) -> Result<(), FrameworkError> {
        let handler = self
            .inner
            .registry
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| FrameworkError::UnknownHandler(name.to_string()))?;
        self.route_entry(pattern, handler, ttl, kbps)
    }

    /// REST-style mapping: one handler serves every supported verb of the
    /// URL (the handler branches on `VERB`).
    pub fn map(
        &self,
        url: &str,
        handler: impl RouteHandler + 'static,
    ) -> Result<(), FrameworkError> {
        let pattern = format!("{} {url}", VERBS.join("|"));
        self.route_entry(&pattern, Arc::new(handler), 0, 0)
    }

    /// Redirect a route to another URL (or `@alias` shorthand).
    pub fn redirect(
        &self,
        pattern: &str,
        target: &str,
        permanent: bool,
    ) -> Result<(), FrameworkError> {
        let target = target.to_string();
        let handler = move |ctx: &mut RequestContext,
                            _: &BTreeMap<String, Value>|
              -> Result<Value, FrameworkError> {
            ctx.reroute(&target, permanent);
            Ok(Value::Null)
        };
        self.route_entry(pattern, Arc::new(handler), 0, 0)
    }

    /// Reverse URL for a declared alias.
    pub fn alias_url(
        &self,
        name: &str,
        params: &BTreeMap<String, Value>,
        query: Option<&str>,
        fragment: Option<&str>,
    ) -> Result<String, FrameworkError> {
        self.inner
            .aliases
            .read()
            .assemble(name, params, query, fragment)
    }

    pub fn on_error(&self, hook: impl ErrorHook + 'static) {
        *self.inner.on_error.write() = Some(Arc::new(hook));
    }

    pub fn on_reroute(&self, hook: impl RerouteHook + 'static) {
        *self.inner.on_reroute.write() = Some(Arc::new(hook));
    }

    /// Apply a loaded configuration: globals, routes, redirects.
    pub fn configure(&self, config: AppConfig) -> Result<(), FrameworkError> {
        for (key, val) in &config.globals {
            self.set(key, config::toml_value(val))?;
        }
        for line in &config.routes {
            let route = config::parse_route_line(line)?;
            self.route_named(&route.dsl, &route.handler, route.ttl, route.kbps)?;
        }
        for line in &config.redirects {
            let (dsl, target) = config::parse_redirect_line(line)?;
            self.redirect(&dsl, &target, true)?;
        }
        Ok(())
    }

    pub fn configure_file(&self, path: &Path) -> Result<(), FrameworkError> {
        self.configure(config::load_config(path)?)
    }

    /// Build the per-request context: fresh hive, app defaults applied.
    pub fn context(&self, facts: RequestFacts) -> RequestContext {
        let mut hive = Hive::new(
            &facts,
            self.inner.cache.clone(),
            self.inner.sessions.clone(),
        );
        for (key, val) in self.inner.overrides.read().iter() {
            if let Err(err) = hive.set(key, val.clone()) {
                tracing::warn!(key = %key, error = %err, "default not applied");
            }
        }
        let aliases = Arc::new(self.inner.aliases.read().clone());
        RequestContext::new(
            facts,
            hive,
            aliases,
            self.inner.on_error.read().clone(),
            self.inner.on_reroute.read().clone(),
        )
    }

    /// Dispatch one request. Returns the finished context (response state,
    /// hive) and the handler result.
    pub async fn dispatch(&self, facts: RequestFacts) -> (RequestContext, Value) {
        let mut ctx = self.context(facts);
        if crate::dispatch::blacklisted(&mut ctx).await {
            ctx.error(403, "", None, 0);
            ctx.hive().session_commit();
            return (ctx, Value::Bool(false));
        }
        let result = {
            let routes = self.inner.routes.read();
            crate::dispatch::run(&routes, &mut ctx)
        };
        ctx.hive().session_commit();
        (ctx, result)
    }

    /// Run a synthetic request:
    /// `"VERB /path?query [sync|ajax|cli]"` or `"VERB @alias(args)"`.
    /// CLI-context reroutes are replayed internally.
    pub async fn mock(
        &self,
        pattern: &str,
        body: Option<Vec<u8>>,
        headers: Vec<(String, String)>,
    ) -> Result<(RequestContext, Value), FrameworkError> {
        let mut facts = self.mock_facts(pattern, body, headers)?;
        let mut hops = 0;
        loop {
            let (mut ctx, result) = self.dispatch(facts).await;
            match ctx.pending_reroute.take() {
                Some((url, _)) if hops < 10 => {
                    hops += 1;
                    facts = self.mock_facts(&format!("GET {url} [cli]"), None, Vec::new())?;
                }
                _ => return Ok((ctx, result)),
            }
        }
    }

    fn mock_facts(
        &self,
        pattern: &str,
        body: Option<Vec<u8>>,
        mut headers: Vec<(String, String)>,
    ) -> Result<RequestFacts, FrameworkError> {
        static GRAMMAR: OnceLock<Regex> = OnceLock::new();
        let grammar = GRAMMAR.get_or_init(|| {
            Regex::new(
                r"^\s*([|\w]+)\s+(?:@(\w+)(?:\((.+?)\))?|(\S+))(?:\s+\[(sync|ajax|cli)\])?\s*$",
            )
            .expect("mock grammar regex")
        });
        let caps = grammar
            .captures(pattern)
            .ok_or_else(|| FrameworkError::InvalidPattern(pattern.to_string()))?;
        let verb = caps[1]
            .split('|')
            .next()
            .unwrap_or("GET")
            .to_uppercase();
        if !VERBS.contains(&verb.as_str()) {
            return Err(FrameworkError::UnsupportedVerb(verb));
        }
        let target = match caps.get(2) {
            Some(name) => {
                let args = caps
                    .get(3)
                    .map(|m| crate::routing::alias::parse_args(m.as_str()))
                    .unwrap_or_default();
                self.inner
                    .aliases
                    .read()
                    .assemble(name.as_str(), &args, None, None)?
            }
            None => caps[4].to_string(),
        };
        let parsed = if target.contains("://") {
            url::Url::parse(&target)
        } else {
            url::Url::parse(&format!("http://localhost{target}"))
        }
        .map_err(|_| FrameworkError::InvalidPattern(pattern.to_string()))?;

        let tag = caps.get(5).map(|m| m.as_str()).unwrap_or("");
        if tag == "ajax" {
            headers.push(("X-Requested-With".to_string(), "XMLHttpRequest".to_string()));
        }
        let body = if verb == "GET" || verb == "HEAD" {
            Vec::new()
        } else {
            body.unwrap_or_default()
        };
        Ok(RequestFacts {
            verb,
            path: parsed.path().to_string(),
            query: parsed.query().unwrap_or("").to_string(),
            fragment: parsed.fragment().unwrap_or("").to_string(),
            headers,
            scheme: parsed.scheme().to_string(),
            host: parsed.host_str().unwrap_or("localhost").to_string(),
            port: parsed.port_or_known_default().unwrap_or(80),
            ip: "127.0.0.1".to_string(),
            body,
            base: String::new(),
            cli: tag == "cli",
        })
    }

    fn route_entry(
        &self,
        pattern: &str,
        handler: Arc<dyn RouteHandler>,
        ttl: u64,
        kbps: u64,
    ) -> Result<(), FrameworkError> {
        let spec = RouteSpec::parse(pattern)?;
        let (template, alias) = {
            let mut aliases = self.inner.aliases.write();
            match &spec.pattern {
                PatternRef::Template(template) => {
                    if let Some(name) = &spec.alias {
                        aliases.declare(name, template);
                    }
                    (template.clone(), spec.alias.clone())
                }
                PatternRef::Alias(name) => {
                    (aliases.template(name)?.to_string(), Some(name.clone()))
                }
            }
        };
        let mut routes = self.inner.routes.write();
        for verb in &spec.verbs {
            routes.register(
                &template,
                spec.kind,
                verb,
                RouteEntry {
                    handler: handler.clone(),
                    ttl,
                    kbps,
                    alias: alias.clone(),
                },
            );
        }
        Ok(())
    }
}
