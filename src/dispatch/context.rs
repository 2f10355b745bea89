//! Per-request context: the hive plus response assembly, rerouting and the
//! error funnel entry point.

use chrono::{TimeZone, Utc};
use regex::Regex;
use std::sync::{Arc, OnceLock};

use crate::error::{self, ErrorReport, FrameworkError};
use crate::hive::store::url_decode;
use crate::hive::{Hive, RequestFacts, Value};
use crate::routing::alias::{build_with_params, parse_args};
use crate::routing::AliasMap;

/// User error hook; returning `true` suppresses the default error body.
pub trait ErrorHook: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext) -> bool;
}

impl<F> ErrorHook for F
where
    F: Fn(&mut RequestContext) -> bool + Send + Sync,
{
    fn handle(&self, ctx: &mut RequestContext) -> bool {
        self(ctx)
    }
}

/// Pre-reroute hook; returning `true` vetoes the default redirect.
pub trait RerouteHook: Send + Sync {
    fn handle(&self, ctx: &mut RequestContext, url: &str, permanent: bool) -> bool;
}

impl<F> RerouteHook for F
where
    F: Fn(&mut RequestContext, &str, bool) -> bool + Send + Sync,
{
    fn handle(&self, ctx: &mut RequestContext, url: &str, permanent: bool) -> bool {
        self(ctx, url, permanent)
    }
}

/// Everything one request carries through dispatch.
pub struct RequestContext {
    pub facts: RequestFacts,
    hive: Hive,
    pub(crate) aliases: Arc<AliasMap>,
    pub(crate) on_error: Option<Arc<dyn ErrorHook>>,
    pub(crate) on_reroute: Option<Arc<dyn RerouteHook>>,
    /// CLI-context reroutes are replayed internally instead of redirected.
    pub(crate) pending_reroute: Option<(String, bool)>,
}

impl RequestContext {
    pub fn new(
        facts: RequestFacts,
        hive: Hive,
        aliases: Arc<AliasMap>,
        on_error: Option<Arc<dyn ErrorHook>>,
        on_reroute: Option<Arc<dyn RerouteHook>>,
    ) -> Self {
        Self {
            facts,
            hive,
            aliases,
            on_error,
            on_reroute,
            pending_reroute: None,
        }
    }

    pub fn hive(&mut self) -> &mut Hive {
        &mut self.hive
    }

    /// Read-only view of the response under construction.
    pub fn response_state(&self) -> &crate::hive::ResponseState {
        &self.hive.response
    }

    /// Append to the buffered response body.
    pub fn write(&mut self, bytes: impl AsRef<[u8]>) {
        self.hive.response.write(bytes);
    }

    /// Set the response status; returns the reason phrase.
    pub fn status(&mut self, code: u16) -> &'static str {
        self.hive.response.status = code;
        error::reason(code)
    }

    /// Build a URL from a declared alias plus parameters.
    pub fn alias_url(
        &self,
        name: &str,
        params: &std::collections::BTreeMap<String, Value>,
        query: Option<&str>,
        fragment: Option<&str>,
    ) -> Result<String, FrameworkError> {
        self.aliases.assemble(name, params, query, fragment)
    }

    /// Send response cache metadata.
    ///
    /// Positive `secs` on a GET emits client-side cache headers for that
    /// lifetime; anything else emits the no-cache triplet. Always stamps
    /// the identification and frame/sniff protection headers.
    pub fn expire(&mut self, secs: i64) {
        if self.hive.truthy("CLI") {
            return;
        }
        let package = self.hive.get_str("PACKAGE");
        let xframe = self.hive.get_str("XFRAME");
        let verb = self.hive.get_str("VERB");
        let response = &mut self.hive.response;
        for name in [
            "X-Powered-By",
            "X-Frame-Options",
            "X-XSS-Protection",
            "X-Content-Type-Options",
            "Pragma",
            "Cache-Control",
            "Expires",
            "Last-Modified",
        ] {
            response.header_remove(name);
        }
        if !package.is_empty() {
            response.header("X-Powered-By", package);
        }
        if !xframe.is_empty() {
            response.header("X-Frame-Options", xframe);
        }
        response.header("X-XSS-Protection", "1; mode=block");
        response.header("X-Content-Type-Options", "nosniff");
        if verb == "GET" && secs > 0 {
            let now = crate::cache::now();
            response.header("Cache-Control", format!("max-age={secs}"));
            response.header("Expires", http_date(now + secs as f64));
            response.header("Last-Modified", http_date(now));
        } else {
            response.header("Pragma", "no-cache");
            response.header("Cache-Control", "no-cache, no-store, must-revalidate");
            response.header("Expires", http_date(0.0));
        }
    }

    /// The error funnel. Records the first error in the hive, logs per the
    /// LOGGABLE whitelist, consults the user hook, then renders the
    /// negotiated default body.
    pub fn error(&mut self, code: u16, text: &str, trace: Option<String>, level: u32) {
        let prior = self.hive.truthy("ERROR");
        self.hive.response.status = code;
        let mut req = format!(
            "{} {}",
            self.hive.get_str("VERB"),
            self.hive.get_str("PATH")
        );
        let query = self.hive.get_str("QUERY");
        if !query.is_empty() {
            req.push('?');
            req.push_str(&query);
        }
        let text = if text.is_empty() {
            format!("HTTP {code} ({req})")
        } else {
            text.to_string()
        };
        let debug = self.hive.get_int("DEBUG").clamp(0, 3) as u8;
        let trace = trace.or_else(|| error::capture_trace(debug));
        let loggable = self.hive.get_str("LOGGABLE");
        if error::loggable(&loggable, code) {
            tracing::error!(code, error = %text, "request failed");
            if let Some(trace) = trace.as_deref() {
                tracing::debug!(trace, "failure trace");
            }
        }
        let report = ErrorReport::new(code, text, trace, level);
        if !prior {
            let _ = self.hive.set("ERROR", report_value(&report));
        }
        self.expire(-1);
        // the hook is taken, not borrowed, so a recursive error inside it
        // cannot re-enter
        let handled = match self.on_error.take() {
            Some(hook) => hook.handle(self),
            None => false,
        };
        if handled || prior || self.hive.truthy("QUIET") {
            return;
        }
        if self.hive.truthy("CLI") {
            let body = error::render_cli(&report, debug);
            self.write(body);
        } else if self.hive.truthy("AJAX") {
            let encoding = self.hive.get_str("ENCODING");
            self.hive.response.header(
                "Content-Type",
                format!("application/json; charset={encoding}"),
            );
            let body = error::render_json(&report, debug);
            self.write(body);
        } else {
            let encoding = self.hive.get_str("ENCODING");
            self.hive.response.header(
                "Content-Type",
                format!("text/html; charset={encoding}"),
            );
            let body = error::render_html(&report, debug, &encoding);
            self.write(body);
        }
    }

    /// Convenience for funneling a [`FrameworkError`].
    pub fn fail(&mut self, err: FrameworkError) {
        self.error(err.status(), &err.to_string(), None, 0);
    }

    /// Redirect to a URL, an `@alias(args)?query#frag` shorthand, or the
    /// current realm when empty. Under CLI context the reroute is recorded
    /// for internal replay instead of emitting a Location header.
    pub fn reroute(&mut self, target: &str, permanent: bool) {
        static SHORTHAND: OnceLock<Regex> = OnceLock::new();
        let shorthand = SHORTHAND.get_or_init(|| {
            Regex::new(r"^@([^/()?#]+)(?:\((.+?)\))?(\?[^#]+)?(#.+)?$")
                .expect("reroute shorthand regex")
        });
        let params = self.hive.get("PARAMS");
        let mut url = if target.is_empty() {
            self.hive.get_str("REALM")
        } else if let Some(caps) = shorthand.captures(target) {
            match self.aliases.template(&caps[1]) {
                Ok(template) => {
                    let args = caps
                        .get(2)
                        .map(|m| parse_args(m.as_str()))
                        .unwrap_or_default();
                    let mut url = build_with_params(template, &args, &params);
                    if let Some(query) = caps.get(3) {
                        url.push_str(query.as_str());
                    }
                    if let Some(fragment) = caps.get(4) {
                        url.push_str(fragment.as_str());
                    }
                    url
                }
                Err(err) => {
                    self.fail(err);
                    return;
                }
            }
        } else {
            build_with_params(target, &Default::default(), &params)
        };
        if let Some(hook) = self.on_reroute.clone() {
            if hook.handle(self, &url, permanent) {
                return;
            }
        }
        static ABSOLUTE: OnceLock<Regex> = OnceLock::new();
        let absolute = ABSOLUTE
            .get_or_init(|| Regex::new(r"^\w+://").expect("absolute url regex"));
        if !url.starts_with('/') && !absolute.is_match(&url) {
            url = format!("/{url}");
        }
        if url.starts_with('/') && !url.starts_with("//") {
            let port = self.hive.get_int("PORT");
            let port = if port == 80 || port == 443 {
                String::new()
            } else {
                format!(":{port}")
            };
            url = format!(
                "{}://{}{}{}{}",
                self.hive.get_str("SCHEME"),
                self.hive.get_str("HOST"),
                port,
                self.hive.get_str("BASE"),
                url
            );
        }
        if self.hive.truthy("CLI") {
            self.pending_reroute = Some((url, permanent));
        } else {
            self.hive.response.header("Location", url);
            self.status(if permanent { 301 } else { 302 });
        }
    }

    /// Decoded, base-relative request path.
    pub fn relative_path(&mut self) -> String {
        url_decode(&self.hive.get_str("PATH"))
    }
}

/// RFC 2822 date for HTTP headers (matches `Expires`/`Last-Modified`
/// expectations; parsers accept the `+0000` zone form).
pub fn http_date(ts: f64) -> String {
    Utc.timestamp_opt(ts.max(0.0) as i64, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).unwrap())
        .to_rfc2822()
}

fn report_value(report: &ErrorReport) -> Value {
    serde_json::to_value(report)
        .ok()
        .and_then(|v| serde_json::from_value(v).ok())
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::session::SessionManager;

    fn ctx(aliases: AliasMap) -> RequestContext {
        let facts = RequestFacts {
            verb: "GET".into(),
            path: "/here".into(),
            scheme: "http".into(),
            host: "example.com".into(),
            port: 8080,
            ..Default::default()
        };
        let hive = Hive::new(&facts, Cache::new(), SessionManager::new());
        RequestContext::new(facts, hive, Arc::new(aliases), None, None)
    }

    #[test]
    fn error_records_first_report_and_renders_html() {
        let mut ctx = ctx(AliasMap::new());
        ctx.error(404, "", None, 0);
        assert_eq!(ctx.hive().response.status, 404);
        let code = ctx.hive().get_int("ERROR.code");
        assert_eq!(code, 404);
        let body = String::from_utf8_lossy(&ctx.hive().response.body).into_owned();
        assert!(body.contains("<h1>Not Found</h1>"));
        assert!(body.contains("HTTP 404 (GET /here)"));
        // a later error re-renders but keeps the original report
        ctx.error(500, "secondary", None, 0);
        assert_eq!(ctx.hive().get_int("ERROR.code"), 404);
        assert_eq!(ctx.hive().response.status, 500);
    }

    #[test]
    fn error_responses_send_no_cache_headers() {
        let mut ctx = ctx(AliasMap::new());
        ctx.error(500, "boom", None, 0);
        let headers = &ctx.hive().response.headers;
        assert!(headers
            .iter()
            .any(|(k, v)| k == "Cache-Control" && v.contains("no-store")));
        assert!(headers.iter().any(|(k, _)| k == "X-Powered-By"));
    }

    #[test]
    fn reroute_normalizes_relative_urls() {
        let mut ctx = ctx(AliasMap::new());
        ctx.reroute("/login", false);
        let location = ctx
            .hive()
            .response
            .headers
            .iter()
            .find(|(k, _)| k == "Location")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(location, "http://example.com:8080/login");
        assert_eq!(ctx.hive().response.status, 302);
    }

    #[test]
    fn reroute_resolves_alias_shorthand() {
        let mut aliases = AliasMap::new();
        aliases.declare("item", "/items/@id");
        let mut ctx = ctx(aliases);
        ctx.reroute("@item(id=5)?tab=info", true);
        let location = ctx
            .hive()
            .response
            .headers
            .iter()
            .find(|(k, _)| k == "Location")
            .map(|(_, v)| v.clone())
            .unwrap();
        assert_eq!(location, "http://example.com:8080/items/5?tab=info");
        assert_eq!(ctx.hive().response.status, 301);
    }

    #[test]
    fn reroute_hook_can_veto() {
        let mut ctx = ctx(AliasMap::new());
        ctx.on_reroute = Some(Arc::new(
            |_: &mut RequestContext, _: &str, _: bool| true,
        ));
        ctx.reroute("/elsewhere", false);
        assert_eq!(ctx.hive().response.status, 200);
        assert!(!ctx.hive().response.has_header("Location"));
    }

    #[test]
    fn expire_emits_cache_headers_for_get() {
        let mut ctx = ctx(AliasMap::new());
        ctx.expire(60);
        let headers = &ctx.hive().response.headers;
        assert!(headers
            .iter()
            .any(|(k, v)| k == "Cache-Control" && v == "max-age=60"));
        assert!(headers.iter().any(|(k, _)| k == "Last-Modified"));
    }
}
