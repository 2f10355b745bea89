//! The dispatcher: match, negotiate, execute, memoize.
//!
//! # Responsibilities
//! - Walk the route table in specificity order and mask each pattern
//! - Resolve the request context pointer (cli/ajax/sync, falling back to
//!   context-agnostic registrations) and the verb
//! - CORS preamble and preflight handling
//! - Canonical trailing-slash redirect for GET
//! - Response memoization for TTL'd GET/HEAD routes, honoring
//!   If-Modified-Since
//! - Verb aggregation for OPTIONS/405 responses
//!
//! # Design Decisions
//! - 404/405/403/304 are produced inline, never raised; handler errors and
//!   panics funnel as 500s
//! - Matching continues after a falsy OPTIONS result so the Allow header
//!   aggregates every pattern the URL matches

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::cache::{key_hash, now};
use crate::dispatch::context::RequestContext;
use crate::dispatch::handler::RouteHandler;
use crate::error::FrameworkError;
use crate::hive::value::Value;
use crate::routing::pattern::{mask, RequestKind};
use crate::routing::table::{RouteEntry, RouteTable};

/// Memoized route output: captured headers (cookies excluded), body bytes
/// and the handler's return value.
#[derive(Serialize, Deserialize)]
struct CachedResponse {
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    result: Value,
}

/// DNSBL reputation check for the client address. Opt-in: a hive `DNSBL`
/// server list enables it, `EXEMPT` whitelists addresses.
pub async fn blacklisted(ctx: &mut RequestContext) -> bool {
    let dnsbl = ctx.hive().get_str("DNSBL");
    if dnsbl.is_empty() {
        return false;
    }
    let ip = ctx.hive().get_str("IP");
    let exempt = ctx.hive().get("EXEMPT");
    let exempted = match &exempt {
        Value::Seq(list) => list.iter().any(|v| v.to_display() == ip),
        Value::Str(list) => list
            .split([',', ';', '|'])
            .any(|item| item.trim() == ip),
        _ => false,
    };
    if exempted {
        return false;
    }
    let Ok(addr) = ip.parse::<std::net::Ipv4Addr>() else {
        return false;
    };
    let octets = addr.octets();
    let rev = format!("{}.{}.{}.{}", octets[3], octets[2], octets[1], octets[0]);
    for server in dnsbl.split([',', ';', '|']).map(str::trim) {
        if server.is_empty() {
            continue;
        }
        let listed = tokio::net::lookup_host((format!("{rev}.{server}"), 0u16))
            .await
            .map(|mut addrs| addrs.next().is_some())
            .unwrap_or(false);
        if listed {
            tracing::warn!(ip = %ip, server = %server, "client address blacklisted");
            return true;
        }
    }
    false
}

/// Match the request against the table and produce the response. Returns
/// the handler result, or `false` when no handler ran.
pub fn run(table: &RouteTable, ctx: &mut RequestContext) -> Value {
    if table.is_empty() {
        ctx.fail(FrameworkError::NoRoutes);
        return Value::Bool(false);
    }
    let req = ctx.relative_path();
    let verb = ctx.hive().get_str("VERB");
    let cli = ctx.hive().truthy("CLI");
    let ajax = ctx.hive().truthy("AJAX");
    let caseless = ctx.hive().truthy("CASELESS");

    let origin_present = ctx.facts.header("Origin").is_some();
    let cors_origin = ctx.hive().get("CORS.origin");
    let cors = origin_present && cors_origin.truthy();
    let mut preflight = false;
    if cors {
        let credentials = ctx.hive().truthy("CORS.credentials");
        ctx.hive()
            .response
            .header("Access-Control-Allow-Origin", cors_origin.to_display());
        ctx.hive().response.header(
            "Access-Control-Allow-Credentials",
            if credentials { "true" } else { "false" },
        );
        preflight = ctx.facts.header("Access-Control-Request-Method").is_some();
    }

    let kind = if cli {
        RequestKind::Cli
    } else if ajax {
        RequestKind::Ajax
    } else {
        RequestKind::Sync
    };
    let mut allowed: Vec<String> = Vec::new();
    for idx in table.sorted() {
        let pattern_routes = table.get(idx);
        let Some(args) = mask(&pattern_routes.pattern, &req, caseless) else {
            continue;
        };
        let route = match pattern_routes.contexts.get(&kind) {
            Some(route) if route.contains_key(&verb) || preflight => route,
            _ => match pattern_routes.contexts.get(&RequestKind::Any) {
                Some(route) => route,
                None => continue,
            },
        };
        if let Some(entry) = route.get(&verb).filter(|_| !preflight) {
            let entry = entry.clone();
            let pattern = pattern_routes.pattern.clone();

            // canonicalize before further processing
            let path = ctx.hive().get_str("PATH");
            if verb == "GET" && path.len() > 1 && path.ends_with('/') {
                let query = ctx.hive().get_str("QUERY");
                let mut target = path[..path.len() - 1].to_string();
                if !query.is_empty() {
                    target.push('?');
                    target.push_str(&query);
                }
                ctx.reroute(&target, true);
                return Value::Bool(false);
            }

            let _ = ctx.hive().set("PARAMS", Value::Map(args.clone()));
            let _ = match &entry.alias {
                Some(alias) => ctx.hive().set("ALIAS", alias.as_str()),
                None => ctx.hive().set("ALIAS", Value::Null),
            };
            let _ = ctx.hive().set("PATTERN", pattern.as_str());
            if cors {
                let expose = ctx.hive().get("CORS.expose");
                if expose.truthy() {
                    let value = match &expose {
                        Value::Seq(items) => items
                            .iter()
                            .map(Value::to_display)
                            .collect::<Vec<_>>()
                            .join(","),
                        other => other.to_display(),
                    };
                    ctx.hive()
                        .response
                        .header("Access-Control-Expose-Headers", value);
                }
            }

            let mut result = Value::Null;
            let mut replayed = false;
            let mut store_as: Option<(String, u64)> = None;
            if (verb == "GET" || verb == "HEAD") && entry.ttl > 0 {
                let uri = ctx.hive().get_str("URI");
                let hash = format!("{}.url", key_hash(&format!("{verb} {uri}")));
                let cache = ctx.hive().cache().clone();
                if let Some((stored, ttl)) = cache.exists(&hash) {
                    if let Some(since) = ctx.facts.header("If-Modified-Since") {
                        if let Ok(when) = chrono::DateTime::parse_from_rfc2822(since) {
                            if when.timestamp() as f64 + entry.ttl as f64 > now() {
                                ctx.status(304);
                                return Value::Bool(false);
                            }
                        }
                    }
                    if let Some(cached) = cache.get::<CachedResponse>(&hash) {
                        if !cli {
                            for (name, value) in &cached.headers {
                                ctx.hive().response.header(name, value.clone());
                            }
                        }
                        ctx.hive().response.write(&cached.body);
                        result = cached.result;
                        ctx.expire((stored + ttl as f64 - now()).round() as i64);
                        replayed = true;
                    }
                }
                if !replayed {
                    ctx.expire(entry.ttl as i64);
                    store_as = Some((hash, entry.ttl));
                }
            } else {
                ctx.expire(0);
            }

            if !replayed {
                let body_start = ctx.hive().response.body.len();
                match execute(&entry, ctx, &args) {
                    Ok(out) => result = out,
                    Err(err) => {
                        ctx.fail(err);
                        return Value::Bool(false);
                    }
                }
                if let Some((hash, ttl)) = store_as {
                    if !ctx.hive().truthy("ERROR") {
                        let headers: Vec<(String, String)> = ctx
                            .hive()
                            .response
                            .headers
                            .iter()
                            .filter(|(name, _)| !name.eq_ignore_ascii_case("Set-Cookie"))
                            .cloned()
                            .collect();
                        let body = ctx.hive().response.body[body_start..].to_vec();
                        let memo = CachedResponse {
                            headers,
                            body,
                            result: result.clone(),
                        };
                        ctx.hive().cache().clone().set(&hash, &memo, ttl);
                    }
                }
            }

            let rendered =
                String::from_utf8_lossy(&ctx.hive().response.body).into_owned();
            let _ = ctx.hive().set("RESPONSE", rendered);
            if entry.kbps > 0 {
                ctx.hive().response.kbps = entry.kbps;
            }
            if result.truthy() || verb != "OPTIONS" {
                return result;
            }
        }
        allowed.extend(route.keys().cloned());
    }

    if allowed.is_empty() {
        ctx.error(404, "", None, 0);
        return Value::Bool(false);
    }
    let mut seen = BTreeSet::new();
    allowed.retain(|verb| seen.insert(verb.clone()));
    if !cli {
        if !ctx.hive().response.has_header("Allow") {
            let mut allow = allowed.clone();
            if verb == "OPTIONS" && !allow.iter().any(|v| v == "OPTIONS") {
                allow.push("OPTIONS".to_string());
            }
            ctx.hive().response.header("Allow", allow.join(","));
        }
        if cors {
            if !ctx
                .hive()
                .response
                .has_header("Access-Control-Allow-Methods")
            {
                ctx.hive().response.header(
                    "Access-Control-Allow-Methods",
                    format!("OPTIONS,{}", allowed.join(",")),
                );
            }
            let headers = ctx.hive().get("CORS.headers");
            if headers.truthy()
                && !ctx
                    .hive()
                    .response
                    .has_header("Access-Control-Allow-Headers")
            {
                let value = match &headers {
                    Value::Seq(items) => items
                        .iter()
                        .map(Value::to_display)
                        .collect::<Vec<_>>()
                        .join(","),
                    other => other.to_display(),
                };
                ctx.hive()
                    .response
                    .header("Access-Control-Allow-Headers", value);
            }
            let ttl = ctx.hive().get_int("CORS.ttl");
            if ttl > 0 {
                ctx.hive()
                    .response
                    .header("Access-Control-Max-Age", ttl.to_string());
            }
        }
        if verb != "OPTIONS" {
            ctx.error(405, "", None, 0);
        }
    }
    Value::Bool(false)
}

/// Run a handler through its hooks, converting panics into framework
/// errors. A `false` from either hook aborts with a `false` result.
fn execute(
    entry: &RouteEntry,
    ctx: &mut RequestContext,
    args: &BTreeMap<String, Value>,
) -> Result<Value, FrameworkError> {
    let handler = entry.handler.clone();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(
        || -> Result<Value, FrameworkError> {
            let pre = handler.before(ctx, args)?;
            if pre == Value::Bool(false) {
                return Ok(Value::Bool(false));
            }
            let out = handler.handle(ctx, args)?;
            if out == Value::Bool(false) {
                return Ok(out);
            }
            let post = handler.after(ctx, args)?;
            if post == Value::Bool(false) {
                return Ok(Value::Bool(false));
            }
            Ok(out)
        },
    ));
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(FrameworkError::Panic(panic_text(payload))),
    }
}

fn panic_text(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_string()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "handler panicked".to_string()
    }
}
