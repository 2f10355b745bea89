//! Long-poll helper.
//!
//! A bounded timer loop for comet-style endpoints: the predicate is
//! re-evaluated once per second until it yields something truthy, an error
//! is recorded, or the time budget runs out. The session is committed at
//! every yield point so concurrent requests observe fresh state.

use std::time::Duration;
use tokio::time::Instant;

use crate::dispatch::context::RequestContext;
use crate::hive::value::Value;

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll `predicate` until truthy; `Null` on timeout or recorded error.
pub async fn until<F>(ctx: &mut RequestContext, mut predicate: F, timeout: u64) -> Value
where
    F: FnMut(&mut RequestContext) -> Value,
{
    let start = Instant::now();
    let limit = Duration::from_secs(timeout.saturating_sub(1).max(1));
    loop {
        if ctx.hive().truthy("ERROR") {
            return Value::Null;
        }
        let out = predicate(ctx);
        if out.truthy() {
            return out;
        }
        ctx.hive().session_commit();
        if start.elapsed() + POLL_INTERVAL >= limit {
            return Value::Null;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::hive::{Hive, RequestFacts};
    use crate::routing::AliasMap;
    use crate::session::SessionManager;
    use std::sync::Arc;

    fn ctx() -> RequestContext {
        let facts = RequestFacts {
            verb: "GET".into(),
            path: "/poll".into(),
            scheme: "http".into(),
            host: "localhost".into(),
            port: 80,
            ..Default::default()
        };
        let hive = Hive::new(&facts, Cache::new(), SessionManager::new());
        RequestContext::new(facts, hive, Arc::new(AliasMap::new()), None, None)
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_truthy_predicate_value() {
        let mut ctx = ctx();
        let mut calls = 0;
        let out = until(
            &mut ctx,
            move |_| {
                calls += 1;
                if calls >= 3 {
                    Value::Str("ready".into())
                } else {
                    Value::Null
                }
            },
            60,
        )
        .await;
        assert_eq!(out, Value::Str("ready".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_at_the_time_budget() {
        let mut ctx = ctx();
        let start = Instant::now();
        let out = until(&mut ctx, |_| Value::Null, 5).await;
        assert_eq!(out, Value::Null);
        assert!(start.elapsed() < Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_once_an_error_is_recorded() {
        let mut ctx = ctx();
        ctx.error(500, "boom", None, 0);
        let out = until(&mut ctx, |_| Value::Str("never".into()), 60).await;
        assert_eq!(out, Value::Null);
    }
}
