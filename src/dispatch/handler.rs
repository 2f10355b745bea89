//! Route handler contract.
//!
//! Handlers are typed values resolved at registration time; dispatch never
//! parses a callable out of a string. Closures with the right shape are
//! handlers; implement the trait directly to add before/after hooks.

use std::collections::BTreeMap;

use crate::dispatch::context::RequestContext;
use crate::error::FrameworkError;
use crate::hive::value::Value;

/// What a handler produces: a result value (rendered by the caller or used
/// by OPTIONS aggregation) or a framework error funneled as a 500.
pub type HandlerResult = Result<Value, FrameworkError>;

/// A route endpoint. Output is written through the context; the returned
/// value is the handler result the dispatcher hands back.
pub trait RouteHandler: Send + Sync {
    /// Pre-route hook; returning `false` skips the handler.
    fn before(
        &self,
        _ctx: &mut RequestContext,
        _params: &BTreeMap<String, Value>,
    ) -> HandlerResult {
        Ok(Value::Bool(true))
    }

    fn handle(
        &self,
        ctx: &mut RequestContext,
        params: &BTreeMap<String, Value>,
    ) -> HandlerResult;

    /// Post-route hook; returning `false` discards the handler result.
    fn after(
        &self,
        _ctx: &mut RequestContext,
        _params: &BTreeMap<String, Value>,
    ) -> HandlerResult {
        Ok(Value::Bool(true))
    }
}

impl<F> RouteHandler for F
where
    F: Fn(&mut RequestContext, &BTreeMap<String, Value>) -> HandlerResult + Send + Sync,
{
    fn handle(
        &self,
        ctx: &mut RequestContext,
        params: &BTreeMap<String, Value>,
    ) -> HandlerResult {
        self(ctx, params)
    }
}
