//! Request dispatch: context, handler contract, runner, throttling.

pub mod context;
pub mod handler;
pub mod runner;
pub mod throttle;

pub use context::{ErrorHook, RequestContext, RerouteHook};
pub use handler::{HandlerResult, RouteHandler};
pub use runner::{blacklisted, run};
pub use throttle::throttled_stream;
