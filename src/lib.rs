//! apiary: a request-routing micro web framework.
//!
//! # Architecture Overview
//!
//! ```text
//!  Client Request
//!      │
//!      ▼
//!  ┌────────┐   ┌───────────────┐   ┌─────────────────────────┐
//!  │ server │──▶│   dispatch    │──▶│        routing          │
//!  │ (axum) │   │ runner + ctx  │   │ pattern / table / alias │
//!  └────────┘   └──────┬────────┘   └─────────────────────────┘
//!                      │
//!        ┌─────────────┼──────────────┐
//!        ▼             ▼              ▼
//!  ┌──────────┐  ┌───────────┐  ┌───────────┐
//!  │   hive   │  │   cache   │  │   error   │
//!  │  (state) │  │ (memoize) │  │  (funnel) │
//!  └──────────┘  └───────────┘  └───────────┘
//! ```
//!
//! Every request gets its own hive (state store); the route table and
//! aliases are registered once on the shared [`App`] and read during
//! dispatch. All failures (configuration errors, handler errors, panics)
//! render through one content-negotiated funnel.

pub mod app;
pub mod cache;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod hive;
pub mod routing;
pub mod server;
pub mod session;
pub mod sync;

pub use app::App;
pub use dispatch::{HandlerResult, RequestContext, RouteHandler};
pub use error::FrameworkError;
pub use hive::{Hive, RequestFacts, Value};
