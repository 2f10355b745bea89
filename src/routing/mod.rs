//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Route Registration (startup):
//!     "GET|POST name: /path/@token/* [ajax]"
//!     → pattern.rs (grammar parse, verb validation)
//!     → table.rs (store per pattern/context/verb)
//!     → alias.rs (record named templates)
//!
//! Dispatch (per request):
//!     table.sorted() (descending specificity)
//!     → pattern::mask (regex match, token capture)
//!     → Return: RouteEntry + captured parameters
//! ```
//!
//! # Design Decisions
//! - Deterministic ordering: specificity first, recency breaks ties
//! - Compiled pattern regexes cached across requests
//! - Reverse building (alias.rs) shares the same token grammar

pub mod alias;
pub mod pattern;
pub mod table;

pub use alias::AliasMap;
pub use pattern::{mask, PatternRef, RequestKind, RouteSpec};
pub use table::{RouteEntry, RouteTable};
