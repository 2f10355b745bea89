//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → App::configure
//!         [globals]   → hive defaults for every request
//!         routes = [] → handler registry lookup + route registration
//!         redirects   → permanent redirect routes
//! ```
//!
//! # Design Decisions
//! - Handler names in config resolve at load time; an unknown name is a
//!   fatal configuration error, not a per-request 404
//! - All fields have defaults to allow minimal configs

pub mod loader;
pub mod schema;

pub use loader::{load_config, parse_redirect_line, parse_route_line, RouteLine};
pub use schema::{toml_value, AppConfig};
