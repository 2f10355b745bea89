//! The hive: state store, key-path resolver, value type and cookie policy.

pub mod jar;
pub mod keypath;
pub mod store;
pub mod value;

pub use jar::CookieJar;
pub use keypath::KeyPath;
pub use store::{Hive, RequestFacts, ResponseState};
pub use value::Value;
