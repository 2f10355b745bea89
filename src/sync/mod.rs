//! Cross-process and long-poll coordination helpers.

pub mod mutex;
pub mod until;

pub use mutex::mutex;
pub use until::until;
