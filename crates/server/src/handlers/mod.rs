//! HTTP request handlers.

pub mod build;
pub mod health;
pub mod peer;
pub mod site;

pub use build::*;
pub use health::*;
pub use peer::*;
pub use site::*;
