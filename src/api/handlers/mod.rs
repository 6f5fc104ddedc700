//! HTTP endpoint handlers.

pub mod system;
