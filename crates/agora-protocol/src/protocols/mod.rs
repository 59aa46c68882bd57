//! Protocols every agent speaks.

pub mod default;
