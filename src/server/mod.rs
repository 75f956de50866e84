//! The inbound listener.

pub mod listener;

pub use listener::{bind, serve};
