//! The LSP client: the state machine feeding the symbol provider
//! (`spec.md` §4.3).

pub mod client;
pub mod message;
pub mod transport;

pub use client::{ClientState, LspClient};
