//! Design IDE - a design-first prototyping assistant
//!
//! A conversational designer interviews the user, renders five distinct UI
//! variants, gathers feedback, and scaffolds a full application from the
//! approved design. This crate provides:
//! - Conversation driver with LLM provider abstraction and typed design tools
//! - Per-project session state: phase machine, variants, feedback
//! - SQLite persistence for projects and transcripts
//! - HTTP API with SSE streaming, and a terminal chat

pub mod agent;
pub mod cli;
pub mod config;
pub mod paths;
pub mod preview;
pub mod server;
pub mod session;
pub mod store;

pub use config::Config;
