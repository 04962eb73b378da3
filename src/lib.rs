#![forbid(unsafe_code)]

//! `agent-bridge`: drive a long-lived Claude Code process from a Slack
//! channel over the stream-json protocol.

pub mod agent;
pub mod config;
pub mod errors;
pub mod inbound;
pub mod mcp;
pub mod media;
pub mod models;
pub mod orchestrator;
pub mod presentation;
pub mod slack;
pub mod transcript;

pub use config::BridgeConfig;
pub use errors::{AppError, Result};
