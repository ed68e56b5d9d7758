//! Client side of the external tool-provider protocol.
//!
//! Sessions are run by `rmcp` over a child-process pipe or a TCP socket.
//! This crate adapts them to what the orchestrator needs: plain tool and
//! result types, a liveness signal, and [`ClientError::Disconnected`] for
//! every request caught by a dropped transport.

mod client;
mod error;
pub mod model;
mod transport;

pub use client::{McpClient, Notification};
pub use error::ClientError;
pub use model::{CallToolResult, ContentBlock, InitializeResult, McpTool, ToolAnnotations};
pub use transport::{connect_tcp, spawn_stdio};
