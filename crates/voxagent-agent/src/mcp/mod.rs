//! Model Context Protocol: client bridge, server mode and transports.

pub mod bridge;
pub mod client;
pub mod http;
pub mod protocol;
pub mod server;

pub use bridge::McpBridge;
pub use client::McpConnection;
pub use http::{McpHttpConnection, McpHttpServer};
pub use server::McpServer;
