//! LLM provider layer for Voxagent.
//!
//! # Architecture
//!
//! - [`traits::LlmProvider`] — trait that all providers implement
//! - [`remote::RemoteProvider`] — OpenAI Responses API over HTTP
//! - [`local::LocalProvider`] — in-process model with grammar-constrained tool calls
//! - [`harmony`] — analysis/final channel splitting applied to raw text
//! - [`factory::create_provider`] — picks a provider from `AgentConfig`

pub mod factory;
pub mod harmony;
pub mod local;
pub mod remote;
pub mod retry;
pub mod traits;

pub use factory::create_provider;
pub use local::LocalProvider;
pub use remote::RemoteProvider;
pub use traits::LlmProvider;
