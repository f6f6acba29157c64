//! Intercepting HTTP/1.1 proxy that scores each request against the trained
//! model of its endpoint and blocks (or only logs) anomalous ones.

pub mod config;
pub mod context;
pub mod error;
pub mod hooks;
pub mod models;
pub mod origin;
pub mod pipeline;
pub mod server;
pub mod telemetry;
pub mod upstream;

pub use config::ProxyConfig;
pub use context::{InboundRequest, ProxyResponse, RequestContext, Stage};
pub use error::{ProxyError, Result};
pub use hooks::{AnomalyFilter, FilterHook};
pub use models::load_registry;
pub use pipeline::ProxyPipeline;
pub use server::ProxyServer;
pub use upstream::UpstreamClient;
