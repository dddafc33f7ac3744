//! Trilogy Brain: service monitoring and knowledge retrieval for VOT1 tooling.
//!
//! Three long-lived services share one [`context::AppContext`]:
//!
//! | Service | Purpose | Cadence |
//! |---------|---------|---------|
//! | **Feedback loop** | Polls HTTP endpoints, raises alerts, records memory notes | `interval` (default 300s) |
//! | **Health monitor** | Tracks client and agent health, optionally self-repairs | `check_interval` (default 60s) |
//! | **Knowledge retriever** | Semantic or keyword search over the memory graph | On demand |
//!
//! # Architecture
//!
//! - **Storage**: SQLite memory graph (nodes and links)
//! - **Embeddings**: optional local ONNX Runtime backend behind `local-embeddings`;
//!   without it search runs in keyword mode
//! - **Clients**: Claude, Perplexity and an MCP gateway under one timeout/retry policy
//! - **Surfaces**: an axum dashboard (JSON API and WebSocket) and an MCP server over stdio
//!
//! # Modules
//!
//! - [`config`]: TOML configuration, environment overrides and credentials
//! - [`clients`]: HTTP policy and the external service clients
//! - [`db`]: graph database schema, import and health checks
//! - [`embedding`]: text-to-vector providers
//! - [`knowledge`]: graph access, embedding cache, scoring and the retriever
//! - [`feedback`]: endpoint polling loop
//! - [`health`]: component health checks and repair
//! - [`context`]: shared application state
//! - [`dashboard`]: HTTP/WebSocket API
//! - [`server`] and [`tools`]: MCP server

pub mod clients;
pub mod config;
pub mod context;
pub mod dashboard;
pub mod db;
pub mod embedding;
pub mod feedback;
pub mod health;
pub mod knowledge;
pub mod server;
pub mod tools;
