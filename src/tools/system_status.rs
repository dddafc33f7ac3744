//! MCP `system_status` and `repair_system` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SystemStatusParams {
    /// Run a fresh health check instead of returning the last results.
    #[schemars(description = "If true, run a fresh health check before reporting")]
    pub refresh: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RepairSystemParams {
    /// Must be true; repairs may spawn agent processes.
    #[schemars(description = "Must be true. Repair re-instantiates clients and may spawn agent processes.")]
    pub confirm: bool,
}
