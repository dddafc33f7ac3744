//! MCP `run_feedback_cycle` tool parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RunFeedbackCycleParams {
    /// Include raw endpoint response bodies in the output.
    #[schemars(description = "Include raw endpoint response bodies. Defaults to false.")]
    pub include_responses: Option<bool>,
}
