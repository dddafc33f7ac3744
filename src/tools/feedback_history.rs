use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FeedbackHistoryParams {
    #[schemars(description = "Return only the most recent N cycles")]
    pub limit: Option<usize>,
}
