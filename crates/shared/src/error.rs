use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerErrorCode {
    NotFound,
    Reverted,
    UserRejected,
    Unavailable,
    Internal,
}

/// Error body returned by the ledger endpoint on any non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerErrorBody {
    pub code: LedgerErrorCode,
    pub message: String,
}

impl LedgerErrorBody {
    pub fn new(code: LedgerErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}
