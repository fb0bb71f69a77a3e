use thiserror::Error;

pub const GENERIC_FAILURE_MESSAGE: &str = "궁합 계산 중 오류가 발생했습니다. 다시 시도해 주세요.";

/// Malformed partner input, detected before any network call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("생년월일 형식이 올바르지 않습니다: {0}")]
    BirthDate(String),

    #[error("출생 시간 형식이 올바르지 않습니다: {0}")]
    BirthTime(String),

    #[error("성별 값이 올바르지 않습니다: {0}")]
    Gender(String),

    #[error("양력/음력 값이 올바르지 않습니다: {0}")]
    Calendar(String),
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::BirthDate(_) => "birth_date",
            ValidationError::BirthTime(_) => "birth_time",
            ValidationError::Gender(_) => "gender",
            ValidationError::Calendar(_) => "calendar",
        }
    }
}

/// Failure reported by the remote service or the transport under it.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// Non-success status; message comes from the response body when present.
    #[error("{message}")]
    Status { status: u16, message: String },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("unexpected response body: {0}")]
    Decode(String),
}

#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{0}")]
    Protocol(String),

    #[error(transparent)]
    Remote(#[from] RemoteError),
}

impl WorkflowError {
    /// Single message suitable for the error surface.
    pub fn user_message(&self) -> String {
        let message = self.to_string();
        if message.trim().is_empty() {
            GENERIC_FAILURE_MESSAGE.to_string()
        } else {
            message
        }
    }
}
