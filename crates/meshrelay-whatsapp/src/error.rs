use thiserror::Error;

#[derive(Debug, Error)]
pub enum WhatsAppError {
    #[error("graph api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("graph api returned an error: {status}: {body}")]
    Api { status: u16, body: String },

    #[error("webhook signature verification failed")]
    BadSignature,

    #[error("malformed webhook payload: {0}")]
    BadPayload(String),
}

pub type Result<T> = std::result::Result<T, WhatsAppError>;
