use thiserror::Error;

#[derive(Debug, Error)]
pub enum CandleError {
    #[error("Invalid timestamp '{value}': expected {expected}")]
    InvalidTimestamp {
        value: String,
        expected: &'static str,
    },
}
