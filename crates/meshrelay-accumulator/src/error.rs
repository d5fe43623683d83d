use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("{0}")]
    Channel(#[from] meshrelay_channels::ChannelError),
}

pub type Result<T> = std::result::Result<T, AccumulatorError>;
