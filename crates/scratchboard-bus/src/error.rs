use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Transport {0} is not supported by this runtime")]
    Unsupported(&'static str),
}

pub type Result<T> = std::result::Result<T, BusError>;
