use thiserror::Error;

#[derive(Error, Debug)]
pub enum SignalError {
    #[error("invalid ptz cmd {0:?}")]
    InvalidPtzCommand(String),

    #[error("xml decode error: {0}")]
    Xml(#[from] quick_xml::DeError),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, SignalError>;
