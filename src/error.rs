use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Capture error: {0}")]
    Capture(String),

    #[error("Pcap error: {0}")]
    Pcap(#[from] pcap_file::PcapError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Packet payload too small: {len} bytes")]
    InputTooSmall { len: usize },

    #[error("Malformed frame: declared length {len}")]
    MalformedFrame { len: u32 },

    #[error("Timeout error: {message}")]
    Timeout { message: String },

    #[error("Connection closed by remote")]
    RemoteClosed,

    #[error("Replay completed with {errors} errors out of {total} messages")]
    Replay { errors: usize, total: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
