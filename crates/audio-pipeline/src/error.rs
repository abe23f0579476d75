//! Runtime error types for the pipeline stages.
//!
//! Stage construction (opening files, probing, creating decoders and devices) reports
//! through `anyhow` with context and is always fatal. Errors raised while the pipeline
//! is running are typed so the driver can tell a skippable packet from a fatal buffer
//! overflow.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// The container could not produce the next packet.
    #[error("demux error: {0}")]
    Demux(String),

    /// A packet could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// A decoded frame could not be converted to the output format.
    #[error("resample error: {0}")]
    Resample(String),

    /// The playback buffer cannot take the block.
    #[error(
        "playback buffer capacity exceeded: requested {requested} bytes, {free} free of {capacity}"
    )]
    CapacityExceeded {
        requested: usize,
        free: usize,
        capacity: usize,
    },

    /// The run was stopped while waiting on the playback buffer.
    #[error("pipeline cancelled")]
    Cancelled,
}

impl From<symphonia::core::errors::Error> for PipelineError {
    fn from(e: symphonia::core::errors::Error) -> Self {
        PipelineError::Decode(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
