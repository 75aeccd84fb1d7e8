//! Crate-level error type.
//!
//! Expected failures (missing storage, a resource mid-teardown) are logged
//! where they happen. This enum is for the few operations that surface a
//! failure to the caller.

use thiserror::Error;

use crate::effects::probe::ProbeError;
use crate::models::TrackId;
use crate::resource::ResourceError;

#[derive(Debug, Error)]
pub enum Error {
    /// 9S storage failure, carried as text.
    #[error("storage: {0}")]
    Storage(String),
    #[error(transparent)]
    Resource(#[from] ResourceError),
    #[error("track {0} not found")]
    TrackNotFound(TrackId),
    #[error("album {0} not found")]
    AlbumNotFound(u64),
    #[error("album {0} has no playable tracks")]
    EmptyAlbum(u64),
    #[error(transparent)]
    Probe(#[from] ProbeError),
    #[error("invalid settings: {0}")]
    Config(String),
}

impl From<nine_s_core::errors::NineSError> for Error {
    fn from(e: nine_s_core::errors::NineSError) -> Self {
        Error::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
