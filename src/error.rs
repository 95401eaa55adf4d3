use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a [`ThumbError`], used by callers that only
/// care about how to render a failed thumbnail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    SourceUnreadable,
    DecodeFailed,
    ScaleFailed,
    OutOfMemory,
    Superseded,
    Internal,
}

#[derive(Error, Debug)]
pub enum ThumbError {
    #[error("Cannot read picture '{path}': {source}")]
    SourceUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to decode picture '{path}': {message}")]
    DecodeFailed { path: PathBuf, message: String },

    #[error("Failed to scale picture: {0}")]
    ScaleFailed(String),

    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    #[error("Request was superseded by a newer one")]
    Superseded,

    #[error("Illegal {machine} transition from {from} to {to}")]
    IllegalTransition {
        machine: &'static str,
        from: &'static str,
        to: &'static str,
    },

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Failed to spawn worker thread: {0}")]
    WorkerSpawn(std::io::Error),

    #[error("Failed to save thumbnail '{path}': {source}")]
    ImageSave {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Failed to write output file '{path}': {source}")]
    OutputWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to compress PNG '{path}': {message}")]
    PngCompress { path: PathBuf, message: String },

    #[error("No valid images found in input")]
    NoImages,

    #[error("Input path does not exist: {0}")]
    InputNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ThumbError>;

impl ThumbError {
    /// Map a decode error from the `image` crate onto the pipeline taxonomy.
    pub fn from_image_error(path: &std::path::Path, err: image::ImageError) -> Self {
        match err {
            image::ImageError::IoError(source) => ThumbError::SourceUnreadable {
                path: path.to_path_buf(),
                source,
            },
            image::ImageError::Limits(limit) => {
                ThumbError::OutOfMemory(format!("decoding '{}': {}", path.display(), limit))
            }
            other => ThumbError::DecodeFailed {
                path: path.to_path_buf(),
                message: other.to_string(),
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ThumbError::SourceUnreadable { .. } | ThumbError::InputNotFound(_) => {
                ErrorKind::SourceUnreadable
            }
            ThumbError::DecodeFailed { .. } | ThumbError::NoImages => ErrorKind::DecodeFailed,
            ThumbError::ScaleFailed(_) => ErrorKind::ScaleFailed,
            ThumbError::OutOfMemory(_) => ErrorKind::OutOfMemory,
            ThumbError::Superseded => ErrorKind::Superseded,
            ThumbError::IllegalTransition { .. }
            | ThumbError::InvalidSettings(_)
            | ThumbError::WorkerSpawn(_)
            | ThumbError::ImageSave { .. }
            | ThumbError::OutputWrite { .. }
            | ThumbError::PngCompress { .. } => ErrorKind::Internal,
        }
    }

    /// True when the requestor should show the "offline" placeholder, i.e. the
    /// source file could not be reached at all.
    pub fn is_offline(&self) -> bool {
        self.kind() == ErrorKind::SourceUnreadable
    }
}
