use std::path::PathBuf;
use thiserror::Error;

pub type BalanceResult<T> = Result<T, BalanceError>;

#[derive(Debug, Error)]
pub enum BalanceError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("image error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("no image found for label {label}")]
    MissingImage { label: PathBuf },
    #[error("config file {path} is not valid toml: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl BalanceError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> BalanceError {
        BalanceError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn image(path: impl Into<PathBuf>, source: image::ImageError) -> BalanceError {
        BalanceError::Image {
            path: path.into(),
            source,
        }
    }
}

/// Why a single augmentation attempt produced nothing usable
#[derive(Debug, Error)]
pub enum AugmentError {
    #[error("transform {name} failed: {reason}")]
    Transform { name: &'static str, reason: String },
    #[error("transform {name} panicked")]
    Panicked { name: &'static str },
}
