use thiserror::Error;

pub type Result<T> = std::result::Result<T, IrisError>;

/// Configuration errors raised while building an [`Iris`](crate::iris::Iris) image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IrisError {
    #[error("invalid image name `{0}`")]
    InvalidImageName(String),

    /// The image repository is not one of the supported IRIS images.
    #[error("image `{image}` is not compatible with any supported IRIS image (expected one of: {expected})")]
    IncompatibleImage { image: String, expected: String },

    #[error("password cannot be null or empty")]
    EmptyPassword,

    #[error("invalid container url `{url}`: {reason}")]
    InvalidContainerUrl { url: String, reason: String },

    #[error("database type `{0}` is not supported")]
    UnsupportedDatabaseType(String),
}
