//! Error types for s3pit
//!
//! This module defines the common error taxonomy used throughout the
//! system. Every variant maps to exactly one S3 error code and HTTP
//! status.

use thiserror::Error;

/// Common result type for s3pit operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for s3pit
#[derive(Debug, Error)]
pub enum Error {
    #[error("bucket not found: {0}")]
    BucketNotFound(String),

    #[error("bucket not empty: {0}")]
    BucketNotEmpty(String),

    #[error("bucket already exists: {0}")]
    BucketExists(String),

    #[error("invalid bucket name: {0}")]
    InvalidBucketName(String),

    #[error("object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    #[error("invalid object key: {0}")]
    InvalidObjectKey(String),

    #[error("no such upload: {0}")]
    UploadNotFound(String),

    #[error("upload does not belong to this bucket/key: {0}")]
    UploadMismatch(String),

    #[error("part not found: {0}")]
    PartNotFound(u32),

    #[error("missing authorization material")]
    MissingAuth,

    #[error("unsupported signature version")]
    UnsupportedVersion,

    #[error("incomplete authorization material: {0}")]
    IncompleteAuth(String),

    #[error("invalid signing algorithm")]
    InvalidAlgorithm,

    #[error("invalid credential scope: {0}")]
    InvalidCredential(String),

    #[error("access key not found: {0}")]
    AccessKeyNotFound(String),

    #[error("invalid access key: {0}")]
    InvalidAccessKey(String),

    #[error("signature mismatch")]
    SignatureMismatch,

    #[error("presigned URL has expired")]
    PresignedUrlExpired,

    #[error("malformed XML: {0}")]
    MalformedXml(String),

    #[error("missing content length")]
    MissingContentLength,

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Get the S3 error code for API compatibility
    #[must_use]
    pub fn s3_code(&self) -> &'static str {
        match self {
            Self::BucketNotFound(_) => "NoSuchBucket",
            Self::BucketNotEmpty(_) => "BucketNotEmpty",
            Self::BucketExists(_) => "BucketAlreadyExists",
            Self::InvalidBucketName(_) => "InvalidBucketName",
            Self::ObjectNotFound { .. } => "NoSuchKey",
            Self::InvalidObjectKey(_) => "InvalidObjectName",
            Self::UploadNotFound(_) => "NoSuchUpload",
            Self::UploadMismatch(_) => "InvalidRequest",
            Self::PartNotFound(_) => "InvalidPart",
            Self::MissingAuth
            | Self::UnsupportedVersion
            | Self::IncompleteAuth(_)
            | Self::InvalidAlgorithm
            | Self::InvalidCredential(_) => "InvalidRequest",
            Self::AccessKeyNotFound(_) | Self::InvalidAccessKey(_) => "InvalidAccessKeyId",
            Self::SignatureMismatch => "SignatureDoesNotMatch",
            Self::PresignedUrlExpired => "AccessDenied",
            Self::MalformedXml(_) => "MalformedXML",
            Self::MissingContentLength => "MissingContentLength",
            Self::Internal(_) => "InternalError",
        }
    }

    /// Get the HTTP status code for API compatibility
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidBucketName(_)
            | Self::InvalidObjectKey(_)
            | Self::UploadMismatch(_)
            | Self::PartNotFound(_)
            | Self::MissingAuth
            | Self::UnsupportedVersion
            | Self::IncompleteAuth(_)
            | Self::InvalidAlgorithm
            | Self::InvalidCredential(_)
            | Self::MalformedXml(_)
            | Self::MissingContentLength => 400,

            Self::AccessKeyNotFound(_)
            | Self::InvalidAccessKey(_)
            | Self::SignatureMismatch
            | Self::PresignedUrlExpired => 403,

            Self::BucketNotFound(_) | Self::ObjectNotFound { .. } | Self::UploadNotFound(_) => 404,

            Self::BucketNotEmpty(_) | Self::BucketExists(_) => 409,

            Self::Internal(_) => 500,
        }
    }
}

/// Fatal configuration validation error, raised while loading the tenant
/// config document at startup. Distinct from [`Error`] because these never
/// reach the HTTP surface — a bad config aborts the process before it
/// starts serving.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("globalDir must be absolute or begin with ~/: {0}")]
    InvalidGlobalDir(String),

    #[error("globalDir is required because tenant {0:?} has no customDir")]
    MissingGlobalDir(String),

    #[error("tenant access key must match [A-Za-z0-9_-]+ and be non-empty, got {0:?}")]
    InvalidAccessKeyId(String),

    #[error("tenant {0:?} has an empty secret")]
    EmptySecret(String),

    #[error("tenant {0:?} customDir must be absolute or begin with ~/: {1:?}")]
    InvalidCustomDir(String, String),

    #[error("duplicate access key id: {0:?}")]
    DuplicateAccessKey(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config document: {0}")]
    Parse(String),
}
