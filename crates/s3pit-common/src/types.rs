//! Core type definitions for s3pit
//!
//! Validated wrapper types for the identifiers that cross the HTTP
//! boundary: bucket names, object keys, and tenant access key ids.

use std::fmt;

/// A validated S3 bucket name.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BucketName(String);

impl BucketName {
    /// Validate and wrap a bucket name.
    pub fn new(name: impl Into<String>) -> Result<Self, BucketNameError> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Wrap without validation (internal use, e.g. reading names back off disk).
    #[must_use]
    pub fn new_unchecked(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> Result<(), BucketNameError> {
        if name.len() < 3 {
            return Err(BucketNameError::TooShort);
        }
        if name.len() > 63 {
            return Err(BucketNameError::TooLong);
        }
        for c in name.chars() {
            if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' && c != '.' {
                return Err(BucketNameError::InvalidChar(c));
            }
        }
        if name.contains("..") {
            return Err(BucketNameError::ConsecutivePeriods);
        }
        if name.contains("--") {
            return Err(BucketNameError::ConsecutiveHyphens);
        }
        if name.parse::<std::net::Ipv4Addr>().is_ok() {
            return Err(BucketNameError::LooksLikeIpAddress);
        }
        Ok(())
    }
}

impl fmt::Debug for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BucketName({:?})", self.0)
    }
}

impl fmt::Display for BucketName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when validating a bucket name.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BucketNameError {
    #[error("bucket name must be at least 3 characters")]
    TooShort,
    #[error("bucket name must be at most 63 characters")]
    TooLong,
    #[error("bucket name contains invalid character: {0}")]
    InvalidChar(char),
    #[error("bucket name cannot contain consecutive periods")]
    ConsecutivePeriods,
    #[error("bucket name cannot contain consecutive hyphens")]
    ConsecutiveHyphens,
    #[error("bucket name cannot be formatted as an IPv4 address")]
    LooksLikeIpAddress,
}

/// A validated object key (path within a bucket).
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey(String);

impl ObjectKey {
    pub fn new(key: impl Into<String>) -> Result<Self, ObjectKeyError> {
        let key = key.into();
        Self::validate(&key)?;
        Ok(Self(key))
    }

    #[must_use]
    pub fn new_unchecked(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(key: &str) -> Result<(), ObjectKeyError> {
        if key.is_empty() {
            return Err(ObjectKeyError::Empty);
        }
        if key.len() > 1024 {
            return Err(ObjectKeyError::TooLong);
        }
        if key.contains('\0') {
            return Err(ObjectKeyError::ContainsNullByte);
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectKey({:?})", self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors that can occur when validating an object key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ObjectKeyError {
    #[error("object key cannot be empty")]
    Empty,
    #[error("object key cannot exceed 1024 bytes")]
    TooLong,
    #[error("object key cannot contain a null byte")]
    ContainsNullByte,
}

/// A validated tenant access key identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct AccessKeyId(String);

impl AccessKeyId {
    pub fn new(id: impl Into<String>) -> Result<Self, AccessKeyIdError> {
        let id = id.into();
        if id.is_empty() {
            return Err(AccessKeyIdError::Empty);
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(AccessKeyIdError::InvalidChars(id));
        }
        Ok(Self(id))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AccessKeyId({:?})", self.0)
    }
}

impl fmt::Display for AccessKeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum AccessKeyIdError {
    #[error("access key id cannot be empty")]
    Empty,
    #[error("access key id must match [A-Za-z0-9_-]+, got {0:?}")]
    InvalidChars(String),
}
