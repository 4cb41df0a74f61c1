//! s3pit-auth - Tenant registry and request signing
//!
//! This crate owns everything that turns an inbound HTTP request into an
//! authenticated tenant identity: the tenant registry (access key to
//! storage root and public-bucket policy) and the SigV4 verifier for both
//! header-signed and presigned requests.

pub mod presign;
pub mod registry;
pub mod sigv4;

pub use registry::{TenantRecord, TenantRegistry};
pub use sigv4::{payload_sha256, RequestToVerify, SigV4Verifier, VerifiedIdentity};
