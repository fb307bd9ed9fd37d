#![doc = include_str!("../README.md")]

mod c14n;
pub mod conditions;
pub mod metadata;
pub mod provider;
pub mod request;
pub mod response;
pub mod signature;
mod xml;

#[cfg(any(test, feature = "test-support"))]
pub mod fixtures;

// Re-exports
pub use conditions::{validate_conditions, ValidationContext, CLOCK_SKEW_SECS};
pub use metadata::{build_sp_metadata, SpMetadata};
pub use provider::SamlProvider;
pub use request::{build_authn_request, build_sso_redirect_url, encode_authn_request, AuthnRequest};
pub use response::{decode_saml_response, parse_response, SamlAssertion, SamlResponse};
pub use signature::{parse_certificate, verify_signature};
