//! `clientdesk-auth`: authentication boundary (JWT + users).
//!
//! This crate is intentionally decoupled from HTTP and storage.

pub mod claims;
pub mod token;
pub mod user;

pub use claims::{JwtClaims, TokenValidationError, validate_claims, TOKEN_ISSUER};
pub use token::{Hs256Jwt, JwtValidator, TokenError};
pub use user::{User, normalize_user_name};
