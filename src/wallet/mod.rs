//! HD wallet address issuance

pub mod encoding;
pub mod issuer;

pub use issuer::AddressIssuer;
