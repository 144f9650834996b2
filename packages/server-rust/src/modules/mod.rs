//! Modules shipped with the host.

pub mod accounts;
pub mod verifier;

pub use accounts::{Account, AccountsModule};
pub use verifier::{FacebookInstantVerifier, ProviderToken, ProviderVerifier, VerifiedIdentity};
