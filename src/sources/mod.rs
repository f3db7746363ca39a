//! Bundled config source backends.
//!
//! `env` is a trivial passthrough to process environment variables; the
//! secret store backend talks to a Vault-style HTTP API and keeps leased
//! secrets renewed in the background.

pub mod env;
pub mod secretstore;

pub use env::EnvSource;
pub use secretstore::{SecretStoreSession, SecretStoreSource};
