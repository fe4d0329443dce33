//! Behavioural step helpers for credential exchange scenarios.

mod assertions;
mod state;
mod steps;

pub use state::{CredentialExchangeState, credential_exchange_state};
