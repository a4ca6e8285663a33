//! One-time code storage and verification.
//!
//! Codes live in the shared store under `"<purpose>:<identifier>"` with a
//! ten minute TTL. An expired code is indistinguishable from one never issued.

use tracing::{debug, instrument};

use ticketing_auth::{OTP_TTL, OtpPurpose, OtpVerification, codes_match, storage_key};
use ticketing_core::DomainError;

use crate::store::{SharedStore, StoreError};

/// OTP error. A wrong or expired code is not an error; see [`OtpVerification`].
#[derive(Debug, thiserror::Error)]
pub enum OtpError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Domain(#[from] DomainError),
}

#[derive(Debug, Clone)]
pub struct OtpManager<S> {
    store: S,
}

impl<S: SharedStore> OtpManager<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Fresh random code of exactly `digits` digits, first digit non-zero.
    pub fn generate_code(&self, digits: u32) -> Result<String, OtpError> {
        Ok(ticketing_auth::generate_code(digits)?)
    }

    /// Store `code` for the pair, replacing any live code.
    #[instrument(skip(self, code), err)]
    pub fn save_code(
        &self,
        identifier: &str,
        purpose: OtpPurpose,
        code: &str,
    ) -> Result<(), OtpError> {
        self.store
            .set_with_ttl(&storage_key(purpose, identifier), code, OTP_TTL)?;
        Ok(())
    }

    /// Check a submitted code. A match consumes the code.
    ///
    /// Only the caller whose delete removes the key gets `Valid`, so one code
    /// verifies at most once even under concurrent submissions. The delete
    /// only fires while the key still holds the compared code; a code replaced
    /// in between is left alone and the stale one is rejected.
    pub fn verify_code(
        &self,
        identifier: &str,
        purpose: OtpPurpose,
        submitted: &str,
    ) -> Result<OtpVerification, OtpError> {
        let key = storage_key(purpose, identifier);
        let Some(stored) = self.store.get(&key)? else {
            debug!(purpose = %purpose, "no live code");
            return Ok(OtpVerification::Invalid);
        };

        if !codes_match(&stored, submitted) {
            debug!(purpose = %purpose, "code mismatch");
            return Ok(OtpVerification::Invalid);
        }

        if self.store.delete_if_eq(&key, &stored)? {
            Ok(OtpVerification::Valid)
        } else {
            debug!(purpose = %purpose, "code consumed or replaced concurrently");
            Ok(OtpVerification::Invalid)
        }
    }

    /// Drop any live code for the pair. Returns whether one existed.
    pub fn invalidate_code(&self, identifier: &str, purpose: OtpPurpose) -> Result<bool, OtpError> {
        Ok(self.store.delete(&storage_key(purpose, identifier))?)
    }
}
