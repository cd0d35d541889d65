//! Strongbox Vault - Strong Authentication
//!
//! The contract the lock state machine needs from the platform's local
//! authentication, a failed-attempt tracker, and a PIN-based implementation.

use std::fmt;

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use crate::error::{VaultError, VaultResult};

/// Outcome of a failed authentication challenge
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The user dismissed the prompt
    #[error("cancelled by user")]
    Cancelled,

    #[error("authentication failed: {0}")]
    Failed(String),

    /// No enrolled credential or hardware
    #[error("authentication unavailable: {0}")]
    Unavailable(String),
}

impl From<AuthError> for VaultError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Cancelled => VaultError::AuthenticationCancelled,
            AuthError::Failed(reason) => VaultError::AuthenticationFailed(reason),
            AuthError::Unavailable(reason) => VaultError::AuthenticationFailed(reason),
        }
    }
}

/// Local strong authentication (biometric or device credential)
#[async_trait]
pub trait StrongAuthenticator: Send + Sync {
    /// Whether a challenge can be issued at all
    fn can_authenticate(&self) -> bool;

    /// Issue one challenge showing `reason` to the user
    async fn authenticate(&self, reason: &str) -> Result<(), AuthError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// FAILED-ATTEMPT LOCKOUT
// ═══════════════════════════════════════════════════════════════════════════

/// Longest honoured lockout (one year)
const MAX_LOCKOUT_SECONDS: u64 = 365 * 24 * 3600;

/// Consecutive failure counter with a timed lockout
#[derive(Debug, Clone)]
pub struct AttemptTracker {
    max_attempts: u32,
    lockout: Duration,
    failed_attempts: u32,
    locked_until: Option<DateTime<Utc>>,
}

impl AttemptTracker {
    pub fn new(max_attempts: u32, lockout_seconds: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout: Duration::seconds(lockout_seconds.min(MAX_LOCKOUT_SECONDS) as i64),
            failed_attempts: 0,
            locked_until: None,
        }
    }

    /// Remaining lockout, if any
    pub fn lockout_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.locked_until
            .filter(|until| now < *until)
            .map(|until| until - now)
    }

    pub fn is_locked_out(&self, now: DateTime<Utc>) -> bool {
        self.lockout_remaining(now).is_some()
    }

    /// Record a failure; returns true when this failure starts a lockout
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> bool {
        self.failed_attempts += 1;
        if self.failed_attempts >= self.max_attempts {
            self.locked_until = Some(now + self.lockout);
            self.failed_attempts = 0;
            true
        } else {
            false
        }
    }

    pub fn record_success(&mut self) {
        self.failed_attempts = 0;
        self.locked_until = None;
    }

    pub fn remaining_attempts(&self) -> u32 {
        self.max_attempts.saturating_sub(self.failed_attempts)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// PIN AUTHENTICATOR
// ═══════════════════════════════════════════════════════════════════════════

/// Hash a PIN into an Argon2id PHC string
pub fn hash_pin(pin: &str) -> VaultResult<String> {
    if pin.is_empty() {
        return Err(VaultError::invalid("PIN must not be empty"));
    }
    let mut salt_bytes = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)
        .map_err(|e| VaultError::CryptoFailure(format!("PIN salt: {e}")))?;
    Argon2::default()
        .hash_password(pin.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| VaultError::CryptoFailure(format!("PIN hashing: {e}")))
}

type Prompt = dyn Fn(&str) -> Option<String> + Send + Sync;

/// Strong authenticator that verifies a PIN against an Argon2id PHC hash.
///
/// The prompt receives the reason text and returns the entered PIN;
/// `None` or an empty string means the user cancelled.
pub struct PinAuthenticator {
    phc: String,
    prompt: Box<Prompt>,
}

impl PinAuthenticator {
    pub fn new<F>(phc: impl Into<String>, prompt: F) -> VaultResult<Self>
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        let phc = phc.into();
        PasswordHash::new(&phc).map_err(|e| VaultError::Config(format!("PIN hash: {e}")))?;
        Ok(Self {
            phc,
            prompt: Box::new(prompt),
        })
    }

    fn verify(phc: &str, pin: &str) -> Result<(), AuthError> {
        let parsed = PasswordHash::new(phc).map_err(|e| AuthError::Unavailable(e.to_string()))?;
        Argon2::default()
            .verify_password(pin.as_bytes(), &parsed)
            .map_err(|_| AuthError::Failed("incorrect PIN".into()))
    }
}

impl fmt::Debug for PinAuthenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinAuthenticator").finish_non_exhaustive()
    }
}

#[async_trait]
impl StrongAuthenticator for PinAuthenticator {
    fn can_authenticate(&self) -> bool {
        true
    }

    async fn authenticate(&self, reason: &str) -> Result<(), AuthError> {
        let pin = match (self.prompt)(reason) {
            Some(pin) if !pin.is_empty() => Zeroizing::new(pin),
            _ => return Err(AuthError::Cancelled),
        };

        let phc = self.phc.clone();
        tokio::task::spawn_blocking(move || Self::verify(&phc, &pin))
            .await
            .map_err(|e| AuthError::Unavailable(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lockout_after_max_attempts() {
        let now = Utc::now();
        let mut tracker = AttemptTracker::new(3, 300);

        assert!(!tracker.record_failure(now));
        assert!(!tracker.record_failure(now));
        assert_eq!(tracker.remaining_attempts(), 1);
        assert!(tracker.record_failure(now));

        assert!(tracker.is_locked_out(now));
        assert!(!tracker.is_locked_out(now + Duration::seconds(301)));
    }

    #[test]
    fn test_success_resets() {
        let now = Utc::now();
        let mut tracker = AttemptTracker::new(2, 60);
        tracker.record_failure(now);
        tracker.record_success();
        assert_eq!(tracker.remaining_attempts(), 2);
    }

    #[tokio::test]
    async fn test_pin_auth() {
        let phc = hash_pin("1234").unwrap();

        let ok = PinAuthenticator::new(phc.clone(), |_| Some("1234".into())).unwrap();
        assert!(ok.authenticate("unlock").await.is_ok());

        let wrong = PinAuthenticator::new(phc.clone(), |_| Some("0000".into())).unwrap();
        assert!(matches!(wrong.authenticate("unlock").await, Err(AuthError::Failed(_))));

        let cancelled = PinAuthenticator::new(phc, |_| None).unwrap();
        assert_eq!(cancelled.authenticate("unlock").await, Err(AuthError::Cancelled));
    }

    #[test]
    fn test_rejects_malformed_hash() {
        assert!(PinAuthenticator::new("not-a-phc", |_| None).is_err());
    }
}
