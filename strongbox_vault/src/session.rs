//! Strongbox Vault - Lock state and session
//!
//! ```text
//!            begin_authentication          complete
//!  Locked ─────────────────────▶ Authenticating ─────────▶ Unlocked
//!    ▲                               │                       │
//!    └────────── fail / drop ────────┘                       │
//!    └──────────────── lock / sign-out / background ─────────┘
//! ```
//!
//! The state lives in an atomic so reads never block. Each `lock` bumps an
//! epoch; an authentication that started before the bump cannot unlock.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tracing::debug;

use crate::auth::AttemptTracker;

/// Vault lock state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum LockState {
    Locked = 0,
    Authenticating = 1,
    Unlocked = 2,
}

impl LockState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => LockState::Authenticating,
            2 => LockState::Unlocked,
            _ => LockState::Locked,
        }
    }
}

/// Why `begin_authentication` did not start a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginRefused {
    AlreadyUnlocked,
    AlreadyInProgress,
}

/// Why the gate refused an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDenied {
    Locked,
    OwnerMismatch,
    /// Idle re-lock fired; the vault is now locked
    IdleTimeout,
}

struct SessionInner {
    current_user: Option<String>,
    last_unlock_at: Option<DateTime<Utc>>,
    last_activity: Option<DateTime<Utc>>,
    attempts: AttemptTracker,
}

/// Process-local session: lock state, current user, attempt tracking
pub struct VaultSession {
    state: AtomicU8,
    epoch: AtomicU64,
    inner: Mutex<SessionInner>,
    tx: watch::Sender<LockState>,
}

impl VaultSession {
    /// New session, `Locked`, no user
    pub fn new(max_failed_attempts: u32, lockout_seconds: u64) -> Self {
        let (tx, _rx) = watch::channel(LockState::Locked);
        Self {
            state: AtomicU8::new(LockState::Locked as u8),
            epoch: AtomicU64::new(0),
            inner: Mutex::new(SessionInner {
                current_user: None,
                last_unlock_at: None,
                last_activity: None,
                attempts: AttemptTracker::new(max_failed_attempts, lockout_seconds),
            }),
            tx,
        }
    }

    pub fn state(&self) -> LockState {
        LockState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn subscribe(&self) -> watch::Receiver<LockState> {
        self.tx.subscribe()
    }

    pub fn current_user(&self) -> Option<String> {
        self.inner.lock().current_user.clone()
    }

    pub fn last_unlock_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().last_unlock_at
    }

    pub fn lockout_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.inner.lock().attempts.lockout_remaining(now)
    }

    fn publish(&self, state: LockState) {
        self.tx.send_replace(state);
        debug!(?state, "lock state changed");
    }

    /// Start a challenge: `Locked -> Authenticating`, or report why not
    pub fn begin_authentication(&self) -> Result<AuthenticatingGuard<'_>, BeginRefused> {
        let epoch = self.epoch.load(Ordering::Acquire);
        match self.state.compare_exchange(
            LockState::Locked as u8,
            LockState::Authenticating as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {
                self.publish(LockState::Authenticating);
                Ok(AuthenticatingGuard {
                    session: self,
                    epoch,
                    armed: true,
                })
            }
            Err(current) if current == LockState::Unlocked as u8 => Err(BeginRefused::AlreadyUnlocked),
            Err(_) => Err(BeginRefused::AlreadyInProgress),
        }
    }

    fn finish(&self, epoch: u64, to: LockState) -> bool {
        // Epoch check and transition happen under the session mutex so a
        // concurrent `lock` cannot slip between them
        let mut inner = self.inner.lock();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return false;
        }
        let moved = self
            .state
            .compare_exchange(
                LockState::Authenticating as u8,
                to as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if moved && to == LockState::Unlocked {
            let now = Utc::now();
            inner.last_unlock_at = Some(now);
            inner.last_activity = Some(now);
            inner.attempts.record_success();
        }
        drop(inner);

        if moved {
            self.publish(to);
        }
        moved
    }

    /// Force `Locked`. Returns true if the state changed.
    pub fn lock(&self) -> bool {
        let inner = self.inner.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let previous = self.state.swap(LockState::Locked as u8, Ordering::AcqRel);
        drop(inner);

        let changed = previous != LockState::Locked as u8;
        if changed {
            self.publish(LockState::Locked);
        }
        changed
    }

    /// Replace the current user. Returns true if it changed.
    pub fn set_user(&self, user: Option<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.current_user == user {
            return false;
        }
        inner.current_user = user;
        inner.last_unlock_at = None;
        inner.last_activity = None;
        true
    }

    /// Gate check for one operation by `owner_id`; refreshes the idle timer
    pub fn authorize(&self, owner_id: &str, relock_after: Option<Duration>) -> Result<(), GateDenied> {
        if self.state() != LockState::Unlocked {
            return Err(GateDenied::Locked);
        }

        let now = Utc::now();
        let idle = {
            let mut inner = self.inner.lock();
            if inner.current_user.as_deref() != Some(owner_id) {
                return Err(GateDenied::OwnerMismatch);
            }
            let idle = match (relock_after, inner.last_activity) {
                (Some(limit), Some(last)) => now - last > limit,
                _ => false,
            };
            if !idle {
                inner.last_activity = Some(now);
            }
            idle
        };

        if idle {
            self.lock();
            return Err(GateDenied::IdleTimeout);
        }
        Ok(())
    }
}

/// Held while a challenge is outstanding. Dropping it without `complete`
/// or `fail` returns the session to `Locked`.
pub struct AuthenticatingGuard<'a> {
    session: &'a VaultSession,
    epoch: u64,
    armed: bool,
}

impl AuthenticatingGuard<'_> {
    /// `Authenticating -> Unlocked`. False if the vault was locked meanwhile.
    pub fn complete(mut self) -> bool {
        self.armed = false;
        self.session.finish(self.epoch, LockState::Unlocked)
    }

    /// `Authenticating -> Locked` without counting an attempt
    pub fn cancel(mut self) {
        self.armed = false;
        self.session.finish(self.epoch, LockState::Locked);
    }

    /// `Authenticating -> Locked`, counting a failed attempt.
    /// Returns true when this failure starts a lockout.
    pub fn fail(mut self) -> bool {
        self.armed = false;
        let locked_out = self.session.inner.lock().attempts.record_failure(Utc::now());
        self.session.finish(self.epoch, LockState::Locked);
        locked_out
    }
}

impl Drop for AuthenticatingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("authentication abandoned");
            self.session.finish(self.epoch, LockState::Locked);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> VaultSession {
        let session = VaultSession::new(3, 60);
        session.set_user(Some("u1".into()));
        session
    }

    #[test]
    fn test_single_challenge_in_flight() {
        let session = session();
        let guard = session.begin_authentication().unwrap();
        assert_eq!(session.state(), LockState::Authenticating);
        assert_eq!(
            session.begin_authentication().err(),
            Some(BeginRefused::AlreadyInProgress)
        );

        assert!(guard.complete());
        assert_eq!(session.state(), LockState::Unlocked);
        assert_eq!(
            session.begin_authentication().err(),
            Some(BeginRefused::AlreadyUnlocked)
        );
    }

    #[test]
    fn test_lock_during_challenge_blocks_unlock() {
        let session = session();
        let guard = session.begin_authentication().unwrap();
        session.lock();
        assert!(!guard.complete());
        assert_eq!(session.state(), LockState::Locked);
    }

    #[test]
    fn test_dropped_guard_relocks() {
        let session = session();
        let mut rx = session.subscribe();
        drop(session.begin_authentication().unwrap());
        assert_eq!(session.state(), LockState::Locked);
        assert_eq!(*rx.borrow_and_update(), LockState::Locked);
    }

    #[test]
    fn test_gate_checks_owner_and_idle() {
        let session = session();
        assert_eq!(session.authorize("u1", None), Err(GateDenied::Locked));

        assert!(session.begin_authentication().unwrap().complete());
        assert_eq!(session.authorize("u1", None), Ok(()));
        assert_eq!(session.authorize("u2", None), Err(GateDenied::OwnerMismatch));

        // Any positive idle limit has passed once we rewind the activity clock
        session.inner.lock().last_activity = Some(Utc::now() - Duration::seconds(120));
        assert_eq!(
            session.authorize("u1", Some(Duration::seconds(60))),
            Err(GateDenied::IdleTimeout)
        );
        assert_eq!(session.state(), LockState::Locked);
    }

    #[test]
    fn test_failures_start_lockout() {
        let session = session();
        assert!(!session.begin_authentication().unwrap().fail());
        assert!(!session.begin_authentication().unwrap().fail());
        assert!(session.begin_authentication().unwrap().fail());
        assert!(session.lockout_remaining(Utc::now()).is_some());

        // Cancellation never counts
        let session = self::session();
        for _ in 0..5 {
            session.begin_authentication().unwrap().cancel();
        }
        assert!(session.lockout_remaining(Utc::now()).is_none());
    }
}
