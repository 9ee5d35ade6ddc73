//! Session manager owning the identity pool
//!
//! Identities are loaned, not locked: several attempts may run on distinct
//! identities at once, and the same identity may back several sequential
//! attempts. The pool itself is the only synchronized region.

use crate::config::{validate_session_config, SessionConfig};
use crate::identity::fingerprint::{BrowserFingerprint, FingerprintGenerator};
use crate::ConfigError;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// A cookie carried by an identity between requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: Option<String>,
    pub path: Option<String>,
}

impl Cookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: None,
            path: None,
        }
    }
}

/// A browser fingerprint plus session state, presented on each attempt
#[derive(Debug, Clone)]
pub struct Identity {
    /// Unique within the manager that issued it
    pub id: String,
    pub fingerprint: Arc<BrowserFingerprint>,
    pub cookies: Vec<Cookie>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: Instant,
    /// Completed requests at the time of the loan
    pub requests_served: u32,
}

impl Identity {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Formats the cookies as a `Cookie` request header value
    pub fn cookie_header(&self) -> Option<String> {
        if self.cookies.is_empty() {
            return None;
        }

        Some(
            self.cookies
                .iter()
                .map(|c| format!("{}={}", c.name, c.value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

/// How the attempt that used an identity ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityOutcome {
    /// Cookies returned by the target replace same-named stored cookies
    Success { cookies: Vec<Cookie> },
    Failure,
}

#[derive(Debug)]
struct PoolEntry {
    identity: Identity,
    loans: u32,
    failures: u32,
}

impl PoolEntry {
    fn is_retired(&self, now: Instant, max_requests: u32) -> bool {
        self.identity.is_expired_at(now) || self.identity.requests_served >= max_requests
    }

    /// Load including loans that have not been released yet
    fn load(&self) -> u32 {
        self.identity.requests_served + self.loans
    }

    fn is_available(&self, now: Instant, max_requests: u32) -> bool {
        !self.identity.is_expired_at(now) && self.load() < max_requests
    }
}

#[derive(Debug)]
struct Pool {
    entries: Vec<PoolEntry>,
    generator: FingerprintGenerator,
    next_serial: u64,
}

/// Owns identities and decides their rotation
#[derive(Debug)]
pub struct SessionManager {
    max_requests_per_identity: u32,
    identity_ttl: Duration,
    pool_size: usize,
    pool: Mutex<Pool>,
}

impl SessionManager {
    pub fn new(config: &SessionConfig) -> Result<Self, ConfigError> {
        Self::with_generator(config, FingerprintGenerator::new())
    }

    /// Creates a manager drawing fingerprints from the given generator
    pub fn with_generator(
        config: &SessionConfig,
        generator: FingerprintGenerator,
    ) -> Result<Self, ConfigError> {
        validate_session_config(config)?;

        Ok(Self {
            max_requests_per_identity: config.max_requests_per_identity,
            identity_ttl: config.identity_ttl(),
            pool_size: config.pool_size as usize,
            pool: Mutex::new(Pool {
                entries: Vec::new(),
                generator,
                next_serial: 1,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Pool> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Loans an identity with remaining budget
    pub fn acquire(&self) -> Identity {
        self.acquire_at(Instant::now())
    }

    /// Loans an identity with remaining budget at the given instant
    ///
    /// Prefers the least-loaded usable identity. While fewer than `pool_size`
    /// identities are usable and all of them are on loan, a fresh identity is
    /// generated so concurrent attempts spread across distinct fingerprints.
    pub fn acquire_at(&self, now: Instant) -> Identity {
        let max_requests = self.max_requests_per_identity;
        let mut pool = self.lock();

        pool.entries
            .retain(|entry| entry.loans > 0 || !entry.is_retired(now, max_requests));

        let usable = pool
            .entries
            .iter()
            .filter(|entry| entry.is_available(now, max_requests))
            .count();

        let candidate = pool
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_available(now, max_requests))
            .min_by_key(|(_, entry)| (entry.loans, entry.load()))
            .map(|(index, entry)| (index, entry.loans));

        let index = match candidate {
            Some((index, 0)) => index,
            Some((index, _)) if usable >= self.pool_size => index,
            _ => self.issue(&mut pool, now),
        };

        let entry = &mut pool.entries[index];
        entry.loans += 1;
        entry.identity.clone()
    }

    fn issue(&self, pool: &mut Pool, now: Instant) -> usize {
        let fingerprint = pool.generator.generate();
        let id = format!("{}-{}", fingerprint.id(), pool.next_serial);
        pool.next_serial += 1;

        tracing::debug!(identity = %id, mobile = fingerprint.is_mobile, "Issuing identity");

        pool.entries.push(PoolEntry {
            identity: Identity {
                id,
                fingerprint: Arc::new(fingerprint),
                cookies: Vec::new(),
                issued_at: Utc::now(),
                expires_at: now + self.identity_ttl,
                requests_served: 0,
            },
            loans: 0,
            failures: 0,
        });
        pool.entries.len() - 1
    }

    /// Returns a loaned identity and records how the attempt went
    ///
    /// Returns true if the identity was retired by this release.
    pub fn release(&self, identity: &Identity, outcome: IdentityOutcome) -> bool {
        self.release_at(identity, outcome, Instant::now())
    }

    pub fn release_at(&self, identity: &Identity, outcome: IdentityOutcome, now: Instant) -> bool {
        let max_requests = self.max_requests_per_identity;
        let mut pool = self.lock();

        let Some(index) = pool
            .entries
            .iter()
            .position(|entry| entry.identity.id == identity.id)
        else {
            // Already evicted while on loan
            return false;
        };

        let entry = &mut pool.entries[index];
        entry.loans = entry.loans.saturating_sub(1);
        entry.identity.requests_served += 1;

        match outcome {
            IdentityOutcome::Success { cookies } => merge_cookies(&mut entry.identity.cookies, cookies),
            IdentityOutcome::Failure => entry.failures += 1,
        }

        if entry.is_retired(now, max_requests) {
            tracing::debug!(
                identity = %entry.identity.id,
                served = entry.identity.requests_served,
                failures = entry.failures,
                "Retiring identity"
            );
            pool.entries.remove(index);
            return true;
        }

        false
    }

    /// Evicts an identity immediately
    pub fn invalidate(&self, identity_id: &str) -> bool {
        let mut pool = self.lock();
        let before = pool.entries.len();
        pool.entries.retain(|entry| entry.identity.id != identity_id);
        before != pool.entries.len()
    }

    /// Drops every expired identity, returning how many were removed
    pub fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(Instant::now())
    }

    pub fn cleanup_expired_at(&self, now: Instant) -> usize {
        let mut pool = self.lock();
        let before = pool.entries.len();
        pool.entries
            .retain(|entry| !entry.identity.is_expired_at(now));

        let cleaned = before - pool.entries.len();
        if cleaned > 0 {
            tracing::info!(cleaned, "Cleaned up expired identities");
        }
        cleaned
    }

    /// Number of identities currently held in the pool
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn merge_cookies(stored: &mut Vec<Cookie>, fresh: Vec<Cookie>) {
    for cookie in fresh {
        match stored.iter_mut().find(|c| c.name == cookie.name) {
            Some(existing) => *existing = cookie,
            None => stored.push(cookie),
        }
    }
}
