//! Unix timestamps used for nonce issuance and attestation expiration.

use std::fmt;
use std::ops::Add;
use std::time::{SystemTime, SystemTimeError, UNIX_EPOCH};

/// A Unix timestamp, in whole seconds since the epoch.
///
/// Used for nonce issuance times (§3 "pending-nonces mapping"), attestation
/// token expirations (§3 "Attestation token"), and the `expiration` parameter
/// validator (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
#[serde(transparent)]
pub struct UnixTimestamp(pub u64);

impl UnixTimestamp {
    pub fn try_now() -> Result<Self, SystemTimeError> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        Ok(Self(now))
    }

    pub fn seconds_since_epoch(&self) -> u64 {
        self.0
    }

    /// Whether this timestamp is strictly in the future relative to `now`.
    pub fn is_future(&self, now: UnixTimestamp) -> bool {
        self.0 > now.0
    }

    /// Whether `self + window` has not yet elapsed relative to `now`.
    pub fn has_not_expired(&self, window_secs: u64, now: UnixTimestamp) -> bool {
        now.0 <= self.0 + window_secs
    }
}

impl Add<u64> for UnixTimestamp {
    type Output = Self;

    fn add(self, rhs: u64) -> Self::Output {
        UnixTimestamp(self.0 + rhs)
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiration_window_boundary() {
        let issued = UnixTimestamp(1_000);
        assert!(issued.has_not_expired(300, UnixTimestamp(1_300)));
        assert!(!issued.has_not_expired(300, UnixTimestamp(1_301)));
    }

    #[test]
    fn future_check() {
        let now = UnixTimestamp(1_000);
        assert!(UnixTimestamp(1_001).is_future(now));
        assert!(!UnixTimestamp(1_000).is_future(now));
        assert!(!UnixTimestamp(999).is_future(now));
    }
}
