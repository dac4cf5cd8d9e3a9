use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PinError, Result};
use crate::tarball::hash_tarball;

/// Acceptance window around local time for fingerprint timestamps.
pub const TIMESTAMP_WINDOW_MS: u64 = 300_000;

/// Signed metadata binding a resource's bytes to its publisher.
///
/// Field order is the canonical (alphabetical) serialization order; the
/// signature covers the exact JSON text, so re-serializing must reproduce
/// it character for character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub hash: String,
    pub public_key: String,
    pub shoggoth_id: String,
    /// Millisecond Unix epoch as a decimal string. Always compared as an
    /// integer.
    pub timestamp: String,
}

/// Which side of the acceptance window a timestamp fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampSkew {
    Future,
    Past,
}

impl TimestampSkew {
    pub fn message(&self) -> &'static str {
        match self {
            TimestampSkew::Future => {
                "the fingerprint timestamp is set in the future. are you a time traveler?"
            }
            TimestampSkew::Past => {
                "the fingerprint timestamp is set in the past. are you a time traveler?"
            }
        }
    }
}

impl Fingerprint {
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text)
            .map_err(|e| PinError::Validation(format!("could not parse fingerprint: {e}")))
    }

    pub fn to_canonical_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| PinError::Validation(format!("could not serialize fingerprint: {e}")))
    }

    /// The timestamp as an integer millisecond epoch.
    pub fn timestamp_ms(&self) -> Result<u64> {
        self.timestamp
            .parse::<u64>()
            .map_err(|_| PinError::Validation(format!("invalid fingerprint timestamp: `{}`", self.timestamp)))
    }

    /// Checks the timestamp against the ±5-minute window around `now_ms`.
    pub fn check_timestamp_window(&self, now_ms: u64) -> Result<std::result::Result<(), TimestampSkew>> {
        let ts = self.timestamp_ms()?;

        if ts > now_ms + TIMESTAMP_WINDOW_MS {
            Ok(Err(TimestampSkew::Future))
        } else if ts + TIMESTAMP_WINDOW_MS < now_ms {
            Ok(Err(TimestampSkew::Past))
        } else {
            Ok(Ok(()))
        }
    }
}

/// Verifies that a tarball is authorized by its fingerprint: the content
/// hash must match, the ShoggothID must be derived from that hash, and the
/// signature must verify over the exact fingerprint text.
pub fn validate_authorization(
    tmp_path: &Path,
    tarball_path: &Path,
    fingerprint: &Fingerprint,
    fingerprint_text: &str,
    signature: &str,
) -> Result<()> {
    let calculated_hash = hash_tarball(tmp_path, tarball_path)?;

    if calculated_hash != fingerprint.hash {
        return Err(PinError::Validation(format!(
            "calculated hash does not match received hash.\ncalculated: {calculated_hash}\nreceived: {}",
            fingerprint.hash
        )));
    }

    if lib_crypto::shoggoth_id_from_hash(&calculated_hash) != fingerprint.shoggoth_id {
        return Err(PinError::Validation(
            "shoggoth id does not match the content hash".to_string(),
        ));
    }

    if !lib_crypto::verify_signature(&fingerprint.public_key, signature, fingerprint_text) {
        return Err(PinError::Validation("received signature is not valid".to_string()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint_at(ts: u64) -> Fingerprint {
        Fingerprint {
            hash: "h".repeat(64),
            public_key: "key".to_string(),
            shoggoth_id: "SHOGabc".to_string(),
            timestamp: ts.to_string(),
        }
    }

    #[test]
    fn canonical_serialization_orders_keys_alphabetically() {
        let fingerprint = Fingerprint {
            hash: "a".to_string(),
            public_key: "b".to_string(),
            shoggoth_id: "c".to_string(),
            timestamp: "1".to_string(),
        };

        assert_eq!(
            fingerprint.to_canonical_json().unwrap(),
            r#"{"hash":"a","public_key":"b","shoggoth_id":"c","timestamp":"1"}"#
        );
    }

    #[test]
    fn canonical_json_round_trips() {
        let fingerprint = fingerprint_at(1_700_000_000_000);
        let text = fingerprint.to_canonical_json().unwrap();
        let parsed = Fingerprint::from_json(&text).unwrap();

        assert_eq!(parsed, fingerprint);
        assert_eq!(parsed.to_canonical_json().unwrap(), text);
    }

    #[test]
    fn timestamps_inside_the_window_pass() {
        let now = 1_700_000_000_000u64;

        assert!(fingerprint_at(now).check_timestamp_window(now).unwrap().is_ok());
        assert!(fingerprint_at(now - TIMESTAMP_WINDOW_MS).check_timestamp_window(now).unwrap().is_ok());
        assert!(fingerprint_at(now + TIMESTAMP_WINDOW_MS).check_timestamp_window(now).unwrap().is_ok());
    }

    #[test]
    fn future_timestamps_are_flagged() {
        let now = 1_700_000_000_000u64;
        let ten_minutes = 600_000;

        let skew = fingerprint_at(now + ten_minutes)
            .check_timestamp_window(now)
            .unwrap()
            .unwrap_err();

        assert_eq!(skew, TimestampSkew::Future);
        assert!(skew.message().contains("time traveler"));
    }

    #[test]
    fn past_timestamps_are_flagged() {
        let now = 1_700_000_000_000u64;

        let skew = fingerprint_at(now - TIMESTAMP_WINDOW_MS - 1)
            .check_timestamp_window(now)
            .unwrap()
            .unwrap_err();

        assert_eq!(skew, TimestampSkew::Past);
    }

    #[test]
    fn non_numeric_timestamp_is_rejected() {
        let mut fingerprint = fingerprint_at(0);
        fingerprint.timestamp = "yesterday".to_string();

        assert!(fingerprint.timestamp_ms().is_err());
    }
}
