//! Records returned by the tutoring contract.

use serde::{Deserialize, Serialize};
use std::fmt;

pub use alloy_primitives::TxHash;

use crate::wallet::types::Wei;

/// Identifier of a booked session in the contract's session table.
pub type SessionId = u64;

/// A tutor's entry in the on-chain registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorRecord {
    pub name: String,
    pub rate_per_hour: Wei,
    pub is_listed: bool,
    pub total_sessions: u64,
    /// Sum of all ratings received.
    pub total_rating: u64,
    pub is_verified: bool,
}

impl TutorRecord {
    /// Mean rating across completed sessions, `None` before the first one.
    pub fn average_rating(&self) -> Option<f64> {
        if self.total_sessions == 0 {
            None
        } else {
            Some(self.total_rating as f64 / self.total_sessions as f64)
        }
    }
}

/// A booked session. `rating` stays 0 until the student completes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub rating: u8,
    /// Booked length in seconds.
    pub duration: u64,
    /// Unix timestamp of the booking.
    pub timestamp: u64,
}

impl SessionRecord {
    pub fn is_rated(&self) -> bool {
        self.rating > 0
    }

    /// Booked length in (possibly fractional) hours.
    pub fn hours(&self) -> f64 {
        self.duration as f64 / 3600.0
    }
}

/// Outcome of a mined transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
    pub transaction_hash: TxHash,
    pub block_number: u64,
    pub gas_used: u64,
    pub success: bool,
}

/// A session rating, always within 1..=5.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Rating(u8);

impl Rating {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(value: u8) -> Option<Rating> {
        (Self::MIN..=Self::MAX).contains(&value).then_some(Rating(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl TryFrom<u8> for Rating {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Rating::new(value).ok_or_else(|| format!("rating must be between 1 and 5, got {}", value))
    }
}

impl From<Rating> for u8 {
    fn from(rating: Rating) -> u8 {
        rating.0
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
