//! Identifiers and amounts shared by the wallet session and the contract gateway.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::utils::{format_ether, parse_ether};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use alloy_primitives::{Address, U256};

const ETHER_DECIMALS: usize = 18;

/// Error returned when a chain identifier cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid chain id: {0}")]
pub struct ParseChainIdError(pub String);

/// Identifier of the network the wallet is pointed at.
///
/// Providers report it either as a decimal number or as a `0x` hex quantity
/// (`chainChanged` uses hex). Both parse to the same value; display is decimal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChainId(pub u64);

impl ChainId {
    pub const ETHEREUM: ChainId = ChainId(1);
    pub const GOERLI: ChainId = ChainId(5);
    pub const POLYGON: ChainId = ChainId(137);

    /// Hex quantity form used on the wire (`0x89`).
    pub fn to_hex(self) -> String {
        format!("0x{:x}", self.0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ChainId {
    type Err = ParseChainIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(ChainId)
            .map_err(|_| ParseChainIdError(s.to_string()))
    }
}

impl From<u64> for ChainId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Errors from parsing or combining native-currency amounts.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("Amount is empty")]
    Empty,

    #[error("Invalid amount: {0}")]
    Invalid(String),

    #[error("Amount has more than 18 decimal places: {0}")]
    TooPrecise(String),

    #[error("Amount is too large")]
    Overflow,
}

/// An amount in wei, the smallest unit of the native currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Wei(pub U256);

impl Wei {
    pub const ZERO: Wei = Wei(U256::ZERO);

    pub fn from_wei(value: u128) -> Self {
        Self(U256::from(value))
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse a decimal ether string such as `"0.05"` or `"2"`.
    ///
    /// Unlike `parseEther`, excess precision is an error rather than truncated.
    pub fn parse_ether(value: &str) -> Result<Wei, AmountError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AmountError::Empty);
        }

        let (whole, fraction) = value.split_once('.').unwrap_or((value, ""));
        let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
            return Err(AmountError::Invalid(value.to_string()));
        }
        if fraction.len() > ETHER_DECIMALS {
            return Err(AmountError::TooPrecise(value.to_string()));
        }

        let whole = if whole.is_empty() { "0" } else { whole };
        let fraction = if fraction.is_empty() { "0" } else { fraction };
        parse_ether(&format!("{}.{}", whole, fraction))
            .map(Wei)
            .map_err(|_| AmountError::Overflow)
    }

    /// Decimal ether representation, always with a fractional part (`"1.0"`, `"0.05"`).
    pub fn format_ether(&self) -> String {
        let full = format_ether(self.0);
        match full.split_once('.') {
            Some((whole, fraction)) => {
                let fraction = fraction.trim_end_matches('0');
                let fraction = if fraction.is_empty() { "0" } else { fraction };
                format!("{}.{}", whole, fraction)
            }
            None => format!("{}.0", full),
        }
    }

    pub fn checked_mul(self, factor: u64) -> Result<Wei, AmountError> {
        self.0
            .checked_mul(U256::from(factor))
            .map(Wei)
            .ok_or(AmountError::Overflow)
    }

    pub fn checked_add(self, other: Wei) -> Result<Wei, AmountError> {
        self.0
            .checked_add(other.0)
            .map(Wei)
            .ok_or(AmountError::Overflow)
    }
}

impl From<U256> for Wei {
    fn from(value: U256) -> Self {
        Self(value)
    }
}

impl fmt::Display for Wei {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ETH", self.format_ether())
    }
}
