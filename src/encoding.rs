//! Ledger-native value encoding.
//!
//! Every value the ledger understands is a field element below the Stark
//! prime. Integers wider than 128 bits (token ids, content hashes, public
//! keys) travel as a `low`/`high` pair of 128-bit limbs.

use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{Num, One, ToPrimitive, Zero};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

lazy_static! {
    /// 2^251 + 17 * 2^192 + 1
    pub static ref FIELD_PRIME: BigUint =
        (BigUint::one() << 251usize) + (BigUint::from(17u32) << 192usize) + BigUint::one();
}

/// Short strings are packed big-endian into a single element.
pub const MAX_SHORT_STRING_LEN: usize = 31;

/// Plain ASCII digits only: `from_str_radix` alone would let signs and
/// `_` separators through.
fn is_digits(text: &str, radix: u32) -> bool {
    !text.is_empty() && text.chars().all(|c| c.is_ascii() && c.is_digit(radix))
}

#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Felt(BigUint);

impl Felt {
    pub fn zero() -> Self {
        Felt(BigUint::zero())
    }

    pub fn from_biguint(value: BigUint) -> Result<Self> {
        if value >= *FIELD_PRIME {
            return Err(Error::InvalidFelt(format!("0x{:x} is not below the field prime", value)));
        }
        Ok(Felt(value))
    }

    /// Interprets big-endian bytes and reduces modulo the field prime.
    pub fn from_bytes_be_reduced(bytes: &[u8]) -> Self {
        Felt(BigUint::from_bytes_be(bytes) % &*FIELD_PRIME)
    }

    /// Accepts `0x`-prefixed hex or plain decimal.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let parsed = if let Some(hex_digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            if !is_digits(hex_digits, 16) {
                return Err(Error::InvalidFelt(format!("'{}' is not a hex literal", text)));
            }
            BigUint::from_str_radix(hex_digits, 16)
        } else {
            if !is_digits(text, 10) {
                return Err(Error::InvalidFelt(format!("'{}' is not a decimal literal", text)));
            }
            BigUint::from_str_radix(text, 10)
        };
        let value = parsed.map_err(|e| Error::InvalidFelt(format!("'{}': {}", text, e)))?;
        Self::from_biguint(value)
    }

    pub fn from_short_string(text: &str) -> Result<Self> {
        if !text.is_ascii() {
            return Err(Error::InvalidFelt(format!("short string '{}' is not ASCII", text)));
        }
        if text.len() > MAX_SHORT_STRING_LEN {
            return Err(Error::InvalidFelt(format!(
                "short string '{}' exceeds {} characters",
                text, MAX_SHORT_STRING_LEN
            )));
        }
        Ok(Felt(BigUint::from_bytes_be(text.as_bytes())))
    }

    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.0)
    }

    pub fn to_bytes_be(&self) -> [u8; 32] {
        let bytes = self.0.to_bytes_be();
        let mut out = [0u8; 32];
        out[32 - bytes.len()..].copy_from_slice(&bytes);
        out
    }

    pub fn as_biguint(&self) -> &BigUint {
        &self.0
    }

    pub fn to_u128(&self) -> Option<u128> {
        self.0.to_u128()
    }
}

impl From<u64> for Felt {
    fn from(value: u64) -> Self {
        Felt(BigUint::from(value))
    }
}

impl From<u128> for Felt {
    fn from(value: u128) -> Self {
        Felt(BigUint::from(value))
    }
}

impl FromStr for Felt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Felt::parse(s)
    }
}

impl fmt::Display for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl fmt::Debug for Felt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Felt(0x{:x})", self.0)
    }
}

impl Serialize for Felt {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct FeltVisitor;

impl<'de> Visitor<'de> for FeltVisitor {
    type Value = Felt;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a field element as hex string, decimal string or unsigned integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Felt, E> {
        Ok(Felt::from(v))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> std::result::Result<Felt, E> {
        Ok(Felt::from(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Felt, E> {
        Felt::parse(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Felt {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(FeltVisitor)
    }
}

/// A 256-bit integer split into two 128-bit limbs, the way the ledger's
/// contracts take it as calldata.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Uint256 {
    pub low: u128,
    pub high: u128,
}

impl Uint256 {
    pub fn from_u128(value: u128) -> Self {
        Uint256 { low: value, high: 0 }
    }

    pub fn from_be_bytes(bytes: [u8; 32]) -> Self {
        let mut high = [0u8; 16];
        let mut low = [0u8; 16];
        high.copy_from_slice(&bytes[..16]);
        low.copy_from_slice(&bytes[16..]);
        Uint256 {
            low: u128::from_be_bytes(low),
            high: u128::from_be_bytes(high),
        }
    }

    /// Up to 64 hex digits, optional `0x` prefix.
    pub fn from_hex(text: &str) -> Result<Self> {
        let digits = text.strip_prefix("0x").unwrap_or(text);
        if digits.len() > 64 || !is_digits(digits, 16) {
            return Err(Error::InvalidArgument(format!("'{}' is not 1..=64 hex digits", text)));
        }
        let value = BigUint::from_str_radix(digits, 16)
            .map_err(|e| Error::InvalidArgument(format!("'{}': {}", text, e)))?;
        Self::from_biguint(&value, text)
    }

    /// `0x` hex or decimal.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if let Some(digits) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            return Self::from_hex(digits);
        }
        if !is_digits(text, 10) {
            return Err(Error::InvalidArgument(format!("'{}' is not a decimal integer", text)));
        }
        let value = BigUint::from_str_radix(text, 10)
            .map_err(|e| Error::InvalidArgument(format!("'{}': {}", text, e)))?;
        Self::from_biguint(&value, text)
    }

    fn from_biguint(value: &BigUint, text: &str) -> Result<Self> {
        if value.bits() > 256 {
            return Err(Error::InvalidArgument(format!("{} does not fit in 256 bits", text)));
        }
        let bytes = value.to_bytes_be();
        let mut padded = [0u8; 32];
        padded[32 - bytes.len()..].copy_from_slice(&bytes);
        Ok(Self::from_be_bytes(padded))
    }

    pub fn from_felts(low: &Felt, high: &Felt) -> Result<Self> {
        let low = low
            .to_u128()
            .ok_or_else(|| Error::InvalidFelt(format!("low limb {} exceeds 128 bits", low)))?;
        let high = high
            .to_u128()
            .ok_or_else(|| Error::InvalidFelt(format!("high limb {} exceeds 128 bits", high)))?;
        Ok(Uint256 { low, high })
    }

    /// `None` past 2^256 - 1.
    pub fn checked_add(&self, n: u128) -> Option<Uint256> {
        let (low, carry) = self.low.overflowing_add(n);
        let high = if carry { self.high.checked_add(1)? } else { self.high };
        Some(Uint256 { low, high })
    }

    pub fn to_biguint(&self) -> BigUint {
        (BigUint::from(self.high) << 128usize) + BigUint::from(self.low)
    }

    /// `[low, high]`, both always valid elements.
    pub fn to_felts(&self) -> [Felt; 2] {
        [Felt::from(self.low), Felt::from(self.high)]
    }

    pub fn to_hex(&self) -> String {
        format!("0x{:x}", self.to_biguint())
    }
}

impl From<u128> for Uint256 {
    fn from(value: u128) -> Self {
        Uint256::from_u128(value)
    }
}

impl fmt::Display for Uint256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_biguint())
    }
}

impl Serialize for Uint256 {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

struct Uint256Visitor;

impl<'de> Visitor<'de> for Uint256Visitor {
    type Value = Uint256;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a 256-bit unsigned integer as hex string, decimal string or integer")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Uint256, E> {
        Ok(Uint256::from_u128(v as u128))
    }

    fn visit_u128<E: de::Error>(self, v: u128) -> std::result::Result<Uint256, E> {
        Ok(Uint256::from_u128(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Uint256, E> {
        Uint256::parse(v).map_err(E::custom)
    }
}

impl<'de> Deserialize<'de> for Uint256 {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(Uint256Visitor)
    }
}
