//! Content identifier codec.
//!
//! Turns an IPFS-style content identifier into the 256-bit value the ERC721
//! contract stores as token URI: normalise to CID version 1, render as
//! base-16, keep the last 64 hex digits and split them into limbs.

use data_encoding::BASE32_NOPAD;
use integer_encoding::VarInt;

use crate::encoding::Uint256;
use crate::error::{Error, Result};

pub const DAG_PB: u64 = 0x70;
pub const SHA2_256: u64 = 0x12;

/// Hex digits kept from the end of the normalised identifier (256 bits).
pub const CONTENT_HASH_HEX_DIGITS: usize = 64;

const CID_V0_LEN: usize = 46;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContentId {
    version: u64,
    codec: u64,
    multihash: Vec<u8>,
}

impl ContentId {
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(invalid("empty identifier"));
        }

        if text.len() == CID_V0_LEN && text.starts_with("Qm") {
            let bytes = bs58::decode(text)
                .into_vec()
                .map_err(|e| invalid(format!("'{}' is not base58btc: {}", text, e)))?;
            validate_multihash(&bytes)?;
            return Ok(ContentId { version: 0, codec: DAG_PB, multihash: bytes });
        }

        let mut chars = text.chars();
        let prefix = chars.next().ok_or_else(|| invalid("empty identifier"))?;
        let body = chars.as_str();
        let bytes = match prefix {
            'f' | 'F' => hex::decode(body.to_ascii_lowercase())
                .map_err(|e| invalid(format!("'{}' is not base16: {}", text, e)))?,
            'z' => bs58::decode(body)
                .into_vec()
                .map_err(|e| invalid(format!("'{}' is not base58btc: {}", text, e)))?,
            'b' | 'B' => BASE32_NOPAD
                .decode(body.to_ascii_uppercase().as_bytes())
                .map_err(|e| invalid(format!("'{}' is not base32: {}", text, e)))?,
            other => return Err(invalid(format!("unsupported multibase prefix '{}'", other))),
        };

        let mut cursor = bytes.as_slice();
        let version = read_varint(&mut cursor)?;
        if version != 1 {
            return Err(invalid(format!("unsupported CID version {}", version)));
        }
        let codec = read_varint(&mut cursor)?;
        validate_multihash(cursor)?;
        Ok(ContentId { version, codec, multihash: cursor.to_vec() })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn codec(&self) -> u64 {
        self.codec
    }

    pub fn multihash(&self) -> &[u8] {
        &self.multihash
    }

    /// Version 0 identifiers are implicitly dag-pb.
    pub fn to_v1(&self) -> ContentId {
        ContentId { version: 1, codec: self.codec, multihash: self.multihash.clone() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        if self.version == 0 {
            return self.multihash.clone();
        }
        let mut out = self.version.encode_var_vec();
        out.extend(self.codec.encode_var_vec());
        out.extend_from_slice(&self.multihash);
        out
    }

    /// Multibase base-16 text (`f` prefix) of the version 1 form.
    pub fn to_base16(&self) -> String {
        format!("f{}", hex::encode(self.to_v1().to_bytes()))
    }
}

/// Encodes a content identifier as the ledger's low/high limb pair.
pub fn encode_content_id(cid: &str) -> Result<Uint256> {
    let parsed = ContentId::parse(cid)?;
    let digits = hex::encode(parsed.to_v1().to_bytes());
    if digits.len() < CONTENT_HASH_HEX_DIGITS {
        return Err(invalid(format!(
            "normalised identifier has {} hex digits, need at least {}",
            digits.len(),
            CONTENT_HASH_HEX_DIGITS
        )));
    }
    Uint256::from_hex(&digits[digits.len() - CONTENT_HASH_HEX_DIGITS..])
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidContentIdentifier(message.into())
}

fn validate_multihash(bytes: &[u8]) -> Result<()> {
    let mut cursor = bytes;
    let _code = read_varint(&mut cursor)?;
    let length = read_varint(&mut cursor)? as usize;
    if cursor.len() != length {
        return Err(invalid(format!(
            "multihash declares {} digest bytes but carries {}",
            length,
            cursor.len()
        )));
    }
    Ok(())
}

fn read_varint(cursor: &mut &[u8]) -> Result<u64> {
    let (value, read) = u64::decode_var(*cursor).ok_or_else(|| invalid("truncated or oversized varint"))?;
    *cursor = &cursor[read..];
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sha256_multihash(digest: &[u8; 32]) -> Vec<u8> {
        let mut bytes = vec![SHA2_256 as u8, 32];
        bytes.extend_from_slice(digest);
        bytes
    }

    fn encode_base32(bytes: &[u8]) -> String {
        BASE32_NOPAD.encode(bytes).to_ascii_lowercase()
    }

    #[test]
    fn test_v0_normalises_to_dag_pb_v1() {
        let digest = [0xABu8; 32];
        let v0 = bs58::encode(sha256_multihash(&digest)).into_string();
        assert!(v0.starts_with("Qm"));

        let cid = ContentId::parse(&v0).unwrap();
        assert_eq!(cid.version(), 0);
        assert_eq!(cid.to_base16(), format!("f01701220{}", hex::encode(digest)));
    }

    #[test]
    fn test_encoding_takes_the_digest_window() {
        let mut digest = [0u8; 32];
        digest[0] = 0x12;
        digest[15] = 0x34;
        digest[16] = 0x56;
        digest[31] = 0x78;
        let v0 = bs58::encode(sha256_multihash(&digest)).into_string();

        let value = encode_content_id(&v0).unwrap();
        assert_eq!(value, Uint256::from_be_bytes(digest));
        assert_eq!(value.high >> 120, 0x12);
        assert_eq!(value.low & 0xff, 0x78);
    }

    #[test]
    fn test_all_multibase_forms_agree() {
        let digest = [7u8; 32];
        let multihash = sha256_multihash(&digest);
        let v0 = bs58::encode(&multihash).into_string();

        let mut v1_bytes = vec![0x01, DAG_PB as u8];
        v1_bytes.extend_from_slice(&multihash);
        let base16 = format!("f{}", hex::encode(&v1_bytes));
        let base16_upper = format!("F{}", hex::encode_upper(&v1_bytes));
        let base32 = format!("b{}", encode_base32(&v1_bytes));
        let base58 = format!("z{}", bs58::encode(&v1_bytes).into_string());

        let expected = encode_content_id(&v0).unwrap();
        for form in [base16, base16_upper, base32, base58] {
            assert_eq!(encode_content_id(&form).unwrap(), expected, "form {}", form);
        }
    }

    #[test]
    fn test_short_identifier_is_an_error_not_a_pad() {
        // identity multihash with a 4-byte digest: 16 hex digits once normalised
        let cid = "f01550004deadbeef";
        assert!(ContentId::parse(cid).is_ok());
        match encode_content_id(cid) {
            Err(Error::InvalidContentIdentifier(msg)) => assert!(msg.contains("16 hex digits")),
            other => panic!("expected InvalidContentIdentifier, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_garbage() {
        for bad in ["", "hello", "Qm0000000000000000000000000000000000000000000O", "f02", "f0170122001", "x0170", "bafy0189", "f01ff"] {
            assert!(
                matches!(encode_content_id(bad), Err(Error::InvalidContentIdentifier(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    proptest! {
        #[test]
        fn prop_limbs_reconstruct_the_last_64_hex_digits(digest in proptest::array::uniform32(any::<u8>())) {
            let v0 = bs58::encode(sha256_multihash(&digest)).into_string();
            let first = encode_content_id(&v0).unwrap();
            let second = encode_content_id(&v0).unwrap();
            prop_assert_eq!(first, second);

            let normalised = ContentId::parse(&v0).unwrap().to_base16();
            let window = &normalised[normalised.len() - CONTENT_HASH_HEX_DIGITS..];
            let expected = num_bigint::BigUint::parse_bytes(window.as_bytes(), 16).unwrap();
            prop_assert_eq!(first.to_biguint(), expected);
        }
    }
}
