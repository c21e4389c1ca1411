use bip39::{Language, Mnemonic};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use lazy_static::lazy_static;
use num_bigint::BigUint;
use num_traits::{Num, Zero};
use rand::rngs::OsRng;
use rand::RngCore;
use sha3::{Digest, Keccak256};
use starknet_crypto::{get_public_key, rfc6979_generate_k, FieldElement};
use tiny_hderive::bip32::ExtendedPrivKey;

use crate::encoding::{Felt, Uint256};
use crate::error::{Error, Result};

lazy_static! {
    /// Order of the STARK curve generator.
    static ref CURVE_ORDER: BigUint = BigUint::from_str_radix(
        "800000000000010ffffffffffffffffb781126dcae7b2321e66a241adc64d2f",
        16
    )
    .unwrap_or_default();
}

/// Signature as it is attached to a transaction: `[r, s]`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature(pub Vec<Felt>);

/// Signing capability of a ledger account.
pub trait Signer: Send + Sync {
    fn sign(&self, message: &Felt) -> Result<Signature>;
    fn public_key(&self) -> Uint256;
}

pub(crate) fn to_field_element(value: &Felt) -> FieldElement {
    // a Felt is always below the field prime
    FieldElement::from_bytes_be(&value.to_bytes_be()).unwrap_or(FieldElement::ZERO)
}

pub(crate) fn from_field_element(value: &FieldElement) -> Felt {
    Felt::from_bytes_be_reduced(&value.to_bytes_be())
}

/// STARK-curve account key.
pub struct KeyPair {
    secret: FieldElement,
}

impl KeyPair {
    /// Fresh key below 2^251, which is inside the curve order.
    pub fn generate() -> Self {
        loop {
            let mut bytes = [0u8; 32];
            OsRng.fill_bytes(&mut bytes);
            bytes[0] &= 0x07;
            if let Ok(secret) = FieldElement::from_bytes_be(&bytes) {
                if secret != FieldElement::ZERO {
                    return KeyPair { secret };
                }
            }
        }
    }

    /// One to 64 hex digits after a single optional `0x`.
    pub fn from_private_key_hex(text: &str) -> Result<Self> {
        let text = text.trim();
        let digits = text.strip_prefix("0x").unwrap_or(text);
        if digits.is_empty() || digits.len() > 64 {
            return Err(Error::Key(format!("private key must be 1..=64 hex digits, got {}", digits.len())));
        }
        let bytes = hex::decode(format!("{:0>64}", digits))
            .map_err(|e| Error::Key(format!("private key is not hex: {}", e)))?;
        let value = BigUint::from_bytes_be(&bytes);
        if value.is_zero() || value >= *CURVE_ORDER {
            return Err(Error::Key("private key outside the curve order".to_string()));
        }
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&bytes);
        let secret = FieldElement::from_bytes_be(&secret)
            .map_err(|e| Error::Key(format!("private key is not a field element: {:?}", e)))?;
        Ok(KeyPair { secret })
    }

    pub fn private_key_hex(&self) -> String {
        format!("0x{}", hex::encode(self.secret.to_bytes_be()))
    }

    pub fn public_key_felt(&self) -> Felt {
        from_field_element(&get_public_key(&self.secret))
    }
}

impl Signer for KeyPair {
    fn sign(&self, message: &Felt) -> Result<Signature> {
        let hash = to_field_element(message);
        let k = rfc6979_generate_k(&hash, &self.secret, None);
        let signature = starknet_crypto::sign(&self.secret, &hash, &k)
            .map_err(|e| Error::Key(format!("signing {} failed: {:?}", message, e)))?;
        Ok(Signature(vec![from_field_element(&signature.r), from_field_element(&signature.s)]))
    }

    fn public_key(&self) -> Uint256 {
        Uint256::from_be_bytes(get_public_key(&self.secret).to_bytes_be())
    }
}

/// Verify a transaction signature produced by [`KeyPair`].
pub fn verify_signature(public_key: &Uint256, message: &Felt, signature: &Signature) -> bool {
    let (r, s) = match signature.0.as_slice() {
        [r, s] => (to_field_element(r), to_field_element(s)),
        _ => return false,
    };
    let public_key = match Felt::from_biguint(public_key.to_biguint()) {
        Ok(key) => to_field_element(&key),
        Err(_) => return false,
    };
    starknet_crypto::verify(&public_key, &to_field_element(message), &r, &s).unwrap_or(false)
}

/// Wallet on the external (L1) chain that owns a project's ERC721 contract.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExternalWallet {
    pub mnemonic: String,
    /// EIP-55 checksummed `0x` address.
    pub address: String,
}

impl ExternalWallet {
    pub const DERIVATION_PATH: &'static str = "m/44'/60'/0'/0/0";

    /// Fresh 12-word mnemonic.
    pub fn generate() -> Result<Self> {
        let mut entropy = [0u8; 16];
        OsRng.fill_bytes(&mut entropy);
        let mnemonic = Mnemonic::from_entropy(&entropy)
            .map_err(|e| Error::Key(format!("mnemonic generation failed: {}", e)))?;
        Self::from_mnemonic(&mnemonic.to_string())
    }

    pub fn from_mnemonic(phrase: &str) -> Result<Self> {
        let mnemonic = Mnemonic::parse_in_normalized(Language::English, phrase)
            .map_err(|e| Error::Key(format!("invalid mnemonic: {}", e)))?;
        let seed = mnemonic.to_seed("");
        let derived = ExtendedPrivKey::derive(&seed, Self::DERIVATION_PATH)
            .map_err(|e| Error::Key(format!("key derivation failed: {:?}", e)))?;
        let secret = k256::SecretKey::from_slice(&derived.secret())
            .map_err(|e| Error::Key(format!("derived key out of range: {}", e)))?;
        let point = secret.public_key().to_encoded_point(false);
        // drop the 0x04 SEC1 tag
        let digest = Keccak256::digest(&point.as_bytes()[1..]);
        Ok(ExternalWallet {
            mnemonic: mnemonic.to_string(),
            address: checksum_address(&digest[12..]),
        })
    }

    pub fn address_felt(&self) -> Result<Felt> {
        Felt::parse(&self.address)
    }
}

/// EIP-55 mixed-case hex.
fn checksum_address(address: &[u8]) -> String {
    let lower = hex::encode(address);
    let hash = hex::encode(Keccak256::digest(lower.as_bytes()));
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (ch, nibble) in lower.chars().zip(hash.chars()) {
        if ch.is_ascii_alphabetic() && nibble.to_digit(16).unwrap_or(0) >= 8 {
            out.push(ch.to_ascii_uppercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Source of external wallets for new projects.
pub trait WalletSource: Send + Sync {
    fn create(&self) -> Result<ExternalWallet>;
}

pub struct RandomWallets;

impl WalletSource for RandomWallets {
    fn create(&self) -> Result<ExternalWallet> {
        ExternalWallet::generate()
    }
}
