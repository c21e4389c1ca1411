//! Multicall transaction building.
//!
//! A [`CallBatch`] plus one nonce snapshot becomes exactly one
//! [`UnsignedTransaction`]; signing it yields an immutable [`Transaction`].
//! Nothing here performs I/O or knows what the calls mean.

use std::sync::Arc;

use num_bigint::BigUint;
use num_traits::One;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::crypto::{from_field_element, to_field_element, Signer};
use crate::encoding::Felt;
use crate::error::Result;

pub const EXECUTE_ENTRYPOINT: &str = "__execute__";
pub const INVOKE_PREFIX: &str = "invoke";

/// Single logical contract call.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Call {
    #[serde(rename = "contractAddress")]
    pub to: Felt,
    pub entrypoint: String,
    #[serde(default)]
    pub calldata: Vec<Felt>,
}

impl Call {
    pub fn new(to: Felt, entrypoint: impl Into<String>, calldata: Vec<Felt>) -> Self {
        Call { to, entrypoint: entrypoint.into(), calldata }
    }

    pub fn selector(&self) -> Felt {
        selector_from_name(&self.entrypoint)
    }
}

/// Ordered calls executed atomically by one account transaction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallBatch(Vec<Call>);

impl CallBatch {
    pub fn new() -> Self {
        CallBatch(Vec::new())
    }

    pub fn push(&mut self, call: Call) {
        self.0.push(call);
    }

    pub fn extend(&mut self, other: CallBatch) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Call> {
        self.0.iter()
    }

    pub fn calls(&self) -> &[Call] {
        &self.0
    }
}

impl From<Vec<Call>> for CallBatch {
    fn from(calls: Vec<Call>) -> Self {
        CallBatch(calls)
    }
}

/// Keccak-256 of the name, truncated to 250 bits.
pub fn selector_from_name(name: &str) -> Felt {
    let digest = Keccak256::digest(name.as_bytes());
    let mask = (BigUint::one() << 250usize) - BigUint::one();
    let value = BigUint::from_bytes_be(&digest) & mask;
    Felt::from_bytes_be_reduced(&value.to_bytes_be())
}

/// `[n, (to, selector, len, data...) * n]`
pub fn multicall_calldata(calls: &CallBatch) -> Vec<Felt> {
    let mut out = Vec::with_capacity(1 + calls.iter().map(|c| 3 + c.calldata.len()).sum::<usize>());
    out.push(Felt::from(calls.len() as u64));
    for call in calls.iter() {
        out.push(call.to.clone());
        out.push(call.selector());
        out.push(Felt::from(call.calldata.len() as u64));
        out.extend(call.calldata.iter().cloned());
    }
    out
}

pub fn execute_calldata_with_nonce(calls: &CallBatch, nonce: &Felt) -> Vec<Felt> {
    let mut out = multicall_calldata(calls);
    out.push(nonce.clone());
    out
}

/// Pairwise hash primitive of the ledger's hashing scheme.
pub trait FeltHasher: Send + Sync {
    fn hash_pair(&self, a: &Felt, b: &Felt) -> Felt;
}

/// The ledger's Pedersen hash over the STARK curve.
#[derive(Clone, Copy, Debug, Default)]
pub struct PedersenHasher;

impl FeltHasher for PedersenHasher {
    fn hash_pair(&self, a: &Felt, b: &Felt) -> Felt {
        let hash = starknet_crypto::pedersen_hash(&to_field_element(a), &to_field_element(b));
        from_field_element(&hash)
    }
}

/// `h(h(h(h(0, e0), e1), ...), n)`
pub fn hash_on_elements(hasher: &dyn FeltHasher, elements: &[Felt]) -> Felt {
    let folded = elements
        .iter()
        .fold(Felt::zero(), |acc, element| hasher.hash_pair(&acc, element));
    hasher.hash_pair(&folded, &Felt::from(elements.len() as u64))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnsignedTransaction {
    sender: Felt,
    calldata: Vec<Felt>,
    nonce: Felt,
    max_fee: Felt,
    version: Felt,
    hash: Felt,
}

impl UnsignedTransaction {
    pub fn sender(&self) -> &Felt {
        &self.sender
    }

    pub fn calldata(&self) -> &[Felt] {
        &self.calldata
    }

    pub fn nonce(&self) -> &Felt {
        &self.nonce
    }

    pub fn hash(&self) -> &Felt {
        &self.hash
    }
}

/// Signed invoke transaction, ready for submission.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Transaction {
    sender_address: Felt,
    entry_point_selector: Felt,
    calldata: Vec<Felt>,
    signature: Vec<Felt>,
    max_fee: Felt,
    version: Felt,
    nonce: Felt,
    #[serde(skip)]
    hash: Felt,
}

impl Transaction {
    pub fn sender_address(&self) -> &Felt {
        &self.sender_address
    }

    pub fn entry_point_selector(&self) -> &Felt {
        &self.entry_point_selector
    }

    pub fn calldata(&self) -> &[Felt] {
        &self.calldata
    }

    pub fn signature(&self) -> &[Felt] {
        &self.signature
    }

    pub fn max_fee(&self) -> &Felt {
        &self.max_fee
    }

    pub fn version(&self) -> &Felt {
        &self.version
    }

    pub fn nonce(&self) -> &Felt {
        &self.nonce
    }

    pub fn hash(&self) -> &Felt {
        &self.hash
    }
}

/// Chain-level parameters shared by every transaction the worker builds.
#[derive(Clone)]
pub struct TransactionBuilder {
    chain_id: Felt,
    version: Felt,
    max_fee: Felt,
    hasher: Arc<dyn FeltHasher>,
}

impl TransactionBuilder {
    pub fn new(chain_id: Felt, version: Felt, max_fee: Felt, hasher: Arc<dyn FeltHasher>) -> Self {
        TransactionBuilder { chain_id, version, max_fee, hasher }
    }

    pub fn chain_id(&self) -> &Felt {
        &self.chain_id
    }

    /// Builds against exactly the nonce given; never increments it.
    pub fn build(&self, sender: &Felt, calls: &CallBatch, nonce: &Felt) -> UnsignedTransaction {
        let calldata = execute_calldata_with_nonce(calls, nonce);
        let hash = self.transaction_hash(sender, &calldata);
        UnsignedTransaction {
            sender: sender.clone(),
            calldata,
            nonce: nonce.clone(),
            max_fee: self.max_fee.clone(),
            version: self.version.clone(),
            hash,
        }
    }

    fn transaction_hash(&self, sender: &Felt, calldata: &[Felt]) -> Felt {
        let prefix = Felt::from_short_string(INVOKE_PREFIX).unwrap_or_default();
        let elements = [
            prefix,
            self.version.clone(),
            sender.clone(),
            selector_from_name(EXECUTE_ENTRYPOINT),
            hash_on_elements(self.hasher.as_ref(), calldata),
            self.max_fee.clone(),
            self.chain_id.clone(),
        ];
        hash_on_elements(self.hasher.as_ref(), &elements)
    }
}

/// Attach the signer's signature over the transaction hash.
pub fn sign(unsigned: UnsignedTransaction, signer: &dyn Signer) -> Result<Transaction> {
    let signature = signer.sign(&unsigned.hash)?;
    Ok(Transaction {
        sender_address: unsigned.sender,
        entry_point_selector: selector_from_name(EXECUTE_ENTRYPOINT),
        calldata: unsigned.calldata,
        signature: signature.0,
        max_fee: unsigned.max_fee,
        version: unsigned.version,
        nonce: unsigned.nonce,
        hash: unsigned.hash,
    })
}
