//! Ledger accounts and the operations they sign.
//!
//! Every state-changing operation reads the account nonce, batches its calls
//! into one multicall transaction, signs, submits and waits for finality.

pub mod operations;
pub mod types;

pub use operations::{burn_call, mint_calls, set_token_uri_calls, transfer_call, withdraw_call, AccountOperations};
pub use types::{Account, ContractArtifacts, CreatedAccount, OperationSettings, PendingTx, TokenUri};
