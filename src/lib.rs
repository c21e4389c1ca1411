pub mod account;
pub mod cid;
pub mod cli;
pub mod client;
pub mod config;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod queue;
pub mod reconcile;
pub mod reporter;
pub mod rpc;
pub mod saga;
pub mod transaction;
pub mod worker;

#[cfg(test)]
mod testing;
