// Client module
pub mod ledger;
pub mod rpc_client;
pub mod status;

pub use ledger::{DeployRequest, DeployedContract, Finality, JsonRpcLedger, LedgerGateway, TxHandle, TxStatus};
pub use rpc_client::{RpcCallError, RpcClient};
pub use status::{JsonRpcStatusService, StatusService};
