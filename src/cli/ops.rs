use tracing::info;

use crate::cid::encode_content_id;
use crate::config::WorkerConfig;
use crate::encoding::{Felt, Uint256};
use crate::error::Result;
use crate::queue::{DispatchSummary, JsonLinesSource};
use crate::worker::{ledger_from_config, operations_from_config, reporter_from_config, Worker};

pub async fn handle_run_command(config: &WorkerConfig, jobs: &str) -> Result<DispatchSummary> {
    let worker = Worker::from_config(config)?;
    if jobs == "-" {
        info!(queue = %worker.queue(), "reading jobs from stdin");
        worker.run(&mut JsonLinesSource::stdin()).await
    } else {
        info!(queue = %worker.queue(), path = jobs, "reading jobs from file");
        worker.run(&mut JsonLinesSource::open(jobs).await?).await
    }
}

pub async fn handle_ping_command(config: &WorkerConfig) -> Result<()> {
    reporter_from_config(config)?.wait_until_live().await?;
    println!("pong from {}", config.status.rpc_url);
    Ok(())
}

pub fn handle_encode_cid_command(cid: &str) -> Result<Uint256> {
    let value = encode_content_id(cid)?;
    let [low, high] = value.to_felts();
    println!("value: {}", value.to_hex());
    println!("low:   {}", low);
    println!("high:  {}", high);
    Ok(value)
}

pub async fn handle_token_uri_command(config: &WorkerConfig, contract: &str, token_id: &str) -> Result<()> {
    let contract = Felt::parse(contract)?;
    let token_id = Uint256::parse(token_id)?;
    let gateway = ledger_from_config(config)?;
    let operations = operations_from_config(config, gateway, config.query_artifacts()?)?;

    let uri = operations.read_token_uri(&contract, token_id).await?;
    println!("token {} uri: 0x{}", token_id, uri.content_hash_hex());
    Ok(())
}
