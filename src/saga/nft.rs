// NFT sagas: batch mint, transfer, burn and withdraw to L1
use crate::error::Result;
use crate::queue::job::{BurnPayload, Job, MintBatchPayload, TransferPayload, WithdrawPayload};
use crate::reporter::StatusUpdate;
use crate::rpc::types::{NftUpdate, TokenStatus};
use crate::saga::{payload_account, transaction_failed, transaction_succeeded, unconfirmed_handle, SagaContext, SagaRun};
use crate::transaction::CallBatch;
use crate::account::{burn_call, transfer_call, withdraw_call};
use crate::client::ledger::TxHandle;

/// Shared shape of the single-transaction NFT sagas: submit, confirm,
/// record the NFT, then the originating transaction.
async fn single_transaction(
    ctx: &SagaContext,
    run: &mut SagaRun,
    job: &Job,
    account: crate::account::Account,
    calls: CallBatch,
    on_success: impl Fn(String) -> StatusUpdate,
) -> Result<()> {
    let ops = &ctx.operations;

    let success_writes = |handle: &TxHandle| vec![on_success(handle.to_string()), transaction_succeeded(job, Some(handle))];

    run.step("submit");
    let pending = match ops.submit_calls(&account, &calls).await {
        Ok(pending) => pending,
        Err(e) => {
            if let Some(handle) = unconfirmed_handle(&e) {
                run.defer(handle.clone(), success_writes(&handle));
            }
            return Err(e);
        }
    };
    let nft_update = on_success(pending.handle.to_string());
    run.defer(pending.handle.clone(), success_writes(&pending.handle));

    run.step("await_finality");
    let handle = ops.confirm(&pending).await?;

    run.step("record_nft");
    ctx.report(nft_update).await?;

    run.step("complete");
    ctx.report(transaction_succeeded(job, Some(&handle))).await?;
    Ok(())
}

async fn with_compensation(
    ctx: &SagaContext,
    run: &mut SagaRun,
    job: &Job,
    failed: TokenStatus,
    result: Result<()>,
) -> Result<()> {
    if let Err(e) = &result {
        let compensation = vec![
            StatusUpdate::nfts_by_transaction(&job.transaction_id, NftUpdate::status(failed)),
            transaction_failed(job, e),
        ];
        ctx.compensate(run, job, e, compensation).await;
    }
    result
}

pub async fn mint_batch(ctx: &SagaContext, run: &mut SagaRun, job: &Job, payload: &MintBatchPayload) -> Result<()> {
    let result = async {
        let calls = payload.call_batch()?;
        let account = payload_account(&payload.master_address, &payload.master_private_key)?;
        let metadata_id = payload.metadata_id.clone();
        single_transaction(ctx, run, job, account, calls, |tx_hash| {
            StatusUpdate::nfts_by_transaction(
                &job.transaction_id,
                NftUpdate {
                    metadata_id: metadata_id.clone(),
                    mint_tx_hash: Some(tx_hash),
                    status: Some(TokenStatus::Success),
                    ..Default::default()
                },
            )
        })
        .await
    }
    .await;
    with_compensation(ctx, run, job, TokenStatus::Failed, result).await
}

pub async fn transfer(ctx: &SagaContext, run: &mut SagaRun, job: &Job, payload: &TransferPayload) -> Result<()> {
    let result = async {
        let account = payload_account(&payload.from, &payload.owner_private_key)?;
        let calls = CallBatch::from(vec![transfer_call(
            &payload.contract_address,
            &payload.from,
            &payload.to,
            payload.token_id,
        )]);
        single_transaction(ctx, run, job, account, calls, |tx_hash| {
            StatusUpdate::nft(
                &payload.nft_id,
                NftUpdate {
                    owner: Some(payload.to.to_hex()),
                    tx_hash: Some(tx_hash),
                    status: Some(TokenStatus::TransferSuccess),
                    ..Default::default()
                },
            )
        })
        .await
    }
    .await;
    with_compensation(ctx, run, job, TokenStatus::TransferFailed, result).await
}

pub async fn burn(ctx: &SagaContext, run: &mut SagaRun, job: &Job, payload: &BurnPayload) -> Result<()> {
    let result = async {
        let account = payload_account(&payload.owner_address, &payload.owner_private_key)?;
        let calls = CallBatch::from(vec![burn_call(&payload.contract_address, payload.token_id)]);
        single_transaction(ctx, run, job, account, calls, |tx_hash| {
            StatusUpdate::nft(
                &payload.nft_id,
                NftUpdate { tx_hash: Some(tx_hash), status: Some(TokenStatus::BurnSuccess), ..Default::default() },
            )
        })
        .await
    }
    .await;
    with_compensation(ctx, run, job, TokenStatus::BurnFailed, result).await
}

pub async fn withdraw(ctx: &SagaContext, run: &mut SagaRun, job: &Job, payload: &WithdrawPayload) -> Result<()> {
    let result = async {
        let account = payload_account(&payload.owner_address, &payload.owner_private_key)?;
        let bridge = payload
            .bridge_address
            .clone()
            .unwrap_or_else(|| ctx.operations.contracts().bridge_address.clone());
        let calls = CallBatch::from(vec![withdraw_call(
            &payload.contract_address,
            &payload.l1_recipient,
            payload.token_id,
            &bridge,
        )]);
        single_transaction(ctx, run, job, account, calls, |tx_hash| {
            StatusUpdate::nft(
                &payload.nft_id,
                NftUpdate { tx_hash: Some(tx_hash), status: Some(TokenStatus::WithdrawSuccess), ..Default::default() },
            )
        })
        .await
    }
    .await;
    with_compensation(ctx, run, job, TokenStatus::WithdrawFailed, result).await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use crate::account::operations::TRANSFER_FROM_ENTRYPOINT;
    use crate::client::ledger::Finality;
    use crate::encoding::Felt;
    use crate::queue::job::{Job, JobKind};
    use crate::queue::{Dispatcher, DispatcherSettings, JobOutcome};
    use crate::reporter::StatusUpdate;
    use crate::rpc::types::{TokenStatus, TransactionStatus};
    use crate::saga::{SagaHandler, SagaState};
    use crate::testing::{saga_context, test_private_key, RecordingStatusService, StubLedger, BRIDGE};
    use crate::transaction::selector_from_name;

    fn transfer_job() -> Job {
        Job::new(
            "tx-7",
            JobKind::Transfer,
            json!({
                "nftId": "nft-7",
                "from": "0xa",
                "ownerPrivateKey": test_private_key(),
                "to": "0xb",
                "contractAddress": "0xc",
                "tokenId": 7
            }),
        )
    }

    fn mint_job() -> Job {
        Job::new(
            "tx-mint",
            JobKind::MintBatch,
            json!({
                "masterAddress": "0x5e4d",
                "masterPrivateKey": test_private_key(),
                "contractAddress": "0xe7c",
                "ipfsUrl": "ipfs://QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG",
                "batch": { "tokenIdStart": 10, "count": 3, "recipient": "0xb0b" }
            }),
        )
    }

    #[tokio::test]
    async fn test_transfer_end_to_end() {
        let ledger = Arc::new(StubLedger::new());
        let status = Arc::new(RecordingStatusService::new());
        let handler = SagaHandler::new(saga_context(ledger.clone(), status.clone()));

        handler.handle(&transfer_job()).await.unwrap();

        let submitted = ledger.submitted();
        assert_eq!(submitted.len(), 1);
        let data = submitted[0].calldata();
        // [1, to, selector, 4, from, to, low, high, nonce]
        assert_eq!(data[0], Felt::from(1u64));
        assert_eq!(data[1], Felt::from(0xcu64));
        assert_eq!(data[2], selector_from_name(TRANSFER_FROM_ENTRYPOINT));
        assert_eq!(
            &data[4..8],
            &[Felt::from(0xau64), Felt::from(0xbu64), Felt::from(7u64), Felt::zero()]
        );

        let updates = status.updates();
        assert_eq!(updates.len(), 2);
        match &updates[0] {
            StatusUpdate::Nft { id, update } => {
                assert_eq!(id, "nft-7");
                assert_eq!(update.owner.as_deref(), Some("0xb"));
                assert_eq!(update.status, Some(TokenStatus::TransferSuccess));
            }
            other => panic!("unexpected update {:?}", other),
        }
        assert_eq!(status.transaction_statuses("tx-7"), vec![TransactionStatus::Success]);
    }

    #[tokio::test]
    async fn test_mint_with_stale_nonce_reports_success_once() {
        let ledger = Arc::new(StubLedger::new());
        ledger.stale_nonces(1);
        let status = Arc::new(RecordingStatusService::new());
        let handler = SagaHandler::new(saga_context(ledger.clone(), status.clone()));

        let run = handler.run(&mint_job()).await;
        assert_eq!(run.state(), &SagaState::Succeeded);

        assert_eq!(ledger.submitted().len(), 1);
        assert_eq!(status.transaction_statuses("tx-mint"), vec![TransactionStatus::Success]);
        let nfts = status.nfts_by_transaction("tx-mint").unwrap();
        assert_eq!(nfts.status, Some(TokenStatus::Success));
        assert_eq!(nfts.mint_tx_hash, Some(ledger.submitted()[0].hash().to_hex()));
        assert!(nfts.metadata_id.unwrap().starts_with("ipfs://"));
    }

    #[tokio::test]
    async fn test_rejected_burn_marks_failed_variants() {
        let ledger = Arc::new(StubLedger::new());
        ledger.set_finality(Finality::Rejected { reason: "ERC721: caller is not owner".into() });
        let status = Arc::new(RecordingStatusService::new());
        let handler = SagaHandler::new(saga_context(ledger.clone(), status.clone()));

        let job = Job::new(
            "tx-burn",
            JobKind::Burn,
            json!({
                "nftId": "nft-1",
                "ownerAddress": "0xa",
                "ownerPrivateKey": test_private_key(),
                "contractAddress": "0xc",
                "tokenId": "0x1"
            }),
        );
        let err = handler.handle(&job).await.unwrap_err();
        assert_eq!(err.code(), "LEDGER_REJECTED");

        let nfts = status.nfts_by_transaction("tx-burn").unwrap();
        assert_eq!(nfts.status, Some(TokenStatus::BurnFailed));
        assert_eq!(status.transaction_statuses("tx-burn"), vec![TransactionStatus::Failed]);
        assert!(status.nft("nft-1").is_none());
    }

    #[tokio::test]
    async fn test_withdraw_defaults_bridge() {
        let ledger = Arc::new(StubLedger::new());
        let status = Arc::new(RecordingStatusService::new());
        let handler = SagaHandler::new(saga_context(ledger.clone(), status.clone()));

        let job = Job::new(
            "tx-wd",
            JobKind::Withdraw,
            json!({
                "nftId": "nft-2",
                "ownerAddress": "0xa",
                "ownerPrivateKey": test_private_key(),
                "contractAddress": "0xc",
                "tokenId": 2,
                "l1Recipient": "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266"
            }),
        );
        handler.handle(&job).await.unwrap();

        let data = ledger.submitted()[0].calldata().to_vec();
        assert_eq!(data[7], Felt::parse(BRIDGE).unwrap());
        assert_eq!(status.nft("nft-2").unwrap().status, Some(TokenStatus::WithdrawSuccess));
    }

    #[tokio::test]
    async fn test_invalid_payload_fails_transaction_only() {
        let ledger = Arc::new(StubLedger::new());
        let status = Arc::new(RecordingStatusService::new());
        let handler = SagaHandler::new(saga_context(ledger.clone(), status.clone()));

        let job = Job::new("tx-bad", JobKind::Transfer, json!({ "nftId": "nft-3" }));
        let run = handler.run(&job).await;
        assert!(matches!(run.state(), SagaState::Failed { step: None, .. }));
        assert_eq!(status.transaction_statuses("tx-bad"), vec![TransactionStatus::Failed]);
        assert!(ledger.submitted().is_empty());
        assert_eq!(ledger.nonce_reads(), 0);
    }

    #[tokio::test]
    async fn test_transfer_timeout_defers_success() {
        let ledger = Arc::new(StubLedger::new());
        ledger.set_finality(Finality::TimedOut);
        let status = Arc::new(RecordingStatusService::new());
        let ctx = saga_context(ledger.clone(), status.clone());
        let reconciler = ctx.reconciler.clone().unwrap();
        let handler = SagaHandler::new(ctx);

        let err = handler.handle(&transfer_job()).await.unwrap_err();
        assert_eq!(err.code(), "FINALITY_TIMEOUT");
        assert_eq!(
            status.nfts_by_transaction("tx-7").unwrap().status,
            Some(TokenStatus::TransferFailed)
        );
        let tracked = reconciler.tracked().await;
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].handle().hash, ledger.submitted()[0].hash().clone());
    }

    #[tokio::test]
    async fn test_lost_submission_runs_once_and_reconciles() {
        let ledger = Arc::new(StubLedger::new());
        ledger.lose_responses(1);
        let status = Arc::new(RecordingStatusService::new());
        let ctx = saga_context(ledger.clone(), status.clone());
        let reconciler = ctx.reconciler.clone().unwrap();
        let dispatcher = Dispatcher::new(Arc::new(SagaHandler::new(ctx)), DispatcherSettings::default());

        match dispatcher.process(&transfer_job()).await {
            JobOutcome::Failed { error, attempts } => {
                assert_eq!(error.code(), "SUBMISSION_UNKNOWN");
                assert_eq!(attempts, 1);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(ledger.submitted().len(), 1);
        assert_eq!(status.transaction_statuses("tx-7"), vec![TransactionStatus::Failed]);

        let tracked = reconciler.tracked().await;
        assert_eq!(tracked.len(), 1);
        assert_eq!(tracked[0].handle().hash, ledger.submitted()[0].hash().clone());

        // the transaction did land, so the sweep replays the success writes
        assert_eq!(reconciler.sweep().await.replayed, 1);
        assert_eq!(
            status.transaction_statuses("tx-7"),
            vec![TransactionStatus::Failed, TransactionStatus::Success]
        );
        assert_eq!(status.transaction("tx-7").unwrap().error_message(), None);
        assert_eq!(status.nft("nft-7").unwrap().status, Some(TokenStatus::TransferSuccess));
        assert_eq!(ledger.submitted().len(), 1);
    }
}
