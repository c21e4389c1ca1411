// CREATE_STARKNET_PROJECT: master account, external wallet, ERC721 contract
use tracing::info;

use crate::error::{Error, Result};
use crate::queue::job::{CreateProjectPayload, Job};
use crate::reporter::StatusUpdate;
use crate::rpc::types::{ProjectStatus, ProjectUpdate};
use crate::saga::{transaction_failed, transaction_succeeded, SagaContext, SagaRun};

pub async fn create_project(
    ctx: &SagaContext,
    run: &mut SagaRun,
    job: &Job,
    payload: &CreateProjectPayload,
) -> Result<()> {
    let result = run_steps(ctx, run, job, payload).await;
    if let Err(e) = &result {
        let compensation = vec![
            StatusUpdate::project(&payload.project_id, ProjectUpdate::status(ProjectStatus::Failed)),
            transaction_failed(job, e),
        ];
        ctx.compensate(run, job, e, compensation).await;
    }
    result
}

async fn run_steps(ctx: &SagaContext, run: &mut SagaRun, job: &Job, payload: &CreateProjectPayload) -> Result<()> {
    let ops = &ctx.operations;
    let project_id = payload.project_id.as_str();

    run.step("create_account");
    // a wallet failure must not leave a funded account behind
    let wallet = ctx.wallets.create()?;
    let (pending, created) = ops.submit_create_account().await?;
    let credentials = ProjectUpdate {
        master_address: Some(created.account.address().to_hex()),
        master_private_key: Some(created.private_key.clone()),
        l1_mnemonic: Some(wallet.mnemonic.clone()),
        ..Default::default()
    };
    // keys must survive even if finality is only seen later
    run.defer(pending.handle.clone(), vec![StatusUpdate::project(project_id, credentials.clone())]);
    ops.confirm(&pending).await?;

    run.step("record_account");
    ctx.report(StatusUpdate::project(
        project_id,
        ProjectUpdate { status: Some(ProjectStatus::CreatingErc721Contract), ..credentials },
    ))
    .await?;

    run.step("deploy_erc721");
    let owner = wallet.address_felt()?;
    let constructor = ops.erc721_constructor(&owner)?;
    let pending = ops
        .submit_deploy(ops.contracts().erc721_class.clone(), constructor, None)
        .await?;
    let contract = pending
        .address
        .clone()
        .ok_or_else(|| Error::LedgerTransport("deployment returned no address".to_string()))?;
    let recorded = ProjectUpdate {
        contract721_address: Some(contract.to_hex()),
        status: Some(ProjectStatus::Success),
        ..Default::default()
    };
    run.defer(
        pending.handle.clone(),
        vec![StatusUpdate::project(project_id, recorded.clone()), transaction_succeeded(job, None)],
    );
    ops.confirm(&pending).await?;
    info!(project_id, contract = %contract, owner = %wallet.address, "project contract deployed");

    run.step("record_contract");
    ctx.report(StatusUpdate::project(project_id, recorded)).await?;

    run.step("complete");
    ctx.report(transaction_succeeded(job, None)).await?;
    Ok(())
}
