use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::account::{ContractArtifacts, OperationSettings};
use crate::encoding::Felt;
use crate::error::{Error, Result};
use crate::queue::DispatcherSettings;
use crate::reconcile::ReconcileSettings;
use crate::reporter::ReporterSettings;
use crate::transaction::{FeltHasher, TransactionBuilder};

pub const DEFAULT_CONFIG_PATH: &str = "worker.toml";
pub const DEFAULT_RECONCILE_STATE_PATH: &str = "reconcile_state.json";
pub const DEFAULT_BRIDGE_ADDRESS: &str = "0xeE16740C93807E9C4d9dF293548E93d331AdD918";

pub const ENV_ENVIRONMENT: &str = "NODE_ENV";
pub const ENV_LEDGER_URL: &str = "METABUILD_LEDGER_URL";
pub const ENV_STATUS_URL: &str = "METABUILD_STATUS_URL";

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct WorkerConfig {
    pub worker: WorkerSection,
    pub ledger: LedgerConfig,
    pub contracts: ContractsConfig,
    pub status: StatusConfig,
    pub queue: QueueConfig,
    pub reconcile: ReconcileConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WorkerSection {
    pub environment: String,
    pub log_level: String,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self { environment: "development".to_string(), log_level: "info".to_string() }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_url: String,
    /// Short string, e.g. `SN_GOERLI`.
    pub chain_id: String,
    pub tx_version: u64,
    pub max_fee: String,
    pub request_timeout_secs: u64,
    pub finality_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub nonce_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:5050/rpc".to_string(),
            chain_id: "SN_GOERLI".to_string(),
            tx_version: 0,
            max_fee: "0x0".to_string(),
            request_timeout_secs: 30,
            finality_timeout_secs: 300,
            poll_interval_ms: 5000,
            nonce_attempts: 3,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ContractsConfig {
    pub account_class_path: String,
    pub erc721_class_path: String,
    pub token_name: String,
    pub token_symbol: String,
    pub bridge_address: String,
}

impl Default for ContractsConfig {
    fn default() -> Self {
        Self {
            account_class_path: "contracts/Account.json".to_string(),
            erc721_class_path: "contracts/ERC721_bridge.json".to_string(),
            token_name: "CodeLightNFT".to_string(),
            token_symbol: "CLN".to_string(),
            bridge_address: DEFAULT_BRIDGE_ADDRESS.to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct StatusConfig {
    pub rpc_url: String,
    pub call_timeout_ms: u64,
    pub report_attempts: u32,
    pub report_backoff_ms: u64,
    pub liveness_attempts: u32,
    pub liveness_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:50051/rpc".to_string(),
            call_timeout_ms: 10_000,
            report_attempts: 3,
            report_backoff_ms: 500,
            liveness_attempts: 8,
            liveness_backoff_ms: 1000,
            max_backoff_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct QueueConfig {
    pub limiter_max: u32,
    pub limiter_window_ms: u64,
    pub max_in_flight: usize,
    pub redelivery_attempts: u32,
    pub redelivery_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            limiter_max: 1,
            limiter_window_ms: 1000,
            max_in_flight: 4,
            redelivery_attempts: 3,
            redelivery_backoff_ms: 2000,
            max_backoff_ms: 60_000,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct ReconcileConfig {
    pub sweep_interval_secs: u64,
    pub max_age_secs: u64,
    /// Unresolved transactions survive restarts here; empty keeps them in memory only.
    pub state_file: String,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            max_age_secs: 24 * 60 * 60,
            state_file: DEFAULT_RECONCILE_STATE_PATH.to_string(),
        }
    }
}

fn read_class(path: &str) -> Result<serde_json::Value> {
    let text = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("cannot read contract class {}: {}", path, e)))?;
    serde_json::from_str(&text).map_err(|e| Error::Config(format!("contract class {} is not JSON: {}", path, e)))
}

impl WorkerConfig {
    /// Load `path`; a missing file yields the defaults, which are written out.
    pub fn load_or_default(path: &str) -> Result<Self> {
        if std::path::Path::new(path).exists() {
            let text = std::fs::read_to_string(path)
                .map_err(|e| Error::Config(format!("cannot read {}: {}", path, e)))?;
            let config = toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path, e)))?;
            info!(path, "config loaded");
            Ok(config)
        } else {
            warn!(path, "config file not found, writing defaults");
            let config = Self::default();
            match toml::to_string_pretty(&config) {
                Ok(text) => {
                    if let Err(e) = std::fs::write(path, text) {
                        warn!(path, error = %e, "could not write default config");
                    }
                }
                Err(e) => warn!(error = %e, "could not serialise default config"),
            }
            Ok(config)
        }
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(environment) = lookup(ENV_ENVIRONMENT) {
            self.worker.environment = environment;
        }
        if let Some(url) = lookup(ENV_LEDGER_URL) {
            self.ledger.rpc_url = url;
        }
        if let Some(url) = lookup(ENV_STATUS_URL) {
            self.status.rpc_url = url;
        }
    }

    pub fn apply_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// `<environment>_metabuild`
    pub fn queue_name(&self) -> String {
        format!("{}_metabuild", self.worker.environment)
    }

    pub fn transaction_builder(&self, hasher: Arc<dyn FeltHasher>) -> Result<TransactionBuilder> {
        let chain_id = Felt::from_short_string(&self.ledger.chain_id)
            .map_err(|e| Error::Config(format!("ledger.chain_id: {}", e)))?;
        let max_fee = Felt::parse(&self.ledger.max_fee).map_err(|e| Error::Config(format!("ledger.max_fee: {}", e)))?;
        Ok(TransactionBuilder::new(chain_id, Felt::from(self.ledger.tx_version), max_fee, hasher))
    }

    pub fn operation_settings(&self) -> OperationSettings {
        OperationSettings {
            finality_timeout: Duration::from_secs(self.ledger.finality_timeout_secs),
            nonce_attempts: self.ledger.nonce_attempts,
        }
    }

    pub fn load_artifacts(&self) -> Result<ContractArtifacts> {
        Ok(ContractArtifacts {
            account_class: read_class(&self.contracts.account_class_path)?,
            erc721_class: read_class(&self.contracts.erc721_class_path)?,
            ..self.query_artifacts()?
        })
    }

    /// Artifacts without compiled classes; enough for read-only queries.
    pub fn query_artifacts(&self) -> Result<ContractArtifacts> {
        let bridge_address = Felt::parse(&self.contracts.bridge_address)
            .map_err(|e| Error::Config(format!("contracts.bridge_address: {}", e)))?;
        Ok(ContractArtifacts {
            account_class: serde_json::Value::Null,
            erc721_class: serde_json::Value::Null,
            token_name: self.contracts.token_name.clone(),
            token_symbol: self.contracts.token_symbol.clone(),
            bridge_address,
        })
    }

    pub fn reporter_settings(&self) -> ReporterSettings {
        ReporterSettings {
            call_timeout: Duration::from_millis(self.status.call_timeout_ms),
            attempts: self.status.report_attempts,
            backoff: Duration::from_millis(self.status.report_backoff_ms),
            liveness_attempts: self.status.liveness_attempts,
            liveness_backoff: Duration::from_millis(self.status.liveness_backoff_ms),
            max_backoff: Duration::from_millis(self.status.max_backoff_ms),
        }
    }

    pub fn dispatcher_settings(&self) -> DispatcherSettings {
        DispatcherSettings {
            limiter_max: self.queue.limiter_max,
            limiter_window: Duration::from_millis(self.queue.limiter_window_ms),
            max_in_flight: self.queue.max_in_flight,
            redelivery_attempts: self.queue.redelivery_attempts,
            redelivery_backoff: Duration::from_millis(self.queue.redelivery_backoff_ms),
            max_backoff: Duration::from_millis(self.queue.max_backoff_ms),
        }
    }

    pub fn reconcile_settings(&self) -> ReconcileSettings {
        ReconcileSettings {
            sweep_interval: Duration::from_secs(self.reconcile.sweep_interval_secs),
            max_age: Duration::from_secs(self.reconcile.max_age_secs),
            state_path: match self.reconcile.state_file.trim() {
                "" => None,
                path => Some(PathBuf::from(path)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::PedersenHasher;
    use std::collections::HashMap;

    #[test]
    fn test_missing_file_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        let path = path.to_str().unwrap();

        let config = WorkerConfig::load_or_default(path).unwrap();
        assert_eq!(config.queue.limiter_max, 1);
        assert_eq!(config.queue.limiter_window_ms, 1000);
        assert!(std::path::Path::new(path).exists());

        let reloaded = WorkerConfig::load_or_default(path).unwrap();
        assert_eq!(reloaded.ledger.chain_id, config.ledger.chain_id);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(&path, "[ledger]\nfinality_timeout_secs = 42\n\n[queue]\nmax_in_flight = 9\n").unwrap();

        let config = WorkerConfig::load_or_default(path.to_str().unwrap()).unwrap();
        assert_eq!(config.operation_settings().finality_timeout, Duration::from_secs(42));
        assert_eq!(config.dispatcher_settings().max_in_flight, 9);
        assert_eq!(config.status.report_attempts, 3);
        assert_eq!(config.contracts.token_symbol, "CLN");
    }

    #[test]
    fn test_unparseable_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("worker.toml");
        std::fs::write(&path, "[ledger\nrpc_url = ").unwrap();
        let err = WorkerConfig::load_or_default(path.to_str().unwrap()).unwrap_err();
        assert_eq!(err.code(), "CONFIG");
    }

    #[test]
    fn test_environment_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_ENVIRONMENT, "production"),
            (ENV_STATUS_URL, "http://core:50051/rpc"),
        ]
        .into_iter()
        .collect();
        let mut config = WorkerConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.queue_name(), "production_metabuild");
        assert_eq!(config.status.rpc_url, "http://core:50051/rpc");
        assert_eq!(config.ledger.rpc_url, LedgerConfig::default().rpc_url);
    }

    #[test]
    fn test_builder_and_artifacts() {
        let mut config = WorkerConfig::default();
        let builder = config.transaction_builder(Arc::new(PedersenHasher)).unwrap();
        assert_eq!(builder.chain_id(), &Felt::from_short_string("SN_GOERLI").unwrap());

        config.ledger.chain_id = "X".repeat(40);
        assert!(config.transaction_builder(Arc::new(PedersenHasher)).is_err());

        let dir = tempfile::tempdir().unwrap();
        let account = dir.path().join("Account.json");
        let erc721 = dir.path().join("ERC721.json");
        std::fs::write(&account, r#"{"abi": []}"#).unwrap();
        std::fs::write(&erc721, r#"{"abi": [], "program": {}}"#).unwrap();
        config.contracts.account_class_path = account.to_str().unwrap().to_string();
        config.contracts.erc721_class_path = erc721.to_str().unwrap().to_string();

        let artifacts = config.load_artifacts().unwrap();
        assert_eq!(artifacts.bridge_address, Felt::parse(DEFAULT_BRIDGE_ADDRESS).unwrap());
        assert!(artifacts.erc721_class.get("program").is_some());

        config.contracts.erc721_class_path = dir.path().join("missing.json").to_str().unwrap().to_string();
        assert_eq!(config.load_artifacts().unwrap_err().code(), "CONFIG");
    }
}
