use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Invalid content identifier: {0}")]
    InvalidContentIdentifier(String),
    #[error("Invalid field element: {0}")]
    InvalidFelt(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Invalid job: {0}")]
    InvalidJob(String),
    #[error("Stale nonce: {0}")]
    StaleNonce(String),
    #[error("Ledger rejected transaction {tx_hash}: {reason}")]
    LedgerRejected { tx_hash: String, reason: String },
    #[error("Finality timeout after {waited_secs}s for transaction {tx_hash}; outcome unknown, pending reconciliation")]
    FinalityTimeout { tx_hash: String, waited_secs: u64 },
    #[error("Ledger transport error: {0}")]
    LedgerTransport(String),
    #[error("Submission of transaction {tx_hash} lost in transit ({reason}); outcome unknown, pending reconciliation")]
    SubmissionUnknown { tx_hash: String, reason: String },
    #[error("Status RPC transport failure: {0}")]
    RpcTransportFailure(String),
    #[error("Key error: {0}")]
    Key(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether redelivering the whole job may succeed.
    ///
    /// A stale nonce that survived the builder's own refresh attempts and an
    /// unreachable gateway before anything was submitted are transient.
    /// Everything else either needs an operator (timeouts, lost submissions,
    /// undeliverable status reports) or will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::StaleNonce(_) | Error::LedgerTransport(_))
    }

    /// The ledger may still apply the transaction, so running the job again
    /// could apply it twice.
    pub fn is_ambiguous(&self) -> bool {
        matches!(self, Error::FinalityTimeout { .. } | Error::SubmissionUnknown { .. })
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::InvalidContentIdentifier(_) => "INVALID_CONTENT_IDENTIFIER",
            Error::InvalidFelt(_) => "INVALID_FELT",
            Error::InvalidArgument(_) => "INVALID_ARGUMENT",
            Error::InvalidJob(_) => "INVALID_JOB",
            Error::StaleNonce(_) => "STALE_NONCE",
            Error::LedgerRejected { .. } => "LEDGER_REJECTED",
            Error::FinalityTimeout { .. } => "FINALITY_TIMEOUT",
            Error::LedgerTransport(_) => "LEDGER_TRANSPORT",
            Error::SubmissionUnknown { .. } => "SUBMISSION_UNKNOWN",
            Error::RpcTransportFailure(_) => "RPC_TRANSPORT_FAILURE",
            Error::Key(_) => "KEY",
            Error::Config(_) => "CONFIG",
        }
    }

    /// Text written into a FAILED status record.
    pub fn status_message(&self) -> String {
        format!("{}: {}", self.code(), self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_classification() {
        assert!(Error::StaleNonce("nonce 4 already used".into()).is_retryable());
        assert!(Error::LedgerTransport("connection refused".into()).is_retryable());
        assert!(!Error::LedgerRejected { tx_hash: "0x1".into(), reason: "REVERTED".into() }.is_retryable());
        assert!(!Error::FinalityTimeout { tx_hash: "0x1".into(), waited_secs: 300 }.is_retryable());
        let lost = Error::SubmissionUnknown { tx_hash: "0x1".into(), reason: "connection reset".into() };
        assert!(!lost.is_retryable());
        assert!(lost.is_ambiguous());
        assert!(!Error::LedgerTransport("connection refused".into()).is_ambiguous());
        assert!(!Error::RpcTransportFailure("timeout".into()).is_retryable());
        assert!(!Error::InvalidContentIdentifier("bad".into()).is_retryable());
    }

    #[test]
    fn test_timeout_and_rejection_messages_differ() {
        let timeout = Error::FinalityTimeout { tx_hash: "0xabc".into(), waited_secs: 120 };
        let rejected = Error::LedgerRejected { tx_hash: "0xabc".into(), reason: "REVERTED".into() };
        assert!(timeout.status_message().starts_with("FINALITY_TIMEOUT"));
        assert!(rejected.status_message().starts_with("LEDGER_REJECTED"));
        assert!(timeout.status_message().contains("0xabc"));
    }
}
