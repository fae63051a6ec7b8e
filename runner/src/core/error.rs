use crate::node::NodeError;
use ride_common::serializer::ReaderError;
use thiserror::Error;

// Where a storage read was issued from, for error context
#[derive(Debug, Clone, Copy, strum::Display)]
pub enum DiskContext {
    #[strum(serialize = "account data")]
    AccountData,
    #[strum(serialize = "account script")]
    AccountScript,
    #[strum(serialize = "alias")]
    Alias,
    #[strum(serialize = "asset description")]
    AssetDescription,
    #[strum(serialize = "account balance")]
    AccountBalance,
    #[strum(serialize = "lease balance")]
    LeaseBalance,
    #[strum(serialize = "transaction")]
    Transaction,
    #[strum(serialize = "block header")]
    BlockHeader,
    #[strum(serialize = "activated features")]
    ActivatedFeatures,
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("Storage error: {0}")]
    Storage(#[from] sled::Error),
    #[error("Corrupted {context} record: {source}")]
    Corrupted {
        context: DiskContext,
        source: ReaderError,
    },
    #[error(transparent)]
    Node(#[from] NodeError),
    #[error("Unexpected event: {0}")]
    UnexpectedEvent(&'static str),
    #[error("Upstream stream failed during startup: {0}")]
    StartupStreamFailed(NodeError),
    #[error("Upstream stream failed while resolving a fork: {0}")]
    ForkStreamFailed(NodeError),
    #[error("No liquid events to roll back")]
    EmptyLiquidTail,
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RunnerError {
    pub fn corrupted(context: DiskContext) -> impl FnOnce(ReaderError) -> RunnerError {
        move |source| RunnerError::Corrupted { context, source }
    }

    // Invariant breaches abort the process rather than desync silently
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RunnerError::Corrupted { .. }
                | RunnerError::UnexpectedEvent(_)
                | RunnerError::StartupStreamFailed(_)
                | RunnerError::ForkStreamFailed(_)
                | RunnerError::EmptyLiquidTail
        )
    }
}
