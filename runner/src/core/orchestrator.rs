use crate::{
    core::{error::RunnerError, processor::EventProcessor, requests::RequestRegistry},
    node::{BlockchainUpdated, NodeError, StreamItem, Update},
};
use ride_common::block::Height;
use std::sync::Arc;
use tokio::sync::mpsc;

// Lifecycle of the stream consumer.
//
// Starting replays events until the working height is reached, then runs
// every registered script once. Working evaluates incrementally. A stream
// timeout is a synthetic fork: the liquid tail is undone and evaluation
// pauses until the authoritative events have caught back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum SyncStatus {
    #[strum(serialize = "starting")]
    Starting { working_height: Height },
    #[strum(serialize = "working")]
    Working,
    #[strum(serialize = "working_with_fork")]
    WorkingWithFork { fork_height: Height },
}

pub struct Orchestrator {
    processor: EventProcessor,
    registry: Arc<RequestRegistry>,
    status: SyncStatus,
}

impl Orchestrator {
    pub fn new(
        processor: EventProcessor,
        registry: Arc<RequestRegistry>,
        working_height: Height,
    ) -> Self {
        Orchestrator {
            processor,
            registry,
            status: SyncStatus::Starting { working_height },
        }
    }

    pub fn status(&self) -> SyncStatus {
        self.status
    }

    pub fn processor(&self) -> &EventProcessor {
        &self.processor
    }

    pub async fn run(
        mut self,
        mut stream: mpsc::Receiver<StreamItem>,
    ) -> Result<(), RunnerError> {
        if let SyncStatus::Starting { working_height } = self.status {
            info!("catching up; evaluation starts at height {}", working_height);
        }

        while let Some(item) = stream.recv().await {
            match item {
                StreamItem::Next(event) => self.on_event(event).await?,
                StreamItem::Failed(error) => self.on_failed(error).await?,
                StreamItem::Closed => {
                    info!("blockchain-updates stream closed");
                    break;
                }
            }
        }
        Ok(())
    }

    pub async fn on_event(&mut self, event: BlockchainUpdated) -> Result<(), RunnerError> {
        let height = event.height;
        let is_append = matches!(
            event.update,
            Update::AppendBlock { .. } | Update::AppendMicroBlock { .. }
        );
        let is_rollback = matches!(event.update, Update::Rollback { .. });
        self.processor.process(event).await?;

        match self.status {
            SyncStatus::Starting { working_height } => {
                if is_append && height >= working_height {
                    info!("reached working height {}, evaluating all scripts", height);
                    self.run_scripts(true).await;
                    self.status = SyncStatus::Working;
                }
            }
            SyncStatus::Working => {
                self.run_scripts(false).await;
            }
            SyncStatus::WorkingWithFork { fork_height } => {
                if is_rollback {
                    // an authoritative rollback arrived mid-fork
                    self.run_scripts(false).await;
                } else if is_append && height >= fork_height {
                    info!("fork resolved at height {}", height);
                    self.run_scripts(false).await;
                    self.status = SyncStatus::Working;
                }
            }
        }
        Ok(())
    }

    pub async fn on_failed(&mut self, error: NodeError) -> Result<(), RunnerError> {
        match self.status {
            SyncStatus::Starting { .. } => Err(RunnerError::StartupStreamFailed(error)),
            SyncStatus::Working => {
                warn!("updates stream failed ({}); undoing the liquid tail", error);
                let fork_height = self.processor.force_rollback_one().await?;
                self.status = SyncStatus::WorkingWithFork { fork_height };
                Ok(())
            }
            SyncStatus::WorkingWithFork { .. } => Err(RunnerError::ForkStreamFailed(error)),
        }
    }

    async fn run_scripts(&mut self, force_all: bool) {
        let registry = self.registry.clone();
        registry
            .run_affected(self.processor.affected_scripts_mut(), force_all)
            .await;
    }
}
