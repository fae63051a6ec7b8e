use crate::{
    core::{error::RunnerError, state::ChainState, storage::AffectedTags},
    node::{AppendBody, BlockchainUpdated, StateUpdate, TransactionData, Update},
};
use metrics::counter;
use ride_common::{
    block::{BlockId, Height},
    remote::RemoteData,
    transaction::TransactionInfo,
};
use std::sync::Arc;

// What one or more processed events amount to: the resulting height and the
// set of script tags whose dependencies changed
pub struct ProcessResult {
    pub new_height: Height,
    pub affected_scripts: AffectedTags,
}

enum TailAction {
    Replace,
    Extend,
    Truncate(Height, BlockId),
    Keep,
}

// Applies blockchain-update events to the shared chain state.
//
// `last_events` is the liquid tail: everything appended since the most recent
// solid block. It is replaced by each new block, extended by micro-blocks,
// truncated by rollbacks, and replayed backwards by `force_rollback_one` when
// the upstream times out and the tail can no longer be trusted.
pub struct EventProcessor {
    state: Arc<ChainState>,
    accumulated: ProcessResult,
    last_events: Vec<BlockchainUpdated>,
}

impl EventProcessor {
    pub fn new(state: Arc<ChainState>) -> Self {
        let new_height = state.height();
        EventProcessor {
            state,
            accumulated: ProcessResult {
                new_height,
                affected_scripts: AffectedTags::new(),
            },
            last_events: Vec::new(),
        }
    }

    pub fn state(&self) -> &Arc<ChainState> {
        &self.state
    }

    pub fn new_height(&self) -> Height {
        self.accumulated.new_height
    }

    pub fn affected_scripts_mut(&mut self) -> &mut AffectedTags {
        &mut self.accumulated.affected_scripts
    }

    pub fn liquid_tail_len(&self) -> usize {
        self.last_events.len()
    }

    pub async fn process(&mut self, event: BlockchainUpdated) -> Result<(), RunnerError> {
        self.accumulated.new_height = event.height;

        let action = match &event.update {
            Update::AppendBlock { header, body } => {
                trace!("append block {} at height {}", event.id, event.height);
                counter!("ride_runner_events", "kind" => "block").increment(1);
                let tags = self.apply_append(event.height, body).await?;
                self.state.apply_header(event.height, header)?;
                self.accumulated.affected_scripts.extend(tags);
                TailAction::Replace
            }
            Update::AppendMicroBlock { body } => {
                trace!("append micro-block {} at height {}", event.id, event.height);
                counter!("ride_runner_events", "kind" => "micro_block").increment(1);
                let tags = self.apply_append(event.height, body).await?;
                self.accumulated.affected_scripts.extend(tags);
                TailAction::Extend
            }
            Update::Rollback {
                state_update,
                removed_transaction_ids,
            } => {
                debug!("rollback to {} at height {}", event.id, event.height);
                counter!("ride_runner_events", "kind" => "rollback").increment(1);
                let tags = self
                    .apply_rollback(event.height, state_update, removed_transaction_ids)
                    .await?;
                self.accumulated.affected_scripts.extend(tags);
                TailAction::Truncate(event.height, event.id.clone())
            }
            Update::Empty => {
                counter!("ride_runner_events", "kind" => "empty").increment(1);
                TailAction::Keep
            }
        };

        match action {
            TailAction::Replace => self.last_events = vec![event],
            TailAction::Extend => self.last_events.push(event),
            TailAction::Truncate(height, id) => self
                .last_events
                .retain(|kept| kept.height < height || kept.id == id),
            TailAction::Keep => {}
        }
        Ok(())
    }

    // Undo the liquid tail without an authoritative rollback event: replay
    // every appended key backwards, then strip the tail's headers. Called
    // when the upstream stream timed out and the tail may be stale.
    // Answers the height of the last solid block.
    pub async fn force_rollback_one(&mut self) -> Result<Height, RunnerError> {
        if self.last_events.is_empty() {
            return Err(RunnerError::EmptyLiquidTail);
        }
        let events = std::mem::take(&mut self.last_events);
        let tail_height = events
            .iter()
            .map(|event| event.height)
            .max()
            .unwrap_or_default();
        warn!(
            "undoing the liquid tail: {} events at height {}",
            events.len(),
            tail_height
        );

        let mut tags = AffectedTags::new();
        for event in events.iter().rev() {
            match &event.update {
                Update::AppendBlock { body, .. } | Update::AppendMicroBlock { body } => {
                    self.undo_append(event.height, body, &mut tags).await?;
                }
                Update::Empty => {}
                Update::Rollback { .. } => {
                    return Err(RunnerError::UnexpectedEvent("rollback in the liquid tail"))
                }
            }
        }
        self.state.remove_headers_from(tail_height)?;

        let solid_height = tail_height.saturating_sub(1);
        self.accumulated.new_height = solid_height;
        self.accumulated.affected_scripts.extend(tags);
        Ok(solid_height)
    }

    async fn apply_append(
        &self,
        height: Height,
        body: &AppendBody,
    ) -> Result<AffectedTags, RunnerError> {
        let mut tags = AffectedTags::new();
        for update in std::iter::once(&body.state_update).chain(body.transaction_state_updates.iter())
        {
            self.apply_state_update(height, update, &mut tags).await?;
        }

        for tx in &body.transactions {
            match &tx.data {
                TransactionData::SetScript { sender, script } => {
                    tags.extend(
                        self.state
                            .account_scripts
                            .append(height, sender, script.clone().into())
                            .await?,
                    );
                }
                TransactionData::CreateAlias { sender, alias } => {
                    // later appends of a colliding alias win
                    tags.extend(
                        self.state
                            .aliases
                            .append(height, alias, RemoteData::Cached(sender.clone()))
                            .await?,
                    );
                }
                TransactionData::Transfer { .. } | TransactionData::Other => {}
            }

            let transfer = match &tx.data {
                TransactionData::Transfer { transfer } => Some(transfer.clone()),
                _ => None,
            };
            tags.extend(
                self.state
                    .transactions
                    .append(
                        height,
                        &tx.id,
                        RemoteData::Cached(TransactionInfo { height, transfer }),
                    )
                    .await?,
            );
        }
        Ok(tags)
    }

    async fn apply_state_update(
        &self,
        height: Height,
        update: &StateUpdate,
        tags: &mut AffectedTags,
    ) -> Result<(), RunnerError> {
        for entry in &update.data_entries {
            let key = (entry.address.clone(), entry.key.clone());
            tags.extend(
                self.state
                    .account_data
                    .append(height, &key, entry.value.clone().into())
                    .await?,
            );
        }
        for balance in &update.balances {
            let key = (balance.address.clone(), balance.asset.clone());
            tags.extend(
                self.state
                    .balances
                    .append(height, &key, RemoteData::Cached(balance.amount_after))
                    .await?,
            );
        }
        for leasing in &update.leasing {
            tags.extend(
                self.state
                    .lease_balances
                    .append(height, &leasing.address, RemoteData::Cached(leasing.after))
                    .await?,
            );
        }
        for asset in &update.assets {
            tags.extend(
                self.state
                    .assets
                    .append(height, &asset.id, asset.after.clone().into())
                    .await?,
            );
        }
        Ok(())
    }

    async fn apply_rollback(
        &self,
        to_height: Height,
        update: &StateUpdate,
        removed_transaction_ids: &[ride_common::crypto::Hash],
    ) -> Result<AffectedTags, RunnerError> {
        let mut tags = AffectedTags::new();
        for entry in &update.data_entries {
            let key = (entry.address.clone(), entry.key.clone());
            tags.extend(
                self.state
                    .account_data
                    .rollback(to_height, &key, entry.value.clone().into())
                    .await?,
            );
        }
        for balance in &update.balances {
            let key = (balance.address.clone(), balance.asset.clone());
            tags.extend(
                self.state
                    .balances
                    .rollback(to_height, &key, RemoteData::Cached(balance.amount_after))
                    .await?,
            );
        }
        for leasing in &update.leasing {
            tags.extend(
                self.state
                    .lease_balances
                    .rollback(to_height, &leasing.address, RemoteData::Cached(leasing.after))
                    .await?,
            );
        }
        for asset in &update.assets {
            tags.extend(
                self.state
                    .assets
                    .rollback(to_height, &asset.id, asset.after.clone().into())
                    .await?,
            );
        }
        for id in removed_transaction_ids {
            tags.extend(
                self.state
                    .transactions
                    .rollback(to_height, id, RemoteData::Absent)
                    .await?,
            );
        }

        // alias creations and script sets are not rolled back; forward
        // progress reasserts them
        self.state.remove_headers_from(to_height + 1)?;
        Ok(tags)
    }

    async fn undo_append(
        &self,
        height: Height,
        body: &AppendBody,
        tags: &mut AffectedTags,
    ) -> Result<(), RunnerError> {
        for update in std::iter::once(&body.state_update).chain(body.transaction_state_updates.iter())
        {
            for entry in &update.data_entries {
                let key = (entry.address.clone(), entry.key.clone());
                tags.extend(self.state.account_data.undo_append(height, &key).await?);
            }
            for balance in &update.balances {
                let key = (balance.address.clone(), balance.asset.clone());
                tags.extend(self.state.balances.undo_append(height, &key).await?);
            }
            for leasing in &update.leasing {
                tags.extend(
                    self.state
                        .lease_balances
                        .undo_append(height, &leasing.address)
                        .await?,
                );
            }
            for asset in &update.assets {
                tags.extend(self.state.assets.undo_append(height, &asset.id).await?);
            }
        }

        for tx in &body.transactions {
            match &tx.data {
                TransactionData::SetScript { sender, .. } => {
                    tags.extend(self.state.account_scripts.undo_append(height, sender).await?);
                }
                TransactionData::CreateAlias { alias, .. } => {
                    tags.extend(self.state.aliases.undo_append(height, alias).await?);
                }
                TransactionData::Transfer { .. } | TransactionData::Other => {}
            }
            tags.extend(self.state.transactions.undo_append(height, &tx.id).await?);
        }
        Ok(())
    }
}
