use crate::core::{
    error::RunnerError,
    requests::RequestTag,
    state::{BalanceSnapshot, ChainState},
};
use ride_common::{
    account::{AccountScriptInfo, Address, Alias, LeaseBalance},
    asset::{Asset, AssetDescription},
    block::{ActivatedFeatures, BlockHeaderWithVrf, Height},
    crypto::Hash,
    data::DataEntry,
    transaction::{TransactionInfo, TransferPayload},
};
use std::sync::Arc;

// Read-only chain view of one registered request. Every lookup registers the
// touched key as a dependency of the request's tag before answering, which is
// what lets the event processor re-run exactly the affected requests later.
pub struct ScriptView {
    state: Arc<ChainState>,
    tag: RequestTag,
}

impl ScriptView {
    pub fn new(state: Arc<ChainState>, tag: RequestTag) -> Self {
        ScriptView { state, tag }
    }

    pub fn tag(&self) -> &RequestTag {
        &self.tag
    }

    pub fn height(&self) -> Height {
        self.state.height()
    }

    pub fn activated_features(&self) -> &ActivatedFeatures {
        self.state.activated_features()
    }

    pub async fn block_header(
        &self,
        height: Height,
    ) -> Result<Option<BlockHeaderWithVrf>, RunnerError> {
        self.state.block_header(height).await
    }

    pub async fn hit_source(&self, height: Height) -> Result<Option<Vec<u8>>, RunnerError> {
        self.state.hit_source(height).await
    }

    pub async fn account_data(
        &self,
        address: &Address,
        key: &str,
    ) -> Result<Option<DataEntry>, RunnerError> {
        self.state.account_data(address, key, Some(&self.tag)).await
    }

    pub async fn account_script(
        &self,
        address: &Address,
    ) -> Result<Option<AccountScriptInfo>, RunnerError> {
        self.state.account_script(address, Some(&self.tag)).await
    }

    pub async fn resolve_alias(&self, alias: &Alias) -> Result<Option<Address>, RunnerError> {
        self.state.resolve_alias(alias, Some(&self.tag)).await
    }

    pub async fn asset_description(
        &self,
        id: &Hash,
    ) -> Result<Option<AssetDescription>, RunnerError> {
        self.state.asset_description(id, Some(&self.tag)).await
    }

    pub async fn balance(
        &self,
        address: &Address,
        asset: &Asset,
    ) -> Result<Option<i64>, RunnerError> {
        self.state.balance(address, asset, Some(&self.tag)).await
    }

    pub async fn lease_balance(
        &self,
        address: &Address,
    ) -> Result<Option<LeaseBalance>, RunnerError> {
        self.state.lease_balance(address, Some(&self.tag)).await
    }

    pub async fn transaction_meta(
        &self,
        id: &Hash,
    ) -> Result<Option<TransactionInfo>, RunnerError> {
        self.state.transaction_meta(id, Some(&self.tag)).await
    }

    pub async fn transfer_by_id(
        &self,
        id: &Hash,
    ) -> Result<Option<(Height, TransferPayload)>, RunnerError> {
        self.state.transfer_by_id(id, Some(&self.tag)).await
    }

    pub async fn balance_snapshots(
        &self,
        address: &Address,
        from: Height,
        to: Option<Height>,
    ) -> Result<Vec<BalanceSnapshot>, RunnerError> {
        self.state
            .balance_snapshots(address, from, to, Some(&self.tag))
            .await
    }
}
