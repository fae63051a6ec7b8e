pub mod rest;
pub mod updates;

use async_trait::async_trait;
use ride_common::{
    account::{AccountScriptInfo, Address, Alias, LeaseBalance},
    asset::{Asset, AssetDescription},
    block::{ActivatedFeatures, BlockHeaderWithVrf, BlockId, Height},
    crypto::Hash,
    data::DataEntry,
    remote::RemoteData,
    transaction::{TransactionInfo, TransferPayload},
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Upstream timeout")]
    Timeout,
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
    #[error("Connection closed by the node")]
    ConnectionClosed,
}

impl From<reqwest::Error> for NodeError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            NodeError::Timeout
        } else {
            NodeError::Transport(error.to_string())
        }
    }
}

// Framing of the blockchain-updates feed
#[derive(Debug)]
pub enum StreamItem {
    Next(BlockchainUpdated),
    Closed,
    Failed(NodeError),
}

// One event of the blockchain-updates feed
#[derive(Debug, Clone, Deserialize)]
pub struct BlockchainUpdated {
    pub height: Height,
    pub id: BlockId,
    pub update: Update,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Update {
    AppendBlock {
        header: BlockHeaderWithVrf,
        #[serde(flatten)]
        body: AppendBody,
    },
    AppendMicroBlock {
        #[serde(flatten)]
        body: AppendBody,
    },
    Rollback {
        #[serde(default)]
        state_update: StateUpdate,
        #[serde(default)]
        removed_transaction_ids: Vec<Hash>,
    },
    Empty,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppendBody {
    #[serde(default)]
    pub state_update: StateUpdate,
    #[serde(default)]
    pub transaction_state_updates: Vec<StateUpdate>,
    #[serde(default)]
    pub transactions: Vec<TransactionUpdate>,
}

// Sub-updates of one append or rollback, grouped per entity
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StateUpdate {
    #[serde(default)]
    pub data_entries: Vec<DataEntryUpdate>,
    #[serde(default)]
    pub balances: Vec<BalanceUpdate>,
    #[serde(default)]
    pub leasing: Vec<LeasingUpdate>,
    #[serde(default)]
    pub assets: Vec<AssetUpdate>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        self.data_entries.is_empty()
            && self.balances.is_empty()
            && self.leasing.is_empty()
            && self.assets.is_empty()
    }
}

// `value: None` is a deletion of the entry
#[derive(Debug, Clone, Deserialize)]
pub struct DataEntryUpdate {
    pub address: Address,
    pub key: String,
    #[serde(default)]
    pub value: Option<DataEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BalanceUpdate {
    pub address: Address,
    #[serde(default)]
    pub asset: Asset,
    pub amount_after: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeasingUpdate {
    pub address: Address,
    #[serde(flatten)]
    pub after: LeaseBalance,
}

// `after: None` means the asset no longer exists at this point
#[derive(Debug, Clone, Deserialize)]
pub struct AssetUpdate {
    pub id: Hash,
    #[serde(default)]
    pub after: Option<AssetDescription>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionUpdate {
    pub id: Hash,
    #[serde(flatten)]
    pub data: TransactionData,
}

// Transactions the runner recognizes while scanning an append;
// everything else only records its id and height
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "tx_type", rename_all = "snake_case")]
pub enum TransactionData {
    SetScript {
        sender: Address,
        #[serde(default)]
        script: Option<AccountScriptInfo>,
    },
    CreateAlias {
        sender: Address,
        alias: Alias,
    },
    Transfer {
        #[serde(flatten)]
        transfer: TransferPayload,
    },
    #[serde(other)]
    Other,
}

// Synchronous point lookups against the node's data API, used on cache miss.
// Absence on chain is an authoritative answer and comes back as `Absent`.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn height(&self) -> Result<Height, NodeError>;

    async fn activated_features(&self, height: Height) -> Result<ActivatedFeatures, NodeError>;

    async fn block_header(&self, height: Height)
        -> Result<RemoteData<BlockHeaderWithVrf>, NodeError>;

    async fn account_data_entry(
        &self,
        address: &Address,
        key: &str,
    ) -> Result<RemoteData<DataEntry>, NodeError>;

    async fn account_script(
        &self,
        address: &Address,
    ) -> Result<RemoteData<AccountScriptInfo>, NodeError>;

    async fn asset_description(
        &self,
        id: &Hash,
    ) -> Result<RemoteData<AssetDescription>, NodeError>;

    async fn resolve_alias(&self, alias: &Alias) -> Result<RemoteData<Address>, NodeError>;

    async fn balance(&self, address: &Address, asset: &Asset)
        -> Result<RemoteData<i64>, NodeError>;

    async fn lease_balance(&self, address: &Address)
        -> Result<RemoteData<LeaseBalance>, NodeError>;

    async fn transaction(&self, id: &Hash) -> Result<RemoteData<TransactionInfo>, NodeError>;
}
