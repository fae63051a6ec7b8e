mod headers;
mod script_view;

pub use headers::HeadersStorage;
pub use script_view::ScriptView;

use crate::{
    core::{
        error::{DiskContext, RunnerError},
        requests::RequestTag,
        storage::{HeadersTree, TaggedStorage, VersionedTree},
    },
    node::NodeApi,
};
use ride_common::{
    account::{AccountScriptInfo, Address, Alias, LeaseBalance},
    asset::{Asset, AssetDescription},
    block::{ActivatedFeatures, BlockHeaderWithVrf, Height},
    crypto::Hash,
    data::DataEntry,
    serializer::Serializer,
    transaction::{TransactionInfo, TransferPayload},
};
use serde::Serialize;
use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

const ACTIVATED_FEATURES_KEY: &[u8] = b"activated_features";

// The synthetic one-element answer to a balance-range query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BalanceSnapshot {
    pub height: Height,
    pub regular_balance: i64,
    pub lease: LeaseBalance,
}

// Shared view of the chain: one tagged storage per cached entity, the header
// window, and the feature set loaded once at startup. Owned by the events
// executor; evaluators read it through `ScriptView`.
pub struct ChainState {
    db: sled::Db,
    node: Arc<dyn NodeApi>,
    height: AtomicU64,
    pub account_data: TaggedStorage<(Address, String), DataEntry>,
    pub account_scripts: TaggedStorage<Address, AccountScriptInfo>,
    pub aliases: TaggedStorage<Alias, Address>,
    pub assets: TaggedStorage<Hash, AssetDescription>,
    pub balances: TaggedStorage<(Address, Asset), i64>,
    pub lease_balances: TaggedStorage<Address, LeaseBalance>,
    pub transactions: TaggedStorage<Hash, TransactionInfo>,
    headers: HeadersStorage,
    features: ActivatedFeatures,
}

impl ChainState {
    pub async fn open(
        path: impl AsRef<Path>,
        node: Arc<dyn NodeApi>,
        headers_window: usize,
    ) -> Result<Arc<Self>, RunnerError> {
        let db = sled::open(path)?;

        let headers = HeadersStorage::new(HeadersTree::new(&db)?, headers_window)?;
        let meta = db.open_tree("meta")?;

        // The starting height: last applied header if the disk is warm,
        // otherwise whatever the node currently reports
        let height = match headers.last_height()? {
            Some(height) => height,
            None => node.height().await?,
        };

        // Activated features are loaded once and never mutated by updates;
        // activation is assumed stable within the run
        let features = match meta.get(ACTIVATED_FEATURES_KEY)? {
            Some(value) => ActivatedFeatures::from_bytes(&value)
                .map_err(RunnerError::corrupted(DiskContext::ActivatedFeatures))?,
            None => {
                let features = node.activated_features(height).await?;
                meta.insert(ACTIVATED_FEATURES_KEY, features.to_bytes())?;
                features
            }
        };
        info!(
            "chain state opened at height {} with {} activated features",
            height,
            features.0.len()
        );

        Ok(Arc::new(ChainState {
            account_data: TaggedStorage::new(
                "account_data",
                VersionedTree::new(&db, "account_data", DiskContext::AccountData)?,
            ),
            account_scripts: TaggedStorage::new(
                "account_scripts",
                VersionedTree::new(&db, "account_scripts", DiskContext::AccountScript)?,
            ),
            aliases: TaggedStorage::new(
                "aliases",
                VersionedTree::new(&db, "aliases", DiskContext::Alias)?,
            ),
            assets: TaggedStorage::new(
                "assets",
                VersionedTree::new(&db, "assets", DiskContext::AssetDescription)?,
            ),
            balances: TaggedStorage::new(
                "balances",
                VersionedTree::new(&db, "balances", DiskContext::AccountBalance)?,
            ),
            lease_balances: TaggedStorage::new(
                "lease_balances",
                VersionedTree::new(&db, "lease_balances", DiskContext::LeaseBalance)?,
            ),
            transactions: TaggedStorage::new(
                "transactions",
                VersionedTree::new(&db, "transactions", DiskContext::Transaction)?,
            ),
            headers,
            features,
            height: AtomicU64::new(height),
            node,
            db,
        }))
    }

    pub fn height(&self) -> Height {
        self.height.load(Ordering::Acquire)
    }

    pub fn activated_features(&self) -> &ActivatedFeatures {
        &self.features
    }

    // Record the header of an applied block; the authoritative height is
    // always the last applied header's height
    pub fn apply_header(
        &self,
        height: Height,
        header: &BlockHeaderWithVrf,
    ) -> Result<(), RunnerError> {
        self.headers.set(height, header)?;
        self.height.store(height, Ordering::Release);
        Ok(())
    }

    // Strip headers (and their VRF hit sources) at height >= `from_height`
    pub fn remove_headers_from(&self, from_height: Height) -> Result<(), RunnerError> {
        self.headers.remove_from(from_height)?;
        self.height
            .store(from_height.saturating_sub(1), Ordering::Release);
        Ok(())
    }

    pub async fn block_header(
        &self,
        height: Height,
    ) -> Result<Option<BlockHeaderWithVrf>, RunnerError> {
        if let Some(header) = self.headers.get(height)? {
            return Ok(Some(header));
        }
        match self.node.block_header(height).await?.into_option() {
            Some(header) => {
                self.headers.set(height, &header)?;
                Ok(Some(header))
            }
            None => Ok(None),
        }
    }

    pub async fn hit_source(&self, height: Height) -> Result<Option<Vec<u8>>, RunnerError> {
        Ok(self.block_header(height).await?.map(|header| header.vrf))
    }

    pub async fn account_data(
        &self,
        address: &Address,
        key: &str,
        tag: Option<&RequestTag>,
    ) -> Result<Option<DataEntry>, RunnerError> {
        let lookup = (address.clone(), key.to_owned());
        let node = self.node.clone();
        let address = address.clone();
        let key = key.to_owned();
        self.account_data
            .get(self.height(), &lookup, tag, async move {
                Ok(node.account_data_entry(&address, &key).await?)
            })
            .await
    }

    pub async fn account_script(
        &self,
        address: &Address,
        tag: Option<&RequestTag>,
    ) -> Result<Option<AccountScriptInfo>, RunnerError> {
        let node = self.node.clone();
        let lookup = address.clone();
        self.account_scripts
            .get(self.height(), address, tag, async move {
                Ok(node.account_script(&lookup).await?)
            })
            .await
    }

    pub async fn resolve_alias(
        &self,
        alias: &Alias,
        tag: Option<&RequestTag>,
    ) -> Result<Option<Address>, RunnerError> {
        let node = self.node.clone();
        let lookup = alias.clone();
        self.aliases
            .get(self.height(), alias, tag, async move {
                Ok(node.resolve_alias(&lookup).await?)
            })
            .await
    }

    pub async fn asset_description(
        &self,
        id: &Hash,
        tag: Option<&RequestTag>,
    ) -> Result<Option<AssetDescription>, RunnerError> {
        let node = self.node.clone();
        let lookup = id.clone();
        self.assets
            .get(self.height(), id, tag, async move {
                Ok(node.asset_description(&lookup).await?)
            })
            .await
    }

    pub async fn balance(
        &self,
        address: &Address,
        asset: &Asset,
        tag: Option<&RequestTag>,
    ) -> Result<Option<i64>, RunnerError> {
        let lookup = (address.clone(), asset.clone());
        let node = self.node.clone();
        let address = address.clone();
        let asset = asset.clone();
        self.balances
            .get(self.height(), &lookup, tag, async move {
                Ok(node.balance(&address, &asset).await?)
            })
            .await
    }

    pub async fn lease_balance(
        &self,
        address: &Address,
        tag: Option<&RequestTag>,
    ) -> Result<Option<LeaseBalance>, RunnerError> {
        let node = self.node.clone();
        let lookup = address.clone();
        self.lease_balances
            .get(self.height(), address, tag, async move {
                Ok(node.lease_balance(&lookup).await?)
            })
            .await
    }

    pub async fn transaction_meta(
        &self,
        id: &Hash,
        tag: Option<&RequestTag>,
    ) -> Result<Option<TransactionInfo>, RunnerError> {
        let node = self.node.clone();
        let lookup = id.clone();
        self.transactions
            .get(self.height(), id, tag, async move {
                Ok(node.transaction(&lookup).await?)
            })
            .await
    }

    pub async fn transfer_by_id(
        &self,
        id: &Hash,
        tag: Option<&RequestTag>,
    ) -> Result<Option<(Height, TransferPayload)>, RunnerError> {
        Ok(self
            .transaction_meta(id, tag)
            .await?
            .and_then(|info| info.transfer.map(|transfer| (info.height, transfer))))
    }

    // Collapses a historical range query into a single synthetic snapshot at
    // the current height; scripts asking for older ranges observe the same
    // degenerate answer
    pub async fn balance_snapshots(
        &self,
        address: &Address,
        _from: Height,
        _to: Option<Height>,
        tag: Option<&RequestTag>,
    ) -> Result<Vec<BalanceSnapshot>, RunnerError> {
        let regular_balance = self
            .balance(address, &Asset::Waves, tag)
            .await?
            .unwrap_or_default();
        let lease = self.lease_balance(address, tag).await?.unwrap_or_default();
        Ok(vec![BalanceSnapshot {
            height: self.height(),
            regular_balance,
            lease,
        }])
    }

    pub fn flush(&self) -> Result<(), RunnerError> {
        self.db.flush()?;
        Ok(())
    }
}
