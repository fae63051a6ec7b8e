use crate::node::{NodeApi, NodeError};
use async_trait::async_trait;
use reqwest::StatusCode;
use ride_common::{
    account::{AccountScriptInfo, Address, Alias, LeaseBalance},
    asset::{Asset, AssetDescription},
    block::{ActivatedFeatures, BlockHeaderWithVrf, Height},
    crypto::Hash,
    data::DataEntry,
    remote::RemoteData,
    transaction::TransactionInfo,
};
use serde::{de::DeserializeOwned, Deserialize};

#[derive(Deserialize)]
struct HeightResponse {
    height: Height,
}

#[derive(Deserialize)]
struct AliasResponse {
    address: Address,
}

#[derive(Deserialize)]
struct BalanceResponse {
    balance: i64,
}

// Point lookups over the node's REST data API. A 404 is an authoritative
// "not on chain" and comes back as `Absent`.
pub struct RestNodeApi {
    client: reqwest::Client,
    base_url: String,
}

impl RestNodeApi {
    pub fn new(base_url: String) -> Self {
        RestNodeApi {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_owned(),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, NodeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(NodeError::UnexpectedResponse(format!(
                "{} answered {}",
                path, status
            )));
        }
        Ok(response.json().await?)
    }

    async fn get_remote<T: DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<RemoteData<T>, NodeError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self.client.get(&url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Ok(RemoteData::Absent),
            status if status.is_success() => Ok(RemoteData::Cached(response.json().await?)),
            status => Err(NodeError::UnexpectedResponse(format!(
                "{} answered {}",
                path, status
            ))),
        }
    }
}

#[async_trait]
impl NodeApi for RestNodeApi {
    async fn height(&self) -> Result<Height, NodeError> {
        Ok(self.get_json::<HeightResponse>("/blocks/height").await?.height)
    }

    async fn activated_features(&self, height: Height) -> Result<ActivatedFeatures, NodeError> {
        self.get_json(&format!("/activation/status?height={}", height))
            .await
    }

    async fn block_header(
        &self,
        height: Height,
    ) -> Result<RemoteData<BlockHeaderWithVrf>, NodeError> {
        self.get_remote(&format!("/blocks/headers/at/{}", height))
            .await
    }

    async fn account_data_entry(
        &self,
        address: &Address,
        key: &str,
    ) -> Result<RemoteData<DataEntry>, NodeError> {
        self.get_remote(&format!("/addresses/data/{}/{}", address, key))
            .await
    }

    async fn account_script(
        &self,
        address: &Address,
    ) -> Result<RemoteData<AccountScriptInfo>, NodeError> {
        self.get_remote(&format!("/addresses/script/info/{}", address))
            .await
    }

    async fn asset_description(
        &self,
        id: &Hash,
    ) -> Result<RemoteData<AssetDescription>, NodeError> {
        self.get_remote(&format!("/assets/details/{}", id)).await
    }

    async fn resolve_alias(&self, alias: &Alias) -> Result<RemoteData<Address>, NodeError> {
        Ok(self
            .get_remote::<AliasResponse>(&format!("/alias/by-alias/{}", alias))
            .await?
            .map(|response| response.address))
    }

    async fn balance(
        &self,
        address: &Address,
        asset: &Asset,
    ) -> Result<RemoteData<i64>, NodeError> {
        let path = match asset {
            Asset::Waves => format!("/addresses/balance/{}", address),
            Asset::IssuedAsset(id) => format!("/assets/balance/{}/{}", address, id),
        };
        Ok(self
            .get_remote::<BalanceResponse>(&path)
            .await?
            .map(|response| response.balance))
    }

    async fn lease_balance(
        &self,
        address: &Address,
    ) -> Result<RemoteData<LeaseBalance>, NodeError> {
        self.get_remote(&format!("/leasing/info/{}", address)).await
    }

    async fn transaction(&self, id: &Hash) -> Result<RemoteData<TransactionInfo>, NodeError> {
        self.get_remote(&format!("/transactions/info/{}", id)).await
    }
}
