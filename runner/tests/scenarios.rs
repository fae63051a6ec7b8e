// End-to-end scenarios over a scripted node and a deterministic evaluator:
// incremental re-evaluation, synthetic forks, rollbacks, admission dedup.

use async_trait::async_trait;
use ride_common::{
    account::{
        chain_id, AccountScriptInfo, Address, Alias, LeaseBalance, ADDRESS_SIZE, ADDRESS_VERSION,
    },
    asset::{Asset, AssetDescription},
    block::{ActivatedFeatures, BlockHeaderWithVrf, Height, SignedBlockHeader},
    crypto::{Hash, PublicKey},
    data::DataEntry,
    remote::RemoteData,
    transaction::TransactionInfo,
};
use ride_runner::{
    core::{
        orchestrator::{Orchestrator, SyncStatus},
        processor::EventProcessor,
        requests::{RequestKey, RequestRegistry},
        state::{ChainState, ScriptView},
    },
    evaluator::{EvaluationError, ScriptEvaluator},
    node::{
        AppendBody, BlockchainUpdated, DataEntryUpdate, NodeApi, NodeError, StateUpdate,
        Update,
    },
};
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tempdir::TempDir;

fn address(seed: u8) -> Address {
    let mut bytes = [0u8; ADDRESS_SIZE];
    bytes[0] = ADDRESS_VERSION;
    bytes[1] = chain_id();
    bytes[2] = seed;
    Address::new(bytes)
}

fn block_id(seed: u8) -> Hash {
    Hash::new([seed; 32])
}

fn header() -> BlockHeaderWithVrf {
    BlockHeaderWithVrf {
        header: SignedBlockHeader {
            version: 5,
            timestamp: 1_700_000_000_000,
            reference: Hash::zero(),
            generator: PublicKey::new([7u8; 32]),
            base_target: 60,
            generation_signature: vec![0u8; 32],
            signature: vec![0u8; 64],
        },
        vrf: vec![1u8; 32],
    }
}

fn dummy_script() -> AccountScriptInfo {
    AccountScriptInfo {
        public_key: PublicKey::new([9u8; 32]),
        script: vec![0, 1, 2],
        complexities: vec![("default".to_owned(), 10)],
    }
}

// Scripted point-lookup API; answers from seeded maps, absence otherwise
#[derive(Default)]
struct MockNode {
    height: u64,
    data: Mutex<HashMap<(Address, String), DataEntry>>,
    scripts: Mutex<HashMap<Address, AccountScriptInfo>>,
}

impl MockNode {
    fn new(height: u64) -> Self {
        MockNode {
            height,
            ..Default::default()
        }
    }

    fn seed_integer(&self, address: &Address, key: &str, value: i64) {
        self.data.lock().unwrap().insert(
            (address.clone(), key.to_owned()),
            DataEntry::Integer {
                key: key.to_owned(),
                value,
            },
        );
    }

    fn seed_script(&self, address: &Address) {
        self.scripts
            .lock()
            .unwrap()
            .insert(address.clone(), dummy_script());
    }
}

#[async_trait]
impl NodeApi for MockNode {
    async fn height(&self) -> Result<Height, NodeError> {
        Ok(self.height)
    }

    async fn activated_features(&self, _height: Height) -> Result<ActivatedFeatures, NodeError> {
        Ok(ActivatedFeatures::default())
    }

    async fn block_header(
        &self,
        _height: Height,
    ) -> Result<RemoteData<BlockHeaderWithVrf>, NodeError> {
        Ok(RemoteData::Absent)
    }

    async fn account_data_entry(
        &self,
        address: &Address,
        key: &str,
    ) -> Result<RemoteData<DataEntry>, NodeError> {
        let data = self.data.lock().unwrap();
        Ok(data.get(&(address.clone(), key.to_owned())).cloned().into())
    }

    async fn account_script(
        &self,
        address: &Address,
    ) -> Result<RemoteData<AccountScriptInfo>, NodeError> {
        let scripts = self.scripts.lock().unwrap();
        Ok(scripts.get(address).cloned().into())
    }

    async fn asset_description(
        &self,
        _id: &Hash,
    ) -> Result<RemoteData<AssetDescription>, NodeError> {
        Ok(RemoteData::Absent)
    }

    async fn resolve_alias(&self, _alias: &Alias) -> Result<RemoteData<Address>, NodeError> {
        Ok(RemoteData::Absent)
    }

    async fn balance(
        &self,
        _address: &Address,
        _asset: &Asset,
    ) -> Result<RemoteData<i64>, NodeError> {
        Ok(RemoteData::Absent)
    }

    async fn lease_balance(
        &self,
        _address: &Address,
    ) -> Result<RemoteData<LeaseBalance>, NodeError> {
        Ok(RemoteData::Absent)
    }

    async fn transaction(&self, _id: &Hash) -> Result<RemoteData<TransactionInfo>, NodeError> {
        Ok(RemoteData::Absent)
    }
}

// Stands in for the RIDE evaluator: answers whether the configured integer
// entry is positive, reading it through the request's tagged view
struct ThresholdEvaluator {
    address: Address,
    key: String,
    calls: AtomicUsize,
    delay: Option<Duration>,
}

impl ThresholdEvaluator {
    fn new(address: Address, key: &str) -> Self {
        ThresholdEvaluator {
            address,
            key: key.to_owned(),
            calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptEvaluator for ThresholdEvaluator {
    async fn evaluate(
        &self,
        view: &ScriptView,
        _address: &Address,
        _request: &Value,
    ) -> Result<Value, EvaluationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let value = view
            .account_data(&self.address, &self.key)
            .await?
            .and_then(|entry| match entry {
                DataEntry::Integer { value, .. } => Some(value),
                _ => None,
            })
            .unwrap_or(0);
        Ok(json!({ "result": { "value": value > 0 } }))
    }
}

fn data_update(address: &Address, key: &str, value: i64) -> StateUpdate {
    StateUpdate {
        data_entries: vec![DataEntryUpdate {
            address: address.clone(),
            key: key.to_owned(),
            value: Some(DataEntry::Integer {
                key: key.to_owned(),
                value,
            }),
        }],
        ..Default::default()
    }
}

fn append_block(height: Height, id: Hash, state_update: StateUpdate) -> BlockchainUpdated {
    BlockchainUpdated {
        height,
        id,
        update: Update::AppendBlock {
            header: header(),
            body: AppendBody {
                state_update,
                ..Default::default()
            },
        },
    }
}

fn append_micro_block(height: Height, id: Hash, state_update: StateUpdate) -> BlockchainUpdated {
    BlockchainUpdated {
        height,
        id,
        update: Update::AppendMicroBlock {
            body: AppendBody {
                state_update,
                ..Default::default()
            },
        },
    }
}

fn rollback(height: Height, id: Hash, state_update: StateUpdate) -> BlockchainUpdated {
    BlockchainUpdated {
        height,
        id,
        update: Update::Rollback {
            state_update,
            removed_transaction_ids: Vec::new(),
        },
    }
}

struct Harness {
    _dir: TempDir,
    alice: Address,
    evaluator: Arc<ThresholdEvaluator>,
    registry: Arc<RequestRegistry>,
    state: Arc<ChainState>,
    orchestrator: Orchestrator,
    request: Value,
}

impl Harness {
    async fn new(working_height: Height, delay: Option<Duration>) -> Self {
        let dir = TempDir::new("scenarios").unwrap();
        let alice = address(1);

        let node = Arc::new(MockNode::new(1));
        node.seed_integer(&alice, "x", 0);
        node.seed_script(&alice);

        let state = ChainState::open(dir.path().join("data"), node.clone(), 16)
            .await
            .unwrap();

        let mut evaluator = ThresholdEvaluator::new(alice.clone(), "x");
        if let Some(delay) = delay {
            evaluator = evaluator.with_delay(delay);
        }
        let evaluator = Arc::new(evaluator);
        let registry = RequestRegistry::new(state.clone(), evaluator.clone(), 4);

        let orchestrator = Orchestrator::new(
            EventProcessor::new(state.clone()),
            registry.clone(),
            working_height,
        );

        Harness {
            _dir: dir,
            alice,
            evaluator,
            registry,
            state,
            orchestrator,
            request: json!({ "expr": "getIntegerValue(this, \"x\") > 0" }),
        }
    }

    async fn register(&self) -> Value {
        self.registry
            .get_cached_result_or_run(self.alice.clone(), self.request.clone())
            .await
            .unwrap()
    }

    fn cached(&self) -> Value {
        let key = RequestKey::new(self.alice.clone(), &self.request);
        self.registry.last_result(&key).unwrap()
    }

    fn cached_value(&self) -> Value {
        self.cached()["result"]["value"].clone()
    }
}

#[tokio::test]
async fn test_simple_integer_read() {
    let mut harness = Harness::new(1, None).await;

    // warm-up: one block reaches the working height
    harness
        .orchestrator
        .on_event(append_block(1, block_id(1), StateUpdate::default()))
        .await
        .unwrap();
    assert_eq!(harness.orchestrator.status(), SyncStatus::Working);

    let initial = harness.register().await;
    assert_eq!(initial["result"]["value"], json!(false));
    assert!(initial["__lastUpdated"].is_u64());

    let alice = harness.alice.clone();
    harness
        .orchestrator
        .on_event(append_block(2, block_id(2), data_update(&alice, "x", 1)))
        .await
        .unwrap();

    assert_eq!(harness.cached_value(), json!(true));
    assert_eq!(harness.state.height(), 2);
}

#[tokio::test]
async fn test_synthetic_fork_preserves_result() {
    let mut harness = Harness::new(1, None).await;
    harness
        .orchestrator
        .on_event(append_block(1, block_id(1), StateUpdate::default()))
        .await
        .unwrap();
    harness.register().await;

    let alice = harness.alice.clone();
    harness
        .orchestrator
        .on_event(append_block(2, block_id(2), data_update(&alice, "x", 1)))
        .await
        .unwrap();
    assert_eq!(harness.cached_value(), json!(true));

    // a block past the change, then the stream times out
    harness
        .orchestrator
        .on_event(append_block(3, block_id(3), StateUpdate::default()))
        .await
        .unwrap();
    harness.orchestrator.on_failed(NodeError::Timeout).await.unwrap();
    assert_eq!(
        harness.orchestrator.status(),
        SyncStatus::WorkingWithFork { fork_height: 2 }
    );

    // the canonical fork restates height 2 without touching the data
    harness
        .orchestrator
        .on_event(append_block(2, block_id(42), StateUpdate::default()))
        .await
        .unwrap();
    assert_eq!(harness.orchestrator.status(), SyncStatus::Working);
    harness
        .orchestrator
        .on_event(append_micro_block(2, block_id(43), StateUpdate::default()))
        .await
        .unwrap();

    assert_eq!(harness.cached_value(), json!(true));
}

#[tokio::test]
async fn test_synthetic_fork_reverts_result() {
    let mut harness = Harness::new(1, None).await;
    harness
        .orchestrator
        .on_event(append_block(1, block_id(1), StateUpdate::default()))
        .await
        .unwrap();
    harness.register().await;

    let alice = harness.alice.clone();
    harness
        .orchestrator
        .on_event(append_block(2, block_id(2), data_update(&alice, "x", 1)))
        .await
        .unwrap();
    assert_eq!(harness.cached_value(), json!(true));

    // the only liquid block carried the change; the fork drops it
    harness.orchestrator.on_failed(NodeError::Timeout).await.unwrap();
    assert_eq!(
        harness.orchestrator.status(),
        SyncStatus::WorkingWithFork { fork_height: 1 }
    );

    harness
        .orchestrator
        .on_event(append_block(2, block_id(42), StateUpdate::default()))
        .await
        .unwrap();
    harness
        .orchestrator
        .on_event(append_micro_block(2, block_id(43), StateUpdate::default()))
        .await
        .unwrap();

    assert_eq!(harness.cached_value(), json!(false));
}

#[tokio::test]
async fn test_rollback_by_event() {
    let mut harness = Harness::new(1, None).await;
    harness
        .orchestrator
        .on_event(append_block(1, block_id(1), StateUpdate::default()))
        .await
        .unwrap();
    harness.register().await;

    let alice = harness.alice.clone();
    harness
        .orchestrator
        .on_event(append_block(2, block_id(2), StateUpdate::default()))
        .await
        .unwrap();
    harness
        .orchestrator
        .on_event(append_block(3, block_id(3), data_update(&alice, "x", 1)))
        .await
        .unwrap();
    assert_eq!(harness.cached_value(), json!(true));

    harness
        .orchestrator
        .on_event(rollback(2, block_id(2), data_update(&alice, "x", 0)))
        .await
        .unwrap();

    assert_eq!(harness.cached_value(), json!(false));
    assert_eq!(harness.state.height(), 2);
}

#[tokio::test]
async fn test_micro_block_keeps_height_and_fires_tags() {
    let mut harness = Harness::new(1, None).await;
    harness
        .orchestrator
        .on_event(append_block(1, block_id(1), StateUpdate::default()))
        .await
        .unwrap();
    harness.register().await;

    let alice = harness.alice.clone();
    harness
        .orchestrator
        .on_event(append_block(2, block_id(2), StateUpdate::default()))
        .await
        .unwrap();
    harness
        .orchestrator
        .on_event(append_micro_block(2, block_id(20), data_update(&alice, "x", 5)))
        .await
        .unwrap();

    assert_eq!(harness.state.height(), 2);
    assert_eq!(harness.cached_value(), json!(true));
}

#[tokio::test]
async fn test_restating_identical_value_does_not_rerun() {
    let mut harness = Harness::new(1, None).await;
    harness
        .orchestrator
        .on_event(append_block(1, block_id(1), StateUpdate::default()))
        .await
        .unwrap();
    harness.register().await;
    let calls_after_registration = harness.evaluator.calls();

    // x is already 0; restating it must not count as a change
    let alice = harness.alice.clone();
    harness
        .orchestrator
        .on_event(append_block(2, block_id(2), data_update(&alice, "x", 0)))
        .await
        .unwrap();

    assert_eq!(harness.evaluator.calls(), calls_after_registration);
}

#[tokio::test]
async fn test_admission_dedup() {
    let harness = Harness::new(1, Some(Duration::from_millis(50))).await;

    let first = harness.register();
    let second = harness.register();
    let (first, second) = tokio::join!(first, second);

    assert_eq!(first, second);
    assert_eq!(harness.evaluator.calls(), 1);
    assert_eq!(harness.registry.len(), 1);
}

#[tokio::test]
async fn test_non_dapp_is_rejected_without_registration() {
    let harness = Harness::new(1, None).await;
    let bob = address(2);

    let result = harness
        .registry
        .get_cached_result_or_run(bob, harness.request.clone())
        .await;

    assert!(result.is_err());
    assert_eq!(harness.registry.len(), 0);
}

#[tokio::test]
async fn test_startup_failure_is_fatal() {
    let mut harness = Harness::new(10, None).await;
    assert!(harness
        .orchestrator
        .on_failed(NodeError::Timeout)
        .await
        .is_err());
}

#[tokio::test]
async fn test_starting_waits_for_working_height() {
    let mut harness = Harness::new(3, None).await;
    harness.register().await;
    let calls = harness.evaluator.calls();

    let alice = harness.alice.clone();
    harness
        .orchestrator
        .on_event(append_block(2, block_id(2), data_update(&alice, "x", 1)))
        .await
        .unwrap();
    // still catching up: nothing is evaluated yet
    assert!(matches!(
        harness.orchestrator.status(),
        SyncStatus::Starting { .. }
    ));
    assert_eq!(harness.evaluator.calls(), calls);

    harness
        .orchestrator
        .on_event(append_block(3, block_id(3), StateUpdate::default()))
        .await
        .unwrap();
    assert_eq!(harness.orchestrator.status(), SyncStatus::Working);
    assert_eq!(harness.cached_value(), json!(true));
}
