use crate::{
    core::{
        state::{ChainState, ScriptView},
        storage::AffectedTags,
    },
    evaluator::ScriptEvaluator,
};
use dashmap::{mapref::entry::Entry, DashMap};
use futures::future::join_all;
use metrics::{counter, histogram};
use ride_common::{account::Address, time::get_current_time_in_millis};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{sync::Arc, time::Instant};
use thiserror::Error;
use tokio::sync::{watch, Semaphore};

pub const LAST_UPDATED_FIELD: &str = "__lastUpdated";

// Identity of one registered script request: the target account plus the
// canonical JSON text of the request body. Doubles as the dependency tag
// attached to every chain key the script reads.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    pub address: Address,
    canonical: String,
}

impl RequestKey {
    pub fn new(address: Address, request: &Value) -> Self {
        // serde_json orders object keys, so equal bodies share one identity
        let canonical = request.to_string();
        RequestKey { address, canonical }
    }

    pub fn request_body(&self) -> Value {
        serde_json::from_str(&self.canonical).unwrap_or(Value::Null)
    }

    #[cfg(test)]
    pub fn for_tests(name: &str) -> Self {
        let mut bytes = [0u8; ride_common::account::ADDRESS_SIZE];
        bytes[0] = ride_common::account::ADDRESS_VERSION;
        bytes[1] = ride_common::account::chain_id();
        RequestKey {
            address: Address::new(bytes),
            canonical: name.to_owned(),
        }
    }
}

pub type RequestTag = Arc<RequestKey>;

// One registered script with its latest evaluation result
pub struct RestApiScript {
    pub key: RequestTag,
    pub request: Value,
    pub last_result: Value,
}

// Persistent request-list record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredRequest {
    pub address: Address,
    pub request: Value,
}

#[derive(Debug, Clone, Error)]
pub enum RequestError {
    #[error("Address {0} is not a dApp")]
    NotDApp(Address),
    #[error("Blockchain state unavailable: {0}")]
    Unavailable(String),
}

type AdmissionResult = Result<Value, RequestError>;

// Registry and scheduler of script requests.
//
// Reads of the script map are lock-free; first-time registrations go through
// a per-key admission map so concurrent identical requests share one
// evaluation.
pub struct RequestRegistry {
    state: Arc<ChainState>,
    evaluator: Arc<dyn ScriptEvaluator>,
    scripts: DashMap<RequestTag, RestApiScript>,
    in_flight: DashMap<RequestKey, watch::Receiver<Option<AdmissionResult>>>,
    limit: Arc<Semaphore>,
}

enum AdmissionRole {
    Runner(watch::Sender<Option<AdmissionResult>>),
    Waiter(watch::Receiver<Option<AdmissionResult>>),
}

impl RequestRegistry {
    pub fn new(
        state: Arc<ChainState>,
        evaluator: Arc<dyn ScriptEvaluator>,
        concurrency: usize,
    ) -> Arc<Self> {
        Arc::new(RequestRegistry {
            state,
            evaluator,
            scripts: DashMap::new(),
            in_flight: DashMap::new(),
            limit: Arc::new(Semaphore::new(concurrency.max(1))),
        })
    }

    pub fn len(&self) -> usize {
        self.scripts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scripts.is_empty()
    }

    // Prefill from the persistent request list; results stay empty until the
    // first forced run
    pub fn load_requests(&self, requests: Vec<StoredRequest>) {
        for stored in requests {
            let tag: RequestTag = Arc::new(RequestKey::new(stored.address, &stored.request));
            self.scripts.entry(tag.clone()).or_insert(RestApiScript {
                key: tag,
                request: stored.request,
                last_result: Value::Null,
            });
        }
        info!("request registry prefilled with {} scripts", self.len());
    }

    // Snapshot of the registered requests, for flushing the list on shutdown
    pub fn stored_requests(&self) -> Vec<StoredRequest> {
        self.scripts
            .iter()
            .map(|entry| StoredRequest {
                address: entry.key().address.clone(),
                request: entry.value().request.clone(),
            })
            .collect()
    }

    pub fn last_result(&self, key: &RequestKey) -> Option<Value> {
        self.scripts
            .get(key)
            .map(|script| script.last_result.clone())
    }

    // Re-run the affected scripts (or all of them) against the current view.
    // Only the tags actually run are cleared from `affected`: a tag recorded
    // by a concurrent first-time run stays queued for the next round.
    pub async fn run_affected(&self, affected: &mut AffectedTags, force_all: bool) {
        let targets: Vec<(RequestTag, Value)> = if force_all {
            self.scripts
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().request.clone()))
                .collect()
        } else {
            affected
                .iter()
                .filter_map(|tag| {
                    self.scripts
                        .get(tag)
                        .map(|script| (tag.clone(), script.request.clone()))
                })
                .collect()
        };

        for (tag, _) in &targets {
            affected.remove(tag);
        }
        if targets.is_empty() {
            return;
        }
        histogram!("ride_runner_affected_scripts").record(targets.len() as f64);
        debug!(
            "evaluating {} scripts (force_all: {})",
            targets.len(),
            force_all
        );

        let results = join_all(targets.into_iter().map(|(tag, request)| async move {
            let result = self.evaluate_script(&tag, &request).await;
            (tag, result)
        }))
        .await;

        for (tag, result) in results {
            if let Some(mut script) = self.scripts.get_mut(&tag) {
                script.last_result = result;
            }
        }
    }

    // Serve the cached result, or admit the request, verify the target is a
    // dApp, run it once, and register it. Concurrent duplicates await the
    // same evaluation.
    pub async fn get_cached_result_or_run(
        &self,
        address: Address,
        request: Value,
    ) -> Result<Value, RequestError> {
        counter!("ride_runner_requests").increment(1);
        let key = RequestKey::new(address, &request);
        if let Some(result) = self.last_result(&key) {
            return Ok(result);
        }

        loop {
            let role = match self.in_flight.entry(key.clone()) {
                Entry::Occupied(entry) => AdmissionRole::Waiter(entry.get().clone()),
                Entry::Vacant(entry) => {
                    let (tx, rx) = watch::channel(None);
                    entry.insert(rx);
                    AdmissionRole::Runner(tx)
                }
            };

            match role {
                AdmissionRole::Runner(tx) => {
                    let result = self.register_and_run(&key, request.clone()).await;
                    let _ = tx.send(Some(result.clone()));
                    self.in_flight.remove(&key);
                    return result;
                }
                AdmissionRole::Waiter(mut rx) => {
                    loop {
                        let ready = rx.borrow().clone();
                        if let Some(result) = ready {
                            return result;
                        }
                        if rx.changed().await.is_err() {
                            // runner vanished without answering; re-admit
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn register_and_run(
        &self,
        key: &RequestKey,
        request: Value,
    ) -> Result<Value, RequestError> {
        let tag: RequestTag = Arc::new(key.clone());

        // The dApp check is also the first tagged read: a later SetScript on
        // this account re-runs the request
        match self.state.account_script(&tag.address, Some(&tag)).await {
            Ok(Some(_)) => {}
            Ok(None) => return Err(RequestError::NotDApp(tag.address.clone())),
            Err(error) => return Err(RequestError::Unavailable(error.to_string())),
        }

        let result = self.evaluate_script(&tag, &request).await;
        self.scripts.entry(tag.clone()).or_insert(RestApiScript {
            key: tag,
            request,
            last_result: result.clone(),
        });
        Ok(result)
    }

    // One evaluation under the worker limit; errors become the script's
    // result and never abort a batch
    async fn evaluate_script(&self, tag: &RequestTag, request: &Value) -> Value {
        let _permit = self.limit.acquire().await.ok();
        let view = ScriptView::new(self.state.clone(), tag.clone());

        let started = Instant::now();
        let mut result = match self.evaluator.evaluate(&view, &tag.address, request).await {
            Ok(result) => result,
            Err(error) => {
                warn!("evaluation of {} failed: {}", tag.address, error);
                error.to_json()
            }
        };
        histogram!("ride_runner_evaluation_ms").record(started.elapsed().as_millis() as f64);
        counter!("ride_runner_evaluations").increment(1);

        if let Value::Object(fields) = &mut result {
            fields.insert(
                LAST_UPDATED_FIELD.to_owned(),
                Value::from(get_current_time_in_millis()),
            );
        }
        result
    }
}
