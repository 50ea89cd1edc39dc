//! In-memory stand-ins for the chain, the node, the preference store and
//! the settlement wait.
//!
//! Every double records the calls it receives so tests can assert on exact
//! sequences without a network.

use super::chain::{ChainClient, ChainDialer};
use super::config::NodeStartConfig;
use super::node::{
    BatchId, Download, NodeLauncher, NotFound, PostageBatch, Reference, StorageNode, Topology,
};
use super::error::PreferencesError;
use super::provisioning::Settlement;
use super::storage::Preferences;
use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use futures::stream;
use std::{
    collections::HashMap,
    path::Path,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

/// Calls observed by a [`MockNode`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCalls {
    pub topology_queries: usize,
    pub balance_queries: usize,
    pub withdrawals: Vec<U256>,
    /// (amount, depth, label, immutable)
    pub purchases: Vec<(U256, u8, String, bool)>,
    /// (batch, name, mimetype)
    pub uploads: Vec<(String, String, String)>,
    pub downloads: usize,
    pub shutdowns: usize,
}

#[derive(Default)]
struct NodeState {
    topology: Topology,
    balance: U256,
    batches: Vec<PostageBatch>,
    contents: HashMap<Vec<u8>, (String, Vec<u8>)>,
    topology_error: Option<String>,
    withdraw_error: Option<String>,
    purchase_error: Option<String>,
    upload_error: Option<String>,
    calls: NodeCalls,
    next_tx: u8,
    next_batch: u8,
    next_reference: u8,
}

/// A node whose chequebook, batches and content live in memory. Clones share
/// state.
#[derive(Clone)]
pub struct MockNode {
    address: Address,
    state: Arc<Mutex<NodeState>>,
}

impl Default for MockNode {
    fn default() -> Self {
        Self::new()
    }
}

impl MockNode {
    pub fn new() -> Self {
        Self {
            address: Address::repeat_byte(0x11),
            state: Arc::new(Mutex::new(NodeState {
                next_tx: 1,
                next_batch: 0xb0,
                next_reference: 1,
                ..Default::default()
            })),
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, NodeState> {
        match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn with_balance(self, balance: U256) -> Self {
        self.state().balance = balance;
        self
    }

    pub fn with_batches(self, batches: Vec<PostageBatch>) -> Self {
        self.state().batches = batches;
        self
    }

    pub fn with_topology(self, topology: Topology) -> Self {
        self.set_topology(topology);
        self
    }

    pub fn with_content(self, reference: &Reference, name: &str, data: &[u8]) -> Self {
        self.state()
            .contents
            .insert(reference.0.clone(), (name.to_string(), data.to_vec()));
        self
    }

    pub fn failing_topology(self, message: &str) -> Self {
        self.state().topology_error = Some(message.to_string());
        self
    }

    pub fn failing_withdrawals(self, message: &str) -> Self {
        self.state().withdraw_error = Some(message.to_string());
        self
    }

    pub fn failing_purchases(self, message: &str) -> Self {
        self.state().purchase_error = Some(message.to_string());
        self
    }

    pub fn failing_uploads(self, message: &str) -> Self {
        self.state().upload_error = Some(message.to_string());
        self
    }

    pub fn set_topology(&self, topology: Topology) {
        self.state().topology = topology;
    }

    pub fn balance(&self) -> U256 {
        self.state().balance
    }

    pub fn calls(&self) -> NodeCalls {
        self.state().calls.clone()
    }
}

#[async_trait]
impl StorageNode for MockNode {
    fn address(&self) -> Address {
        self.address
    }

    async fn topology(&self) -> anyhow::Result<Topology> {
        let mut state = self.state();
        state.calls.topology_queries += 1;
        match &state.topology_error {
            Some(message) => Err(anyhow::anyhow!("{}", message)),
            None => Ok(state.topology),
        }
    }

    async fn chequebook_balance(&self) -> anyhow::Result<U256> {
        let mut state = self.state();
        state.calls.balance_queries += 1;
        Ok(state.balance)
    }

    async fn chequebook_withdraw(&self, amount: U256) -> anyhow::Result<H256> {
        let mut state = self.state();
        state.calls.withdrawals.push(amount);
        if let Some(message) = &state.withdraw_error {
            return Err(anyhow::anyhow!("{}", message));
        }
        if amount > state.balance {
            return Err(anyhow::anyhow!("insufficient balance"));
        }
        state.balance -= amount;
        let tx = H256::repeat_byte(state.next_tx);
        state.next_tx = state.next_tx.wrapping_add(1);
        Ok(tx)
    }

    async fn batches(&self) -> anyhow::Result<Vec<PostageBatch>> {
        Ok(self.state().batches.clone())
    }

    async fn buy_stamp(
        &self,
        amount: U256,
        depth: u8,
        label: &str,
        immutable: bool,
    ) -> anyhow::Result<BatchId> {
        let mut state = self.state();
        state
            .calls
            .purchases
            .push((amount, depth, label.to_string(), immutable));
        if let Some(message) = &state.purchase_error {
            return Err(anyhow::anyhow!("{}", message));
        }
        let id = BatchId(vec![state.next_batch; 32]);
        state.next_batch = state.next_batch.wrapping_add(1);
        state.batches.push(PostageBatch {
            id: id.clone(),
            depth,
        });
        Ok(id)
    }

    async fn upload(
        &self,
        batch: &str,
        name: &str,
        mimetype: &str,
        data: Vec<u8>,
    ) -> anyhow::Result<Reference> {
        let mut state = self.state();
        state
            .calls
            .uploads
            .push((batch.to_string(), name.to_string(), mimetype.to_string()));
        if let Some(message) = &state.upload_error {
            return Err(anyhow::anyhow!("{}", message));
        }
        let reference = Reference(vec![state.next_reference; 32]);
        state.next_reference = state.next_reference.wrapping_add(1);
        state
            .contents
            .insert(reference.0.clone(), (name.to_string(), data));
        Ok(reference)
    }

    async fn download(&self, reference: &Reference) -> anyhow::Result<Download> {
        let mut state = self.state();
        state.calls.downloads += 1;
        let (name, data) = state
            .contents
            .get(&reference.0)
            .cloned()
            .ok_or_else(|| NotFound(reference.to_hex()))?;
        let chunks: Vec<std::io::Result<Vec<u8>>> =
            data.chunks(4096).map(|chunk| Ok(chunk.to_vec())).collect();
        Ok(Download {
            name,
            body: Box::pin(stream::iter(chunks)),
        })
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        self.state().calls.shutdowns += 1;
        Ok(())
    }
}

enum StartOutcome {
    Start(MockNode),
    Fail(String),
}

/// Starts a preset [`MockNode`] or fails with a preset message.
pub struct MockLauncher {
    outcome: StartOutcome,
    recovered: Option<Address>,
    starts: AtomicUsize,
    last: Mutex<Option<(NodeStartConfig, String)>>,
}

impl MockLauncher {
    pub fn starting(node: MockNode) -> Self {
        Self::with_outcome(StartOutcome::Start(node))
    }

    pub fn failing(message: &str) -> Self {
        Self::with_outcome(StartOutcome::Fail(message.to_string()))
    }

    fn with_outcome(outcome: StartOutcome) -> Self {
        Self {
            outcome,
            recovered: None,
            starts: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }

    /// Makes address recovery succeed with `address`.
    pub fn recovering(mut self, address: Address) -> Self {
        self.recovered = Some(address);
        self
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn last_config(&self) -> Option<NodeStartConfig> {
        self.last
            .lock()
            .ok()
            .and_then(|last| last.as_ref().map(|(config, _)| config.clone()))
    }

    pub fn last_password(&self) -> Option<String> {
        self.last
            .lock()
            .ok()
            .and_then(|last| last.as_ref().map(|(_, password)| password.clone()))
    }
}

#[async_trait]
impl NodeLauncher for MockLauncher {
    async fn start(
        &self,
        config: &NodeStartConfig,
        password: &str,
    ) -> anyhow::Result<Arc<dyn StorageNode>> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut last) = self.last.lock() {
            *last = Some((config.clone(), password.to_string()));
        }
        match &self.outcome {
            StartOutcome::Start(node) => Ok(Arc::new(node.clone())),
            StartOutcome::Fail(message) => Err(anyhow::anyhow!("{}", message)),
        }
    }

    async fn recover_address(
        &self,
        _storage_root: &Path,
        _password: &str,
    ) -> anyhow::Result<Address> {
        self.recovered
            .ok_or_else(|| anyhow::anyhow!("could not decrypt keystore"))
    }
}

enum DialOutcome {
    Serve(u64),
    Unreachable(String),
    Reject(String),
}

/// Chain endpoint that serves a fixed chain id or fails at a chosen step.
pub struct MockDialer {
    outcome: Arc<DialOutcome>,
    dials: AtomicUsize,
    queries: Arc<AtomicUsize>,
}

impl MockDialer {
    pub fn serving(chain_id: u64) -> Self {
        Self::with_outcome(DialOutcome::Serve(chain_id))
    }

    pub fn unreachable(message: &str) -> Self {
        Self::with_outcome(DialOutcome::Unreachable(message.to_string()))
    }

    /// Dialing succeeds but the chain id query fails.
    pub fn rejecting(message: &str) -> Self {
        Self::with_outcome(DialOutcome::Reject(message.to_string()))
    }

    fn with_outcome(outcome: DialOutcome) -> Self {
        Self {
            outcome: Arc::new(outcome),
            dials: AtomicUsize::new(0),
            queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn chain_id_queries(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }
}

struct MockChainClient {
    outcome: Arc<DialOutcome>,
    queries: Arc<AtomicUsize>,
}

#[async_trait]
impl ChainDialer for MockDialer {
    async fn dial(&self, _endpoint: &str) -> anyhow::Result<Box<dyn ChainClient>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if let DialOutcome::Unreachable(message) = self.outcome.as_ref() {
            return Err(anyhow::anyhow!("{}", message));
        }
        Ok(Box::new(MockChainClient {
            outcome: self.outcome.clone(),
            queries: self.queries.clone(),
        }))
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        match self.outcome.as_ref() {
            DialOutcome::Serve(chain_id) => Ok(*chain_id),
            DialOutcome::Reject(message) | DialOutcome::Unreachable(message) => {
                Err(anyhow::anyhow!("{}", message))
            }
        }
    }
}

/// Treats every withdrawal as already settled.
#[derive(Default)]
pub struct InstantSettlement {
    settled: Mutex<Vec<H256>>,
}

impl InstantSettlement {
    pub fn settled(&self) -> Vec<H256> {
        self.settled
            .lock()
            .map(|settled| settled.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Settlement for InstantSettlement {
    async fn wait_for(&self, tx: H256) {
        if let Ok(mut settled) = self.settled.lock() {
            settled.push(tx);
        }
    }
}

/// A withdrawal that never settles.
pub struct PendingSettlement;

#[async_trait]
impl Settlement for PendingSettlement {
    async fn wait_for(&self, _tx: H256) {
        futures::future::pending::<()>().await
    }
}

/// An empty preference store that refuses every write.
#[derive(Clone, Default)]
pub struct FailingPreferences {
    rejected: Arc<AtomicUsize>,
}

impl FailingPreferences {
    pub fn rejected_writes(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }

    fn reject(&self) -> Result<(), PreferencesError> {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        Err(PreferencesError::Poisoned)
    }
}

impl Preferences for FailingPreferences {
    fn get(&self, _key: &str) -> Result<Option<String>, PreferencesError> {
        Ok(None)
    }

    fn set_all(&self, _entries: &[(&str, &str)]) -> Result<(), PreferencesError> {
        self.reject()
    }

    fn update(
        &self,
        _key: &str,
        _f: &mut dyn FnMut(String) -> Result<String, PreferencesError>,
    ) -> Result<(), PreferencesError> {
        self.reject()
    }
}
