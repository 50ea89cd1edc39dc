use super::config::NodeStartConfig;
use async_trait::async_trait;
use ethers::{
    signers::{LocalWallet, Signer},
    types::{Address, H256, U256},
};
use futures::{stream::BoxStream, TryStreamExt};
use std::{
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

/// Keystore file holding the node's swarm key, relative to the storage root.
pub const SWARM_KEY_PATH: &str = "keys/swarm.key";

/// Number of leading hex characters used to identify a batch.
pub const SHORT_ID_LEN: usize = 6;

/// Renders `aaaaaa[...]ffffff` for long hex strings.
pub fn shorten_hash_or_address(item: &str) -> String {
    if item.len() <= SHORT_ID_LEN * 2 || !item.is_ascii() {
        return item.to_string();
    }
    format!(
        "{}[...]{}",
        &item[..SHORT_ID_LEN],
        &item[item.len() - SHORT_ID_LEN..]
    )
}

/// First six characters of a hex id, or the whole id when shorter.
pub fn short_prefix(id: &str) -> &str {
    match id.get(..SHORT_ID_LEN) {
        Some(prefix) => prefix,
        None => id,
    }
}

/// Postage batch identifier.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BatchId(pub Vec<u8>);

impl BatchId {
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn short(&self) -> String {
        shorten_hash_or_address(&self.to_hex())
    }

    /// Compares only the first six hex characters. Batches sharing such a
    /// prefix are indistinguishable here.
    pub fn matches_prefix(&self, other: &str) -> bool {
        let hex = self.to_hex();
        hex.len() >= SHORT_ID_LEN
            && other.len() >= SHORT_ID_LEN
            && short_prefix(&hex).eq_ignore_ascii_case(short_prefix(other))
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BatchId({})", self.short())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostageBatch {
    pub id: BatchId,
    pub depth: u8,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Topology {
    pub connected: u64,
    pub population: u64,
}

/// Content reference returned by an upload.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Reference(pub Vec<u8>);

impl Reference {
    /// Accepts plain (32 byte) and encrypted (64 byte) references.
    pub fn from_hex(s: &str) -> Result<Self, String> {
        let s = s.trim();
        let bytes = hex::decode(s.strip_prefix("0x").unwrap_or(s)).map_err(|e| e.to_string())?;
        match bytes.len() {
            32 | 64 => Ok(Reference(bytes)),
            n => Err(format!("unexpected reference length {}", n)),
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({})", shorten_hash_or_address(&self.to_hex()))
    }
}

/// Returned by nodes when a reference resolves to nothing.
#[derive(Debug, thiserror::Error)]
#[error("reference {0} not found")]
pub struct NotFound(pub String);

/// A downloaded file: the suggested file name and its bytes as a stream.
pub struct Download {
    pub name: String,
    pub body: BoxStream<'static, std::io::Result<Vec<u8>>>,
}

impl Download {
    pub async fn read_all(self) -> std::io::Result<Vec<u8>> {
        self.body
            .try_fold(Vec::new(), |mut data, chunk| async move {
                data.extend_from_slice(&chunk);
                Ok(data)
            })
            .await
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Download").field("name", &self.name).finish()
    }
}

/// A running storage node. Calls may be issued concurrently.
#[async_trait]
pub trait StorageNode: Send + Sync {
    fn address(&self) -> Address;

    async fn topology(&self) -> anyhow::Result<Topology>;

    async fn chequebook_balance(&self) -> anyhow::Result<U256>;

    /// Returns the withdrawal transaction hash.
    async fn chequebook_withdraw(&self, amount: U256) -> anyhow::Result<H256>;

    async fn batches(&self) -> anyhow::Result<Vec<PostageBatch>>;

    async fn buy_stamp(
        &self,
        amount: U256,
        depth: u8,
        label: &str,
        immutable: bool,
    ) -> anyhow::Result<BatchId>;

    /// `batch` is the full hex id of the stamp to attach.
    async fn upload(
        &self,
        batch: &str,
        name: &str,
        mimetype: &str,
        data: Vec<u8>,
    ) -> anyhow::Result<Reference>;

    async fn download(&self, reference: &Reference) -> anyhow::Result<Download>;

    async fn shutdown(&self) -> anyhow::Result<()>;
}

#[async_trait]
pub trait NodeLauncher: Send + Sync {
    async fn start(
        &self,
        config: &NodeStartConfig,
        password: &str,
    ) -> anyhow::Result<Arc<dyn StorageNode>>;

    /// Derives the node address from the keystore alone; no node is needed.
    async fn recover_address(
        &self,
        storage_root: &Path,
        password: &str,
    ) -> anyhow::Result<Address> {
        let path = swarm_key_path(storage_root);
        let password = password.to_string();
        tokio::task::spawn_blocking(move || recover_address(&path, &password)).await?
    }
}

/// Decrypts a JSON keystore and returns the address of its key.
pub fn recover_address(keystore: &Path, password: &str) -> anyhow::Result<Address> {
    let wallet = LocalWallet::decrypt_keystore(keystore, password).map_err(|e| {
        anyhow::anyhow!("failed to open keystore {}: {}", keystore.display(), e)
    })?;
    Ok(wallet.address())
}

pub fn swarm_key_path(storage_root: &Path) -> PathBuf {
    storage_root.join(SWARM_KEY_PATH)
}
