use super::config::NetworkProfile;
use super::error::ContentError;
use super::node::{Download, NotFound, Reference, StorageNode};
use super::storage::{self, Preferences, UploadRecord};
use chrono::Utc;
use ethers::types::Address;
use log::{debug, info, warn};
use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, Weak},
};
use tokio_util::sync::CancellationToken;

/// A running node together with the profile it was started on and the
/// preference store that gates its content operations.
pub struct Session {
    node: Mutex<Option<Arc<dyn StorageNode>>>,
    released: CancellationToken,
    address: Address,
    profile: NetworkProfile,
    prefs: Arc<dyn Preferences>,
    storage_root: PathBuf,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.address)
            .field("profile", &self.profile)
            .field("storage_root", &self.storage_root)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(
        node: Arc<dyn StorageNode>,
        profile: NetworkProfile,
        prefs: Arc<dyn Preferences>,
        storage_root: &Path,
    ) -> Self {
        Self {
            address: node.address(),
            node: Mutex::new(Some(node)),
            released: CancellationToken::new(),
            profile,
            prefs,
            storage_root: storage_root.to_path_buf(),
        }
    }

    /// The live node, or `None` once the session was shut down.
    pub fn node(&self) -> Option<Arc<dyn StorageNode>> {
        self.node.lock().ok().and_then(|node| node.clone())
    }

    /// A handle that stops resolving once the session lets go of the node.
    /// Other holders of the node can keep it resolving after shutdown; check
    /// [`Session::released`] for liveness.
    pub fn watch_node(&self) -> Option<Weak<dyn StorageNode>> {
        self.node().map(|node| Arc::downgrade(&node))
    }

    /// Cancelled when the session shuts its node down.
    pub fn released(&self) -> CancellationToken {
        self.released.clone()
    }

    pub fn is_live(&self) -> bool {
        self.node().is_some()
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn profile(&self) -> &NetworkProfile {
        &self.profile
    }

    pub fn preferences(&self) -> &dyn Preferences {
        self.prefs.as_ref()
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Releases the node. Later calls are no-ops.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let node = match self.node.lock() {
            Ok(mut node) => node.take(),
            Err(_) => return Err(anyhow::anyhow!("session lock poisoned")),
        };
        self.released.cancel();
        match node {
            Some(node) => {
                info!("shutting down node {:?}", self.address);
                node.shutdown().await
            }
            None => Ok(()),
        }
    }

    /// Uploads `data` with the selected stamp and records it in the uploads
    /// history.
    pub async fn upload(
        &self,
        name: &str,
        mimetype: &str,
        data: Vec<u8>,
    ) -> Result<UploadRecord, ContentError> {
        let selection =
            storage::load_selection(self.preferences())?.ok_or(ContentError::SelectionRequired)?;
        let node = self.node().ok_or(ContentError::NodeUnavailable)?;

        let batches = node.batches().await.map_err(ContentError::TransferFailed)?;
        if !batches.iter().any(|b| b.id.matches_prefix(&selection.batch)) {
            warn!("selected stamp {} is no longer available", selection.display);
            return Err(ContentError::SelectionRequired);
        }

        info!("uploading {} ({} bytes)", name, data.len());
        let size = data.len() as i64;
        let reference = node
            .upload(&selection.batch, name, mimetype, data)
            .await
            .map_err(ContentError::TransferFailed)?;

        let record = UploadRecord {
            name: name.to_string(),
            reference: reference.to_hex(),
            size,
            timestamp: Utc::now().timestamp(),
            mimetype: mimetype.to_string(),
        };
        storage::append_upload(self.preferences(), record.clone())?;
        debug!("upload {} stored as {:?}", name, reference);
        Ok(record)
    }

    pub async fn download(&self, reference: &str) -> Result<Download, ContentError> {
        let reference = Reference::from_hex(reference).map_err(ContentError::InvalidReference)?;
        let node = self.node().ok_or(ContentError::NodeUnavailable)?;
        info!("downloading {:?}", reference);
        node.download(&reference).await.map_err(|e| {
            if e.downcast_ref::<NotFound>().is_some() {
                ContentError::ContentNotFound(e)
            } else {
                ContentError::TransferFailed(e)
            }
        })
    }

    /// Downloads and buffers the whole file. Returns the suggested name and
    /// the content.
    pub async fn download_bytes(&self, reference: &str) -> Result<(String, Vec<u8>), ContentError> {
        let download = self.download(reference).await?;
        let name = download.name.clone();
        let data = download
            .read_all()
            .await
            .map_err(|e| ContentError::TransferFailed(e.into()))?;
        Ok((name, data))
    }

    pub fn uploads(&self) -> Result<Vec<UploadRecord>, ContentError> {
        Ok(storage::load_uploads(self.preferences())?)
    }
}
