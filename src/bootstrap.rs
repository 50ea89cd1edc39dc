use super::chain::ChainDialer;
use super::config::{NetworkKind, NetworkProfile, NodeStartConfig};
use super::error::BootstrapError;
use super::node::NodeLauncher;
use super::session::Session;
use super::storage::{Preferences, PASSWORD_KEY, SWAP_ENDPOINT_KEY};
use log::{error, info, warn};
use std::{path::Path, sync::Arc};

/// Turns a password and an RPC endpoint into a running [`Session`].
///
/// Nothing is persisted unless the node actually starts.
pub struct Bootstrapper {
    dialer: Arc<dyn ChainDialer>,
    launcher: Arc<dyn NodeLauncher>,
    prefs: Arc<dyn Preferences>,
    network: NetworkKind,
}

impl Bootstrapper {
    /// Runs on testnet unless switched with [`Bootstrapper::with_network`].
    pub fn new(
        dialer: Arc<dyn ChainDialer>,
        launcher: Arc<dyn NodeLauncher>,
        prefs: Arc<dyn Preferences>,
    ) -> Self {
        Self {
            dialer,
            launcher,
            prefs,
            network: NetworkKind::Testnet,
        }
    }

    pub fn with_network(mut self, network: NetworkKind) -> Self {
        self.network = network;
        self
    }

    pub fn profile(&self) -> NetworkProfile {
        NetworkProfile::for_kind(self.network)
    }

    /// Starts with the password and endpoint saved by an earlier successful
    /// start. `None` when either is missing.
    pub async fn resume(&self, storage_root: &Path) -> Result<Option<Session>, BootstrapError> {
        let password = self.prefs.string(PASSWORD_KEY)?;
        let endpoint = self.prefs.string(SWAP_ENDPOINT_KEY)?;
        if password.is_empty() || endpoint.is_empty() {
            return Ok(None);
        }
        info!("resuming node with saved rpc endpoint {}", endpoint);
        self.start(storage_root, &password, &endpoint).await.map(Some)
    }

    /// Dials `endpoint` and returns the chain id it serves.
    pub async fn probe_endpoint(&self, endpoint: &str) -> Result<u64, BootstrapError> {
        if endpoint.is_empty() {
            return Err(BootstrapError::BlankEndpoint);
        }
        let client = self.dialer.dial(endpoint).await.map_err(|e| {
            warn!("rpc endpoint: {}", e);
            BootstrapError::EndpointUnreachable(e)
        })?;
        client.chain_id().await.map_err(|e| {
            warn!("rpc endpoint: {}", e);
            BootstrapError::EndpointRejected(e)
        })
    }

    pub async fn start(
        &self,
        storage_root: &Path,
        password: &str,
        rpc_endpoint: &str,
    ) -> Result<Session, BootstrapError> {
        if password.is_empty() {
            return Err(BootstrapError::BlankPassword);
        }

        let profile = self.profile();
        let chain_id = self.probe_endpoint(rpc_endpoint).await?;
        if chain_id != profile.chain_id {
            warn!(
                "rpc endpoint {} serves chain {}, expected {}",
                rpc_endpoint, chain_id, profile.chain_id
            );
            return Err(BootstrapError::WrongChain {
                expected: profile.chain_id,
                actual: chain_id,
            });
        }

        let config = NodeStartConfig::new(storage_root, rpc_endpoint, &profile);
        info!(
            "starting node on {:?} (chain {}, network {})",
            profile.kind, profile.chain_id, profile.network_id
        );
        let node = match self.launcher.start(&config, password).await {
            Ok(node) => node,
            Err(source) => {
                error!("node failed to start: {}", source);
                return Err(self.recover(storage_root, password, source).await);
            }
        };

        if let Err(e) = self
            .prefs
            .set_all(&[(PASSWORD_KEY, password), (SWAP_ENDPOINT_KEY, rpc_endpoint)])
        {
            error!("failed to persist bootstrap preferences: {}", e);
            if let Err(e) = node.shutdown().await {
                warn!("failed to shut down node: {}", e);
            }
            return Err(e.into());
        }

        let session = Session::new(node, profile, self.prefs.clone(), storage_root);
        info!("node started with address {:?}", session.address());
        Ok(session)
    }

    async fn recover(
        &self,
        storage_root: &Path,
        password: &str,
        source: anyhow::Error,
    ) -> BootstrapError {
        match self.launcher.recover_address(storage_root, password).await {
            Ok(address) => {
                info!("recovered node address {:?}", address);
                BootstrapError::NodeStartFailed { address, source }
            }
            Err(recovery) => {
                warn!("failed to recover node address: {}", recovery);
                BootstrapError::RecoveryFailed { source, recovery }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PreferencesError;
    use crate::mock::{FailingPreferences, MockDialer, MockLauncher, MockNode};
    use crate::node::StorageNode;
    use crate::storage::MemoryPreferences;
    use ethers::types::Address;

    fn bootstrapper(
        dialer: &Arc<MockDialer>,
        launcher: &Arc<MockLauncher>,
        prefs: &MemoryPreferences,
    ) -> Bootstrapper {
        Bootstrapper::new(dialer.clone(), launcher.clone(), Arc::new(prefs.clone()))
    }

    #[tokio::test]
    async fn blank_password_contacts_nobody() {
        let dialer = Arc::new(MockDialer::serving(5));
        let launcher = Arc::new(MockLauncher::starting(MockNode::new()));
        let prefs = MemoryPreferences::new();

        let err = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "", "http://rpc")
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::BlankPassword));
        assert!(err.is_blank_input());
        assert_eq!(dialer.dials(), 0);
        assert_eq!(launcher.starts(), 0);
        assert!(prefs.snapshot().is_empty());
    }

    #[tokio::test]
    async fn blank_endpoint_is_rejected_before_dialing() {
        let dialer = Arc::new(MockDialer::serving(5));
        let launcher = Arc::new(MockLauncher::starting(MockNode::new()));
        let prefs = MemoryPreferences::new();

        let err = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "secret123", "")
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::BlankEndpoint));
        assert_eq!(dialer.dials(), 0);
    }

    #[tokio::test]
    async fn unreachable_endpoint() {
        let dialer = Arc::new(MockDialer::unreachable("connection refused"));
        let launcher = Arc::new(MockLauncher::starting(MockNode::new()));
        let prefs = MemoryPreferences::new();

        let err = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "secret123", "http://rpc")
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::EndpointUnreachable(_)));
        assert_eq!(err.to_string(), "rpc endpoint is invalid or not reachable");
        assert_eq!(launcher.starts(), 0);
    }

    #[tokio::test]
    async fn endpoint_failing_chain_id_query() {
        let dialer = Arc::new(MockDialer::rejecting("method not found"));
        let launcher = Arc::new(MockLauncher::starting(MockNode::new()));
        let prefs = MemoryPreferences::new();

        let err = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "secret123", "http://rpc")
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::EndpointRejected(_)));
        assert_eq!(err.to_string(), "rpc endpoint: method not found");
        assert_eq!(launcher.starts(), 0);
    }

    #[tokio::test]
    async fn wrong_chain_persists_nothing() {
        let dialer = Arc::new(MockDialer::serving(100));
        let launcher = Arc::new(MockLauncher::starting(MockNode::new()));
        let prefs = MemoryPreferences::new();

        let err = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "secret123", "http://rpc")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::WrongChain {
                expected: 5,
                actual: 100
            }
        ));
        assert_eq!(dialer.chain_id_queries(), 1);
        assert_eq!(launcher.starts(), 0);
        assert_eq!(prefs.get(SWAP_ENDPOINT_KEY).unwrap(), None);
    }

    #[tokio::test]
    async fn mainnet_profile_expects_chain_100() {
        let dialer = Arc::new(MockDialer::serving(100));
        let launcher = Arc::new(MockLauncher::starting(MockNode::new()));
        let prefs = MemoryPreferences::new();

        let session = bootstrapper(&dialer, &launcher, &prefs)
            .with_network(NetworkKind::Mainnet)
            .start(Path::new("/bee"), "secret123", "http://gnosis")
            .await
            .unwrap();

        assert_eq!(session.profile().chain_id, 100);
        let config = launcher.last_config().unwrap();
        assert_eq!(config.network_id(), 1);
        assert_eq!(config.profile, NetworkProfile::mainnet());
        assert_eq!(config.swap_endpoint, "http://gnosis");
    }

    #[tokio::test]
    async fn success_persists_password_and_endpoint() {
        let dialer = Arc::new(MockDialer::serving(5));
        let node = MockNode::new();
        let launcher = Arc::new(MockLauncher::starting(node.clone()));
        let prefs = MemoryPreferences::new();

        let session = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "secret123", "http://rpc")
            .await
            .unwrap();

        assert!(session.is_live());
        assert_eq!(session.address(), node.address());
        assert_eq!(session.storage_root(), Path::new("/bee"));
        assert_eq!(launcher.last_password().as_deref(), Some("secret123"));
        assert_eq!(prefs.string(PASSWORD_KEY).unwrap(), "secret123");
        assert_eq!(prefs.string(SWAP_ENDPOINT_KEY).unwrap(), "http://rpc");
        assert_eq!(dialer.chain_id_queries(), 1);
    }

    #[tokio::test]
    async fn started_node_is_shut_down_when_credentials_cannot_be_saved() {
        let node = MockNode::new();
        let dialer = Arc::new(MockDialer::serving(5));
        let launcher = Arc::new(MockLauncher::starting(node.clone()));
        let prefs = FailingPreferences::default();

        let err = Bootstrapper::new(dialer, launcher.clone(), Arc::new(prefs.clone()))
            .start(Path::new("/bee"), "secret123", "http://rpc")
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            BootstrapError::Preferences(PreferencesError::Poisoned)
        ));
        assert_eq!(launcher.starts(), 1);
        assert_eq!(prefs.rejected_writes(), 1);
        assert_eq!(node.calls().shutdowns, 1);
    }

    #[tokio::test]
    async fn failed_start_recovers_address_and_leaves_store_untouched() {
        let dialer = Arc::new(MockDialer::serving(5));
        let recovered = Address::repeat_byte(0x42);
        let launcher = Arc::new(
            MockLauncher::failing("chequebook deployment failed").recovering(recovered),
        );
        let prefs = MemoryPreferences::new();
        prefs
            .set_all(&[(PASSWORD_KEY, "old"), (SWAP_ENDPOINT_KEY, "http://old")])
            .unwrap();
        let before = prefs.snapshot();

        let err = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "secret123", "http://rpc")
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::NodeStartFailed { .. }));
        assert_eq!(err.address(), Some(recovered));
        assert!(err.to_string().contains("chequebook deployment failed"));
        assert_eq!(prefs.snapshot(), before);
    }

    #[tokio::test]
    async fn failed_start_without_recoverable_address() {
        let dialer = Arc::new(MockDialer::serving(5));
        let launcher = Arc::new(MockLauncher::failing("keystore locked"));
        let prefs = MemoryPreferences::new();

        let err = bootstrapper(&dialer, &launcher, &prefs)
            .start(Path::new("/bee"), "secret123", "http://rpc")
            .await
            .unwrap_err();

        assert!(matches!(err, BootstrapError::RecoveryFailed { .. }));
        assert_eq!(err.address(), None);
        assert_eq!(err.to_string(), "failed to start node: keystore locked");
        assert!(prefs.snapshot().is_empty());
    }

    #[tokio::test]
    async fn resume_requires_saved_password_and_endpoint() {
        let dialer = Arc::new(MockDialer::serving(5));
        let launcher = Arc::new(MockLauncher::starting(MockNode::new()));
        let prefs = MemoryPreferences::new();
        let bootstrapper = bootstrapper(&dialer, &launcher, &prefs);

        prefs.set(SWAP_ENDPOINT_KEY, "http://rpc").unwrap();
        assert!(bootstrapper.resume(Path::new("/bee")).await.unwrap().is_none());
        assert_eq!(dialer.dials(), 0);

        prefs.set(PASSWORD_KEY, "secret123").unwrap();
        let session = bootstrapper.resume(Path::new("/bee")).await.unwrap();
        assert!(session.is_some());
        assert_eq!(launcher.last_password().as_deref(), Some("secret123"));
    }
}
