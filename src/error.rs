use ethers::types::{Address, U256};
use thiserror::Error;

/// Failures of the preference store itself.
#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("preference store: {0}")]
    Backend(#[from] rocksdb::Error),
    #[error("preference store lock poisoned")]
    Poisoned,
    #[error("stored value for `{key}` is not valid utf-8")]
    Encoding { key: String },
    #[error("stored uploads list is malformed: {0}")]
    Uploads(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Everything that can stop a node from coming up.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("password cannot be blank")]
    BlankPassword,
    #[error("rpc endpoint cannot be blank")]
    BlankEndpoint,
    #[error("rpc endpoint is invalid or not reachable")]
    EndpointUnreachable(#[source] anyhow::Error),
    #[error("rpc endpoint: {0}")]
    EndpointRejected(#[source] anyhow::Error),
    #[error("rpc endpoint serves chain {actual}, expected chain {expected}")]
    WrongChain { expected: u64, actual: u64 },
    /// The node refused to start, but its address could still be derived
    /// from the keystore.
    #[error("failed to start node {address:?}: {source}")]
    NodeStartFailed {
        address: Address,
        #[source]
        source: anyhow::Error,
    },
    /// The node refused to start and the address could not be recovered
    /// either. Displays the start failure.
    #[error("failed to start node: {source}")]
    RecoveryFailed {
        #[source]
        source: anyhow::Error,
        recovery: anyhow::Error,
    },
    #[error(transparent)]
    Preferences(#[from] PreferencesError),
}

impl BootstrapError {
    /// The recovered on-chain identity, when the failure carries one.
    pub fn address(&self) -> Option<Address> {
        match self {
            BootstrapError::NodeStartFailed { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// True for the blank password / endpoint checks that run before any
    /// collaborator is contacted.
    pub fn is_blank_input(&self) -> bool {
        matches!(
            self,
            BootstrapError::BlankPassword | BootstrapError::BlankEndpoint
        )
    }
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    #[error("node is not running")]
    NodeUnavailable,
    #[error("failed to list postage batches: {0}")]
    ListFailed(#[source] anyhow::Error),
    #[error("failed to query chequebook balance: {0}")]
    BalanceFailed(#[source] anyhow::Error),
    #[error("insufficient chequebook funds: balance {balance}, required {required}")]
    InsufficientFunds { balance: U256, required: U256 },
    #[error("chequebook withdrawal failed: {0}")]
    WithdrawalFailed(#[source] anyhow::Error),
    #[error("postage stamp purchase failed: {0}")]
    PurchaseFailed(#[source] anyhow::Error),
    #[error("invalid selection: {0}")]
    InvalidSelection(String),
    #[error(transparent)]
    Preferences(#[from] PreferencesError),
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("node is not running")]
    NodeUnavailable,
    #[error("please select a batch of stamp")]
    SelectionRequired,
    #[error("invalid swarm hash: {0}")]
    InvalidReference(String),
    #[error("content not found: {0}")]
    ContentNotFound(#[source] anyhow::Error),
    #[error("transfer failed: {0}")]
    TransferFailed(#[source] anyhow::Error),
    #[error(transparent)]
    Preferences(#[from] PreferencesError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_failure_displays_start_error() {
        let err = BootstrapError::RecoveryFailed {
            source: anyhow::anyhow!("keystore locked"),
            recovery: anyhow::anyhow!("bad password"),
        };
        assert_eq!(err.to_string(), "failed to start node: keystore locked");
        assert!(err.address().is_none());
    }

    #[test]
    fn start_failure_carries_address() {
        let address = Address::repeat_byte(0xab);
        let err = BootstrapError::NodeStartFailed {
            address,
            source: anyhow::anyhow!("port in use"),
        };
        assert_eq!(err.address(), Some(address));
        assert!(err.to_string().contains("port in use"));
    }

    #[test]
    fn blank_inputs() {
        assert!(BootstrapError::BlankPassword.is_blank_input());
        assert!(BootstrapError::BlankEndpoint.is_blank_input());
        assert!(!BootstrapError::WrongChain {
            expected: 5,
            actual: 100
        }
        .is_blank_input());
    }
}
