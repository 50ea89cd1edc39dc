use super::error::{ConfigError, ProvisioningError};
use ethers::types::U256;
use libp2p::Multiaddr;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

pub const TESTNET_CHAIN_ID: u64 = 5;
pub const MAINNET_CHAIN_ID: u64 = 100;

pub const TESTNET_NETWORK_ID: u64 = 10;
pub const MAINNET_NETWORK_ID: u64 = 1;

pub const MAINNET_BOOTNODES: &[&str] = &[
    "/ip4/142.132.198.19/tcp/32225/p2p/16Uiu2HAmRPHcJupNaUivskPocWKwLmpV2ApXkawesPAaJXv67y4b",
    "/ip4/142.132.208.116/tcp/32400/p2p/16Uiu2HAmJeGwCSzWo3mkRTsRd3fzxf7Fk1hkJ9dDkXmkxpjoNPmH",
    "/ip4/142.132.198.150/tcp/32259/p2p/16Uiu2HAmCvdVXazhxwCJbnqBqkB7pot7o4RbggTZVN7VrUYinxBx",
];

pub const TESTNET_BOOTNODES: &[&str] =
    &["/ip4/65.108.101.3/tcp/32000/p2p/16Uiu2HAmBRwS1SF79jEz8dDNfdqQvUXophexSbE5PDxLCxVEuB38"];

pub const LISTEN_ADDR: &str = ":6969";
pub const WELCOME_MESSAGE: &str = "welcome from bee-lite";
pub const SWAP_INITIAL_DEPOSIT: &str = "10000000000000000";
pub const PAYMENT_THRESHOLD: &str = "100000000";
pub const BLOCK_TIME_SECS: u64 = 5;

pub const DB_OPEN_FILES_LIMIT: u64 = 50;
pub const DB_WRITE_BUFFER_SIZE: u64 = 32 * 1024 * 1024;
pub const DB_BLOCK_CACHE_CAPACITY: u64 = 32 * 1024 * 1024;

/// Stamp depth bounds offered by the interactive purchase form.
pub const MIN_STAMP_DEPTH: u8 = 18;
pub const MAX_STAMP_DEPTH: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkKind {
    Testnet,
    Mainnet,
}

impl Default for NetworkKind {
    fn default() -> Self {
        NetworkKind::Testnet
    }
}

/// Chain id, network id and bootnodes always travel together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkProfile {
    pub kind: NetworkKind,
    pub chain_id: u64,
    pub network_id: u64,
    pub bootnodes: Vec<Multiaddr>,
    pub mainnet: bool,
}

impl NetworkProfile {
    pub fn testnet() -> Self {
        Self {
            kind: NetworkKind::Testnet,
            chain_id: TESTNET_CHAIN_ID,
            network_id: TESTNET_NETWORK_ID,
            bootnodes: parse_bootnodes(TESTNET_BOOTNODES),
            // the node options always run with the mainnet flag set
            mainnet: true,
        }
    }

    pub fn mainnet() -> Self {
        Self {
            kind: NetworkKind::Mainnet,
            chain_id: MAINNET_CHAIN_ID,
            network_id: MAINNET_NETWORK_ID,
            bootnodes: parse_bootnodes(MAINNET_BOOTNODES),
            mainnet: true,
        }
    }

    pub fn for_kind(kind: NetworkKind) -> Self {
        match kind {
            NetworkKind::Testnet => Self::testnet(),
            NetworkKind::Mainnet => Self::mainnet(),
        }
    }
}

fn parse_bootnodes(addrs: &[&str]) -> Vec<Multiaddr> {
    addrs
        .iter()
        .filter_map(|addr| match addr.parse::<Multiaddr>() {
            Ok(addr) => Some(addr),
            Err(e) => {
                log::error!("invalid bootnode address {}: {}", addr, e);
                None
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbTuning {
    pub open_files_limit: u64,
    pub write_buffer_size: u64,
    pub block_cache_capacity: u64,
    pub disable_seeks_compaction: bool,
}

impl Default for DbTuning {
    fn default() -> Self {
        Self {
            open_files_limit: DB_OPEN_FILES_LIMIT,
            write_buffer_size: DB_WRITE_BUFFER_SIZE,
            block_cache_capacity: DB_BLOCK_CACHE_CAPACITY,
            disable_seeks_compaction: false,
        }
    }
}

/// Options handed to the node launcher. The password is passed separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStartConfig {
    pub keystore_dir: PathBuf,
    pub data_dir: PathBuf,
    pub listen_addr: String,
    pub welcome_message: String,
    pub swap_endpoint: String,
    pub swap_initial_deposit: String,
    pub swap_enable: bool,
    pub chequebook_enable: bool,
    pub chain_enable: bool,
    pub full_node: bool,
    pub warmup_time: Duration,
    pub block_time_secs: u64,
    pub payment_threshold: String,
    pub use_postage_snapshot: bool,
    pub profile: NetworkProfile,
    pub db: DbTuning,
    pub retrieval_caching: bool,
}

impl NodeStartConfig {
    /// Keystore and data share `storage_root`.
    pub fn new(storage_root: &Path, swap_endpoint: &str, profile: &NetworkProfile) -> Self {
        Self {
            keystore_dir: storage_root.to_path_buf(),
            data_dir: storage_root.to_path_buf(),
            listen_addr: LISTEN_ADDR.to_string(),
            welcome_message: WELCOME_MESSAGE.to_string(),
            swap_endpoint: swap_endpoint.to_string(),
            swap_initial_deposit: SWAP_INITIAL_DEPOSIT.to_string(),
            swap_enable: true,
            chequebook_enable: true,
            chain_enable: true,
            full_node: true,
            warmup_time: Duration::ZERO,
            block_time_secs: BLOCK_TIME_SECS,
            payment_threshold: PAYMENT_THRESHOLD.to_string(),
            use_postage_snapshot: false,
            profile: profile.clone(),
            db: DbTuning::default(),
            retrieval_caching: true,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.profile.chain_id
    }

    pub fn network_id(&self) -> u64 {
        self.profile.network_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningSettings {
    /// Per-chunk amount for auto-purchased stamps, in PLUR.
    pub stamp_amount: String,
    pub stamp_depth: String,
    pub settlement_delay_secs: u64,
    /// Smallest amount the interactive withdraw action accepts, in wei.
    pub min_interactive_withdrawal: String,
}

impl Default for ProvisioningSettings {
    fn default() -> Self {
        Self {
            stamp_amount: "100000000".to_string(),
            stamp_depth: "22".to_string(),
            settlement_delay_secs: 30,
            min_interactive_withdrawal: "1000000000000000".to_string(),
        }
    }
}

impl ProvisioningSettings {
    pub fn amount(&self) -> Result<U256, ProvisioningError> {
        parse_amount(&self.stamp_amount)
    }

    pub fn depth(&self) -> Result<u8, ProvisioningError> {
        parse_depth(&self.stamp_depth)
    }

    pub fn settlement_delay(&self) -> Duration {
        Duration::from_secs(self.settlement_delay_secs)
    }

    pub fn min_withdrawal(&self) -> Result<U256, ProvisioningError> {
        parse_amount(&self.min_interactive_withdrawal)
    }
}

pub fn parse_amount(amount: &str) -> Result<U256, ProvisioningError> {
    U256::from_dec_str(amount.trim())
        .map_err(|_| ProvisioningError::InvalidSelection(format!("invalid amount {:?}", amount)))
}

pub fn parse_depth(depth: &str) -> Result<u8, ProvisioningError> {
    depth
        .trim()
        .parse::<u8>()
        .map_err(|e| {
            ProvisioningError::InvalidSelection(format!("invalid depth {:?}: {}", depth, e))
        })
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySettings {
    pub poll_interval_secs: u64,
}

impl Default for TopologySettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
        }
    }
}

impl TopologySettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkKind,
    pub provisioning: ProvisioningSettings,
    pub topology: TopologySettings,
}

impl Settings {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = Self::from_toml_str(&fs::read_to_string(path.as_ref())?)?;
        log::info!("loaded settings from {}", path.as_ref().display());
        Ok(settings)
    }

    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_are_never_mixed() {
        let testnet = NetworkProfile::testnet();
        assert_eq!(testnet.chain_id, 5);
        assert_eq!(testnet.network_id, 10);
        assert_eq!(testnet.bootnodes.len(), TESTNET_BOOTNODES.len());

        let mainnet = NetworkProfile::mainnet();
        assert_eq!(mainnet.chain_id, 100);
        assert_eq!(mainnet.network_id, 1);
        assert_eq!(mainnet.bootnodes.len(), MAINNET_BOOTNODES.len());
        assert!(mainnet.mainnet);

        let config = NodeStartConfig::new(Path::new("/tmp/bee"), "http://rpc", &mainnet);
        assert_eq!(config.chain_id(), 100);
        assert_eq!(config.network_id(), 1);
        assert_eq!(config.profile.bootnodes, mainnet.bootnodes);
    }

    #[test]
    fn constants_do_not_depend_on_profile() {
        let root = Path::new("/data");
        let a = NodeStartConfig::new(root, "http://rpc", &NetworkProfile::testnet());
        let b = NodeStartConfig::new(root, "http://rpc", &NetworkProfile::mainnet());
        assert_eq!(a.db, b.db);
        assert_eq!(a.swap_initial_deposit, "10000000000000000");
        assert_eq!(a.payment_threshold, "100000000");
        assert_eq!(a.listen_addr, b.listen_addr);
        assert_eq!(a.db.write_buffer_size, 32 * 1024 * 1024);
        assert!(a.retrieval_caching);
    }

    #[test]
    fn settings_defaults_and_overrides() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.provisioning.settlement_delay(), Duration::from_secs(30));
        assert_eq!(settings.topology.poll_interval(), Duration::from_secs(5));

        let settings = Settings::from_toml_str(
            r#"
            network = "Mainnet"

            [provisioning]
            stamp_depth = "24"
            settlement_delay_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(settings.network, NetworkKind::Mainnet);
        assert_eq!(settings.provisioning.depth().unwrap(), 24);
        assert_eq!(settings.provisioning.amount().unwrap(), U256::from(100_000_000u64));
    }

    #[test]
    fn malformed_numbers_are_rejected() {
        let settings = ProvisioningSettings {
            stamp_amount: "lots".to_string(),
            stamp_depth: "deep".to_string(),
            ..Default::default()
        };
        assert!(matches!(settings.amount(), Err(ProvisioningError::InvalidSelection(_))));
        assert!(matches!(settings.depth(), Err(ProvisioningError::InvalidSelection(_))));
    }
}
