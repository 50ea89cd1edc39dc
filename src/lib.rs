//! Bootstraps a single Swarm node against a chain RPC endpoint, keeps it
//! supplied with postage stamps, and polls its view of the network.
//!
//! 1. [`Bootstrapper`] checks the endpoint's chain id, starts the node and
//!    hands back a [`Session`].
//! 2. [`Provisioner`] makes sure the session holds a selected postage batch,
//!    emptying the chequebook into a new one when there is none.
//! 3. [`TopologyPoller`] publishes peer counts while the node runs.
//!
//! The chain, the node and the preference store are reached through the
//! traits in [`chain`], [`node`] and [`storage`].

pub mod bootstrap;
pub mod chain;
pub mod config;
pub mod error;
pub mod mock;
pub mod node;
pub mod provisioning;
pub mod session;
pub mod storage;
pub mod topology;

pub use bootstrap::Bootstrapper;
pub use config::{NetworkKind, NetworkProfile, NodeStartConfig, Settings};
pub use error::{BootstrapError, ContentError, ProvisioningError};
pub use node::{NodeLauncher, StorageNode};
pub use provisioning::{Provisioned, Provisioner};
pub use session::Session;
pub use storage::{Preferences, UploadRecord};
pub use topology::TopologyPoller;
