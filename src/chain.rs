use async_trait::async_trait;
use ethers_core::types::U256;
use ethers_providers::{Http, Middleware, Provider};
use std::convert::TryFrom;

/// A connection to a chain RPC endpoint.
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn chain_id(&self) -> anyhow::Result<u64>;
}

/// Opens [`ChainClient`] connections.
#[async_trait]
pub trait ChainDialer: Send + Sync {
    async fn dial(&self, endpoint: &str) -> anyhow::Result<Box<dyn ChainClient>>;
}

/// JSON-RPC over HTTP via `ethers-providers`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthersDialer;

pub struct EthersClient {
    provider: Provider<Http>,
}

#[async_trait]
impl ChainDialer for EthersDialer {
    async fn dial(&self, endpoint: &str) -> anyhow::Result<Box<dyn ChainClient>> {
        let provider = Provider::<Http>::try_from(endpoint)?;
        Ok(Box::new(EthersClient { provider }))
    }
}

#[async_trait]
impl ChainClient for EthersClient {
    async fn chain_id(&self) -> anyhow::Result<u64> {
        narrow_chain_id(self.provider.get_chainid().await?)
    }
}

fn narrow_chain_id(id: U256) -> anyhow::Result<u64> {
    if id.bits() > 64 {
        return Err(anyhow::anyhow!("chain id {} out of range", id));
    }
    Ok(id.as_u64())
}
