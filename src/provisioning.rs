use super::config::{self, ProvisioningSettings, MAX_STAMP_DEPTH, MIN_STAMP_DEPTH};
use super::error::ProvisioningError;
use super::node::{PostageBatch, StorageNode};
use super::session::Session;
use super::storage::{self, Selection};
use async_trait::async_trait;
use ethers::types::{H256, U256};
use log::{debug, error, info};
use std::{sync::Arc, time::Duration};
use tokio::time;

/// Waits until a chequebook withdrawal has landed and the node has
/// accounted for it.
#[async_trait]
pub trait Settlement: Send + Sync {
    async fn wait_for(&self, tx: H256);
}

/// Waits a fixed amount of time regardless of the transaction.
#[derive(Debug, Clone, Copy)]
pub struct FixedDelay(pub Duration);

#[async_trait]
impl Settlement for FixedDelay {
    async fn wait_for(&self, tx: H256) {
        debug!("waiting {:?} for withdrawal {:?} to settle", self.0, tx);
        time::sleep(self.0).await;
    }
}

/// Outcome of [`Provisioner::ensure_provisioned`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provisioned {
    /// The cached selection matches a live batch.
    Selected(PostageBatch),
    /// Batches exist but none is selected; the user has to pick one.
    SelectionRequired { available: Vec<PostageBatch> },
    /// There were no batches, so the chequebook was emptied into a new one.
    Purchased {
        batch: PostageBatch,
        withdrawal: H256,
    },
}

impl Provisioned {
    /// The batch uploads will use, if any.
    pub fn batch(&self) -> Option<&PostageBatch> {
        match self {
            Provisioned::Selected(batch) | Provisioned::Purchased { batch, .. } => Some(batch),
            Provisioned::SelectionRequired { .. } => None,
        }
    }
}

/// Makes sure a node holds a postage batch before it uploads, and exposes
/// the chequebook and stamp actions behind that.
pub struct Provisioner {
    settings: ProvisioningSettings,
    settlement: Arc<dyn Settlement>,
}

impl Provisioner {
    pub fn new(settings: ProvisioningSettings) -> Self {
        let settlement = Arc::new(FixedDelay(settings.settlement_delay()));
        Self {
            settings,
            settlement,
        }
    }

    pub fn with_settlement(mut self, settlement: Arc<dyn Settlement>) -> Self {
        self.settlement = settlement;
        self
    }

    pub fn settings(&self) -> &ProvisioningSettings {
        &self.settings
    }

    fn node(session: &Session) -> Result<Arc<dyn StorageNode>, ProvisioningError> {
        session.node().ok_or(ProvisioningError::NodeUnavailable)
    }

    pub async fn batches(&self, session: &Session) -> Result<Vec<PostageBatch>, ProvisioningError> {
        Self::node(session)?
            .batches()
            .await
            .map_err(ProvisioningError::ListFailed)
    }

    /// Safe to call repeatedly: with a valid selection in place it only
    /// lists batches. Concurrent calls are not serialized.
    pub async fn ensure_provisioned(
        &self,
        session: &Session,
    ) -> Result<Provisioned, ProvisioningError> {
        let node = Self::node(session)?;
        let batches = node.batches().await.map_err(ProvisioningError::ListFailed)?;

        if !batches.is_empty() {
            return match resolve_selection(session, &batches)? {
                Some(batch) => {
                    debug!("using selected stamp {}", batch.id.short());
                    Ok(Provisioned::Selected(batch))
                }
                None => {
                    info!("{} stamps available, none selected", batches.len());
                    Ok(Provisioned::SelectionRequired { available: batches })
                }
            };
        }

        self.auto_fund(session, node.as_ref()).await
    }

    async fn auto_fund(
        &self,
        session: &Session,
        node: &dyn StorageNode,
    ) -> Result<Provisioned, ProvisioningError> {
        let amount = self.settings.amount()?;
        let depth = self.settings.depth()?;

        let balance = node
            .chequebook_balance()
            .await
            .map_err(ProvisioningError::BalanceFailed)?;
        if balance.is_zero() {
            return Err(ProvisioningError::InsufficientFunds {
                balance,
                required: U256::one(),
            });
        }

        info!("withdrawing {} from chequebook", balance);
        let withdrawal = node.chequebook_withdraw(balance).await.map_err(|e| {
            error!("chequebook withdraw failed: {}", e);
            ProvisioningError::WithdrawalFailed(e)
        })?;
        info!("chequebook withdraw transaction : {:?}", withdrawal);

        self.settlement.wait_for(withdrawal).await;
        // the session may have been shut down during the wait
        let node = Self::node(session)?;

        info!("buying stamp (amount {}, depth {})", amount, depth);
        let id = node
            .buy_stamp(amount, depth, "", false)
            .await
            .map_err(|e| {
                error!("stamp purchase failed: {}", e);
                ProvisioningError::PurchaseFailed(e)
            })?;
        let batch = PostageBatch { id, depth };
        store(session, Some(&batch))?;
        info!("bought stamp {}", batch.id.short());

        Ok(Provisioned::Purchased { batch, withdrawal })
    }

    /// The selected batch, if it is still live.
    pub async fn selected(
        &self,
        session: &Session,
    ) -> Result<Option<PostageBatch>, ProvisioningError> {
        let batches = self.batches(session).await?;
        resolve_selection(session, &batches)
    }

    /// Explicit pick by display or hex id. An empty `choice` clears the
    /// selection.
    pub async fn select(
        &self,
        session: &Session,
        choice: &str,
    ) -> Result<Option<PostageBatch>, ProvisioningError> {
        if choice.is_empty() {
            store(session, None)?;
            return Ok(None);
        }
        let batches = self.batches(session).await?;
        let batch = batches
            .into_iter()
            .find(|b| b.id.matches_prefix(choice))
            .ok_or_else(|| {
                ProvisioningError::InvalidSelection(format!("no stamp matches {}", choice))
            })?;
        store(session, Some(&batch))?;
        Ok(Some(batch))
    }

    /// Interactive withdrawal. Unlike the automatic path this enforces a
    /// minimum amount.
    pub async fn withdraw(
        &self,
        session: &Session,
        amount: U256,
    ) -> Result<H256, ProvisioningError> {
        let min = self.settings.min_withdrawal()?;
        let node = Self::node(session)?;
        let balance = node
            .chequebook_balance()
            .await
            .map_err(ProvisioningError::BalanceFailed)?;
        if amount < min || amount > balance {
            return Err(ProvisioningError::InsufficientFunds {
                balance,
                required: amount.max(min),
            });
        }
        info!("withdrawing {} from chequebook", amount);
        node.chequebook_withdraw(amount)
            .await
            .map_err(ProvisioningError::WithdrawalFailed)
    }

    /// Interactive purchase with the amount and depth as typed by the user.
    /// Does not change the selection.
    pub async fn buy(
        &self,
        session: &Session,
        amount: &str,
        depth: &str,
    ) -> Result<PostageBatch, ProvisioningError> {
        let amount = config::parse_amount(amount)?;
        let depth = config::parse_depth(depth)?;
        if !(MIN_STAMP_DEPTH..=MAX_STAMP_DEPTH).contains(&depth) {
            return Err(ProvisioningError::InvalidSelection(format!(
                "depth {} outside {}..={}",
                depth, MIN_STAMP_DEPTH, MAX_STAMP_DEPTH
            )));
        }
        let node = Self::node(session)?;
        info!("buying stamp (amount {}, depth {})", amount, depth);
        let id = node
            .buy_stamp(amount, depth, "", false)
            .await
            .map_err(ProvisioningError::PurchaseFailed)?;
        Ok(PostageBatch { id, depth })
    }
}

fn resolve_selection(
    session: &Session,
    batches: &[PostageBatch],
) -> Result<Option<PostageBatch>, ProvisioningError> {
    let selection = match storage::load_selection(session.preferences())? {
        Some(selection) => selection,
        None => return Ok(None),
    };
    Ok(batches
        .iter()
        .find(|b| b.id.matches_prefix(&selection.batch))
        .cloned())
}

fn store(session: &Session, batch: Option<&PostageBatch>) -> Result<(), ProvisioningError> {
    let selection = batch.map(|b| Selection {
        display: b.id.short(),
        batch: b.id.to_hex(),
    });
    storage::store_selection(session.preferences(), selection.as_ref())?;
    Ok(())
}
