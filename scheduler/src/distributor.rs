use std::sync::Arc;

use async_trait::async_trait;

use dispatch_core::{Agent, AgentStore, Distributor, Result};

/// Production distributor: delegates the atomic oldest-Idle claim to the
/// agent store. Everything interesting (row locking, skip-locked claim)
/// happens behind [`AgentStore::claim_agent`]; this type exists so the
/// scheduler depends on the capability, not on the store.
pub struct StoreDistributor {
    agents: Arc<dyn AgentStore>,
}

impl StoreDistributor {
    pub fn new(agents: Arc<dyn AgentStore>) -> Self {
        Self { agents }
    }
}

#[async_trait]
impl Distributor for StoreDistributor {
    async fn distribute(&self, project_id: &str, role: &str) -> Result<Option<Agent>> {
        let claimed = self.agents.claim_agent(project_id, role).await?;
        match &claimed {
            Some(agent) => {
                tracing::debug!(agent_id = agent.id, project_id, role, "claimed idle agent");
            }
            None => {
                tracing::debug!(project_id, role, "no idle agent to claim");
            }
        }
        Ok(claimed)
    }
}
