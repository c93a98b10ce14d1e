//! Active bridges grouped by team
//!
//! Owned by whoever runs the bridges. Cancelling a team stops every bridge
//! registered under it and waits for their forwarding tasks to exit.

use super::relay::MessageBridge;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Registry of running bridges keyed by team
#[derive(Default)]
pub struct BridgeRegistry {
    teams: RwLock<HashMap<String, Vec<Arc<MessageBridge>>>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, bridge: Arc<MessageBridge>) {
        let team = bridge.subjects().team().to_string();
        tracing::debug!(team = %team, agent = %bridge.agent(), "Registering bridge");
        self.teams.write().await.entry(team).or_default().push(bridge);
    }

    /// Stop and forget every bridge of `team`. Returns how many were stopped.
    pub async fn cancel_team(&self, team: &str) -> usize {
        let bridges = self.teams.write().await.remove(team).unwrap_or_default();
        let count = bridges.len();
        join_all(bridges.iter().map(|b| b.stop())).await;
        if count > 0 {
            tracing::info!(team = %team, count, "Cancelled team bridges");
        }
        count
    }

    /// Stop every registered bridge.
    pub async fn cancel_all(&self) -> usize {
        let teams: Vec<String> = self.teams.read().await.keys().cloned().collect();
        let mut total = 0;
        for team in teams {
            total += self.cancel_team(&team).await;
        }
        total
    }

    pub async fn bridge_count(&self, team: &str) -> usize {
        self.teams.read().await.get(team).map_or(0, Vec::len)
    }

    pub async fn teams(&self) -> Vec<String> {
        let mut teams: Vec<String> = self.teams.read().await.keys().cloned().collect();
        teams.sort();
        teams
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::AgentRole;
    use crate::bus::MemoryBus;
    use crate::permission::{PermissionGate, PermissionPolicy};
    use crate::process::{ProcessConfig, ProcessManager};
    use crate::protocol::TeamSubjects;

    fn bridge(team: &str, agent: &str, bus: Arc<MemoryBus>) -> Arc<MessageBridge> {
        Arc::new(
            MessageBridge::new(
                agent,
                AgentRole::Delegate,
                TeamSubjects::new(team).unwrap(),
                PermissionGate::new(PermissionPolicy::default()),
                Arc::new(ProcessManager::new(ProcessConfig::default())),
                bus,
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_cancel_team_only_touches_that_team() {
        let bus = Arc::new(MemoryBus::new());
        let registry = BridgeRegistry::new();

        let a1 = bridge("alpha", "one", bus.clone());
        let a2 = bridge("alpha", "two", bus.clone());
        let b1 = bridge("beta", "one", bus.clone());
        for b in [&a1, &a2, &b1] {
            b.start().await.unwrap();
            registry.register(b.clone()).await;
        }
        assert_eq!(registry.teams().await, vec!["alpha", "beta"]);
        assert_eq!(registry.bridge_count("alpha").await, 2);

        assert_eq!(registry.cancel_team("alpha").await, 2);
        assert!(a1.cancel_token().is_cancelled());
        assert!(a2.cancel_token().is_cancelled());
        assert!(!b1.cancel_token().is_cancelled());
        assert_eq!(registry.bridge_count("alpha").await, 0);

        assert_eq!(registry.cancel_team("alpha").await, 0);
        assert_eq!(registry.cancel_all().await, 1);
        assert!(b1.cancel_token().is_cancelled());
        assert!(registry.teams().await.is_empty());
    }
}
