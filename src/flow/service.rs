//! Flow management — CRUD and activation, exposed to the API layer.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::error::{Error, FlowError};
use crate::flow::model::{Flow, Node, validate_nodes};
use crate::store::Store;

/// Partial update of a flow. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct FlowUpdate {
    pub name: Option<String>,
    pub nodes: Option<HashMap<String, Node>>,
    pub active: Option<bool>,
}

/// Owner-facing flow operations. Read-only to the engine.
pub struct FlowService {
    store: Arc<dyn Store>,
}

impl FlowService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Create a flow after validating its node graph. New flows start inactive.
    pub async fn create_flow(
        &self,
        owner_id: Uuid,
        name: &str,
        nodes: HashMap<String, Node>,
    ) -> Result<Flow, Error> {
        validate_nodes(&nodes)?;
        let now = Utc::now();
        let flow = Flow {
            id: Uuid::new_v4(),
            owner_id,
            name: name.to_string(),
            nodes,
            active: false,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_flow(&flow).await?;
        info!(flow_id = %flow.id, owner_id = %owner_id, "Flow created");
        Ok(flow)
    }

    pub async fn update_flow(
        &self,
        owner_id: Uuid,
        flow_id: Uuid,
        update: FlowUpdate,
    ) -> Result<Flow, Error> {
        let mut flow = self.owned_flow(owner_id, flow_id).await?;

        if let Some(name) = update.name {
            flow.name = name;
        }
        if let Some(nodes) = update.nodes {
            validate_nodes(&nodes)?;
            flow.nodes = nodes;
        }
        self.store.update_flow(&flow).await?;

        // Activation last: it flips siblings and must not be lost to the
        // field update above.
        if update.active == Some(true) {
            self.store.set_active_flow(owner_id, flow_id).await?;
            flow.active = true;
        } else if update.active == Some(false) {
            flow.active = false;
            self.store.update_flow(&flow).await?;
        }
        Ok(flow)
    }

    /// Make this the owner's single active flow.
    pub async fn activate_flow(&self, owner_id: Uuid, flow_id: Uuid) -> Result<(), Error> {
        self.owned_flow(owner_id, flow_id).await?;
        self.store.set_active_flow(owner_id, flow_id).await?;
        info!(flow_id = %flow_id, owner_id = %owner_id, "Flow activated");
        Ok(())
    }

    pub async fn get_flow(&self, owner_id: Uuid, flow_id: Uuid) -> Result<Flow, Error> {
        self.owned_flow(owner_id, flow_id).await
    }

    pub async fn list_flows(&self, owner_id: Uuid) -> Result<Vec<Flow>, Error> {
        Ok(self.store.list_flows(owner_id).await?)
    }

    pub async fn delete_flow(&self, owner_id: Uuid, flow_id: Uuid) -> Result<(), Error> {
        self.owned_flow(owner_id, flow_id).await?;
        self.store.delete_flow(flow_id).await?;
        info!(flow_id = %flow_id, "Flow deleted");
        Ok(())
    }

    async fn owned_flow(&self, owner_id: Uuid, flow_id: Uuid) -> Result<Flow, Error> {
        let flow = self
            .store
            .get_flow(flow_id)
            .await?
            .ok_or(FlowError::NotFound { id: flow_id })?;
        if flow.owner_id != owner_id {
            return Err(FlowError::Forbidden { id: flow_id }.into());
        }
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::NodeContent;
    use crate::store::LibSqlStore;

    fn nodes_fixture() -> HashMap<String, Node> {
        let mut nodes = HashMap::new();
        nodes.insert(
            "root".to_string(),
            Node {
                state: "root".into(),
                content: NodeContent::Text("Welcome".into()),
                options: HashMap::new(),
                followup: None,
            },
        );
        nodes
    }

    async fn service() -> FlowService {
        FlowService::new(Arc::new(LibSqlStore::new_memory().await.unwrap()))
    }

    #[tokio::test]
    async fn create_rejects_invalid_graph() {
        let svc = service().await;
        let err = svc
            .create_flow(Uuid::new_v4(), "empty", HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Flow(FlowError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn activate_enforces_single_active_flow() {
        let svc = service().await;
        let owner = Uuid::new_v4();
        let a = svc.create_flow(owner, "a", nodes_fixture()).await.unwrap();
        let b = svc.create_flow(owner, "b", nodes_fixture()).await.unwrap();

        svc.activate_flow(owner, a.id).await.unwrap();
        svc.activate_flow(owner, b.id).await.unwrap();

        let flows = svc.list_flows(owner).await.unwrap();
        let active: Vec<_> = flows.iter().filter(|f| f.active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, b.id);
    }

    #[tokio::test]
    async fn foreign_flow_is_forbidden() {
        let svc = service().await;
        let owner = Uuid::new_v4();
        let flow = svc.create_flow(owner, "a", nodes_fixture()).await.unwrap();

        let err = svc.get_flow(Uuid::new_v4(), flow.id).await.unwrap_err();
        assert!(matches!(err, Error::Flow(FlowError::Forbidden { .. })));
    }

    #[tokio::test]
    async fn update_replaces_nodes_after_validation() {
        let svc = service().await;
        let owner = Uuid::new_v4();
        let flow = svc.create_flow(owner, "a", nodes_fixture()).await.unwrap();

        let mut nodes = nodes_fixture();
        nodes.insert(
            "help".to_string(),
            Node {
                state: "help".into(),
                content: NodeContent::Text("Help".into()),
                options: HashMap::new(),
                followup: None,
            },
        );
        let updated = svc
            .update_flow(
                owner,
                flow.id,
                FlowUpdate {
                    nodes: Some(nodes),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.nodes.len(), 2);
    }
}
