//! libSQL backend — async `Store` trait implementation.
//!
//! Supports local file and in-memory databases. All timestamps are written
//! as RFC 3339 text.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info};
use uuid::Uuid;

use crate::blast::model::{Blast, BlastStatus, ComponentParams};
use crate::error::DatabaseError;
use crate::flow::model::{Flow, Node};
use crate::store::migrations;
use crate::store::traits::{
    ChannelAccount, ChatLogEntry, ChatState, Direction, QuotaAccount, Store,
};
use crate::template::{Template, TemplateStatus};

/// libSQL store backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlStore {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlStore {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        info!(path = %path.display(), "Database opened");
        Ok(store)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let store = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(&store.conn).await?;
        Ok(store)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

fn query_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(e.to_string())
}

/// Parse an RFC 3339 datetime string written by this backend.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("invalid datetime {s:?}: {e}")))
}

fn parse_optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    s.map(|s| parse_datetime(&s)).transpose()
}

fn parse_uuid(s: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(s)
        .map_err(|e| DatabaseError::Serialization(format!("invalid uuid {s:?}: {e}")))
}

fn nodes_to_json(nodes: &HashMap<String, Node>) -> Result<String, DatabaseError> {
    serde_json::to_string(nodes).map_err(|e| DatabaseError::Serialization(e.to_string()))
}

fn row_to_flow(row: &libsql::Row) -> Result<Flow, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let owner: String = row.get(1).map_err(query_err)?;
    let name: String = row.get(2).map_err(query_err)?;
    let nodes_json: String = row.get(3).map_err(query_err)?;
    let active: i64 = row.get(4).map_err(query_err)?;
    let created: String = row.get(5).map_err(query_err)?;
    let updated: String = row.get(6).map_err(query_err)?;

    let nodes: HashMap<String, Node> = serde_json::from_str(&nodes_json)
        .map_err(|e| DatabaseError::Serialization(format!("flow {id} nodes: {e}")))?;

    Ok(Flow {
        id: parse_uuid(&id)?,
        owner_id: parse_uuid(&owner)?,
        name,
        nodes,
        active: active != 0,
        created_at: parse_datetime(&created)?,
        updated_at: parse_datetime(&updated)?,
    })
}

fn row_to_blast(row: &libsql::Row) -> Result<Blast, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let owner: String = row.get(1).map_err(query_err)?;
    let template: String = row.get(2).map_err(query_err)?;
    let name: String = row.get(3).map_err(query_err)?;
    let status: String = row.get(4).map_err(query_err)?;
    let recipients_json: String = row.get(5).map_err(query_err)?;
    let parameters_json: String = row.get(6).map_err(query_err)?;
    let recipient_params_json: String = row.get(7).map_err(query_err)?;
    let scheduled_at: Option<String> = row.get(8).ok();
    let total: i64 = row.get(9).map_err(query_err)?;
    let sent: i64 = row.get(10).map_err(query_err)?;
    let failed: i64 = row.get(11).map_err(query_err)?;
    let completed_at: Option<String> = row.get(12).ok();
    let created: String = row.get(13).map_err(query_err)?;
    let updated: String = row.get(14).map_err(query_err)?;

    let recipients: Vec<String> = serde_json::from_str(&recipients_json)
        .map_err(|e| DatabaseError::Serialization(format!("blast {id} recipients: {e}")))?;
    let parameters: ComponentParams = serde_json::from_str(&parameters_json)
        .map_err(|e| DatabaseError::Serialization(format!("blast {id} parameters: {e}")))?;
    let recipient_parameters: HashMap<String, ComponentParams> =
        serde_json::from_str(&recipient_params_json).map_err(|e| {
            DatabaseError::Serialization(format!("blast {id} recipient parameters: {e}"))
        })?;

    Ok(Blast {
        id: parse_uuid(&id)?,
        owner_id: parse_uuid(&owner)?,
        template_id: parse_uuid(&template)?,
        name,
        status: BlastStatus::parse(&status).unwrap_or(BlastStatus::Draft),
        recipients,
        parameters,
        recipient_parameters,
        scheduled_at: parse_optional_datetime(scheduled_at)?,
        total_recipients: total as u32,
        sent_count: sent as u32,
        failed_count: failed as u32,
        completed_at: parse_optional_datetime(completed_at)?,
        created_at: parse_datetime(&created)?,
        updated_at: parse_datetime(&updated)?,
    })
}

fn row_to_template(row: &libsql::Row) -> Result<Template, DatabaseError> {
    let id: String = row.get(0).map_err(query_err)?;
    let owner: String = row.get(1).map_err(query_err)?;
    let name: String = row.get(2).map_err(query_err)?;
    let language: String = row.get(3).map_err(query_err)?;
    let status: String = row.get(4).map_err(query_err)?;
    let remote_id: Option<String> = row.get(5).ok();
    let rejection_reason: Option<String> = row.get(6).ok();
    let created: String = row.get(7).map_err(query_err)?;
    let updated: String = row.get(8).map_err(query_err)?;

    Ok(Template {
        id: parse_uuid(&id)?,
        owner_id: parse_uuid(&owner)?,
        name,
        language,
        status: TemplateStatus::parse(&status).unwrap_or(TemplateStatus::Pending),
        remote_id,
        rejection_reason,
        created_at: parse_datetime(&created)?,
        updated_at: parse_datetime(&updated)?,
    })
}

const FLOW_COLUMNS: &str = "id, owner_id, name, nodes, active, created_at, updated_at";
const BLAST_COLUMNS: &str = "id, owner_id, template_id, name, status, recipients, parameters, \
     recipient_parameters, scheduled_at, total_recipients, sent_count, failed_count, \
     completed_at, created_at, updated_at";
const TEMPLATE_COLUMNS: &str =
    "id, owner_id, name, language, status, remote_id, rejection_reason, created_at, updated_at";

#[async_trait]
impl Store for LibSqlStore {
    // ── Flows ───────────────────────────────────────────────────────

    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO flows (id, owner_id, name, nodes, active, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    flow.id.to_string(),
                    flow.owner_id.to_string(),
                    flow.name.clone(),
                    nodes_to_json(&flow.nodes)?,
                    flow.active as i64,
                    flow.created_at.to_rfc3339(),
                    flow.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        debug!(id = %flow.id, "Flow inserted");
        Ok(())
    }

    async fn update_flow(&self, flow: &Flow) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE flows SET name = ?1, nodes = ?2, active = ?3, updated_at = ?4 WHERE id = ?5",
                params![
                    flow.name.clone(),
                    nodes_to_json(&flow.nodes)?,
                    flow.active as i64,
                    Utc::now().to_rfc3339(),
                    flow.id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {FLOW_COLUMNS} FROM flows WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_flow(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_flows(&self, owner_id: Uuid) -> Result<Vec<Flow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {FLOW_COLUMNS} FROM flows WHERE owner_id = ?1 ORDER BY created_at"
                ),
                params![owner_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        let mut flows = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            flows.push(row_to_flow(&row)?);
        }
        Ok(flows)
    }

    async fn get_active_flow(&self, owner_id: Uuid) -> Result<Option<Flow>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {FLOW_COLUMNS} FROM flows WHERE owner_id = ?1 AND active = 1 LIMIT 1"
                ),
                params![owner_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_flow(&row)?)),
            None => Ok(None),
        }
    }

    async fn set_active_flow(&self, owner_id: Uuid, flow_id: Uuid) -> Result<(), DatabaseError> {
        // One statement so sibling deactivation cannot be observed half-done.
        let affected = self
            .conn()
            .execute(
                "UPDATE flows SET active = CASE WHEN id = ?1 THEN 1 ELSE 0 END, updated_at = ?2
                 WHERE owner_id = ?3",
                params![
                    flow_id.to_string(),
                    Utc::now().to_rfc3339(),
                    owner_id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;
        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "flow".into(),
                id: flow_id.to_string(),
            });
        }
        Ok(())
    }

    async fn delete_flow(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM flows WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Conversation state ──────────────────────────────────────────

    async fn get_chat_state(
        &self,
        owner_id: Uuid,
        address: &str,
    ) -> Result<Option<ChatState>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT owner_id, address, current_state, created_at, updated_at
                 FROM chat_states WHERE owner_id = ?1 AND address = ?2",
                params![owner_id.to_string(), address],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let owner: String = row.get(0).map_err(query_err)?;
                let address: String = row.get(1).map_err(query_err)?;
                let current_state: String = row.get(2).map_err(query_err)?;
                let created: String = row.get(3).map_err(query_err)?;
                let updated: String = row.get(4).map_err(query_err)?;
                Ok(Some(ChatState {
                    owner_id: parse_uuid(&owner)?,
                    address,
                    current_state,
                    created_at: parse_datetime(&created)?,
                    updated_at: parse_datetime(&updated)?,
                }))
            }
            None => Ok(None),
        }
    }

    async fn upsert_chat_state(
        &self,
        owner_id: Uuid,
        address: &str,
        current_state: &str,
    ) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        self.conn()
            .execute(
                "INSERT INTO chat_states (owner_id, address, current_state, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT (owner_id, address)
                 DO UPDATE SET current_state = excluded.current_state, updated_at = excluded.updated_at",
                params![owner_id.to_string(), address, current_state, now],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Chat log ────────────────────────────────────────────────────

    async fn insert_chat_log(
        &self,
        owner_id: Uuid,
        address: &str,
        direction: Direction,
        content: &str,
        state_label: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO chat_logs (id, owner_id, address, direction, content, state_label, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    Uuid::new_v4().to_string(),
                    owner_id.to_string(),
                    address,
                    direction.as_str(),
                    content,
                    state_label,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_chat_logs(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, owner_id, address, direction, content, state_label, created_at
                 FROM chat_logs WHERE owner_id = ?1
                 ORDER BY created_at DESC LIMIT ?2",
                params![owner_id.to_string(), limit as i64],
            )
            .await
            .map_err(query_err)?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            let id: String = row.get(0).map_err(query_err)?;
            let owner: String = row.get(1).map_err(query_err)?;
            let address: String = row.get(2).map_err(query_err)?;
            let direction: String = row.get(3).map_err(query_err)?;
            let content: String = row.get(4).map_err(query_err)?;
            let state_label: Option<String> = row.get(5).ok();
            let created: String = row.get(6).map_err(query_err)?;
            entries.push(ChatLogEntry {
                id,
                owner_id: parse_uuid(&owner)?,
                address,
                direction: if direction == "OUT" {
                    Direction::Out
                } else {
                    Direction::In
                },
                content,
                state_label,
                created_at: parse_datetime(&created)?,
            });
        }
        Ok(entries)
    }

    // ── Quota ───────────────────────────────────────────────────────

    async fn get_active_quota_account(
        &self,
        owner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaAccount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, owner_id, message_quota, message_used, start_date, end_date, is_active
                 FROM quota_accounts
                 WHERE owner_id = ?1 AND is_active = 1 AND end_date > ?2
                 LIMIT 1",
                params![owner_id.to_string(), now.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => {
                let id: String = row.get(0).map_err(query_err)?;
                let owner: String = row.get(1).map_err(query_err)?;
                let quota: i64 = row.get(2).map_err(query_err)?;
                let used: i64 = row.get(3).map_err(query_err)?;
                let start: String = row.get(4).map_err(query_err)?;
                let end: String = row.get(5).map_err(query_err)?;
                let is_active: i64 = row.get(6).map_err(query_err)?;
                Ok(Some(QuotaAccount {
                    id: parse_uuid(&id)?,
                    owner_id: parse_uuid(&owner)?,
                    message_quota: quota,
                    message_used: used,
                    start_date: parse_datetime(&start)?,
                    end_date: parse_datetime(&end)?,
                    is_active: is_active != 0,
                }))
            }
            None => Ok(None),
        }
    }

    async fn try_deduct_quota(&self, account_id: Uuid, n: u32) -> Result<bool, DatabaseError> {
        // Single conditional update: the check and the increment cannot race.
        let affected = self
            .conn()
            .execute(
                "UPDATE quota_accounts
                 SET message_used = message_used + ?1
                 WHERE id = ?2 AND message_used + ?1 <= message_quota",
                params![n as i64, account_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn insert_quota_account(&self, account: &QuotaAccount) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO quota_accounts
                     (id, owner_id, message_quota, message_used, start_date, end_date, is_active)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    account.id.to_string(),
                    account.owner_id.to_string(),
                    account.message_quota,
                    account.message_used,
                    account.start_date.to_rfc3339(),
                    account.end_date.to_rfc3339(),
                    account.is_active as i64,
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Channel accounts ────────────────────────────────────────────

    async fn get_channel_account(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<ChannelAccount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT owner_id, channel_id, business_id FROM channel_accounts WHERE owner_id = ?1",
                params![owner_id.to_string()],
            )
            .await
            .map_err(query_err)?;
        row_to_channel_account(rows.next().await.map_err(query_err)?)
    }

    async fn get_channel_account_by_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelAccount>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT owner_id, channel_id, business_id FROM channel_accounts WHERE channel_id = ?1",
                params![channel_id],
            )
            .await
            .map_err(query_err)?;
        row_to_channel_account(rows.next().await.map_err(query_err)?)
    }

    async fn upsert_channel_account(&self, account: &ChannelAccount) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "INSERT INTO channel_accounts (owner_id, channel_id, business_id)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT (owner_id)
                 DO UPDATE SET channel_id = excluded.channel_id, business_id = excluded.business_id",
                params![
                    account.owner_id.to_string(),
                    account.channel_id.clone(),
                    account.business_id.clone(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO templates ({TEMPLATE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)"
                ),
                params![
                    template.id.to_string(),
                    template.owner_id.to_string(),
                    template.name.clone(),
                    template.language.clone(),
                    template.status.as_str(),
                    template.remote_id.clone(),
                    template.rejection_reason.clone(),
                    template.created_at.to_rfc3339(),
                    template.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TEMPLATE_COLUMNS} FROM templates WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_template(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_templates_by_status(
        &self,
        status: TemplateStatus,
    ) -> Result<Vec<Template>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TEMPLATE_COLUMNS} FROM templates WHERE status = ?1 ORDER BY created_at"
                ),
                params![status.as_str()],
            )
            .await
            .map_err(query_err)?;
        let mut templates = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            templates.push(row_to_template(&row)?);
        }
        Ok(templates)
    }

    async fn update_template_status(
        &self,
        id: Uuid,
        status: TemplateStatus,
        rejection_reason: Option<&str>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE templates SET status = ?1, rejection_reason = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    status.as_str(),
                    rejection_reason,
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    // ── Blasts ──────────────────────────────────────────────────────

    async fn insert_blast(&self, blast: &Blast) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                &format!(
                    "INSERT INTO blasts ({BLAST_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)"
                ),
                params![
                    blast.id.to_string(),
                    blast.owner_id.to_string(),
                    blast.template_id.to_string(),
                    blast.name.clone(),
                    blast.status.as_str(),
                    serde_json::to_string(&blast.recipients)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    serde_json::to_string(&blast.parameters)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    serde_json::to_string(&blast.recipient_parameters)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    blast.scheduled_at.map(|t| t.to_rfc3339()),
                    blast.total_recipients as i64,
                    blast.sent_count as i64,
                    blast.failed_count as i64,
                    blast.completed_at.map(|t| t.to_rfc3339()),
                    blast.created_at.to_rfc3339(),
                    blast.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(query_err)?;
        debug!(id = %blast.id, status = blast.status.as_str(), "Blast inserted");
        Ok(())
    }

    async fn get_blast(&self, id: Uuid) -> Result<Option<Blast>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {BLAST_COLUMNS} FROM blasts WHERE id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(query_err)?;
        match rows.next().await.map_err(query_err)? {
            Some(row) => Ok(Some(row_to_blast(&row)?)),
            None => Ok(None),
        }
    }

    async fn list_blasts(
        &self,
        owner_id: Uuid,
        status: Option<BlastStatus>,
    ) -> Result<Vec<Blast>, DatabaseError> {
        let mut rows = match status {
            Some(status) => self
                .conn()
                .query(
                    &format!(
                        "SELECT {BLAST_COLUMNS} FROM blasts
                         WHERE owner_id = ?1 AND status = ?2 ORDER BY created_at DESC"
                    ),
                    params![owner_id.to_string(), status.as_str()],
                )
                .await
                .map_err(query_err)?,
            None => self
                .conn()
                .query(
                    &format!(
                        "SELECT {BLAST_COLUMNS} FROM blasts
                         WHERE owner_id = ?1 ORDER BY created_at DESC"
                    ),
                    params![owner_id.to_string()],
                )
                .await
                .map_err(query_err)?,
        };
        let mut blasts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            blasts.push(row_to_blast(&row)?);
        }
        Ok(blasts)
    }

    async fn update_blast(&self, blast: &Blast) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE blasts SET name = ?1, status = ?2, recipients = ?3, parameters = ?4,
                     recipient_parameters = ?5, scheduled_at = ?6, total_recipients = ?7,
                     updated_at = ?8
                 WHERE id = ?9",
                params![
                    blast.name.clone(),
                    blast.status.as_str(),
                    serde_json::to_string(&blast.recipients)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    serde_json::to_string(&blast.parameters)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    serde_json::to_string(&blast.recipient_parameters)
                        .map_err(|e| DatabaseError::Serialization(e.to_string()))?,
                    blast.scheduled_at.map(|t| t.to_rfc3339()),
                    blast.total_recipients as i64,
                    Utc::now().to_rfc3339(),
                    blast.id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn set_blast_status(&self, id: Uuid, status: BlastStatus) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE blasts SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn claim_blast_for_dispatch(&self, id: Uuid) -> Result<bool, DatabaseError> {
        // Conditional claim: two dispatchers racing for one blast cannot
        // both see DRAFT/SCHEDULED.
        let affected = self
            .conn()
            .execute(
                "UPDATE blasts SET status = 'PROCESSING', updated_at = ?1
                 WHERE id = ?2 AND status IN ('DRAFT', 'SCHEDULED')",
                params![Utc::now().to_rfc3339(), id.to_string()],
            )
            .await
            .map_err(query_err)?;
        Ok(affected > 0)
    }

    async fn finalize_blast(
        &self,
        id: Uuid,
        status: BlastStatus,
        sent_count: u32,
        failed_count: u32,
        completed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.conn()
            .execute(
                "UPDATE blasts SET status = ?1, sent_count = ?2, failed_count = ?3,
                     completed_at = ?4, updated_at = ?5
                 WHERE id = ?6",
                params![
                    status.as_str(),
                    sent_count as i64,
                    failed_count as i64,
                    completed_at.to_rfc3339(),
                    Utc::now().to_rfc3339(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(query_err)?;
        Ok(())
    }

    async fn list_due_scheduled_blasts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Blast>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {BLAST_COLUMNS} FROM blasts
                     WHERE status = 'SCHEDULED' AND scheduled_at < ?1
                     ORDER BY scheduled_at"
                ),
                params![now.to_rfc3339()],
            )
            .await
            .map_err(query_err)?;
        let mut blasts = Vec::new();
        while let Some(row) = rows.next().await.map_err(query_err)? {
            blasts.push(row_to_blast(&row)?);
        }
        Ok(blasts)
    }

    async fn delete_blast(&self, id: Uuid) -> Result<(), DatabaseError> {
        self.conn()
            .execute("DELETE FROM blasts WHERE id = ?1", params![id.to_string()])
            .await
            .map_err(query_err)?;
        Ok(())
    }
}

fn row_to_channel_account(
    row: Option<libsql::Row>,
) -> Result<Option<ChannelAccount>, DatabaseError> {
    match row {
        Some(row) => {
            let owner: String = row.get(0).map_err(query_err)?;
            let channel_id: String = row.get(1).map_err(query_err)?;
            let business_id: String = row.get(2).map_err(query_err)?;
            Ok(Some(ChannelAccount {
                owner_id: parse_uuid(&owner)?,
                channel_id,
                business_id,
            }))
        }
        None => Ok(None),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
