//! Unified `Store` trait — single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::blast::model::{Blast, BlastStatus};
use crate::error::DatabaseError;
use crate::flow::model::Flow;
use crate::template::{Template, TemplateStatus};

/// Direction of a logged message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
        }
    }
}

/// The last-known position of one counterparty within one owner's active flow.
#[derive(Debug, Clone)]
pub struct ChatState {
    pub owner_id: Uuid,
    pub address: String,
    pub current_state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One logged inbound or outbound message.
#[derive(Debug, Clone)]
pub struct ChatLogEntry {
    pub id: String,
    pub owner_id: Uuid,
    pub address: String,
    pub direction: Direction,
    pub content: String,
    pub state_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An owner's message allotment for one subscription period.
///
/// Owned by the billing subsystem; the gateway only reads it and deducts.
#[derive(Debug, Clone)]
pub struct QuotaAccount {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub message_quota: i64,
    pub message_used: i64,
    pub start_date: DateTime<Utc>,
    pub end_date: DateTime<Utc>,
    pub is_active: bool,
}

/// Provider-side identity of an owner's sending number.
#[derive(Debug, Clone)]
pub struct ChannelAccount {
    pub owner_id: Uuid,
    /// Sender phone-number id used on the messages endpoint.
    pub channel_id: String,
    /// Business account id used on the template endpoints.
    pub business_id: String,
}

/// Backend-agnostic store covering flows, chat state, quota, templates and blasts.
#[async_trait]
pub trait Store: Send + Sync {
    // ── Flows ───────────────────────────────────────────────────────

    async fn insert_flow(&self, flow: &Flow) -> Result<(), DatabaseError>;

    async fn update_flow(&self, flow: &Flow) -> Result<(), DatabaseError>;

    async fn get_flow(&self, id: Uuid) -> Result<Option<Flow>, DatabaseError>;

    async fn list_flows(&self, owner_id: Uuid) -> Result<Vec<Flow>, DatabaseError>;

    /// The owner's single active flow, if any.
    async fn get_active_flow(&self, owner_id: Uuid) -> Result<Option<Flow>, DatabaseError>;

    /// Activate one flow and deactivate all the owner's siblings, atomically.
    async fn set_active_flow(&self, owner_id: Uuid, flow_id: Uuid) -> Result<(), DatabaseError>;

    async fn delete_flow(&self, id: Uuid) -> Result<(), DatabaseError>;

    // ── Conversation state ──────────────────────────────────────────

    async fn get_chat_state(
        &self,
        owner_id: Uuid,
        address: &str,
    ) -> Result<Option<ChatState>, DatabaseError>;

    /// Create the state row on first contact, update it afterwards.
    async fn upsert_chat_state(
        &self,
        owner_id: Uuid,
        address: &str,
        current_state: &str,
    ) -> Result<(), DatabaseError>;

    // ── Chat log ────────────────────────────────────────────────────

    async fn insert_chat_log(
        &self,
        owner_id: Uuid,
        address: &str,
        direction: Direction,
        content: &str,
        state_label: Option<&str>,
    ) -> Result<(), DatabaseError>;

    /// Most recent log entries for an owner.
    async fn list_chat_logs(
        &self,
        owner_id: Uuid,
        limit: usize,
    ) -> Result<Vec<ChatLogEntry>, DatabaseError>;

    // ── Quota ───────────────────────────────────────────────────────

    /// The owner's single active, non-expired quota account, if any.
    async fn get_active_quota_account(
        &self,
        owner_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Option<QuotaAccount>, DatabaseError>;

    /// Deduct `n` units iff enough quota remains, as one conditional update.
    /// Returns whether the deduction happened.
    async fn try_deduct_quota(&self, account_id: Uuid, n: u32) -> Result<bool, DatabaseError>;

    async fn insert_quota_account(&self, account: &QuotaAccount) -> Result<(), DatabaseError>;

    // ── Channel accounts ────────────────────────────────────────────

    async fn get_channel_account(
        &self,
        owner_id: Uuid,
    ) -> Result<Option<ChannelAccount>, DatabaseError>;

    /// Resolve the owning account from a provider channel id (webhook path).
    async fn get_channel_account_by_channel_id(
        &self,
        channel_id: &str,
    ) -> Result<Option<ChannelAccount>, DatabaseError>;

    async fn upsert_channel_account(&self, account: &ChannelAccount) -> Result<(), DatabaseError>;

    // ── Templates ───────────────────────────────────────────────────

    async fn insert_template(&self, template: &Template) -> Result<(), DatabaseError>;

    async fn get_template(&self, id: Uuid) -> Result<Option<Template>, DatabaseError>;

    async fn list_templates_by_status(
        &self,
        status: TemplateStatus,
    ) -> Result<Vec<Template>, DatabaseError>;

    async fn update_template_status(
        &self,
        id: Uuid,
        status: TemplateStatus,
        rejection_reason: Option<&str>,
    ) -> Result<(), DatabaseError>;

    // ── Blasts ──────────────────────────────────────────────────────

    async fn insert_blast(&self, blast: &Blast) -> Result<(), DatabaseError>;

    async fn get_blast(&self, id: Uuid) -> Result<Option<Blast>, DatabaseError>;

    async fn list_blasts(
        &self,
        owner_id: Uuid,
        status: Option<BlastStatus>,
    ) -> Result<Vec<Blast>, DatabaseError>;

    /// Persist the mutable definition fields of a pending blast.
    async fn update_blast(&self, blast: &Blast) -> Result<(), DatabaseError>;

    async fn set_blast_status(&self, id: Uuid, status: BlastStatus) -> Result<(), DatabaseError>;

    /// Move a DRAFT/SCHEDULED blast to PROCESSING as one conditional update.
    /// Returns whether this caller won the claim.
    async fn claim_blast_for_dispatch(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// Record the dispatch outcome: final status, counters and completion time.
    async fn finalize_blast(
        &self,
        id: Uuid,
        status: BlastStatus,
        sent_count: u32,
        failed_count: u32,
        completed_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    /// SCHEDULED blasts whose schedule is already in the past.
    async fn list_due_scheduled_blasts(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Blast>, DatabaseError>;

    async fn delete_blast(&self, id: Uuid) -> Result<(), DatabaseError>;
}
