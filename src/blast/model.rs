//! Blast data model.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a blast campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlastStatus {
    Draft,
    Scheduled,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BlastStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlastStatus::Draft => "DRAFT",
            BlastStatus::Scheduled => "SCHEDULED",
            BlastStatus::Processing => "PROCESSING",
            BlastStatus::Completed => "COMPLETED",
            BlastStatus::Failed => "FAILED",
            BlastStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(BlastStatus::Draft),
            "SCHEDULED" => Some(BlastStatus::Scheduled),
            "PROCESSING" => Some(BlastStatus::Processing),
            "COMPLETED" => Some(BlastStatus::Completed),
            "FAILED" => Some(BlastStatus::Failed),
            "CANCELLED" => Some(BlastStatus::Cancelled),
            _ => None,
        }
    }

    /// Whether a blast in this status may still be edited or dispatched.
    pub fn is_pending(&self) -> bool {
        matches!(self, BlastStatus::Draft | BlastStatus::Scheduled)
    }
}

/// Positional substitution values for one template's declared components.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentParams {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub header: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub body: Vec<String>,
}

impl ComponentParams {
    pub fn is_empty(&self) -> bool {
        self.header.is_empty() && self.body.is_empty()
    }
}

/// A bulk outbound campaign against a recipient list using an approved template.
#[derive(Debug, Clone)]
pub struct Blast {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub template_id: Uuid,
    pub name: String,
    pub status: BlastStatus,
    /// Deduplicated at creation, order-preserving.
    pub recipients: Vec<String>,
    /// Global per-component substitution values.
    pub parameters: ComponentParams,
    /// Per-recipient overrides, keyed by address.
    pub recipient_parameters: HashMap<String, ComponentParams>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub total_recipients: u32,
    pub sent_count: u32,
    pub failed_count: u32,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Blast {
    /// Effective parameters for one recipient: a non-empty per-recipient
    /// override wins, otherwise the global parameters apply.
    pub fn parameters_for(&self, recipient: &str) -> &ComponentParams {
        match self.recipient_parameters.get(recipient) {
            Some(specific) if !specific.is_empty() => specific,
            _ => &self.parameters,
        }
    }
}

/// Input for creating a blast.
#[derive(Debug, Clone)]
pub struct NewBlast {
    pub template_id: Uuid,
    pub name: String,
    pub recipients: Vec<String>,
    pub parameters: ComponentParams,
    pub recipient_parameters: HashMap<String, ComponentParams>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Partial update of a pending blast. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct BlastUpdate {
    pub name: Option<String>,
    pub recipients: Option<Vec<String>>,
    pub parameters: Option<ComponentParams>,
    pub recipient_parameters: Option<HashMap<String, ComponentParams>>,
    pub scheduled_at: Option<DateTime<Utc>>,
}

/// Drop duplicate addresses, keeping first occurrence order.
pub fn dedup_recipients(recipients: &[String]) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    recipients
        .iter()
        .filter(|r| seen.insert(r.as_str()))
        .cloned()
        .collect()
}
