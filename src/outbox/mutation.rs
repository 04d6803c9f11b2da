//! Mutation kinds and their typed payloads.
//!
//! `Mutation` is a closed tagged union, one variant per remote write operation,
//! so the sync drainer's dispatch is an exhaustive match rather than untyped
//! field access. Every variant carries the tenant it belongs to.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Discriminant for the closed set of mutation kinds.
#[derive(
  Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "kebab-case")]
pub enum MutationKind {
  AttendanceMark,
  PeriodLog,
  BehaviorNote,
  Homework,
  QuickGrade,
  Message,
  SupportTicket,
  Expense,
  Payment,
  LeaveRequest,
  LeadUpdate,
  CallLog,
}

impl MutationKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::AttendanceMark => "attendance-mark",
      Self::PeriodLog => "period-log",
      Self::BehaviorNote => "behavior-note",
      Self::Homework => "homework",
      Self::QuickGrade => "quick-grade",
      Self::Message => "message",
      Self::SupportTicket => "support-ticket",
      Self::Expense => "expense",
      Self::Payment => "payment",
      Self::LeaveRequest => "leave-request",
      Self::LeadUpdate => "lead-update",
      Self::CallLog => "call-log",
    }
  }
}

impl std::fmt::Display for MutationKind {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(self.as_str())
  }
}

/// Drain order rank for a pending item. High drains before medium, medium
/// before low; insertion time breaks ties within a band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
  High,
  Medium,
  Low,
}

impl Priority {
  pub fn rank(self) -> i64 {
    match self {
      Self::High => 0,
      Self::Medium => 1,
      Self::Low => 2,
    }
  }

  pub fn from_rank(rank: i64) -> Self {
    match rank {
      0 => Self::High,
      2 => Self::Low,
      _ => Self::Medium,
    }
  }
}

/// One pending write intention, typed per kind.
///
/// Dates are ISO 8601 strings as the remote service expects them; money is in
/// cents. Where the remote schema is open-ended (lead custom fields) the
/// payload carries a free-form map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Mutation {
  AttendanceMark {
    tenant_id: String,
    student_id: String,
    section_id: String,
    date: String,
    status: String,
  },
  PeriodLog {
    tenant_id: String,
    section_id: String,
    date: String,
    period: u32,
    summary: String,
  },
  BehaviorNote {
    tenant_id: String,
    student_id: String,
    note: String,
    severity: Option<String>,
  },
  Homework {
    tenant_id: String,
    section_id: String,
    title: String,
    due_date: String,
    details: String,
  },
  QuickGrade {
    tenant_id: String,
    student_id: String,
    assignment_id: String,
    score: f64,
  },
  Message {
    tenant_id: String,
    recipient_id: String,
    subject: String,
    body: String,
  },
  SupportTicket {
    tenant_id: String,
    category: String,
    subject: String,
    body: String,
  },
  Expense {
    tenant_id: String,
    category: String,
    amount_cents: i64,
    memo: String,
  },
  Payment {
    tenant_id: String,
    invoice_id: String,
    amount_cents: i64,
    method: String,
  },
  LeaveRequest {
    tenant_id: String,
    staff_id: String,
    from_date: String,
    to_date: String,
    reason: String,
  },
  LeadUpdate {
    tenant_id: String,
    lead_id: String,
    fields: BTreeMap<String, Value>,
  },
  CallLog {
    tenant_id: String,
    lead_id: String,
    outcome: String,
    notes: String,
  },
}

impl Mutation {
  pub fn kind(&self) -> MutationKind {
    match self {
      Self::AttendanceMark { .. } => MutationKind::AttendanceMark,
      Self::PeriodLog { .. } => MutationKind::PeriodLog,
      Self::BehaviorNote { .. } => MutationKind::BehaviorNote,
      Self::Homework { .. } => MutationKind::Homework,
      Self::QuickGrade { .. } => MutationKind::QuickGrade,
      Self::Message { .. } => MutationKind::Message,
      Self::SupportTicket { .. } => MutationKind::SupportTicket,
      Self::Expense { .. } => MutationKind::Expense,
      Self::Payment { .. } => MutationKind::Payment,
      Self::LeaveRequest { .. } => MutationKind::LeaveRequest,
      Self::LeadUpdate { .. } => MutationKind::LeadUpdate,
      Self::CallLog { .. } => MutationKind::CallLog,
    }
  }

  pub fn tenant_id(&self) -> &str {
    match self {
      Self::AttendanceMark { tenant_id, .. }
      | Self::PeriodLog { tenant_id, .. }
      | Self::BehaviorNote { tenant_id, .. }
      | Self::Homework { tenant_id, .. }
      | Self::QuickGrade { tenant_id, .. }
      | Self::Message { tenant_id, .. }
      | Self::SupportTicket { tenant_id, .. }
      | Self::Expense { tenant_id, .. }
      | Self::Payment { tenant_id, .. }
      | Self::LeaveRequest { tenant_id, .. }
      | Self::LeadUpdate { tenant_id, .. }
      | Self::CallLog { tenant_id, .. } => tenant_id,
    }
  }
}
