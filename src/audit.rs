//! Fire-and-forget audit trail.
//!
//! Entries are emitted only after the unit of work that produced them has committed.
//! A sink must never fail the caller: write errors are logged and dropped.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::services::Transition;

pub const ENTITY_ORDER: &str = "order";
pub const ENTITY_MANUAL_TRANSACTION: &str = "manual_transaction";

pub const ACTION_STATUS_CHANGE: &str = "status_change";
pub const ACTION_CREATE: &str = "create";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_id: String,
    pub entity_type: &'static str,
    pub action: &'static str,
    pub old_val: Option<Value>,
    pub new_val: Option<Value>,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity_id: impl Into<String>,
        entity_type: &'static str,
        action: &'static str,
        old_val: Option<Value>,
        new_val: Option<Value>,
        actor: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: entity_id.into(),
            entity_type,
            action,
            old_val,
            new_val,
            actor: actor.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_transition(transition: &Transition, actor: &str) -> Self {
        Self::new(
            transition.order_id.clone(),
            ENTITY_ORDER,
            ACTION_STATUS_CHANGE,
            Some(json!({ "status": transition.from })),
            Some(json!({ "status": transition.to, "detail": transition.detail })),
            actor,
        )
    }
}

pub trait AuditSink: Send + Sync {
    fn record(&self, entry: AuditEntry);

    fn record_transitions(&self, transitions: &[Transition], actor: &str) {
        for transition in transitions {
            self.record(AuditEntry::from_transition(transition, actor));
        }
    }
}

/// Appends entries to `audit_logs` on a background task.
#[derive(Clone)]
pub struct PgAuditSink {
    pool: PgPool,
}

impl PgAuditSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl AuditSink for PgAuditSink {
    fn record(&self, entry: AuditEntry) {
        let pool = self.pool.clone();
        tokio::spawn(async move {
            let result = sqlx::query(
                r#"
                INSERT INTO audit_logs (id, entity_id, entity_type, action, old_val, new_val, actor, timestamp)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(entry.id)
            .bind(&entry.entity_id)
            .bind(entry.entity_type)
            .bind(entry.action)
            .bind(&entry.old_val)
            .bind(&entry.new_val)
            .bind(&entry.actor)
            .bind(entry.timestamp)
            .execute(&pool)
            .await;

            if let Err(e) = result {
                tracing::error!(entity_id = %entry.entity_id, error = %e, "Failed to write audit entry");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::OrderStatus;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording(Mutex<Vec<AuditEntry>>);

    impl AuditSink for Recording {
        fn record(&self, entry: AuditEntry) {
            self.0.lock().unwrap().push(entry);
        }
    }

    #[test]
    fn test_transition_becomes_status_change_entry() {
        let transition = Transition {
            order_id: "VAZZ1".into(),
            from: OrderStatus::Paid,
            to: OrderStatus::Process,
            detail: json!({ "provider_ref": "VAZZ1" }),
        };
        let sink = Recording::default();
        sink.record_transitions(&[transition], "gateway-callback");

        let entries = sink.0.lock().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].entity_type, ENTITY_ORDER);
        assert_eq!(entries[0].action, ACTION_STATUS_CHANGE);
        assert_eq!(entries[0].old_val, Some(json!({ "status": "PAID" })));
        assert_eq!(entries[0].new_val.as_ref().unwrap()["status"], "PROCESS");
        assert_eq!(entries[0].actor, "gateway-callback");
    }
}
