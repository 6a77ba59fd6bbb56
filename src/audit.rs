use crate::{
    analyzer::ImpactResult,
    error::{BlastError, BlastResult},
    plan::RemovalPlan,
    severity::Severity,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOperation {
    Analyze,
    Plan,
}

/// What a caller needs to log about one engine call. The engine only builds
/// these; storing them is up to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: String,
    pub operation: AuditOperation,
    pub package: String,
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub error_message: Option<String>,
    pub severity: Option<Severity>,
    pub commands: Vec<String>,
    pub duration_ms: u64,
    pub user: String,
}

impl AuditRecord {
    fn base(operation: AuditOperation, package: &str, duration_ms: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation,
            package: package.to_string(),
            timestamp: Utc::now(),
            success: true,
            error_message: None,
            severity: None,
            commands: Vec::new(),
            duration_ms,
            user: whoami::username(),
        }
    }

    pub fn from_result(result: &ImpactResult) -> Self {
        Self {
            severity: Some(result.severity),
            ..Self::base(AuditOperation::Analyze, &result.target_package, result.duration_ms)
        }
    }

    pub fn from_plan(plan: &RemovalPlan, duration_ms: u64) -> Self {
        Self {
            severity: Some(plan.severity),
            commands: plan.commands.clone(),
            ..Self::base(AuditOperation::Plan, &plan.target_package, duration_ms)
        }
    }

    pub fn from_error(
        operation: AuditOperation,
        package: &str,
        error: &BlastError,
        duration_ms: u64,
    ) -> Self {
        Self {
            success: false,
            error_message: Some(error.to_string()),
            ..Self::base(operation, package, duration_ms)
        }
    }

    pub fn to_json_line(&self) -> BlastResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
