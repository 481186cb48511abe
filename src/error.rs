use crate::models::{BillId, BulkFailure, SliceKey};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// 字段级校验错误 (字段名 -> 原因)
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct FieldErrors(pub BTreeMap<String, String>);

impl FieldErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, reason);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, reason: impl Into<String>) {
        self.0.entry(field.into()).or_insert_with(|| reason.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.0.get(field).map(String::as_str)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }
}

impl fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.0.iter().map(|(k, v)| format!("{}: {}", k, v)).collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// 计费核心错误
#[derive(Debug, Error)]
pub enum BillingError {
    #[error("Validation failed: {0}")]
    Validation(FieldErrors),

    #[error("Bill {0} is already verified")]
    AlreadyVerified(BillId),

    #[error("Cannot publish, unverified slices: {}", format_slices(.slices))]
    IncompletePublish { slices: Vec<SliceKey> },

    #[error("{field} = {value} is out of range [{min}, {max}]")]
    Range {
        field: String,
        value: i64,
        min: i64,
        max: i64,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Remote call failed: {0}")]
    Transient(String),

    #[error("Bulk action partially failed: {succeeded} succeeded, {} failed", .failed.len())]
    PartialBulkFailure {
        succeeded: usize,
        failed: Vec<BulkFailure>,
    },
}

fn format_slices(slices: &[SliceKey]) -> String {
    slices
        .iter()
        .map(|s| format!("{}/year {}", s.department, s.academic_year))
        .collect::<Vec<_>>()
        .join(", ")
}

impl BillingError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(FieldErrors::single(field, reason))
    }

    /// 工作流门禁类错误 (状态保持不变, 非致命)
    pub fn is_workflow_gate(&self) -> bool {
        matches!(self, Self::AlreadyVerified(_) | Self::IncompletePublish { .. })
    }

    /// 调用方可重试
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => Self::NotFound("row".to_string()),
            other => Self::Transient(other.to_string()),
        }
    }
}

impl From<csv::Error> for BillingError {
    fn from(e: csv::Error) -> Self {
        Self::Transient(format!("csv export: {}", e))
    }
}

impl From<std::io::Error> for BillingError {
    fn from(e: std::io::Error) -> Self {
        Self::Transient(format!("io: {}", e))
    }
}

pub type Result<T, E = BillingError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_and_csv_failures_are_retriable() {
        let io: BillingError = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "closed").into();
        assert!(io.is_retriable());
        assert!(io.to_string().contains("closed"));
    }

    #[test]
    fn missing_row_maps_to_not_found() {
        let err: BillingError = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, BillingError::NotFound(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn field_errors_keep_first_reason() {
        let mut errors = FieldErrors::new();
        errors.add("grocery_cost", "is required");
        errors.add("grocery_cost", "must be a number");
        assert_eq!(errors.get("grocery_cost"), Some("is required"));
    }
}
