//! Status transition policies.
//!
//! The admin panel may set any status from any other, so the default policy
//! accepts everything. Stricter policies plug in here without touching the
//! order data model.

use core::str::FromStr;

use bakeshop_core::{DomainError, DomainResult};

use crate::order::OrderStatus;

/// Decides whether an order may move from one status to another.
pub trait TransitionPolicy: Send + Sync + core::fmt::Debug {
    fn check(&self, from: OrderStatus, to: OrderStatus) -> DomainResult<()>;
}

/// Any status may follow any other.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unrestricted;

impl TransitionPolicy for Unrestricted {
    fn check(&self, _from: OrderStatus, _to: OrderStatus) -> DomainResult<()> {
        Ok(())
    }
}

/// Forward-only lifecycle: `pending -> confirmed -> delivered`, with
/// `cancelled` reachable before delivery. Re-setting the current status is
/// accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lifecycle;

impl TransitionPolicy for Lifecycle {
    fn check(&self, from: OrderStatus, to: OrderStatus) -> DomainResult<()> {
        use OrderStatus::*;

        if from == to {
            return Ok(());
        }
        if from.is_terminal() {
            return Err(DomainError::invariant(format!("order is already {from}")));
        }

        let allowed = matches!(
            (from, to),
            (Pending, Confirmed) | (Confirmed, Delivered) | (Pending, Cancelled) | (Confirmed, Cancelled)
        );

        if allowed {
            Ok(())
        } else {
            Err(DomainError::invariant(format!(
                "cannot move order from {from} to {to}"
            )))
        }
    }
}

/// Configuration-level selector for the built-in policies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TransitionPolicyKind {
    #[default]
    Unrestricted,
    Lifecycle,
}

impl TransitionPolicyKind {
    pub fn build(self) -> std::sync::Arc<dyn TransitionPolicy> {
        match self {
            TransitionPolicyKind::Unrestricted => std::sync::Arc::new(Unrestricted),
            TransitionPolicyKind::Lifecycle => std::sync::Arc::new(Lifecycle),
        }
    }
}

impl FromStr for TransitionPolicyKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "unrestricted" => Ok(TransitionPolicyKind::Unrestricted),
            "lifecycle" => Ok(TransitionPolicyKind::Lifecycle),
            other => Err(DomainError::validation(format!(
                "unknown status policy '{other}' (expected unrestricted or lifecycle)"
            ))),
        }
    }
}
