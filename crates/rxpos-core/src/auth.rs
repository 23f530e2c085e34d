//! # Roles and Access Policy
//!
//! Authentication lives elsewhere; this module only answers "may this actor
//! do that?" for the operations the offline core exposes.
//!
//! ```text
//!                     cashier  pharmacist  manager  admin
//!  post sale / shift     ✓         ✓          ✓       ✓
//!  request refund        ✓         ✓          ✓       ✓
//!  adjust inventory                ✓          ✓       ✓
//!  approve / reject                           ✓       ✓
//!  resolve conflict                           ✓       ✓
//!  requeue rejected op                        ✓       ✓
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export)]
pub enum Role {
    Cashier,
    Pharmacist,
    Manager,
    Admin,
}

impl Role {
    /// Manager and admin.
    pub fn is_elevated(&self) -> bool {
        *self >= Role::Manager
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Cashier => "cashier",
            Role::Pharmacist => "pharmacist",
            Role::Manager => "manager",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// The user performing an operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Actor {
            user_id: user_id.into(),
            role,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    PostSale,
    ManageShift,
    RequestRefund,
    ApproveRefund,
    RejectRefund,
    AdjustInventory,
    ResolveConflict,
    RequeueOperation,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::PostSale => "post sales",
            Action::ManageShift => "manage shifts",
            Action::RequestRefund => "request refunds",
            Action::ApproveRefund => "approve refunds",
            Action::RejectRefund => "reject refunds",
            Action::AdjustInventory => "adjust inventory",
            Action::ResolveConflict => "resolve sync conflicts",
            Action::RequeueOperation => "requeue rejected operations",
        }
    }
}

/// Authorization seam. The host application may plug in its own matrix.
pub trait AccessPolicy: Send + Sync {
    fn allows(&self, actor: &Actor, action: Action) -> bool;

    /// `Ok(())` when allowed, otherwise a permission error naming the role.
    fn ensure(&self, actor: &Actor, action: Action) -> CoreResult<()> {
        if self.allows(actor, action) {
            Ok(())
        } else {
            Err(CoreError::Permission {
                role: actor.role.to_string(),
                action: action.as_str().to_string(),
            })
        }
    }
}

/// Default role-based policy (see module table).
#[derive(Debug, Clone, Copy, Default)]
pub struct RolePolicy;

impl AccessPolicy for RolePolicy {
    fn allows(&self, actor: &Actor, action: Action) -> bool {
        match action {
            Action::PostSale | Action::ManageShift | Action::RequestRefund => true,
            Action::AdjustInventory => actor.role >= Role::Pharmacist,
            Action::ApproveRefund
            | Action::RejectRefund
            | Action::ResolveConflict
            | Action::RequeueOperation => actor.role.is_elevated(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_elevated_roles() {
        let policy = RolePolicy;
        let cashier = Actor::new("u-1", Role::Cashier);
        let manager = Actor::new("u-2", Role::Manager);

        assert!(policy.allows(&cashier, Action::PostSale));
        assert!(!policy.allows(&cashier, Action::ResolveConflict));
        assert!(policy.allows(&manager, Action::ResolveConflict));
        assert!(policy.allows(&Actor::new("u-3", Role::Admin), Action::ApproveRefund));
    }

    #[test]
    fn test_inventory_needs_pharmacist() {
        let policy = RolePolicy;
        assert!(!policy.allows(&Actor::new("c", Role::Cashier), Action::AdjustInventory));
        assert!(policy.allows(&Actor::new("p", Role::Pharmacist), Action::AdjustInventory));
    }

    #[test]
    fn test_ensure_reports_role_and_action() {
        let err = RolePolicy
            .ensure(&Actor::new("c", Role::Cashier), Action::ApproveRefund)
            .unwrap_err();
        assert_eq!(err.to_string(), "Role cashier is not allowed to approve refunds");
    }
}
