//! Admin audit trail types

use serde::{Deserialize, Serialize};

/// Admin action types for audit logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AdminAction {
    SaveAssignmentConfig,
    CreateRouteRule,
    UpdateRouteRule,
    DeleteRouteRule,
    InviteForwarder,
    RevokeInvitation,
    AssignRoutingOrder,
    ReassignRoutingOrder,
    CreateRoutingOrder,
    RegisterPendingQuote,
    UploadCosts,
    ResendQuoteNotification,
    SetForwarderVerification,
    DeactivateForwarder,
}

impl std::fmt::Display for AdminAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

/// Target types for audit logging
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditTargetType {
    AssignmentConfig,
    RouteRule,
    Invitation,
    RoutingOrder,
    PendingQuote,
    Forwarder,
}

impl std::fmt::Display for AuditTargetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = serde_json::to_string(self).unwrap_or_default();
        write!(f, "{}", s.trim_matches('"'))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_uses_snake_case() {
        assert_eq!(AdminAction::ReassignRoutingOrder.to_string(), "reassign_routing_order");
        assert_eq!(AuditTargetType::RouteRule.to_string(), "route_rule");
    }
}
