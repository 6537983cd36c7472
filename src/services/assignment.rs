//! Assignment engine and reassignment coordinator
//!
//! Pure decision logic: callers load the current configuration, rules and
//! routing order inside a transaction, ask for a plan, then persist it. No
//! function here touches storage or the clock.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::route_matcher;
use crate::domain::ff_config::{
    AssignmentMode, GlobalAssignmentConfig, RouteAssignmentRule, RouteDescriptor,
};
use crate::domain::notifications::NotificationRequest;
use crate::domain::routing_orders::{AssignmentSource, AssignmentState, RoutingOrder};
use crate::error::RuleViolation;

/// Everything the engine needs for one decision
#[derive(Debug, Clone, Copy)]
pub struct AssignmentContext<'a> {
    pub config: &'a GlobalAssignmentConfig,
    pub rules: &'a [RouteAssignmentRule],
    pub active_forwarders: &'a HashSet<Uuid>,
}

/// The forwarder chosen for a shipment and why
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub ff_id: Uuid,
    pub source: AssignmentSource,
    pub rule_id: Option<i64>,
}

impl Resolution {
    pub fn manual(ff_id: Uuid) -> Self {
        Self {
            ff_id,
            source: AssignmentSource::Manual,
            rule_id: None,
        }
    }
}

/// Resolve the responsible forwarder for `route` under the configured mode.
///
/// `Ok(None)` means the mode is `manual` and nothing is chosen automatically.
pub fn resolve(
    ctx: AssignmentContext<'_>,
    route: &RouteDescriptor,
) -> Result<Option<Resolution>, RuleViolation> {
    match ctx.config.assignment_mode {
        AssignmentMode::Manual => Ok(None),
        AssignmentMode::Single => {
            let ff_id = ctx.config.default_ff_id.ok_or_else(|| {
                RuleViolation::Configuration(
                    "single assignment mode has no default forwarder configured".to_string(),
                )
            })?;
            if !ctx.active_forwarders.contains(&ff_id) {
                return Err(RuleViolation::Configuration(format!(
                    "default forwarder {} is not active",
                    ff_id
                )));
            }
            Ok(Some(Resolution {
                ff_id,
                source: AssignmentSource::DefaultForwarder,
                rule_id: None,
            }))
        }
        AssignmentMode::Multi => {
            // Rules pointing at deactivated forwarders are skipped so a broader rule can apply
            let usable: Vec<RouteAssignmentRule> = ctx
                .rules
                .iter()
                .filter(|rule| ctx.active_forwarders.contains(&rule.ff_id))
                .cloned()
                .collect();

            let rule = route_matcher::best_match(&usable, route)
                .ok_or_else(|| RuleViolation::NoRouteMatch(route.to_string()))?;

            Ok(Some(Resolution {
                ff_id: rule.ff_id,
                source: AssignmentSource::RouteRule,
                rule_id: Some(rule.id),
            }))
        }
    }
}

/// Forwarder to ask for a pending quote's costs.
///
/// Follows the engine; in manual mode the previously notified forwarder is
/// kept as long as it is still active.
pub fn quote_forwarder(
    ctx: AssignmentContext<'_>,
    route: &RouteDescriptor,
    previously_notified: Option<Uuid>,
) -> Result<Option<Uuid>, RuleViolation> {
    match resolve(ctx, route)? {
        Some(resolution) => Ok(Some(resolution.ff_id)),
        None => Ok(previously_notified.filter(|id| ctx.active_forwarders.contains(id))),
    }
}

/// A validated assignment change, ready to persist
#[derive(Debug, Clone, PartialEq)]
pub struct AssignmentPlan {
    pub ro_id: Uuid,
    pub previous_ff_id: Option<Uuid>,
    pub new_ff_id: Uuid,
    pub assigned_at: DateTime<Utc>,
    pub source: AssignmentSource,
    pub rule_id: Option<i64>,
    pub notifications: Vec<NotificationRequest>,
}

impl AssignmentPlan {
    /// Apply the plan to an in-memory routing order
    pub fn apply(&self, ro: &mut RoutingOrder) {
        ro.assignment = AssignmentState::Assigned {
            ff_id: self.new_ff_id,
            assigned_at: self.assigned_at,
        };
        ro.version += 1;
        ro.updated_at = self.assigned_at;
    }
}

fn ensure_active(ff_id: Uuid, active_forwarders: &HashSet<Uuid>) -> Result<(), RuleViolation> {
    if active_forwarders.contains(&ff_id) {
        Ok(())
    } else {
        Err(RuleViolation::InvalidState(format!(
            "forwarder {} is not an active account",
            ff_id
        )))
    }
}

/// First assignment of an unassigned routing order
pub fn plan_assignment(
    ro: &RoutingOrder,
    target: Resolution,
    active_forwarders: &HashSet<Uuid>,
    notify: bool,
    now: DateTime<Utc>,
) -> Result<AssignmentPlan, RuleViolation> {
    if let AssignmentState::Assigned { ff_id, .. } = ro.assignment {
        return Err(RuleViolation::InvalidState(format!(
            "routing order {} is already assigned to forwarder {}; use reassignment",
            ro.order_number, ff_id
        )));
    }
    ensure_active(target.ff_id, active_forwarders)?;

    let notifications = if notify {
        vec![NotificationRequest::routing_order_assigned(
            target.ff_id,
            ro.id,
            &ro.order_number,
        )]
    } else {
        Vec::new()
    };

    Ok(AssignmentPlan {
        ro_id: ro.id,
        previous_ff_id: None,
        new_ff_id: target.ff_id,
        assigned_at: now,
        source: target.source,
        rule_id: target.rule_id,
        notifications,
    })
}

/// Move an assigned routing order to a different forwarder.
///
/// Only the new forwarder is notified.
pub fn plan_reassignment(
    ro: &RoutingOrder,
    new_ff_id: Uuid,
    active_forwarders: &HashSet<Uuid>,
    notify: bool,
    now: DateTime<Utc>,
) -> Result<AssignmentPlan, RuleViolation> {
    let current = match ro.assignment {
        AssignmentState::Assigned { ff_id, .. } => ff_id,
        AssignmentState::Unassigned => {
            return Err(RuleViolation::InvalidState(format!(
                "routing order {} has no active assignment",
                ro.order_number
            )));
        }
    };
    if current == new_ff_id {
        return Err(RuleViolation::NoOpReassignment);
    }
    ensure_active(new_ff_id, active_forwarders)?;

    let notifications = if notify {
        vec![NotificationRequest::routing_order_reassigned(
            new_ff_id,
            ro.id,
            &ro.order_number,
        )]
    } else {
        Vec::new()
    };

    Ok(AssignmentPlan {
        ro_id: ro.id,
        previous_ff_id: Some(current),
        new_ff_id,
        assigned_at: now,
        source: AssignmentSource::Manual,
        rule_id: None,
        notifications,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::notifications::Recipient;
    use chrono::Duration;

    fn ff(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    fn config(mode: AssignmentMode, default_ff_id: Option<Uuid>) -> GlobalAssignmentConfig {
        GlobalAssignmentConfig {
            assignment_mode: mode,
            default_ff_id,
            auto_assign_on_ro: true,
            default_margin_percent: None,
            updated_at: Utc::now(),
        }
    }

    fn rule(id: i64, ff_id: Uuid, priority: i32, origin_port: Option<&str>) -> RouteAssignmentRule {
        RouteAssignmentRule {
            id,
            ff_id,
            transport_type: "maritimo".into(),
            origin_country: "China".into(),
            origin_port: origin_port.map(String::from),
            destination_city: None,
            carrier_name: None,
            priority,
            is_active: true,
        }
    }

    fn shanghai() -> RouteDescriptor {
        RouteDescriptor {
            transport_type: "maritimo".into(),
            origin_country: "China".into(),
            origin_port: Some("Shanghai".into()),
            ..Default::default()
        }
    }

    fn order(number: &str, assignment: AssignmentState) -> RoutingOrder {
        let now = Utc::now();
        RoutingOrder {
            id: Uuid::new_v4(),
            order_number: number.into(),
            consignee: "Importadora Andes".into(),
            transport_type: "maritimo".into(),
            origin_country: "China".into(),
            origin_port: Some("Shanghai".into()),
            destination_city: None,
            carrier_name: None,
            status: "created".into(),
            assignment,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    fn active(ids: &[Uuid]) -> HashSet<Uuid> {
        ids.iter().copied().collect()
    }

    #[test]
    fn single_mode_uses_default_forwarder_without_matching() {
        let cfg = config(AssignmentMode::Single, Some(ff(7)));
        // A matching rule for another forwarder must be ignored
        let rules = vec![rule(1, ff(2), 1, None)];
        let active = active(&[ff(2), ff(7)]);

        let resolution = resolve(
            AssignmentContext {
                config: &cfg,
                rules: &rules,
                active_forwarders: &active,
            },
            &shanghai(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(resolution.ff_id, ff(7));
        assert_eq!(resolution.source, AssignmentSource::DefaultForwarder);
        assert_eq!(resolution.rule_id, None);
    }

    #[test]
    fn single_mode_without_default_is_a_configuration_error() {
        let cfg = config(AssignmentMode::Single, None);
        let active = active(&[]);
        let err = resolve(
            AssignmentContext {
                config: &cfg,
                rules: &[],
                active_forwarders: &active,
            },
            &shanghai(),
        )
        .unwrap_err();
        assert!(matches!(err, RuleViolation::Configuration(_)));
    }

    #[test]
    fn single_mode_with_deactivated_default_is_a_configuration_error() {
        let cfg = config(AssignmentMode::Single, Some(ff(7)));
        let active = active(&[ff(2)]);
        let err = resolve(
            AssignmentContext {
                config: &cfg,
                rules: &[],
                active_forwarders: &active,
            },
            &shanghai(),
        )
        .unwrap_err();
        assert!(matches!(err, RuleViolation::Configuration(_)));
    }

    #[test]
    fn multi_mode_prefers_more_specific_rule() {
        let cfg = config(AssignmentMode::Multi, None);
        let rules = vec![rule(1, ff(2), 1, None), rule(2, ff(9), 5, Some("Shanghai"))];
        let active = active(&[ff(2), ff(9)]);

        let resolution = resolve(
            AssignmentContext {
                config: &cfg,
                rules: &rules,
                active_forwarders: &active,
            },
            &shanghai(),
        )
        .unwrap()
        .unwrap();

        assert_eq!(resolution.ff_id, ff(9));
        assert_eq!(resolution.rule_id, Some(2));
        assert_eq!(resolution.source, AssignmentSource::RouteRule);
    }

    #[test]
    fn multi_mode_skips_rules_for_inactive_forwarders() {
        let cfg = config(AssignmentMode::Multi, None);
        let rules = vec![rule(1, ff(2), 1, None), rule(2, ff(9), 5, Some("Shanghai"))];
        let active = active(&[ff(2)]);

        let resolution = resolve(
            AssignmentContext {
                config: &cfg,
                rules: &rules,
                active_forwarders: &active,
            },
            &shanghai(),
        )
        .unwrap()
        .unwrap();
        assert_eq!(resolution.ff_id, ff(2));
    }

    #[test]
    fn multi_mode_without_match_reports_no_route_match() {
        let cfg = config(AssignmentMode::Multi, Some(ff(7)));
        let rules = vec![rule(1, ff(2), 1, Some("Ningbo"))];
        let active = active(&[ff(2), ff(7)]);

        let err = resolve(
            AssignmentContext {
                config: &cfg,
                rules: &rules,
                active_forwarders: &active,
            },
            &shanghai(),
        )
        .unwrap_err();
        assert!(matches!(err, RuleViolation::NoRouteMatch(_)));
    }

    #[test]
    fn manual_mode_never_auto_assigns() {
        let cfg = config(AssignmentMode::Manual, Some(ff(7)));
        let rules = vec![rule(1, ff(2), 1, None)];
        let active = active(&[ff(2), ff(7)]);

        let resolution = resolve(
            AssignmentContext {
                config: &cfg,
                rules: &rules,
                active_forwarders: &active,
            },
            &shanghai(),
        )
        .unwrap();
        assert!(resolution.is_none());
    }

    #[test]
    fn assignment_requires_unassigned_order() {
        let now = Utc::now();
        let ro = order(
            "RO-100",
            AssignmentState::Assigned {
                ff_id: ff(3),
                assigned_at: now,
            },
        );
        let err = plan_assignment(&ro, Resolution::manual(ff(8)), &active(&[ff(8)]), true, now)
            .unwrap_err();
        assert!(matches!(err, RuleViolation::InvalidState(_)));
    }

    #[test]
    fn assignment_sets_forwarder_and_notifies() {
        let now = Utc::now();
        let mut ro = order("RO-100", AssignmentState::Unassigned);
        let plan = plan_assignment(
            &ro,
            Resolution {
                ff_id: ff(7),
                source: AssignmentSource::DefaultForwarder,
                rule_id: None,
            },
            &active(&[ff(7)]),
            true,
            now,
        )
        .unwrap();

        assert_eq!(plan.previous_ff_id, None);
        assert_eq!(plan.notifications.len(), 1);
        assert_eq!(plan.notifications[0].recipient, Recipient::Forwarder(ff(7)));

        plan.apply(&mut ro);
        assert_eq!(
            ro.assignment,
            AssignmentState::Assigned {
                ff_id: ff(7),
                assigned_at: now
            }
        );
        assert_eq!(ro.version, 1);
    }

    #[test]
    fn suppressed_notification_yields_no_requests() {
        let ro = order("RO-101", AssignmentState::Unassigned);
        let plan =
            plan_assignment(&ro, Resolution::manual(ff(7)), &active(&[ff(7)]), false, Utc::now())
                .unwrap();
        assert!(plan.notifications.is_empty());
    }

    #[test]
    fn assignment_to_inactive_forwarder_is_rejected() {
        let ro = order("RO-102", AssignmentState::Unassigned);
        let err =
            plan_assignment(&ro, Resolution::manual(ff(7)), &active(&[ff(8)]), true, Utc::now())
                .unwrap_err();
        assert!(matches!(err, RuleViolation::InvalidState(_)));
    }

    #[test]
    fn reassignment_to_current_forwarder_is_a_no_op() {
        let assigned_at = Utc::now() - Duration::hours(2);
        let ro = order(
            "RO-200",
            AssignmentState::Assigned {
                ff_id: ff(3),
                assigned_at,
            },
        );
        let before = ro.clone();

        let err = plan_reassignment(&ro, ff(3), &active(&[ff(3), ff(8)]), true, Utc::now())
            .unwrap_err();
        assert_eq!(err, RuleViolation::NoOpReassignment);
        assert_eq!(ro.assignment, before.assignment);
        assert_eq!(ro.version, before.version);
    }

    #[test]
    fn reassignment_notifies_only_the_new_forwarder() {
        let now = Utc::now();
        let mut ro = order(
            "RO-200",
            AssignmentState::Assigned {
                ff_id: ff(3),
                assigned_at: now - Duration::days(1),
            },
        );

        let plan = plan_reassignment(&ro, ff(8), &active(&[ff(3), ff(8)]), true, now).unwrap();

        assert_eq!(plan.previous_ff_id, Some(ff(3)));
        assert_eq!(plan.new_ff_id, ff(8));
        assert_eq!(plan.notifications.len(), 1);
        assert_eq!(plan.notifications[0].recipient, Recipient::Forwarder(ff(8)));

        plan.apply(&mut ro);
        assert_eq!(ro.assignment.ff_id(), Some(ff(8)));
    }

    #[test]
    fn reassignment_requires_existing_assignment() {
        let ro = order("RO-300", AssignmentState::Unassigned);
        let err = plan_reassignment(&ro, ff(8), &active(&[ff(8)]), true, Utc::now()).unwrap_err();
        assert!(matches!(err, RuleViolation::InvalidState(_)));
    }

    #[test]
    fn reassignment_to_inactive_forwarder_is_rejected() {
        let now = Utc::now();
        let ro = order(
            "RO-301",
            AssignmentState::Assigned {
                ff_id: ff(3),
                assigned_at: now,
            },
        );
        let err = plan_reassignment(&ro, ff(8), &active(&[ff(3)]), true, now).unwrap_err();
        assert!(matches!(err, RuleViolation::InvalidState(_)));
    }

    #[test]
    fn quote_forwarder_follows_engine_outside_manual_mode() {
        let cfg = config(AssignmentMode::Multi, None);
        let rules = vec![rule(1, ff(2), 1, None), rule(2, ff(9), 5, Some("Shanghai"))];
        let active = active(&[ff(2), ff(9)]);
        let ctx = AssignmentContext {
            config: &cfg,
            rules: &rules,
            active_forwarders: &active,
        };

        // A stale previous forwarder does not override the rules
        assert_eq!(quote_forwarder(ctx, &shanghai(), Some(ff(2))).unwrap(), Some(ff(9)));
    }

    #[test]
    fn quote_forwarder_in_manual_mode_reuses_active_previous_forwarder() {
        let cfg = config(AssignmentMode::Manual, None);
        let active = active(&[ff(3)]);
        let ctx = AssignmentContext {
            config: &cfg,
            rules: &[],
            active_forwarders: &active,
        };

        assert_eq!(quote_forwarder(ctx, &shanghai(), Some(ff(3))).unwrap(), Some(ff(3)));
        assert_eq!(quote_forwarder(ctx, &shanghai(), Some(ff(4))).unwrap(), None);
        assert_eq!(quote_forwarder(ctx, &shanghai(), None).unwrap(), None);
    }
}
