//! Route matcher
//!
//! Picks the single best route assignment rule for a shipment. A rule
//! matches when its required fields (transport type, origin country) equal
//! the route's and every populated optional field (origin port, destination
//! city, carrier) equals the route's value; empty optional fields are
//! wildcards. Among matches the rule with the most populated optional fields
//! wins, then the lowest priority value, then the lowest id.

use std::cmp::Reverse;

use crate::domain::ff_config::{RouteAssignmentRule, RouteDescriptor};

/// Case- and whitespace-insensitive equality for free-text route fields
fn same(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn populated(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

/// Number of optional fields the rule pins down, or `None` if it does not match.
pub fn specificity(rule: &RouteAssignmentRule, route: &RouteDescriptor) -> Option<usize> {
    if !rule.is_active {
        return None;
    }

    let required = [
        (rule.transport_type.as_str(), route.transport_type.as_str()),
        (rule.origin_country.as_str(), route.origin_country.as_str()),
    ];
    for (want, have) in required {
        if want.trim().is_empty() || !same(want, have) {
            return None;
        }
    }

    let optional = [
        (&rule.origin_port, &route.origin_port),
        (&rule.destination_city, &route.destination_city),
        (&rule.carrier_name, &route.carrier_name),
    ];

    let mut pinned = 0;
    for (want, have) in optional {
        let Some(want) = populated(want) else {
            continue;
        };
        match populated(have) {
            Some(have) if same(want, have) => pinned += 1,
            _ => return None,
        }
    }

    Some(pinned)
}

/// The best matching active rule for `route`, independent of slice order.
pub fn best_match<'a>(
    rules: &'a [RouteAssignmentRule],
    route: &RouteDescriptor,
) -> Option<&'a RouteAssignmentRule> {
    rules
        .iter()
        .filter_map(|rule| specificity(rule, route).map(|score| (score, rule)))
        .min_by_key(|(score, rule)| (Reverse(*score), rule.priority, rule.id))
        .map(|(_, rule)| rule)
}
