pub mod ff_assignments;
pub mod ff_config;
pub mod ff_invitations;
pub mod forwarders;
pub mod health;
pub mod pending_quotes;
pub mod routing_orders;

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::app::AppState;

/// Build the API router with all routes
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        // Public routes
        .route("/health", get(health::health_check))
        // Assignment configuration (admin)
        .route(
            "/ff-config/",
            get(ff_config::get_ff_config)
                .put(ff_config::save_ff_config)
                .post(ff_config::create_route_rule)
                .delete(ff_config::delete_route_rule),
        )
        .route("/ff-config/resolve", post(ff_config::resolve_preview))
        // Invitations
        .route(
            "/ff-invitations/",
            get(ff_invitations::list_invitations)
                .post(ff_invitations::invite_forwarder)
                .delete(ff_invitations::revoke_invitation),
        )
        .route(
            "/ff-invitations/accept",
            post(ff_invitations::accept_invitation),
        )
        // Forwarders (admin)
        .route("/forwarders/", get(forwarders::list_forwarders))
        .route(
            "/forwarders/:id/verification",
            put(forwarders::set_verification),
        )
        .route(
            "/forwarders/:id/deactivate",
            post(forwarders::deactivate_forwarder),
        )
        // Routing orders and assignment (admin)
        .route("/routing-orders/", post(routing_orders::create_routing_order))
        .route("/routing-orders/:id", get(routing_orders::get_routing_order))
        .route(
            "/routing-orders/:id/assignment-history",
            get(routing_orders::get_assignment_history),
        )
        .route(
            "/ff-assignments/",
            post(ff_assignments::assign_routing_order).put(ff_assignments::reassign_routing_order),
        )
        .route(
            "/ff-assignments/auto",
            post(ff_assignments::auto_assign_routing_order),
        )
        .route(
            "/ff-assignments/unassigned",
            get(ff_assignments::list_unassigned),
        )
        // Cost-to-quote
        .route(
            "/admin/pending-ff-quotes/",
            get(pending_quotes::list_pending_quotes),
        )
        .route(
            "/pending-ff-quotes/",
            post(pending_quotes::register_pending_quote),
        )
        .route(
            "/pending-ff-quotes/:id/upload-costs/",
            post(pending_quotes::upload_costs),
        )
        .route(
            "/pending-ff-quotes/:id/resend-notification/",
            post(pending_quotes::resend_notification),
        )
}
