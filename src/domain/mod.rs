//! Domain types and DTOs
//!
//! Entities and request/response shapes for forwarder assignment,
//! invitations and cost-to-quote.

pub mod admin;
pub mod ff_config;
pub mod forwarders;
pub mod invitations;
pub mod notifications;
pub mod pending_quotes;
pub mod routing_orders;
