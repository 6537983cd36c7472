//! Service layer
//!
//! Pure assignment, invitation and pricing rules, plus the outbound
//! notification and quote-generation clients and shared persistence helpers.

pub mod assignment;
pub mod invitations;
pub mod notifications;
pub mod pricing;
pub mod quote_hook;
pub mod route_matcher;
pub mod store;

pub use notifications::NotificationDispatcher;
pub use quote_hook::QuoteGenerator;
