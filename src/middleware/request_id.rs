//! Request correlation IDs
//!
//! Incoming `x-request-id` headers are kept; otherwise a UUID v4 is minted.
//! The value is echoed on the response so dashboard errors can be matched to
//! server logs.

use axum::http::HeaderName;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

pub const X_REQUEST_ID: &str = "x-request-id";

/// `(set, propagate)` pair; `set` must wrap the trace layer so spans see the ID
pub fn request_id_layer() -> (SetRequestIdLayer<MakeRequestUuid>, PropagateRequestIdLayer) {
    let header = HeaderName::from_static(X_REQUEST_ID);

    (
        SetRequestIdLayer::new(header.clone(), MakeRequestUuid),
        PropagateRequestIdLayer::new(header),
    )
}
