//! HTTP route handlers for the preorder API.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health                      - Liveness check
//!
//! # Enrollment
//! POST /api/checkout-session        - Hosted checkout (charge now / subscribe)
//! POST /api/setup-session           - Hosted save-card-now session
//! POST /api/setup-intent            - Bare setup intent (embedded card form)
//!
//! # Order views
//! GET  /api/setup-session/{id}      - Order view behind a checkout session
//! GET  /api/setup-intent/{id}       - Order view behind a setup intent
//! GET  /api/session/{id}            - Plain session summary (thank-you page)
//! GET  /api/portal-session/{id}     - Billing-portal link (customer or session id)
//!
//! # Lifecycle
//! POST /api/preorder/activate       - Mark active, record preferences
//! POST /api/preorder/finalize       - Attach card, mark ordered
//! POST /api/preorder/cancel         - Cancel (terminal)
//! POST /api/preorder/teardown       - Abandonment cleanup
//!
//! # Customer
//! POST /api/customer/update         - Contact details
//! POST /api/customer/shipping       - Shipping / billing address
//!
//! # Misc
//! POST /api/coupon/validate         - Coupon check
//! POST /api/subscribe               - Mailing-list signup (CRM only)
//! ```

pub mod coupon;
pub mod customer;
pub mod preorder;
pub mod sessions;
pub mod subscribe;

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

/// Create the `/api` router.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/checkout-session", post(sessions::create_checkout))
        .route("/setup-session", post(sessions::create_setup_session))
        .route("/setup-intent", post(sessions::create_setup_intent))
        .route("/setup-session/{id}", get(sessions::get_setup_session))
        .route("/setup-intent/{id}", get(sessions::get_setup_intent))
        .route("/session/{id}", get(sessions::get_session))
        .route("/portal-session/{id}", get(sessions::get_portal_session))
        .route("/preorder/activate", post(preorder::activate))
        .route("/preorder/finalize", post(preorder::finalize))
        .route("/preorder/cancel", post(preorder::cancel))
        .route("/preorder/teardown", post(preorder::teardown))
        .route("/customer/update", post(customer::update))
        .route("/customer/shipping", post(customer::shipping))
        .route("/coupon/validate", post(coupon::validate))
        .route("/subscribe", post(subscribe::subscribe))
}
