//! HTTP surface: account endpoints, the Stripe webhook route and the
//! subscription gate.
//!
//! Authentication is the host server's job. Its auth layer must put an
//! [`AuthenticatedEmail`] into the request extensions before these routes
//! run.

pub mod extract;
pub mod routes;
mod server;

pub use extract::{AuthenticatedEmail, email_from_header, require_subscription};
pub use routes::{AppState, DynProvider, DynStore, router};
pub use server::{app, serve};
