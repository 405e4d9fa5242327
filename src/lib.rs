//! Share-intake pipeline for a personal-finance PWA: intercepts Web Share
//! Target posts, persists the payload durably, and hands it off to a page
//! that may not exist yet when the share arrives.
//!
//! The worker side (interceptor, store, relay) runs in the service binary;
//! [`intake::IntakeCoordinator`] is the page-side counterpart, talking to
//! the relay purely over message channels.

pub mod database;
pub mod errors;
pub mod handlers;
pub mod intake;
pub mod models;
pub mod relay;
pub mod store;

use relay::RelayHandle;
use store::ShareStore;

#[derive(Clone)]
pub struct AppState {
    pub store: ShareStore,
    pub relay: RelayHandle,
}
