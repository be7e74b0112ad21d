//! Client side of the wordlink connection layer.
//!
//! A [`ConnectionManager`] owns at most one live connection per process and
//! hands out [`Lease`]s to the views that need it. Platform links plug in
//! through [`link::Connector`]: [`native::NativeConnector`] on desktop,
//! `web::WebConnector` in the browser.

pub mod config;
pub mod error;
pub mod events;
pub mod handles;
pub mod link;
pub mod loopback;
pub mod manager;
mod transport;

#[cfg(not(target_family = "wasm"))]
pub mod native;

#[cfg(target_family = "wasm")]
mod bridge;
#[cfg(target_family = "wasm")]
pub mod web;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_helpers;

pub use config::{ClientConfig, SessionConfig};
pub use error::{ClientError, TransportError};
pub use events::{ConnectionEvent, DisconnectReason, EventKind, ListenerId};
pub use handles::HandleTable;
pub use manager::{ConnectionManager, Lease};

#[cfg(target_family = "wasm")]
pub use bridge::WordlinkClient;
