// ---- Clippy/lints: keep signals high, noise low ----
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

// Library crate entry so integration tests can drive the controller directly
pub mod config;
pub mod context;
pub mod errors;
pub mod escrow;
pub mod monitor;
pub mod shutdown;
pub mod store;
pub mod transport;
pub mod util;
pub mod wallet;
