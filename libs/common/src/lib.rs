//! Shared runtime plumbing for modqtt services
//!
//! - `logging`: tracing subscriber with bracketed console format and daily rolling files
//! - `shutdown`: signal handling bridged onto a `CancellationToken`
//! - `bootstrap_args`: command-line arguments shared by every binary
//! - `env_file`: `.env` seeding (dotenv) that never overrides the real environment
//! - `config_loader`: figment-based JSON + environment configuration loading

pub mod bootstrap_args;
pub mod config_loader;
pub mod env_file;
pub mod logging;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use shutdown::{spawn_signal_listener, stop_signal_listener, wait_for_shutdown};
