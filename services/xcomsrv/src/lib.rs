//! Studer Xcom-232 poller (`xcomsrv`)
//!
//! Polls energy-management devices over a half-duplex serial link using the
//! scom request/response protocol and republishes decoded values to MQTT,
//! with debounced liveness markers and Home Assistant discovery metadata.
//!
//! Layering, leaves first: [`transport`] owns the byte stream, the
//! `scom-proto` crate owns the wire format, [`executor`] turns both into
//! validated single-in-flight transactions, [`scheduler`] fans the static
//! parameter table over one link, and [`bridge`] maps every outcome onto
//! the topic space.

pub mod bridge;
pub mod config;
pub mod executor;
pub mod scheduler;
pub mod transport;

pub use config::AppConfig;
pub use executor::{FailureKind, RequestExecutor, TransactionOutcome, MAX_ATTEMPTS};
pub use scheduler::{OutcomeSink, PollScheduler, PollStrategy};
