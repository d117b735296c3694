//! Serial link layer
//!
//! Abstracts the half-duplex byte stream to the Xcom-232 gateway behind the
//! [`SerialLink`] trait so the request executor can be driven against real
//! hardware or a scripted double.

mod mock;
mod serial;
mod traits;

pub use mock::{MockLink, Reply};
pub use serial::{SerialConfig, SerialPortLink};
pub use traits::{LinkError, SerialLink};
