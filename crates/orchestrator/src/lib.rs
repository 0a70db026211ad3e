#![forbid(unsafe_code)]

pub mod clock;
pub mod enforcement;
mod engine;
mod error;
pub mod firewall;
pub mod notify;
pub mod persistence;
pub mod scheduler;
pub mod sync;

pub use engine::{ControlEvent, PassReport, Services, SilentPort, Stores};
pub use error::Error;
