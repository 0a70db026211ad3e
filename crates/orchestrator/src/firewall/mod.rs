#![forbid(unsafe_code)]

mod controller;
mod preferences;
mod state;

pub use controller::{FirewallController, FirewallTimings, ScheduleOutcome, auto_block_schedule};
pub use preferences::FirewallPreferences;
pub use state::{FirewallPhase, FirewallState, PackageSet, decode_unblock, encode_unblock};
