pub mod monitor;

pub use monitor::{Monitor, MonitorError};
