pub mod status;

pub use status::{StatusDisplay, StatusReport, TerminalStatus};
