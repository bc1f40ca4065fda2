pub mod audio;
pub mod config;
pub mod control;
pub mod error;
pub mod ui;

pub use audio::{Looper, LooperState};
pub use config::LooperConfig;
pub use error::{LooperError, Result};
