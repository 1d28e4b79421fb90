//! memovox core - domain types, errors, configuration, local-day clock,
//! audio format tags, streak computation and collaborator interfaces.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod format;
pub mod streak;
pub mod types;

pub use clock::{DayClock, FixedClock, OffsetClock, SystemClock};
pub use config::MemovoxConfig;
pub use error::{MemovoxError, Result};
pub use streak::{LongestStreakPolicy, StreakSnapshot};
pub use types::*;
