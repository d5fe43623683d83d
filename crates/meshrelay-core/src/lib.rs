pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::{CoreError, Result};
pub use types::{
    ContextMode, Group, GroupFolder, Jid, Message, RunOutcome, ScheduleKind, ScheduledTask,
    TaskRunLog, TaskStatus, Timestamp,
};
