pub mod buffer;
pub mod cli;
pub mod command;
pub mod engine;
pub mod protocol;
pub mod scheduler;

pub use buffer::Buffer;
pub use cli::prompt;
pub use command::{Command, CommandError};
pub use scheduler::{Scheduler, SchedulerConfig, SchedulerError, TaskId, TaskState};
