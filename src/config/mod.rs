//! Configuration models for tasks and the supervisor.

pub mod supervisor;
pub mod task;

pub use supervisor::{load_dotenv, SupervisorConfig};
pub use task::{ScheduleOverrides, ScheduleWindow, TaskConfig, TaskManifest};
