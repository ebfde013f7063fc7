use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use focus_core::models::{OperationStatus, SessionType, TaskPriority, TaskStatus};

#[derive(Parser)]
#[command(name = "focus")]
#[command(about = "Offline-first tasks and focus sessions from the command line")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Sync server base URL (falls back to FOCUS_API_URL)
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,

    /// Bearer token for the sync server (falls back to FOCUS_TOKEN)
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    /// Account the local data belongs to (falls back to FOCUS_USER_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub user_id: Option<String>,

    /// Override the stored device id (falls back to FOCUS_DEVICE_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub device_id: Option<String>,

    /// Skip the server even when it is configured
    #[arg(long, global = true)]
    pub offline: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage tasks
    Task {
        #[command(subcommand)]
        command: TaskCommands,
    },
    /// Manage focus sessions
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Inspect the offline operation queue
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
    /// Replay queued changes and pull from the server
    Sync,
    /// Show queue, cursor and connectivity state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List conflicts the server resolved
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum TaskCommands {
    /// Create a task
    #[command(alias = "new")]
    Add {
        /// Task title
        title: Vec<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,
        /// Tag to attach (repeatable)
        #[arg(short, long = "tag")]
        tags: Vec<String>,
    },
    /// Change fields of a task
    Update {
        /// Task ID or unique ID prefix
        id: String,
        #[arg(long)]
        title: Option<String>,
        #[arg(short, long)]
        description: Option<String>,
        #[arg(short, long, value_enum)]
        priority: Option<PriorityArg>,
        #[arg(short, long, value_enum)]
        status: Option<StatusArg>,
    },
    /// Mark a task completed
    Done {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// Delete a task
    Delete {
        /// Task ID or unique ID prefix
        id: String,
    },
    /// List tasks
    List {
        /// Only tasks in this status
        #[arg(short, long, value_enum)]
        status: Option<StatusArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum SessionCommands {
    /// Start a focus session
    Start {
        /// Task ID or unique ID prefix to focus on
        #[arg(short, long)]
        task: Option<String>,
        #[arg(short, long, value_enum, default_value_t = SessionKindArg::Work)]
        kind: SessionKindArg,
        /// Planned length in minutes
        #[arg(short, long, default_value = "25")]
        minutes: u32,
    },
    /// Complete a running session
    Finish {
        /// Session ID or unique ID prefix
        id: String,
    },
    /// List sessions
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum QueueCommands {
    /// List queued operations
    List {
        #[arg(short, long, value_enum)]
        status: Option<QueueStatusArg>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop completed operations past the retention window
    Purge,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PriorityArg {
    Low,
    Medium,
    High,
}

impl From<PriorityArg> for TaskPriority {
    fn from(value: PriorityArg) -> Self {
        match value {
            PriorityArg::Low => Self::Low,
            PriorityArg::Medium => Self::Medium,
            PriorityArg::High => Self::High,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum StatusArg {
    Pending,
    InProgress,
    Completed,
}

impl From<StatusArg> for TaskStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => Self::Pending,
            StatusArg::InProgress => Self::InProgress,
            StatusArg::Completed => Self::Completed,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SessionKindArg {
    Work,
    ShortBreak,
    LongBreak,
}

impl From<SessionKindArg> for SessionType {
    fn from(value: SessionKindArg) -> Self {
        match value {
            SessionKindArg::Work => Self::Work,
            SessionKindArg::ShortBreak => Self::ShortBreak,
            SessionKindArg::LongBreak => Self::LongBreak,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum QueueStatusArg {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl From<QueueStatusArg> for OperationStatus {
    fn from(value: QueueStatusArg) -> Self {
        match value {
            QueueStatusArg::Pending => Self::Pending,
            QueueStatusArg::Processing => Self::Processing,
            QueueStatusArg::Completed => Self::Completed,
            QueueStatusArg::Failed => Self::Failed,
        }
    }
}
