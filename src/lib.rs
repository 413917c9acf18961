pub mod cli;
pub mod command;
pub mod protocol;
pub mod scheduler;
pub mod session;

pub use cli::prompt;
pub use command::{Command, CommandError};
pub use protocol::{Code, Intent, Message, Params};
pub use session::{Controller, ControllerConfig, Session};
