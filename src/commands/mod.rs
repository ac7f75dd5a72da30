mod command;
mod command_error;
mod config;
mod echo;
mod get;
mod incr;
mod info;
mod keys;
mod ping;
mod psync;
mod replconf;
mod set;
mod stream_reply;
mod type_command;
mod wait;
mod xadd;
mod xrange;
mod xread;

pub use command::{Command, CommandOutcome, execute, is_known, is_mutating};
pub use command_error::CommandError;
