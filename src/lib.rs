//! caseflow: transition engine for long-running case instances.
//!
//! A transition (start, move, abandon, end) is turned into ordered command
//! sets and executed under a per-instance lock, either in-process through the
//! [`command::CommandPipeline`] or by handing the commands to a remote process
//! engine and polling it until the job settles.

pub mod cli;
pub mod command;
pub mod config;
pub mod engine;
pub mod error;
pub mod hooks;
pub mod instance;
pub mod lock;
pub mod logging;
pub mod remote;
pub mod retry;
pub mod session;

pub use engine::{ProcessEngine, ProcessStateChange};
pub use error::{EngineError, Result};
