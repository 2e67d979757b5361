//! `photohub` command line: project workflow commands and filesystem
//! import/export jobs run through the job engine.

pub mod args;
pub mod commands;
pub mod context;
pub mod fs_jobs;
pub mod media;
pub mod settings;

pub use args::{Cli, Command, ProjectAction};
pub use commands::run;
pub use context::AppContext;
pub use settings::Settings;
