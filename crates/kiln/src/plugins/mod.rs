//! Built-in plugins

mod repl;
mod sources;
mod splash;

pub use repl::ReplPlugin;
pub use sources::SourcesPlugin;
pub use splash::{SplashHandle, SplashPlugin};
