//! Input intake: the localhost upload listener and the voice folder monitor.
//!
//! The listener turns HTTP posts into [`Input`](crate::producers::Input)s for
//! the content pipeline. The monitor watches the folder synthesized speech
//! is written to and feeds new audio files to the analysis worker.

mod monitor;
mod server;

pub use monitor::FolderMonitor;
pub use server::IntakeServer;
