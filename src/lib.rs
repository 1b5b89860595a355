//! Lipsync: audio-driven mouth animation for a 3D character.
//!
//! The crate turns speech recordings into viseme keyframes and sequences the
//! resulting clips on a playback timeline:
//! Audio file → decode → spectral features → visemes → clip → scheduler → timeline
//!
//! # Architecture
//!
//! - **Analysis**: [`viseme::VisemeAnalyzer`] maps spectral features to
//!   mouth shapes, run off the main loop by [`worker::AnalysisWorker`]
//! - **Commit**: [`clip::ClipBuilder`] places finished clips on the [`scene::Scene`]
//! - **Scheduling**: [`scheduler::AnimationScheduler`] queues clips so they
//!   never overlap, driven per frame by [`playback::PlaybackController`]
//! - **Producers**: pluggable speech-to-text, reply generation and
//!   text-to-speech services reached over HTTP
//! - **Intake**: a localhost upload listener and a voice folder monitor

pub mod audio;
pub mod clip;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod idle;
pub mod intake;
pub mod playback;
pub mod producers;
pub mod scene;
pub mod scheduler;
pub mod session;
pub mod viseme;
pub mod worker;

pub use config::LipSyncConfig;
pub use error::{LipSyncError, Result};
pub use session::LipSyncSession;
