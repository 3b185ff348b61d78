//! # companion-voice
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Realtime voice calls between a user and a streaming speech model.
//!
//! `companion-voice` captures the microphone, streams it to the model as
//! 16kHz PCM16 frames and plays the model's 24kHz speech back gaplessly,
//! cutting playback off the moment the user talks over the model.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use companion_voice::{CallConfig, CallController, PersonaContext};
//!
//! # async fn example() -> Result<(), companion_voice::VoiceCallError> {
//! let controller = CallController::builder()
//!     .config(CallConfig::from_env())                // GEMINI_API_KEY
//!     .persona(PersonaContext::new("Ana"))
//!     .on_event(|e| tracing::info!(?e, "call event"))
//!     .build()?;
//!
//! controller.start().await?;
//! tokio::signal::ctrl_c().await.ok();
//! controller.end();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **CPAL Threads**: Input and output callbacks that never block
//! - **Ring Buffer**: Lock-free SPSC queue between the mic callback and the capture bridge
//! - **Tokio Runtime**: The capture bridge frames audio for the session; a
//!   single dispatch loop applies session events to the playback scheduler
//!
//! ```text
//! mic → ring buffer → capture bridge → frames → session ─┐
//!                                                        │
//! speaker ← output mixer ← playback scheduler ← dispatch ┘
//! ```
//!
//! Capture never waits on the network: a congested session loses frames
//! instead of delaying the microphone.

// unsafe_code lint is configured in Cargo.toml as "deny"
#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod builder;
mod call;
mod chunk;
mod config;
mod error;
mod event;
pub mod format;
mod persona;
mod pipeline;
pub mod playback;
mod session;
mod sink;
pub mod source;
pub mod transport;

pub use builder::CallControllerBuilder;
pub use call::{CallController, StartOutcome};
pub use chunk::{AudioChunk, AudioFrame, PlayableBuffer};
pub use config::{
    AudioFormat, CallConfig, DEFAULT_ENDPOINT, DEFAULT_FRAME_SIZE, DEFAULT_MODEL, DEFAULT_VOICE,
};
pub use error::{CodecError, SinkError, TransportError, VoiceCallError};
pub use event::{event_callback, CallEvent, EventCallback};
pub use persona::{
    PersonaContext, CHAT_HISTORY_LIMIT, COMPANION_IDENTITY_LINE, DEFAULT_COMPANION_INSTRUCTION,
    VOICE_HISTORY_LIMIT,
};
pub use session::{CallState, CallStats};
pub use sink::FrameSink;
