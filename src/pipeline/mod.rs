//! Outbound audio pipeline.
//!
//! The pipeline connects the microphone to the session via a ring buffer:
//!
//! ```text
//! CPAL Thread → Ring Buffer → Capture Bridge → Frame Sink (outbound queue)
//! ```
//!
//! - **Ring Buffer**: Lock-free SPSC queue keeps the audio callback wait-free
//! - **Capture Bridge**: Converts device audio to 16kHz mono and cuts frames
//! - **Frame Assembler**: Accumulates samples into fixed-size fixed-point frames

mod capture;
mod frame_buffer;

pub(crate) use capture::{spawn_capture_bridge, CaptureBridge, CaptureConfig};
pub(crate) use frame_buffer::FrameAssembler;
