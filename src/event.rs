//! Runtime events for monitoring a call.
//!
//! Events are notifications about call behavior. Apart from state changes
//! they are non-fatal - the call keeps running after they are emitted.

use std::sync::Arc;

use crate::CallState;

/// Runtime events emitted during a call.
///
/// Use the [`EventCallback`] to log these, drive a status line or update
/// metrics.
///
/// # Example
///
/// ```
/// use companion_voice::CallEvent;
///
/// fn handle_event(event: CallEvent) {
///     match event {
///         CallEvent::StateChanged { state, status } => {
///             eprintln!("{state:?}: {status}");
///         }
///         CallEvent::FrameDropped { total_dropped } => {
///             eprintln!("network too slow, {total_dropped} frames dropped");
///         }
///         CallEvent::ChunkDropped { reason } => {
///             eprintln!("bad model audio: {reason}");
///         }
///         CallEvent::Interrupted { stopped } => {
///             eprintln!("barge-in, {stopped} buffers cut");
///         }
///         CallEvent::TurnComplete => {}
///     }
/// }
/// ```
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// The call moved to a new lifecycle state.
    StateChanged {
        /// The new state.
        state: CallState,
        /// Human-readable status line for the new state.
        status: String,
    },

    /// An outbound frame was dropped because the session queue was full.
    ///
    /// Capture never waits on the network; a congested link loses audio
    /// instead of delaying the microphone.
    FrameDropped {
        /// Frames dropped so far in this call.
        total_dropped: u64,
    },

    /// An inbound audio chunk could not be decoded and was skipped.
    ChunkDropped {
        /// Description of the decode failure.
        reason: String,
    },

    /// The remote signalled that the user started speaking over the model.
    Interrupted {
        /// Number of scheduled buffers that were cut off.
        stopped: usize,
    },

    /// The model finished its turn.
    TurnComplete,
}

/// Callback type for receiving runtime events.
///
/// Register one via [`CallControllerBuilder::on_event()`].
///
/// [`CallControllerBuilder::on_event()`]: crate::CallControllerBuilder::on_event
pub type EventCallback = Arc<dyn Fn(CallEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use companion_voice::{event_callback, CallEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(CallEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_event_debug() {
        let event = CallEvent::FrameDropped { total_dropped: 7 };
        let debug = format!("{:?}", event);
        assert!(debug.contains("FrameDropped"));
        assert!(debug.contains('7'));
    }

    #[test]
    fn test_call_event_clone() {
        let event = CallEvent::StateChanged {
            state: CallState::Active,
            status: "Ativa e Ouvindo".to_string(),
        };
        if let CallEvent::StateChanged { state, status } = event.clone() {
            assert_eq!(state, CallState::Active);
            assert_eq!(status, "Ativa e Ouvindo");
        } else {
            panic!("Expected StateChanged variant");
        }
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        callback(CallEvent::TurnComplete);
        assert!(called.load(Ordering::SeqCst));
    }
}
