//! RAII guard for a running device stream.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use crate::VoiceCallError;

/// A running audio device stream.
///
/// The stream runs while this guard is held. Dropping it (or calling
/// [`stop()`](DeviceStream::stop)) stops the stream and releases the device
/// before returning.
///
/// CPAL streams are not `Send`, so each one lives on its own thread which
/// builds it, plays it and drops it once the guard lets go.
#[must_use = "the device stream stops when the guard is dropped"]
pub struct DeviceStream {
    inner: Inner,
}

enum Inner {
    Thread {
        shutdown: Option<std_mpsc::Sender<()>>,
        thread: Option<JoinHandle<()>>,
    },
    Hook(Option<Box<dyn FnOnce() + Send>>),
}

impl DeviceStream {
    /// Builds a stream on a dedicated thread and keeps it alive there.
    ///
    /// `setup` runs on the new thread; its extra value is handed back to
    /// the caller once the stream is playing.
    ///
    /// # Errors
    ///
    /// Returns whatever `setup` fails with, or `BackendError` if the thread
    /// cannot be spawned.
    pub fn spawn<T, F>(name: &str, setup: F) -> Result<(Self, T), VoiceCallError>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<(cpal::Stream, T), VoiceCallError> + Send + 'static,
    {
        let (ready_tx, ready_rx) = std_mpsc::sync_channel(1);
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || match setup() {
                Ok((stream, value)) => {
                    if ready_tx.send(Ok(value)).is_err() {
                        return;
                    }
                    // Parked until the guard drops its sender
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })
            .map_err(|e| VoiceCallError::BackendError(e.to_string()))?;

        match ready_rx.recv() {
            Ok(Ok(value)) => Ok((
                Self {
                    inner: Inner::Thread {
                        shutdown: Some(shutdown_tx),
                        thread: Some(thread),
                    },
                },
                value,
            )),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(VoiceCallError::BackendError(format!(
                    "{name} thread exited during setup"
                )))
            }
        }
    }

    /// Creates a guard with no device behind it that runs `on_release` when stopped.
    ///
    /// Used by test doubles to observe when a call lets go of its devices.
    pub fn from_release_hook(on_release: impl FnOnce() + Send + 'static) -> Self {
        Self {
            inner: Inner::Hook(Some(Box::new(on_release))),
        }
    }

    /// Stops the stream and releases the device. Safe to call more than once.
    pub fn stop(&mut self) {
        match &mut self.inner {
            Inner::Thread { shutdown, thread } => {
                drop(shutdown.take());
                if let Some(thread) = thread.take() {
                    if thread.join().is_err() {
                        tracing::error!("audio device thread panicked");
                    }
                }
            }
            Inner::Hook(hook) => {
                if let Some(hook) = hook.take() {
                    hook();
                }
            }
        }
    }
}

impl Drop for DeviceStream {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for DeviceStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner {
            Inner::Thread { .. } => "thread",
            Inner::Hook(_) => "hook",
        };
        f.debug_struct("DeviceStream").field("kind", &kind).finish()
    }
}
