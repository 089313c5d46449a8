//! Typed results for work run on a worker.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use futures::future::{AbortHandle, AbortRegistration, Abortable};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Error)]
pub enum JoinError {
    #[error("task was aborted")]
    Aborted,
    #[error("task panicked")]
    Panic,
    /// The task was dropped before it started, typically because its worker
    /// failed to bootstrap.
    #[error("task never ran")]
    Cancelled,
}

/// Creates the two ends of a task: the slot moves into the worker's entry,
/// the handle stays with the spawner.
pub fn channel<T>() -> (TaskSlot<T>, JoinHandle<T>) {
    let (tx, rx) = oneshot::channel();
    let (abort_handle, registration) = AbortHandle::new_pair();
    let progress = Arc::new(Progress::default());
    let slot = TaskSlot {
        tx,
        registration,
        guard: DoneGuard(progress.clone()),
    };
    let handle = JoinHandle {
        abort_handle,
        aborted: false,
        progress,
        rx,
    };
    (slot, handle)
}

#[derive(Default)]
struct Progress {
    started: AtomicBool,
    done: AtomicBool,
}

struct DoneGuard(Arc<Progress>);

impl DoneGuard {
    fn start(&self) {
        self.0.started.store(true, Ordering::Release);
    }
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.done.store(true, Ordering::Release);
    }
}

pub struct TaskSlot<T> {
    tx: oneshot::Sender<T>,
    registration: AbortRegistration,
    guard: DoneGuard,
}

impl<T> TaskSlot<T> {
    /// Runs `f` and sends its value. A panic in `f` drops the slot after it
    /// was marked as started, so the handle reports [`JoinError::Panic`].
    pub fn call(self, f: impl FnOnce() -> T) {
        self.guard.start();
        let value = f();
        // The handle may have been dropped or aborted.
        self.tx.send(value).ok();
    }

    pub async fn run<F: Future<Output = T>>(self, future: F) {
        self.guard.start();
        if let Ok(value) = Abortable::new(future, self.registration).await {
            self.tx.send(value).ok();
        }
    }
}

pub struct JoinHandle<T> {
    abort_handle: AbortHandle,
    aborted: bool,
    progress: Arc<Progress>,
    rx: oneshot::Receiver<T>,
}

impl<T> JoinHandle<T> {
    /// Waits for the task's value. A task that went away without producing
    /// one was aborted, panicked, or never got to run.
    pub async fn join(self) -> Result<T, JoinError> {
        let aborted = self.aborted;
        let progress = self.progress;
        self.rx.await.map_err(|_| {
            if aborted {
                JoinError::Aborted
            } else if progress.started.load(Ordering::Acquire) {
                JoinError::Panic
            } else {
                JoinError::Cancelled
            }
        })
    }

    pub fn abort(&mut self) {
        self.abort_handle.abort();
        self.aborted = true;
        self.rx.close();
    }

    pub fn is_finished(&self) -> bool {
        self.aborted || self.progress.done.load(Ordering::Acquire)
    }
}

/// Runs `future` on the current thread, interleaved with the caller's own
/// work.
#[cfg(target_arch = "wasm32")]
pub fn spawn_local<F>(future: F) -> JoinHandle<F::Output>
where
    F: Future + 'static,
    F::Output: 'static,
{
    let (slot, handle) = channel();
    wasm_bindgen_futures::spawn_local(slot.run(future));
    handle
}

#[cfg(target_arch = "wasm32")]
pub use self::js::{js_spawn_local, JsJoinHandle};

#[cfg(target_arch = "wasm32")]
mod js {
    use js_sys::Promise;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen_futures::JsFuture;

    use super::{spawn_local, JoinError, JoinHandle};

    #[wasm_bindgen(js_name = "JoinHandle")]
    pub struct JsJoinHandle {
        handle: JoinHandle<Result<JsValue, JsValue>>,
    }

    #[wasm_bindgen(js_class = "JoinHandle")]
    impl JsJoinHandle {
        /// Resolves with the promise's value, or rejects with its error or
        /// with the reason the task produced none.
        pub async fn join(self) -> Result<JsValue, JsValue> {
            self.handle.join().await.map_err(JsValue::from)?
        }

        pub fn abort(&mut self) {
            self.handle.abort();
        }

        #[wasm_bindgen(js_name = "isFinished")]
        pub fn is_finished(&self) -> bool {
            self.handle.is_finished()
        }
    }

    /// Drives `promise` on the current thread.
    #[wasm_bindgen(js_name = "spawnLocal")]
    pub fn js_spawn_local(promise: Promise) -> JsJoinHandle {
        JsJoinHandle {
            handle: spawn_local(JsFuture::from(promise)),
        }
    }

    impl From<JoinError> for JsValue {
        fn from(e: JoinError) -> Self {
            JsValue::from_str(&e.to_string())
        }
    }
}
