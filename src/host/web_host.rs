use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use js_sys::{Array, Reflect};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{
    Blob, BlobPropertyBag, ErrorEvent, MessageEvent, Url, Worker, WorkerGlobalScope,
    WorkerOptions, WorkerType,
};

use crate::bootstrap::WorkerEvent;
use crate::config::{default_loader_hint, BootstrapConfig};
use crate::error::{Error, Fault, Result};
use crate::host::{self, Host};
use crate::message::{EntryMode, EntryPoint, EntryToken, WorkerBootstrapMessage};
use crate::resolver::ResolutionPlan;
use crate::task::{self, JoinHandle};

/// Object URL of the worker script. Revoked when the host goes away.
struct ScriptUrl(String);

impl ScriptUrl {
    fn new() -> Result<Self> {
        let options = BlobPropertyBag::new();
        options.set_type("text/javascript");
        let blob = Blob::new_with_str_sequence_and_options(
            &Array::of1(&JsValue::from_str(include_str!("worker.js"))),
            &options,
        )
        .map_err(spawn_failure)?;
        let url = Url::create_object_url_with_blob(&blob).map_err(spawn_failure)?;
        Ok(Self(url))
    }
}

impl Drop for ScriptUrl {
    fn drop(&mut self) {
        Url::revoke_object_url(&self.0).ok();
    }
}

fn spawn_failure(e: JsValue) -> Error {
    Error::SpawnFailure(format!("{e:?}"))
}

/// Spawns module-type web workers running the bundled bootstrap script.
pub struct WebHost {
    script: ScriptUrl,
    plan: ResolutionPlan,
}

impl WebHost {
    pub fn new(plan: ResolutionPlan) -> Result<Self> {
        Ok(Self {
            script: ScriptUrl::new()?,
            plan,
        })
    }

    pub fn from_config(config: &BootstrapConfig) -> Result<Self> {
        Self::new(config.plan.clone())
    }

    /// Runs `f` on a new worker that shares this module and memory.
    pub fn spawn_closure<F>(&mut self, f: F) -> Result<Worker>
    where
        F: FnOnce() + Send + 'static,
    {
        // Double-boxing because `Box<dyn FnOnce()>` is a fat pointer, while
        // the outer box is thin and fits in a u32 on wasm32.
        let ptr = Box::into_raw(Box::new(Box::new(f) as Box<dyn FnOnce()>));
        self.spawn_self(EntryPoint::sync(EntryToken(ptr as u32)), drop_closure)
    }

    /// Runs `future` to completion on a new worker.
    pub fn spawn_future<F>(&mut self, future: F) -> Result<Worker>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let ptr = Box::into_raw(Box::new(
            Box::pin(future) as Pin<Box<dyn Future<Output = ()>>>
        ));
        self.spawn_self(EntryPoint::awaited(EntryToken(ptr as u32)), drop_future)
    }

    pub fn spawn_task<T, F>(&mut self, f: F) -> Result<JoinHandle<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (slot, handle) = task::channel();
        self.spawn_closure(move || slot.call(f))?;
        Ok(handle)
    }

    pub fn spawn_async_task<T, F>(&mut self, future: F) -> Result<JoinHandle<T>>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (slot, handle) = task::channel();
        self.spawn_future(async move { slot.run(future).await })?;
        Ok(handle)
    }

    /// The worker owns the boxed entry once it runs it. Until then it is
    /// ours, and `reclaim` frees it if the worker never gets that far.
    fn spawn_self(&mut self, entry: EntryPoint, reclaim: fn(u32)) -> Result<Worker> {
        let ptr = entry.token.0;
        let worker = host::spawn(
            self,
            wasm_bindgen::module(),
            wasm_bindgen::memory(),
            entry,
            Some(default_loader_hint()),
        )
        .map_err(|e| {
            reclaim(ptr);
            e
        })?;

        let listener = Closure::once_into_js(move |event: MessageEvent| {
            if let Some(WorkerEvent::Failed(
                Error::BindingsNotFound { .. } | Error::InitializationFailure(_),
            )) = parse_event(&event.data())
            {
                log::debug!("worker never ran entry {ptr}, freeing it");
                reclaim(ptr);
            }
        });
        if let Err(e) = worker.add_event_listener_with_callback("message", listener.unchecked_ref())
        {
            log::warn!("entry {ptr} leaks if its worker fails: {e:?}");
        }
        Ok(worker)
    }
}

fn drop_closure(ptr: u32) {
    drop(unsafe { Box::from_raw(ptr as *mut Box<dyn FnOnce()>) });
}

fn drop_future(ptr: u32) {
    drop(unsafe { Box::from_raw(ptr as *mut Pin<Box<dyn Future<Output = ()>>>) });
}

/// True inside a worker, false on the main thread.
pub fn is_worker_scope() -> bool {
    js_sys::global().dyn_into::<WorkerGlobalScope>().is_ok()
}

impl Host for WebHost {
    type Module = JsValue;
    type Memory = JsValue;
    type Worker = Worker;

    fn create_worker(&mut self) -> Result<Worker> {
        let options = WorkerOptions::new();
        options.set_type(WorkerType::Module);
        Worker::new_with_options(&self.script.0, &options).map_err(spawn_failure)
    }

    fn post_message(
        &self,
        worker: &Worker,
        message: WorkerBootstrapMessage<JsValue, JsValue>,
    ) -> Result<()> {
        let (module, memory, entry, hint) = message.into_parts();
        // The worker runs from a blob URL, so relative locations must be
        // made absolute against this context first.
        let base = base_href();
        let candidates: Array = self
            .plan
            .locations(hint.as_ref())
            .into_iter()
            .map(|location| JsValue::from(absolute(&location, base.as_deref())))
            .collect();

        let msg: Array = [
            module,
            memory,
            JsValue::from(entry.token.0),
            JsValue::from_bool(entry.mode == EntryMode::Async),
            candidates.into(),
        ]
        .into_iter()
        .collect();
        worker.post_message(&msg).map_err(spawn_failure)
    }

    fn terminate(&self, worker: &Worker) {
        worker.terminate();
    }
}

fn base_href() -> Option<String> {
    let location = Reflect::get(&js_sys::global(), &"location".into()).ok()?;
    Reflect::get(&location, &"href".into()).ok()?.as_string()
}

fn absolute(location: &str, base: Option<&str>) -> String {
    base.and_then(|base| Url::new_with_base(location, base).ok())
        .map(|url| url.href())
        .unwrap_or_else(|| location.to_owned())
}

#[wasm_bindgen]
pub fn worker_entry_point(ptr: u32) {
    let work = unsafe { Box::from_raw(ptr as *mut Box<dyn FnOnce()>) };
    (*work)();
}

#[wasm_bindgen]
pub async fn async_worker_entry_point(ptr: u32) {
    let work = unsafe { Box::from_raw(ptr as *mut Pin<Box<dyn Future<Output = ()>>>) };
    (*work).await;
}

/// Keeps a worker's listeners alive. Dropping it unregisters nothing but
/// lets the callbacks be collected.
pub struct WorkerEvents {
    _onmessage: Closure<dyn FnMut(MessageEvent)>,
    _onerror: Closure<dyn FnMut(ErrorEvent)>,
}

/// Hands the worker's outcome to `on_event`.
///
/// A failing worker reports on both its message and its error channel.
/// Whichever arrives first is forwarded, the other is only logged.
pub fn observe(worker: &Worker, on_event: impl FnOnce(WorkerEvent) + 'static) -> WorkerEvents {
    let on_event = RefCell::new(Some(on_event));
    let deliver = Rc::new(move |event: WorkerEvent| {
        let on_event = on_event.borrow_mut().take();
        match on_event {
            Some(on_event) => on_event(event),
            None => log::debug!("worker already reported, dropping {event:?}"),
        }
    });

    let onmessage = Closure::<dyn FnMut(MessageEvent)>::new({
        let deliver = deliver.clone();
        move |event: MessageEvent| match parse_event(&event.data()) {
            Some(event) => deliver(event),
            None => log::warn!("unexpected message from worker: {:?}", event.data()),
        }
    });
    let onerror = Closure::<dyn FnMut(ErrorEvent)>::new(move |event: ErrorEvent| {
        log::error!("worker error: {}", event.message());
        deliver(WorkerEvent::Failed(reported_error(&event.message())));
    });
    worker.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    worker.set_onerror(Some(onerror.as_ref().unchecked_ref()));
    WorkerEvents {
        _onmessage: onmessage,
        _onerror: onerror,
    }
}

/// Error events only carry a message, `"<kind>: <reason>"` when the
/// bootstrap script raised it.
fn reported_error(message: &str) -> Error {
    let reason = Fault(message.to_owned());
    if message.contains("BindingsNotFound") {
        Error::BindingsNotFound { attempted: vec![] }
    } else if message.contains("InitializationFailure") {
        Error::InitializationFailure(reason)
    } else {
        Error::EntryExecutionFailure(reason)
    }
}

fn parse_event(data: &JsValue) -> Option<WorkerEvent> {
    let field = |name: &str| Reflect::get(data, &name.into()).ok();
    match field("type")?.as_string()?.as_str() {
        "completed" => Some(WorkerEvent::Completed),
        "failed" => {
            let reason = Fault(field("reason").and_then(|it| it.as_string()).unwrap_or_default());
            let error = match field("error").and_then(|it| it.as_string()).as_deref() {
                Some("BindingsNotFound") => Error::BindingsNotFound {
                    attempted: field("attempted")
                        .map(|it| {
                            Array::from(&it)
                                .iter()
                                .filter_map(|it| it.as_string())
                                .collect()
                        })
                        .unwrap_or_default(),
                },
                Some("InitializationFailure") => Error::InitializationFailure(reason),
                _ => Error::EntryExecutionFailure(reason),
            };
            Some(WorkerEvent::Failed(error))
        }
        _ => None,
    }
}
