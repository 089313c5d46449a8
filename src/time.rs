//! Timers for the main thread and for workers.

use std::time::Duration;

use js_sys::{Function, Promise};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;
use web_sys::{Window, WorkerGlobalScope};

fn set_timeout(callback: &Function, dur: Duration) -> Result<i32, JsValue> {
    let millis = i32::try_from(dur.as_millis()).unwrap_or(i32::MAX);
    let global = js_sys::global();
    if let Some(window) = global.dyn_ref::<Window>() {
        window.set_timeout_with_callback_and_timeout_and_arguments_0(callback, millis)
    } else if let Some(scope) = global.dyn_ref::<WorkerGlobalScope>() {
        scope.set_timeout_with_callback_and_timeout_and_arguments_0(callback, millis)
    } else {
        Err(JsValue::from_str("no timers in this global scope"))
    }
}

/// Resolves after `dur` without blocking the thread.
pub async fn sleep(dur: Duration) {
    let promise = Promise::new(&mut |resolve, reject| {
        if let Err(e) = set_timeout(&resolve, dur) {
            reject.call1(&JsValue::UNDEFINED, &e).ok();
        }
    });
    if let Err(e) = JsFuture::from(promise).await {
        log::warn!("sleep ended early: {e:?}");
    }
}

#[wasm_bindgen(js_name = "sleepMs")]
pub async fn sleep_ms(ms: u32) {
    sleep(Duration::from_millis(ms.into())).await;
}

/// Blocks the calling thread. Browsers only allow this inside a worker.
pub fn sleep_blocking(dur: Duration) {
    std::thread::sleep(dur);
}

#[wasm_bindgen(js_name = "sleepBlockingMs")]
pub fn sleep_blocking_ms(ms: u32) {
    sleep_blocking(Duration::from_millis(ms.into()));
}
