#![cfg(target_arch = "wasm32")]

use std::time::Duration;

use wasm_bindgen::prelude::*;

use crate::scheduler::{CancelToken, Scheduler, Task};

#[wasm_bindgen]
extern "C" {
	#[wasm_bindgen(js_name = setTimeout)]
	fn set_timeout(closure: &JsValue, millis: i32) -> i32;
}

/// Runs tasks on the browser event loop through `setTimeout`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TimeoutScheduler;

impl Scheduler for TimeoutScheduler {
	fn submit(&self, after: Duration, task: Task) -> CancelToken {
		let token = CancelToken::new();
		let guard = token.clone();
		let millis = after.as_millis().min(i32::MAX as u128) as i32;
		set_timeout(
			&Closure::once_into_js(move || {
				if guard.is_cancelled() {
					return;
				}
				if let Err(error) = task() {
					tracing::error!(%error, "scheduled reactive task failed");
				}
			}),
			millis,
		);
		token
	}
}
