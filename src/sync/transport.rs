//! Network and timer seams for the fetcher.
//!
//! The fetcher only needs "GET a URL as text", "abort everything in flight"
//! and "wait for a duration". Browser builds implement these with `fetch`,
//! an `AbortController` and `setTimeout`; tests substitute fakes.

use std::future::Future;
use std::time::Duration;

/// A completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Issues GET requests against the remote dataset host.
pub trait Transport {
    /// Fetches `url` and returns the status and body text.
    ///
    /// `Err` carries a network-level failure message; HTTP error statuses
    /// are returned as `Ok` with the status set.
    fn get(&self, url: &str) -> impl Future<Output = Result<HttpResponse, String>>;

    /// Aborts every request still in flight.
    fn abort(&self);
}

/// Suspends the caller for a duration.
pub trait Timer {
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()>;
}

#[cfg(target_arch = "wasm32")]
pub use web::{user_agent, WebTimer, WebTransport};

#[cfg(target_arch = "wasm32")]
mod web {
    use super::{HttpResponse, Timer, Transport};
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::time::Duration;
    use wasm_bindgen::prelude::*;
    use wasm_bindgen_futures::JsFuture;
    use web_sys::{AbortController, Request, RequestInit, RequestMode, Response};

    #[wasm_bindgen]
    extern "C" {
        #[wasm_bindgen(js_name = setTimeout)]
        fn set_timeout(handler: &js_sys::Function, millis: u32) -> i32;
    }

    fn js_error(value: JsValue) -> String {
        if let Some(exception) = value.dyn_ref::<web_sys::DomException>() {
            return format!("{}: {}", exception.name(), exception.message());
        }
        if let Some(error) = value.dyn_ref::<js_sys::Error>() {
            return String::from(error.message());
        }
        value.as_string().unwrap_or_else(|| format!("{:?}", value))
    }

    /// `fetch`-based transport sharing one abort controller per batch.
    #[derive(Clone, Default)]
    pub struct WebTransport {
        controller: Rc<RefCell<Option<AbortController>>>,
    }

    impl WebTransport {
        pub fn new() -> Self {
            Self::default()
        }

        fn signal(&self) -> Result<web_sys::AbortSignal, String> {
            let mut controller = self.controller.borrow_mut();
            if controller.is_none() {
                *controller = Some(AbortController::new().map_err(js_error)?);
            }
            controller
                .as_ref()
                .map(AbortController::signal)
                .ok_or_else(|| "Abort controller unavailable".to_string())
        }
    }

    impl Transport for WebTransport {
        async fn get(&self, url: &str) -> Result<HttpResponse, String> {
            let init = RequestInit::new();
            init.set_method("GET");
            init.set_mode(RequestMode::Cors);
            init.set_signal(Some(&self.signal()?));

            let request = Request::new_with_str_and_init(url, &init).map_err(js_error)?;

            let global = js_sys::global();
            let promise = if let Some(window) = global.dyn_ref::<web_sys::Window>() {
                window.fetch_with_request(&request)
            } else if let Some(worker) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
                worker.fetch_with_request(&request)
            } else {
                return Err("No window or worker global".to_string());
            };

            let response: Response = JsFuture::from(promise)
                .await
                .map_err(js_error)?
                .dyn_into()
                .map_err(|_| "fetch did not return a Response".to_string())?;

            let status = response.status();
            if !response.ok() {
                return Ok(HttpResponse::status(status));
            }

            let text = JsFuture::from(response.text().map_err(js_error)?)
                .await
                .map_err(js_error)?;

            Ok(HttpResponse {
                status,
                body: text.as_string().unwrap_or_default(),
            })
        }

        fn abort(&self) {
            // The next request gets a fresh controller.
            if let Some(controller) = self.controller.borrow_mut().take() {
                controller.abort();
            }
        }
    }

    /// `setTimeout`-backed timer.
    #[derive(Clone, Copy, Default)]
    pub struct WebTimer;

    impl Timer for WebTimer {
        async fn sleep(&self, duration: Duration) {
            let millis = duration.as_millis().min(i32::MAX as u128) as u32;
            let (tx, rx) = futures_channel::oneshot::channel::<()>();
            // Owned by JS until it fires, so dropping this future early is safe.
            let callback = Closure::once_into_js(move || {
                let _ = tx.send(());
            });
            set_timeout(callback.unchecked_ref(), millis);
            let _ = rx.await;
        }
    }

    /// The browser's user agent string, if one is exposed.
    pub fn user_agent() -> Option<String> {
        let global = js_sys::global();
        if let Some(window) = global.dyn_ref::<web_sys::Window>() {
            window.navigator().user_agent().ok()
        } else if let Some(worker) = global.dyn_ref::<web_sys::WorkerGlobalScope>() {
            worker.navigator().user_agent().ok()
        } else {
            None
        }
    }
}
