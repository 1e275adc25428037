//! Event dispatch with panic isolation.
//!
//! Each dispatched event gets one walker task; within it the matching
//! handlers run strictly in insertion order, each awaited to completion
//! before the next (events themselves still dispatch concurrently, one
//! task per frame). A panicking handler never kills the session or the
//! walk: the invocation runs on its own task so the panic is caught off
//! the join handle, and the original event is redispatched once through
//! the error-handler chain with the failure attached. A failure inside
//! an error handler is logged and swallowed.

use std::sync::{Arc, RwLock, Weak};

use ch_client::{Event, EventSink, event_type};
use tracing::{debug, error};

use crate::app::AppCore;
use crate::context::Context;
use crate::handler::Handler;
use crate::persist::Persistence;

pub struct Dispatcher {
    weak_self: Weak<Dispatcher>,
    handlers: RwLock<Vec<Arc<dyn Handler>>>,
    error_handlers: RwLock<Vec<Arc<dyn Handler>>>,
    persistence: Arc<dyn Persistence>,
    app: RwLock<Weak<AppCore>>,
}

impl Dispatcher {
    pub fn new(persistence: Arc<dyn Persistence>) -> Arc<Dispatcher> {
        Arc::new_cyclic(|weak| Dispatcher {
            weak_self: weak.clone(),
            handlers: RwLock::new(Vec::new()),
            error_handlers: RwLock::new(Vec::new()),
            persistence,
            app: RwLock::new(Weak::new()),
        })
    }

    pub(crate) fn bind_app(&self, app: &Arc<AppCore>) {
        *self.app.write().unwrap() = Arc::downgrade(app);
    }

    pub fn add_handler(&self, handler: Arc<dyn Handler>) {
        self.handlers.write().unwrap().push(handler);
    }

    pub fn add_error_handler(&self, handler: Arc<dyn Handler>) {
        self.error_handlers.write().unwrap().push(handler);
    }

    fn run_chain(&self, event: Event) {
        let Some(dispatcher) = self.weak_self.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            let handlers = dispatcher.handlers.read().unwrap().clone();
            for handler in handlers {
                if !handler.check(&event) {
                    continue;
                }
                let ctx = dispatcher.build_context(&event);
                if let Some(message) = invoke_isolated(handler.invoke(event.clone(), ctx)).await {
                    debug!(%message, "handler panicked; redispatching on error chain");
                    dispatcher.run_error_chain(&event, message).await;
                }
            }
        });
    }

    /// Redispatch a failed handler's event, with the failure attached, to
    /// the error-handler chain. A second failure here is terminal: logged
    /// and swallowed, never redispatched again.
    async fn run_error_chain(&self, original: &Event, message: String) {
        let error_event = Event::Error {
            original: Some(Box::new(original.clone())),
            message,
        };
        let handlers = self.error_handlers.read().unwrap().clone();
        for handler in handlers {
            if !handler.check(&error_event) {
                continue;
            }
            let ctx = self.build_context(&error_event);
            if let Some(message) = invoke_isolated(handler.invoke(error_event.clone(), ctx)).await
            {
                error!(%message, "error handler panicked; swallowing");
            }
        }
    }

    /// Bot store always; chat store keyed by group name, or the peer's
    /// lowercased name for private messages from registered senders.
    fn build_context(&self, event: &Event) -> Context {
        let chat_store = chat_store_key(event)
            .map(|key| self.persistence.chat_data(&key));
        Context {
            app: self
                .app
                .read()
                .unwrap()
                .upgrade()
                .map(crate::app::App::from_core),
            bot_store: self.persistence.bot_data(),
            chat_store,
        }
    }
}

impl EventSink for Dispatcher {
    fn dispatch(&self, event: Event) {
        self.run_chain(event);
    }
}

/// Run one handler invocation on its own task so a panic unwinds into
/// the join handle instead of the walker. Returns the panic message when
/// the invocation blew up.
async fn invoke_isolated(invocation: crate::handler::HandlerFuture) -> Option<String> {
    match tokio::spawn(invocation).await {
        Ok(()) => None,
        Err(join_error) if join_error.is_panic() => {
            Some(panic_message(join_error.into_panic()))
        }
        Err(_) => None,
    }
}

fn chat_store_key(event: &Event) -> Option<String> {
    if let Some(group) = event.group() {
        return Some(group.name().to_owned());
    }
    if event.kind() & (event_type::PRIVATE_MESSAGE | event_type::PRIVATE_OFFLINE_MESSAGE) != 0 {
        let user = event.user()?;
        if !user.is_anon {
            return Some(user.name.to_lowercase());
        }
    }
    None
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_owned()
    }
}
