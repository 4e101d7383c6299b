//! Named callback registry with failure isolation
//!
//! Handlers are invoked in registration order. A handler that returns an
//! error or panics is logged and skipped; delivery to the remaining handlers
//! and the triggering call both continue.

use crate::error::HandlerError;
use log::error;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

/// Callback invoked with every dispatched item
pub type Handler<T> = Box<dyn Fn(&T) -> Result<(), HandlerError> + Send>;

/// Ordered set of named handlers
pub struct HandlerRegistry<T> {
    handlers: Vec<(String, Handler<T>)>,
}

impl<T> Default for HandlerRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for HandlerRegistry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.names())
            .finish()
    }
}

impl<T> HandlerRegistry<T> {
    pub fn new() -> Self {
        Self {
            handlers: Vec::new(),
        }
    }

    /// Register a handler, replacing any handler with the same name
    pub fn add<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&T) -> Result<(), HandlerError> + Send + 'static,
    {
        let handler: Handler<T> = Box::new(handler);
        match self.handlers.iter_mut().find(|(existing, _)| existing == name) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((name.to_string(), handler)),
        }
    }

    /// Remove a handler by name
    ///
    /// # Returns
    ///
    /// `true` if a handler was removed
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(existing, _)| existing != name);
        self.handlers.len() != before
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Deliver an item to every handler
    ///
    /// # Returns
    ///
    /// The failures, by handler name; empty when every handler succeeded
    pub fn dispatch(&self, item: &T) -> Vec<(String, HandlerError)> {
        let mut failures = Vec::new();
        for (name, handler) in &self.handlers {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| handler(item)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
            };
            error!("Handler '{}' failed: {}", name, failure);
            failures.push((name.clone(), failure));
        }
        failures
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_dispatch_reaches_every_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry: HandlerRegistry<u32> = HandlerRegistry::new();

        for name in ["a", "b"] {
            let seen = Arc::clone(&seen);
            registry.add(name, move |item| {
                seen.lock().unwrap().push(format!("{}:{}", name, item));
                Ok(())
            });
        }

        assert!(registry.dispatch(&7).is_empty());
        assert_eq!(*seen.lock().unwrap(), vec!["a:7", "b:7"]);
    }

    #[test]
    fn test_failing_and_panicking_handlers_are_isolated() {
        let delivered = Arc::new(Mutex::new(0));
        let mut registry: HandlerRegistry<u32> = HandlerRegistry::new();

        registry.add("fails", |_| Err(HandlerError::Failed("boom".to_string())));
        registry.add("panics", |_| panic!("handler exploded"));
        let counter = Arc::clone(&delivered);
        registry.add("works", move |_| {
            *counter.lock().unwrap() += 1;
            Ok(())
        });

        let failures = registry.dispatch(&1);

        assert_eq!(*delivered.lock().unwrap(), 1);
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].0, "fails");
        assert_eq!(
            failures[1].1,
            HandlerError::Panicked("handler exploded".to_string())
        );
    }

    #[test]
    fn test_add_replaces_and_remove() {
        let mut registry: HandlerRegistry<u32> = HandlerRegistry::new();
        registry.add("x", |_| Ok(()));
        registry.add("x", |_| Err(HandlerError::Failed("replaced".to_string())));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.dispatch(&0).len(), 1);

        assert!(registry.remove("x"));
        assert!(!registry.remove("x"));
        assert!(registry.is_empty());
    }
}
