//! Named function handlers answering remote function-call requests.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::RwLock;

use super::messages::{FunctionCallRequest, FunctionReply};

/// Async function handler. Its output becomes the reply `Content`.
pub type FunctionHandler =
    Arc<dyn Fn(FunctionCallRequest) -> Pin<Box<dyn Future<Output = String> + Send>> + Send + Sync>;

/// Registry of function handlers keyed by function name.
#[derive(Default)]
pub struct FunctionRegistry {
    handlers: RwLock<HashMap<String, FunctionHandler>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one under the same name.
    pub fn register(&self, name: impl Into<String>, handler: FunctionHandler) {
        let name = name.into();
        if self.handlers.write().insert(name.clone(), handler).is_some() {
            tracing::debug!("Replaced function handler '{}'", name);
        }
    }

    /// Remove a handler. Returns whether one was registered.
    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.write().remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Run the handler for `request`.
    ///
    /// Returns `None` when no handler is registered for the requested name.
    pub async fn invoke(&self, request: &FunctionCallRequest) -> Option<FunctionReply> {
        let handler = self.handlers.read().get(&request.function_name).cloned();
        let handler = handler?;

        tracing::debug!(
            "Invoking function '{}' for call {}",
            request.function_name,
            request.call_id
        );
        let content = handler(request.clone()).await;
        Some(FunctionReply::new(request.call_id.clone(), content))
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut names: Vec<&String> = handlers.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}
