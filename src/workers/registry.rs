use std::collections::HashMap;
use std::sync::Arc;

use super::handler::JobHandler;
use crate::modules::tracks::events::TRANSCODING_INFOS_QUEUE;
use crate::modules::tracks::handler::TranscodingInfosHandler;

/// Queue name to handler mapping.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn JobHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every queue this crate knows how to process.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(TRANSCODING_INFOS_QUEUE, Arc::new(TranscodingInfosHandler));
        registry
    }

    /// Binds `handler` to `queue`, replacing any previous binding.
    pub fn register(&mut self, queue: impl Into<String>, handler: Arc<dyn JobHandler>) -> &mut Self {
        self.handlers.insert(queue.into(), handler);
        self
    }

    pub fn get(&self, queue: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.get(queue).cloned()
    }

    pub fn queues(&self) -> Vec<&str> {
        let mut queues: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        queues.sort_unstable();
        queues
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("queues", &self.queues())
            .finish()
    }
}
