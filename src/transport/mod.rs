//! Ingestion transports. Every event source implements [`EventTransport`],
//! so new sources can be added without touching the publish path.

pub mod http;
pub mod lines;

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::errors::Result;
use crate::models::Event;

/// Forwarding callback invoked synchronously for each accepted event.
pub type EventHandler = Arc<dyn Fn(Event) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[async_trait]
pub trait EventTransport: Send + Sync {
    /// Begins accepting events. Non-blocking; serving continues until
    /// [`EventTransport::stop`] or process-wide cancellation.
    async fn start(&self) -> Result<()>;

    async fn stop(&self) -> Result<()>;

    /// Replaces the active forwarding callback. Safe during live traffic.
    fn set_handler(&self, handler: EventHandler);
}

/// Shared slot holding the active handler: exclusive lock on replacement,
/// shared lock on the per-request read.
#[derive(Clone, Default)]
pub struct HandlerSlot {
    inner: Arc<RwLock<Option<EventHandler>>>,
}

impl HandlerSlot {
    // A panic while a guard is held must not disable ingestion; the slot
    // only ever stores a replaceable Arc, so the poisoned value is usable.
    pub fn replace(&self, handler: EventHandler) {
        let mut guard = self.inner.write().unwrap_or_else(|e| e.into_inner());
        *guard = Some(handler);
    }

    pub fn current(&self) -> Option<EventHandler> {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[tokio::test]
    async fn handler_slot_replacement_takes_effect() {
        let slot = HandlerSlot::default();
        assert!(slot.current().is_none());

        let hits = Arc::new(AtomicU64::new(0));
        let counted = hits.clone();
        slot.replace(Arc::new(move |_event| {
            let counted = counted.clone();
            Box::pin(async move {
                counted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            })
        }));

        let handler = slot.current().unwrap();
        handler(Event::default()).await.unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);

        // Second replacement swaps the callback out entirely.
        slot.replace(Arc::new(|_event| Box::pin(async { Ok(()) })));
        let handler = slot.current().unwrap();
        handler(Event::default()).await.unwrap();
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn handler_slot_survives_poisoned_lock() {
        let slot = HandlerSlot::default();
        slot.replace(Arc::new(|_event| Box::pin(async { Ok(()) })));

        let holder = slot.clone();
        std::thread::spawn(move || {
            let _guard = holder.inner.write().unwrap();
            panic!("holder panicked with the lock held");
        })
        .join()
        .unwrap_err();

        assert!(slot.current().is_some());
        slot.replace(Arc::new(|_event| Box::pin(async { Ok(()) })));
        assert!(slot.current().is_some());
    }
}
