use super::ShardEvent;
use async_trait::async_trait;
use std::future::Future;
use tokio::sync::mpsc;

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Consumer of gateway dispatches. Called once per event, in arrival order per
/// shard. A returned error is logged and does not stop the queue.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    async fn handle(&self, event: ShardEvent) -> Result<(), HandlerError>;
}

#[async_trait]
impl EventHandler for mpsc::Sender<ShardEvent> {
    async fn handle(&self, event: ShardEvent) -> Result<(), HandlerError> {
        self.send(event).await.map_err(|e| Box::new(e) as HandlerError)
    }
}

pub struct HandlerFn<F>(F);

/// Wraps an async closure as an [`EventHandler`].
pub fn handler_fn<F, Fut>(f: F) -> HandlerFn<F>
where
    F: Fn(ShardEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    HandlerFn(f)
}

#[async_trait]
impl<F, Fut> EventHandler for HandlerFn<F>
where
    F: Fn(ShardEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, event: ShardEvent) -> Result<(), HandlerError> {
        (self.0)(event).await
    }
}
