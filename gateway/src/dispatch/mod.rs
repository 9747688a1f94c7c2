mod event;
pub use event::ShardEvent;

mod handler;
pub use handler::{handler_fn, EventHandler, HandlerError, HandlerFn};

mod queue;
pub use queue::{EventDispatchQueue, EventSender};
