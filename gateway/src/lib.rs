pub mod gateway;
pub use gateway::{
    ConnectionState, GatewayError, Result, SessionInfo, Shard, ShardInfo, ShardOptions, StatusUpdate,
};

pub mod dispatch;
pub use dispatch::{handler_fn, EventDispatchQueue, EventHandler, EventSender, HandlerError, ShardEvent};

pub mod manager;
pub use manager::{
    FatalError, GatewayBot, IdentifyQueue, LocalIdentifyQueue, ManagerOptions, SessionStartLimit, ShardCount,
    ShardManager,
};

mod builders;
pub use builders::{configure_observability, ObservabilityGuard};

mod config;
pub use config::Config;

mod util;
pub use util::await_shutdown;

#[cfg(feature = "metrics")]
pub mod metrics;
