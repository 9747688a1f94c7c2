mod shard_manager;
pub use shard_manager::ShardManager;

mod options;
pub use options::{ManagerOptions, ShardCount};

mod fatal_error;
pub use fatal_error::FatalError;

mod identify_queue;
pub use identify_queue::{IdentifyQueue, LocalIdentifyQueue, DEFAULT_IDENTIFY_INTERVAL};

mod gateway_bot;
pub use gateway_bot::{GatewayBot, SessionStartLimit};
