mod shard;
pub use shard::{SessionInfo, Shard};

pub mod payloads;
pub use payloads::{Activity, ActivityType, StatusType, StatusUpdate};

mod error;
pub use error::{GatewayError, Result};

mod close_event;
pub use close_event::{CloseAction, CloseEvent};

mod options;
pub use options::{ShardOptions, API_VERSION, DEFAULT_GATEWAY_URL};

mod shardinfo;
pub use shardinfo::ShardInfo;

mod state;
pub use state::ConnectionState;

mod timer;

#[cfg(feature = "compression")]
mod decompress;
#[cfg(feature = "compression")]
pub use decompress::Inflater;
