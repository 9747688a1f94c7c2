mod payload;
pub use payload::Payload;

mod opcode;
pub use opcode::Opcode;

mod heartbeat;
pub use heartbeat::Heartbeat;

mod hello;
pub use hello::Hello;

mod identify;
pub use identify::{ConnectionProperties, Identify, IdentifyData};

mod presence_update;
pub use presence_update::{Activity, ActivityType, PresenceUpdate, StatusType, StatusUpdate};

mod ready;
pub use ready::Ready;

mod resume;
pub use resume::Resume;
