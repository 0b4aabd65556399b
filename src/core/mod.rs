pub mod command_channel;
pub mod dispatcher;
pub mod event_bus;
pub mod runtime_context;
pub mod runtime_state;
pub mod snapshot_store;
pub mod variable_pool;

pub use command_channel::{Command, CommandChannel, CommandSender, InMemoryCommandChannel};
pub use dispatcher::{EngineConfig, GraphEngine, GraphRunOutcome};
pub use event_bus::{EventEmitter, GraphEngineEvent, PauseReason};
pub use runtime_context::{
    FakeIdGenerator, FakeTimeProvider, IdGenerator, RealIdGenerator, RealTimeProvider,
    RuntimeContext, TimeProvider,
};
pub use runtime_state::{GraphRuntimeState, PausedNode, SnapshotError, SNAPSHOT_VERSION};
pub use snapshot_store::{FileRuntimeStateStore, MemoryRuntimeStateStore, RuntimeStateStore};
pub use variable_pool::{FileSegment, Segment, SegmentType, Selector, VariablePool};
