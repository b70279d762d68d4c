pub mod control;
pub mod diff;
pub mod executor;
pub mod listener;
pub mod policy;
pub mod processor;
pub mod status;

pub use control::{ControlFlags, TransferControlBlock, TransferFilter};
pub use diff::{DiffEntry, ObjectType, SideInfo, StorageTreeDiff, TreeDiffProducer};
pub use executor::{OperationKind, StorageTransferExecutor, TransferExecutor, TransferOperation};
pub use listener::{
    CallbackCounts, CallbackTelemetry, ListenerError, ListenerSet, TracingListener,
    TransferStatusCallbackListener,
};
pub use policy::{Decision, DecisionKind, DecisionSummary, ReconciliationPolicy, Watermarks};
pub use processor::{FileFailure, RunResult, RunState, SynchronizeProcessor, SynchronizeRequest};
pub use status::{TransferState, TransferStatus, TransferType};
