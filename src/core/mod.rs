pub mod events;
pub mod filter;
pub mod path;
pub mod planner;
pub mod report;
pub mod scanner;
pub mod transfer;

pub use events::{ConsoleSink, EventSink, NullSink, SyncEvent};
pub use filter::{PatternFilter, PatternSet};
pub use path::PathKey;
pub use planner::{
    plan_bidirectional, plan_pull, plan_push, Direction, SyncEngine, SyncMode, SyncReport,
    TransferIntent,
};
pub use report::{
    dry_run_download, dry_run_push, dry_run_upload, hash_file, human_bytes, DryRunReport,
    PushEstimate,
};
pub use scanner::{scan_local, scan_remote, FileRecord, TreeMapping};
pub use transfer::{TransferEngine, UploadOutcome};
