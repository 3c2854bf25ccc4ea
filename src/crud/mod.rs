//! Draft/publish synchronisation with the server

pub mod diff;
pub mod orchestrator;
pub mod schedule;
pub mod status;

pub use diff::{apply, diff, Edit, Op};
pub use orchestrator::{item_url, list_url, CrudOrchestrator, CrudOutcome};
pub use schedule::{DebounceStats, Debouncer};
pub use status::{EditEvent, EditStatus, EditStatusTracker};
