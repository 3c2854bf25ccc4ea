//! Domain records: statuses, actions, entity capabilities, path layout

pub mod entity;
pub mod list;
pub mod paths;
pub mod registry;
pub mod status;

pub use entity::{HasId, HasType, Kind, NEW_ID};
pub use list::{List, ListNode};
pub use paths::{entity_path, error_path, list_path, ListQuery};
pub use registry::{TypeRegistry, TypeSpec};
pub use status::{CrudAction, KStatus, ListEffect};
