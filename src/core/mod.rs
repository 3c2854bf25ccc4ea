pub mod path;
pub mod value;
pub mod store;
pub mod errors;
pub mod observer;


pub use path::{Path, Segment};
pub use store::Store;
pub use observer::{Observers, Subscription};
pub use errors::{CrudError, CrudResult, Result, StoreError};
