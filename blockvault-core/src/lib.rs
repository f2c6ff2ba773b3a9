pub mod catalog;
pub mod error;
pub mod files;
pub mod record;
pub mod retrieval;
pub mod runtime;
pub mod store;

pub use error::{BlockError, BlockResult};
pub use record::{BlockKey, BlockRecord, BlockState};
pub use retrieval::BlockStream;
pub use runtime::{CatalogStats, Runtime, RuntimeOptions};
