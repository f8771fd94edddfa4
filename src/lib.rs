pub mod bookmark;
pub mod driver;
pub mod error;
pub mod principal;
pub mod query;
pub mod server;

pub use bookmark::BookmarkManager;
pub use driver::{GraphDriver, GraphSession, MemoryGraph};
pub use error::{GatewayError, GatewayResult};
pub use principal::Principal;
pub use query::{Mode, QueryEvaluator, ResultHandle, StatementBatch};
pub use server::create_router;
