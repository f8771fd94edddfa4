pub mod batch;
pub mod evaluator;
pub mod streamer;

pub use batch::{AnnotatedStatement, ResultShape, StatementBatch};
pub use evaluator::{Mode, QueryEvaluator, ResultHandle, StatementResult, StreamEvent};
pub use streamer::{render_buffered, streaming_response};
