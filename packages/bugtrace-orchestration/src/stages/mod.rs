//! Pipeline stage implementations

pub mod build;
pub mod callgrind;
pub mod convert;
pub mod materialize;
pub mod trace;

pub use build::InstrumentedBuilder;
pub use callgrind::CallgrindStrategy;
pub use convert::TraceToGraphConverter;
pub use materialize::RevisionMaterializer;
pub use trace::{Execution, ExecutionTracer, FunctionCallStrategy, TraceStrategy};
