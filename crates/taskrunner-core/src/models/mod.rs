pub mod audit;
pub mod snapshot;
pub mod step;
pub mod task;
pub mod tool_call;

pub use audit::*;
pub use snapshot::*;
pub use step::*;
pub use task::*;
pub use tool_call::*;
