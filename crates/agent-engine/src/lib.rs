pub mod cancel;
pub mod driver;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod probe;
pub mod slot;
pub mod sync;

pub use cancel::CancellationToken;
pub use driver::Driver;
pub use error::{AgentError, Result};
pub use executor::JobExecutor;
pub use orchestrator::OrchestratorClient;
pub use slot::JobSlot;
pub use sync::SyncController;
