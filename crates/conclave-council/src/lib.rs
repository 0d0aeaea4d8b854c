pub mod broadcaster;
pub mod error;
pub mod host;
pub mod orchestrator;
pub mod prompt;
pub mod reactor;

pub use broadcaster::{spawn_broadcaster, Broadcaster, PublishError, Publisher};
pub use error::OrchestratorError;
pub use orchestrator::Council;
pub use reactor::{Reactor, ReactorHandle, ReactorState};
