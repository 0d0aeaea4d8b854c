pub mod anthropic;
pub mod backend;
pub mod factory;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use backend::{BackendError, ChatBackend, ChatRequest, ChatResponse, ChatTurn, Role};
pub use factory::build_backend;
pub use mock::MockBackend;
