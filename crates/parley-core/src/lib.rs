pub mod errors;
pub mod frames;
pub mod ids;
pub mod message;
pub mod provider;
pub mod state;

pub mod mock;

pub use errors::ChatError;
pub use frames::{ChatRequest, ChatResponse, ClientFrame, ServerFrame};
pub use message::{ChatMessage, Role};
pub use provider::{ModelProvider, TokenEvent};
pub use state::{ChatEvent, ConnectionState, LoadingState};
