pub mod chat;
pub mod client;

pub use chat::{CharaChat, ChatHistory, Message, StreamDisplay};
pub use client::{ApiKey, ChatClient, ChatClientError, OpenAIModel, Role};
