pub mod message;

pub use message::{ContextKind, ConversationKey, Message, Role};
