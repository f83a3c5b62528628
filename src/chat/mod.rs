pub mod orchestrator;
pub mod session;

pub use orchestrator::{ChatDeps, ChatReply, build_messages_list, format_knowledge_base_string, handle_turn};
