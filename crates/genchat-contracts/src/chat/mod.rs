mod command_registry;
mod intent_parser;
mod turns;

pub use command_registry::CHAT_HELP_COMMANDS;
pub use intent_parser::{parse_intent, Intent};
pub use turns::{turns_from_json, turns_to_json, ChatContent, ChatRole, ChatTurn, MediaRef};
