pub mod chat;
pub mod conversation;
pub mod events;
pub mod failures;
pub mod models;
pub mod prompts;
pub mod request;
pub mod runs;
pub mod tokens;
