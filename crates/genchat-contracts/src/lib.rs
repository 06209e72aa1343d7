pub mod chat;
pub mod context;
pub mod events;
pub mod media;
pub mod models;
pub mod request;
