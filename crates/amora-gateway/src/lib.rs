pub mod chat;
pub mod connection;
pub mod explore;
pub mod registry;
