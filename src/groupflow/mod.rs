// src/groupflow/mod.rs

pub mod activation;
pub mod client_wrapper;
pub mod condition;
pub mod config;
pub mod event;
pub mod graph;
pub mod group_chat;
pub mod message;
pub mod participant;
pub mod selector;
pub mod transitions;

// Let's export GroupChat here so it can be reached as groupflow::GroupChat
pub use group_chat::GroupChat;
