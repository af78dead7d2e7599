//! Inbox responder: polls a mailbox, classifies replies, answers the personal ones.

pub mod channels;
pub mod config;
pub mod context;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod store;
