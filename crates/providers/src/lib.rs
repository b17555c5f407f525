pub mod chat;
pub mod error;
pub mod search;
pub mod sse;
