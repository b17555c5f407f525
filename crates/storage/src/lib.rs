pub mod secret;
pub mod store;

pub use secret::{KeyStore, PlaintextCodec, Secret, SecretCodec};
pub use store::{ChatStore, ConversationRef, DEFAULT_TITLE};
