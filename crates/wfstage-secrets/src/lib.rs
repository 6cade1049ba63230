pub mod error;
pub mod store;

pub use error::SecretError;
pub use store::{
    CredentialStore, EnvCredentialStore, FileCredentialStore, MemoryCredentialStore,
    SecurityContext,
};
