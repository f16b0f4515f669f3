// Sol Cycle Core Library
// Address-lifecycle trading pipeline logic

pub mod models;
pub mod error;
pub mod settings;
pub mod store;
pub mod retry;
pub mod rpc_client;
pub mod wallet;
pub mod signer;
pub mod discovery;
pub mod swap;
pub mod activity_log;

pub mod stages;
pub mod pipeline;

// Re-exports
pub use error::CoreError;
pub use models::*;
pub use settings::Settings;
pub use store::*;
pub use retry::RetryPolicy;
pub use rpc_client::*;
pub use wallet::*;
pub use signer::*;
pub use discovery::*;
pub use swap::*;
pub use pipeline::*;
