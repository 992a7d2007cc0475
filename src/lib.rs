pub mod amount;
pub mod clock;
pub mod config;
pub mod csv;
pub mod engine;
pub mod model;
pub mod replay;
pub mod store;

pub use amount::Tokens;
pub use config::LedgerConfig;
pub use engine::{Engine, ErrorKind, LedgerError};
pub use model::{AccountId, Transaction, TxId, TxKind, TxStatus};
pub use replay::{Command, Replayer};
