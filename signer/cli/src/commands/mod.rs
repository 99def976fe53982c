mod client;
mod serve;
mod storage;

pub use self::client::ClientCommand;
pub use self::serve::ServeCommand;
pub use self::storage::StorageArgs;
