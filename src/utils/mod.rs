pub mod cancel;
pub mod command;
pub mod secret;
pub mod spool;
pub mod stream;

pub use cancel::CancellationToken;
pub use secret::Secret;
pub use spool::Spool;
