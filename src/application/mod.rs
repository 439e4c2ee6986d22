// Application layer: use cases over the ledger aggregate.
// Every mutation runs as lock -> load -> mutate -> save.

pub mod error;
pub mod locks;
pub mod service;

pub use error::*;
pub use locks::*;
pub use service::*;
