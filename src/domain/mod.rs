mod account;
mod category;
mod error;
mod ledger;
mod money;
mod transaction;
mod user;

pub use account::*;
pub use category::*;
pub use error::*;
pub use ledger::*;
pub use money::*;
pub use transaction::*;
pub use user::*;
