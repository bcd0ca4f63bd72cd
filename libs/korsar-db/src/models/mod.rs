pub mod host;
mod key;
mod meta;
mod notification;
mod plan;
mod token;
mod transaction;
mod user;

pub use host::Host;
pub use key::{Key, KeySpec, KeyStatus};
pub use meta::{KeyAction, Operation, PurchaseMeta};
pub use notification::Notification;
pub use plan::{Plan, PlanDisplayMode};
pub use token::CabinetToken;
pub use transaction::{Transaction, TxStatus};
pub use user::User;
