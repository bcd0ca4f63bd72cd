mod host_repo;
mod key_repo;
mod notification_repo;
mod plan_repo;
mod purchase_repo;
mod settings_repo;
mod token_repo;
mod transaction_repo;
mod user_repo;

pub use host_repo::HostRepository;
pub use key_repo::{KeyRepository, KeyWithOwner};
pub use notification_repo::NotificationRepository;
pub use plan_repo::PlanRepository;
pub use purchase_repo::{
    CommitOutcome, PurchaseCommit, PurchaseRepository, ReferralCredit, TopupOutcome,
};
pub use settings_repo::SettingsRepository;
pub use token_repo::TokenRepository;
pub use transaction_repo::TransactionRepository;
pub use user_repo::UserRepository;

use sqlx::PgPool;

/// Bundle of repositories sharing one pool. Cloning is cheap; every
/// repository holds its own pool handle.
#[derive(Clone)]
pub struct Store {
    pub users: UserRepository,
    pub hosts: HostRepository,
    pub plans: PlanRepository,
    pub keys: KeyRepository,
    pub transactions: TransactionRepository,
    pub purchases: PurchaseRepository,
    pub tokens: TokenRepository,
    pub notifications: NotificationRepository,
    pub settings: SettingsRepository,
}

impl Store {
    pub fn new(pool: PgPool) -> Self {
        Self {
            users: UserRepository::new(pool.clone()),
            hosts: HostRepository::new(pool.clone()),
            plans: PlanRepository::new(pool.clone()),
            keys: KeyRepository::new(pool.clone()),
            transactions: TransactionRepository::new(pool.clone()),
            purchases: PurchaseRepository::new(pool.clone()),
            tokens: TokenRepository::new(pool.clone()),
            notifications: NotificationRepository::new(pool.clone()),
            settings: SettingsRepository::new(pool),
        }
    }
}
