pub mod articles;
pub mod auth;
pub mod communications;
pub mod error;
pub mod memberships;
pub mod middleware;
pub mod parameters;
pub mod preferences;

use std::sync::Arc;

use amicale_db::Database;
use amicale_mailer::dispatcher::DispatchConfig;
use amicale_mailer::provider::{MailConfig, Mailer};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub mailer: Arc<dyn Mailer>,
    pub mail: MailConfig,
    pub dispatch: DispatchConfig,
    pub jwt_secret: String,
}
