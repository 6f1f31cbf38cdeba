pub mod spks;

use crate::db::DbPool;
use crate::events::EventSender;
use crate::services::spk_numbering::SpkNumberGenerator;
use crate::services::spks::SpkService;
use std::sync::Arc;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub spks: Arc<SpkService>,
}

impl AppServices {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Arc<EventSender>,
        numbering: SpkNumberGenerator,
    ) -> Self {
        Self {
            spks: Arc::new(SpkService::new(db_pool, Some(event_sender), numbering)),
        }
    }
}
