pub mod health;
pub mod siri_messages;

pub use health::HealthState;
pub use siri_messages::SiriMessagesState;

use axum::Router;

/// Assemble the HTTP surface. The push callback is only mounted in
/// subscription mode; health endpoints exist on every replica.
pub fn router(health_state: HealthState, callback_state: Option<SiriMessagesState>) -> Router {
    let mut router = Router::new().nest("/health", health::router(health_state));
    if let Some(state) = callback_state {
        router = router.nest("/siriMessages", siri_messages::router(state));
    }
    router
}
