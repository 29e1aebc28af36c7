//! Metrics and health endpoint for the archiver.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder plus the HTTP health/metrics endpoint

pub mod events;
pub mod server;

pub use server::init;

/// Emit an internal event.
///
/// Calls `InternalEvent::emit()` on the given event, which records the
/// corresponding metric and a trace line.
///
/// ```ignore
/// use kafka_archiver::metrics::events::RecordsIngested;
///
/// emit!(RecordsIngested { count: 1 });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}
