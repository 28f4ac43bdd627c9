//! Metrics and observability infrastructure.
//!
//! - `events`: internal event types and the `InternalEvent` trait
//! - `server`: Prometheus recorder and optional HTTP endpoint

pub mod events;
pub mod server;

pub use server::{MetricsController, init_global, init_test};

/// Emit an internal event as a metric.
///
/// ```ignore
/// use sparkify_core::emit;
/// use sparkify_core::metrics::events::RowsWritten;
///
/// emit!(RowsWritten { count: 100, table: "songs" });
/// ```
#[macro_export]
macro_rules! emit {
    ($event:expr) => {
        $crate::metrics::events::InternalEvent::emit($event)
    };
}

pub use emit;
