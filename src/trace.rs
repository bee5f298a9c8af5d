use std::sync::Arc;
use std::time::Duration;

/// Collaborator timing how long an activation takes to settle.
///
/// A store configured with a `trace_id` calls [`start`](TraceCollector::start)
/// when its source is opened and [`stop`](TraceCollector::stop) when the
/// first push (value or error) lands for that activation.  Task stores stop
/// the trace at their terminal event instead, since the interesting span
/// there is the whole operation.  Reactivations start a fresh measurement.
pub trait TraceCollector: Send + Sync + 'static {
    fn start(&self, trace_id: &str);
    fn stop(&self, trace_id: &str, elapsed: Duration);
}

/// Default collector reporting through [`tracing`] debug events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingCollector;

impl TraceCollector for TracingCollector {
    fn start(&self, trace_id: &str) {
        tracing::debug!(trace_id, "trace started");
    }

    fn stop(&self, trace_id: &str, elapsed: Duration) {
        tracing::debug!(trace_id, ?elapsed, "trace stopped");
    }
}

/// Collector that discards all measurements.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCollector;

impl TraceCollector for NoopCollector {
    fn start(&self, _trace_id: &str) {}
    fn stop(&self, _trace_id: &str, _elapsed: Duration) {}
}

pub(crate) fn default_collector() -> Arc<dyn TraceCollector> {
    Arc::new(TracingCollector)
}
