use opentelemetry::global;
use opentelemetry::metrics::Counter;

/// OTLP counters for the production loop. Without an installed meter
/// provider these are no-ops.
pub(crate) struct StreamMetrics {
    pub frames: Counter<u64>,
    pub skipped: Counter<u64>,
    pub bytes: Counter<u64>,
    pub restarts: Counter<u64>,
}

impl StreamMetrics {
    pub(crate) fn new(meter_name: &'static str) -> Self {
        let meter = global::meter(meter_name);

        let frames = meter
            .u64_counter("screenstream_frames_total")
            .with_description("Total frames published to the buffer")
            .build();
        let skipped = meter
            .u64_counter("screenstream_frames_skipped_total")
            .with_description("Total units dropped as undecodable")
            .build();
        let bytes = meter
            .u64_counter("screenstream_bytes_total")
            .with_description("Total bytes read from the transport")
            .with_unit("By")
            .build();
        let restarts = meter
            .u64_counter("screenstream_session_restarts_total")
            .with_description("Session restarts after a time limit or reconnect")
            .build();

        Self {
            frames,
            skipped,
            bytes,
            restarts,
        }
    }
}
