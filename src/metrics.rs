use prometheus::{Encoder, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

/// Process-wide invocation counters and the in-flight transcode gauge.
///
/// One instance is created at startup and shared by `Arc` with every
/// concurrent unit; all handles are internally synchronized, so no further
/// locking is needed at call sites.
pub struct WorkerMetrics {
    registry: Registry,
    invocations: IntCounterVec,
    active_transcodes: IntGauge,
}

impl WorkerMetrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let invocations = IntCounterVec::new(
            Opts::new(
                "ffmpeg_gateway_invocations_total",
                "Number of command invocations, by binary base name",
            ),
            &["binary"],
        )?;
        registry.register(Box::new(invocations.clone()))?;

        let active_transcodes = IntGauge::new(
            "ffmpeg_gateway_active_transcodes",
            "Transcodes currently in flight, excluding health-check runs",
        )?;
        registry.register(Box::new(active_transcodes.clone()))?;

        Ok(Self {
            registry,
            invocations,
            active_transcodes,
        })
    }

    pub fn record_invocation(&self, binary: &str) {
        self.invocations.with_label_values(&[binary]).inc();
    }

    /// Count one transcode as in flight until the returned guard is dropped.
    ///
    /// The decrement rides on `Drop`, so it is paired with the increment on
    /// every exit path, including cancellation and spawn failure.
    pub fn track_transcode(&self) -> InFlightGuard {
        self.active_transcodes.inc();
        InFlightGuard {
            gauge: self.active_transcodes.clone(),
        }
    }

    pub fn active_transcodes(&self) -> i64 {
        self.active_transcodes.get()
    }

    /// Prometheus text exposition of every registered metric.
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

pub struct InFlightGuard {
    gauge: IntGauge,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.gauge.dec();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invocations_are_counted_per_binary() {
        let metrics = WorkerMetrics::new().unwrap();
        metrics.record_invocation("ffmpeg");
        metrics.record_invocation("ffmpeg");
        metrics.record_invocation("ffprobe");

        let rendered = metrics.render().unwrap();
        assert!(rendered
            .contains("ffmpeg_gateway_invocations_total{binary=\"ffmpeg\"} 2"));
        assert!(rendered
            .contains("ffmpeg_gateway_invocations_total{binary=\"ffprobe\"} 1"));
    }

    #[test]
    fn gauge_increment_and_decrement_are_paired() {
        let metrics = WorkerMetrics::new().unwrap();
        assert_eq!(metrics.active_transcodes(), 0);

        let guard = metrics.track_transcode();
        assert_eq!(metrics.active_transcodes(), 1);

        let second = metrics.track_transcode();
        assert_eq!(metrics.active_transcodes(), 2);

        drop(guard);
        assert_eq!(metrics.active_transcodes(), 1);
        drop(second);
        assert_eq!(metrics.active_transcodes(), 0);
    }

    #[test]
    fn render_includes_gauge() {
        let metrics = WorkerMetrics::new().unwrap();
        let _guard = metrics.track_transcode();
        let rendered = metrics.render().unwrap();
        assert!(rendered.contains("ffmpeg_gateway_active_transcodes 1"));
    }
}
