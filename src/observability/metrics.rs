use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub requests_total: IntCounterVec,
    pub requests_pending: IntGauge,
    pub providers_online: IntGauge,
    pub request_fanout_size: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("requests_total", "Resolved requests by outcome"),
            &["outcome"],
        )
        .expect("valid requests_total metric");

        let requests_pending = IntGauge::new(
            "requests_pending",
            "Requests currently awaiting a provider response",
        )
        .expect("valid requests_pending metric");

        let providers_online = IntGauge::new(
            "providers_online",
            "Providers currently registered on a live session",
        )
        .expect("valid providers_online metric");

        let request_fanout_size = Histogram::with_opts(
            HistogramOpts::new(
                "request_fanout_size",
                "Number of candidates notified per request",
            )
            .buckets(vec![0.0, 1.0, 2.0, 3.0, 5.0, 8.0]),
        )
        .expect("valid request_fanout_size metric");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("register requests_total");
        registry
            .register(Box::new(requests_pending.clone()))
            .expect("register requests_pending");
        registry
            .register(Box::new(providers_online.clone()))
            .expect("register providers_online");
        registry
            .register(Box::new(request_fanout_size.clone()))
            .expect("register request_fanout_size");

        Self {
            registry,
            requests_total,
            requests_pending,
            providers_online,
            request_fanout_size,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
