use prometheus::{
    Encoder, GaugeVec, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub dispatch_total: IntCounterVec,
    pub orders_in_queue: IntGauge,
    pub retry_queue_depth: IntGauge,
    pub dispatch_latency_seconds: HistogramVec,
    pub notifications_total: IntCounterVec,
    pub driver_utilization: GaugeVec,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let dispatch_total = IntCounterVec::new(
            Opts::new("dispatch_total", "Total dispatch runs by outcome"),
            &["outcome"],
        )
        .expect("valid dispatch_total metric");

        let orders_in_queue = IntGauge::new(
            "orders_in_queue",
            "Current number of orders waiting for the dispatch engine",
        )
        .expect("valid orders_in_queue metric");

        let retry_queue_depth = IntGauge::new(
            "retry_queue_depth",
            "Orders waiting in the driver notification retry queue",
        )
        .expect("valid retry_queue_depth metric");

        let dispatch_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "dispatch_latency_seconds",
                "Latency of dispatch processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid dispatch_latency_seconds metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notifications by channel and outcome"),
            &["channel", "outcome"],
        )
        .expect("valid notifications_total metric");

        let driver_utilization = GaugeVec::new(
            Opts::new("driver_utilization", "Driver utilization ratio [0..1]"),
            &["driver_id"],
        )
        .expect("valid driver_utilization metric");

        registry
            .register(Box::new(dispatch_total.clone()))
            .expect("register dispatch_total");
        registry
            .register(Box::new(orders_in_queue.clone()))
            .expect("register orders_in_queue");
        registry
            .register(Box::new(retry_queue_depth.clone()))
            .expect("register retry_queue_depth");
        registry
            .register(Box::new(dispatch_latency_seconds.clone()))
            .expect("register dispatch_latency_seconds");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(driver_utilization.clone()))
            .expect("register driver_utilization");

        Self {
            registry,
            dispatch_total,
            orders_in_queue,
            retry_queue_depth,
            dispatch_latency_seconds,
            notifications_total,
            driver_utilization,
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
