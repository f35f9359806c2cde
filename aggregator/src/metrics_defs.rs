use shared::metrics_defs::{MetricDef, MetricType};

pub const REQUEST_DURATION: MetricDef = MetricDef {
    name: "request.duration",
    metric_type: MetricType::Histogram,
    description: "Request duration in seconds. Tagged with status.",
};

pub const UPSTREAM_FAILURES: MetricDef = MetricDef {
    name: "upstream.failures",
    metric_type: MetricType::Counter,
    description: "Upstream fetches that fell back to an error value. Tagged with source.",
};

pub const XML_FETCH_ATTEMPTS: MetricDef = MetricDef {
    name: "xml.fetch.attempts",
    metric_type: MetricType::Counter,
    description: "Attempts made against the dwelling type XML source, retries included",
};

pub const ENRICHMENT_REQUESTS: MetricDef = MetricDef {
    name: "enrichment.requests",
    metric_type: MetricType::Counter,
    description: "Per-object energy label requests sent",
};

pub const MERGED_FEATURES: MetricDef = MetricDef {
    name: "merged.features",
    metric_type: MetricType::Histogram,
    description: "Dwelling objects that survived the join, per request",
};

pub const ALL_METRICS: &[MetricDef] = &[
    REQUEST_DURATION,
    UPSTREAM_FAILURES,
    XML_FETCH_ATTEMPTS,
    ENRICHMENT_REQUESTS,
    MERGED_FEATURES,
];
