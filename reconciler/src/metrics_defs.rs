//! Metrics definitions for the reconciler.

use shared::metrics_defs::{MetricDef, MetricType};

pub const EVENTS_RECEIVED: MetricDef = MetricDef {
    name: "events.received",
    metric_type: MetricType::Counter,
    description: "Number of project change notifications received",
};

pub const EVENTS_SKIPPED: MetricDef = MetricDef {
    name: "events.skipped",
    metric_type: MetricType::Counter,
    description: "Number of notifications that required no action, tagged by reason",
};

pub const PROVISIONED: MetricDef = MetricDef {
    name: "reconcile.provisioned",
    metric_type: MetricType::Counter,
    description: "Number of projects assigned a billing account, budget and labels",
};

pub const TORN_DOWN: MetricDef = MetricDef {
    name: "reconcile.torn_down",
    metric_type: MetricType::Counter,
    description: "Number of budgets deleted for projects pending deletion",
};

pub const FAILED: MetricDef = MetricDef {
    name: "reconcile.failed",
    metric_type: MetricType::Counter,
    description: "Number of reconciliations aborted by an API error, tagged by step",
};

pub const BUDGET_ALERTS_RECEIVED: MetricDef = MetricDef {
    name: "budget_alerts.received",
    metric_type: MetricType::Counter,
    description: "Number of budget alerts that arrived on the trigger topic",
};

pub const RECONCILE_DURATION: MetricDef = MetricDef {
    name: "reconcile.duration",
    metric_type: MetricType::Histogram,
    description: "Time to handle one notification in seconds",
};

pub const ALL_METRICS: &[MetricDef] = &[
    EVENTS_RECEIVED,
    EVENTS_SKIPPED,
    PROVISIONED,
    TORN_DOWN,
    FAILED,
    BUDGET_ALERTS_RECEIVED,
    RECONCILE_DURATION,
];
