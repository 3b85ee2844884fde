//! Prometheus metrics for the consume loop.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Per-queue pipeline metrics, labeled by queue subject and handler.
#[derive(Clone)]
pub struct QueueMetrics {
    queue: String,
    handler: String,
}

impl QueueMetrics {
    pub fn new(queue: &str, handler: &str) -> Self {
        Self {
            queue: queue.to_string(),
            handler: handler.to_string(),
        }
    }

    pub fn job_received(&self) {
        counter!(
            "pipeline_jobs_received_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn job_processed(&self, duration: Duration) {
        counter!(
            "pipeline_jobs_processed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);

        histogram!(
            "pipeline_job_duration_seconds",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .record(duration.as_secs_f64());
    }

    pub fn job_skipped(&self) {
        counter!(
            "pipeline_jobs_skipped_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn job_failed(&self, category: &str) {
        counter!(
            "pipeline_jobs_failed_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone(),
            "category" => category.to_string()
        )
        .increment(1);
    }

    pub fn job_retried(&self) {
        counter!(
            "pipeline_jobs_retried_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn job_dead_lettered(&self) {
        counter!(
            "pipeline_jobs_dead_lettered_total",
            "queue" => self.queue.clone(),
            "handler" => self.handler.clone()
        )
        .increment(1);
    }

    pub fn stream_depth(&self, depth: u64) {
        gauge!(
            "pipeline_stream_depth",
            "queue" => self.queue.clone()
        )
        .set(depth as f64);
    }
}

/// Install the process-wide Prometheus recorder.
pub fn init_metrics(
) -> Result<metrics_exporter_prometheus::PrometheusHandle, metrics_exporter_prometheus::BuildError>
{
    metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()
}
