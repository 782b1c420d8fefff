//! Run Metrics
//!
//! Post-hoc summary of a completed run, computed once after every item has
//! settled:
//! - average/min/max per-item latency
//! - total bytes transferred
//! - requests per second
//! - success and error rates
//! - status code histogram

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::executor::ExecutionResult;
use crate::transport::Response;

/// Summary statistics of one run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub total_requests: usize,
    pub average_latency_ms: f64,
    pub min_latency_ms: u64,
    pub max_latency_ms: u64,
    pub total_bytes: u64,
    pub requests_per_second: f64,
    /// Percentage of dispatched items that succeeded
    pub success_rate: f64,
    /// Percentage of dispatched items that failed
    pub error_rate: f64,
    pub status_codes: BTreeMap<u16, usize>,
}

/// Computes [`ExecutionMetrics`] from a run's collected responses
#[derive(Debug, Clone, Copy, Default)]
pub struct ResultAggregator;

impl ResultAggregator {
    /// Summarize a finished [`ExecutionResult`]
    pub fn summarize(result: &ExecutionResult) -> ExecutionMetrics {
        Self::from_responses(
            result.responses.values(),
            result.successful,
            result.failed,
            result.duration_ms,
        )
    }

    /// Summarize raw responses.
    ///
    /// `successful + failed` is the number of dispatched items; it can exceed
    /// the response count when some items never produced a response.
    pub fn from_responses<'a>(
        responses: impl IntoIterator<Item = &'a Response>,
        successful: usize,
        failed: usize,
        duration_ms: u64,
    ) -> ExecutionMetrics {
        let mut count = 0usize;
        let mut sum = 0u64;
        let mut min = u64::MAX;
        let mut max = 0u64;
        let mut total_bytes = 0u64;
        let mut status_codes = BTreeMap::new();

        for response in responses {
            count += 1;
            sum += response.duration_ms;
            min = min.min(response.duration_ms);
            max = max.max(response.duration_ms);
            total_bytes += response.size_bytes;
            *status_codes.entry(response.status).or_insert(0) += 1;
        }

        let total_requests = successful + failed;
        let rate = |n: usize| {
            if total_requests == 0 {
                0.0
            } else {
                n as f64 / total_requests as f64 * 100.0
            }
        };

        ExecutionMetrics {
            total_requests,
            average_latency_ms: if count == 0 { 0.0 } else { sum as f64 / count as f64 },
            min_latency_ms: if count == 0 { 0 } else { min },
            max_latency_ms: max,
            total_bytes,
            requests_per_second: if duration_ms == 0 {
                0.0
            } else {
                total_requests as f64 / duration_ms as f64 * 1000.0
            },
            success_rate: rate(successful),
            error_rate: rate(failed),
            status_codes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resp(status: u16, ms: u64) -> Response {
        Response::new(status, json!({"ok": true})).with_duration_ms(ms)
    }

    #[test]
    fn test_latency_stats() {
        let responses = vec![resp(200, 10), resp(200, 20), resp(500, 30)];
        let m = ResultAggregator::from_responses(&responses, 2, 1, 500);
        assert_eq!(m.average_latency_ms, 20.0);
        assert_eq!(m.min_latency_ms, 10);
        assert_eq!(m.max_latency_ms, 30);
        assert_eq!(m.total_requests, 3);
        assert_eq!(m.requests_per_second, 6.0);
        assert_eq!(m.status_codes.get(&200), Some(&2));
        assert_eq!(m.status_codes.get(&500), Some(&1));
        assert!((m.success_rate - 66.666).abs() < 0.01);
        assert!((m.error_rate - 33.333).abs() < 0.01);
        assert_eq!(m.total_bytes, 3 * json!({"ok": true}).to_string().len() as u64);
    }

    #[test]
    fn test_empty_run() {
        let m = ResultAggregator::from_responses(std::iter::empty(), 0, 0, 0);
        assert_eq!(m, ExecutionMetrics::default());
    }
}
