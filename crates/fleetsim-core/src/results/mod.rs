pub mod export;

use std::collections::BTreeMap;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::error::SimError;
use crate::server::Server;
use crate::service::request::SvcRequest;
use crate::users::UserGroup;

// ---------------------------------------------------------------------------
// GroupSummary
// ---------------------------------------------------------------------------

/// Response-time summary for a user group, overall or for one service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct GroupSummary {
    pub group_name: String,
    /// `None` aggregates across every service in the group.
    pub svc_name: Option<String>,
    pub responded_requests: u64,
    pub unresponded_requests: u64,
    pub avg_response_time: f64,
    pub std_dev_response_time: f64,
    pub min_response_time: f64,
    pub max_response_time: f64,
    /// `(quantile, response time)` pairs at the group's tracked points.
    pub quantiles: Vec<(f64, f64)>,
    pub throughput: f64,
}

impl GroupSummary {
    fn build(group: &UserGroup, svc: Option<&str>) -> Self {
        let quantiles = group
            .tracked_quantiles()
            .iter()
            .copied()
            .zip(group.response_time_quantiles(svc))
            .collect();
        GroupSummary {
            group_name: group.name().to_string(),
            svc_name: svc.map(str::to_string),
            responded_requests: group.responded_request_count(svc),
            unresponded_requests: group.unresponded_request_count(svc),
            avg_response_time: group.avg_response_time(svc),
            std_dev_response_time: group.std_dev_response_time(svc),
            min_response_time: group.min_response_time(svc),
            max_response_time: group.max_response_time(svc),
            quantiles,
            throughput: group.throughput(svc),
        }
    }

    /// Aggregate summary across all of the group's services.
    pub fn overall(group: &UserGroup) -> Self {
        Self::build(group, None)
    }

    /// Summary for one of the group's services.
    pub fn for_svc(group: &UserGroup, svc: &str) -> Self {
        Self::build(group, Some(svc))
    }

    /// One summary per service, in the group's construction order.
    pub fn per_svc(group: &UserGroup) -> Vec<Self> {
        group
            .svc_names()
            .iter()
            .map(|name| Self::for_svc(group, name))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// ServerSummary
// ---------------------------------------------------------------------------

/// Point-in-time snapshot of a server's configuration and derived metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ServerSummary {
    pub name: String,
    pub max_concurrency: usize,
    pub num_threads: usize,
    pub speed: f64,
    pub throughput: f64,
    pub avg_process_time: f64,
    pub avg_hw_queue_time: f64,
    pub avg_hw_queue_length: f64,
    pub hw_queue_length: usize,
    pub hw_in_use_count: usize,
    pub utilization: f64,
    pub avg_thread_queue_time: f64,
    pub avg_thread_use_time: f64,
    pub avg_service_time: f64,
    pub avg_thread_queue_length: f64,
    pub thread_queue_length: usize,
    pub thread_in_use_count: usize,
    pub thread_utilization: f64,
}

impl ServerSummary {
    pub fn of(server: &Server) -> Self {
        ServerSummary {
            name: server.name().to_string(),
            max_concurrency: server.max_concurrency(),
            num_threads: server.num_threads(),
            speed: server.speed(),
            throughput: server.throughput(),
            avg_process_time: server.avg_process_time(),
            avg_hw_queue_time: server.avg_hw_queue_time(),
            avg_hw_queue_length: server.avg_hw_queue_length(),
            hw_queue_length: server.hw_queue_length(),
            hw_in_use_count: server.hw_in_use_count(),
            utilization: server.utilization(),
            avg_thread_queue_time: server.avg_thread_queue_time(),
            avg_thread_use_time: server.avg_thread_use_time(),
            avg_service_time: server.avg_service_time(),
            avg_thread_queue_length: server.avg_thread_queue_length(),
            thread_queue_length: server.thread_queue_length(),
            thread_in_use_count: server.thread_in_use_count(),
            thread_utilization: server.thread_utilization(),
        }
    }
}

// ---------------------------------------------------------------------------
// Minibatching — virtual-time buckets over a request log
// ---------------------------------------------------------------------------

/// Response-time statistics for one fixed-width virtual-time bucket, keyed
/// by submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TimeBucket {
    /// Bucket start time (an integer multiple of the bucket width).
    pub start: f64,
    pub count: u64,
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

/// Group the completed requests of a request log into fixed-width buckets
/// of virtual submission time. Requests still in flight at the end of the
/// run contribute nothing.
pub fn minibatch_response_times(
    log: &[(String, Rc<SvcRequest>)],
    bucket_width: f64,
) -> Result<Vec<TimeBucket>, SimError> {
    if !(bucket_width > 0.0) || !bucket_width.is_finite() {
        return Err(SimError::construction(format!(
            "bucket width must be positive and finite, got {bucket_width}"
        )));
    }

    struct Acc {
        count: u64,
        sum: f64,
        min: f64,
        max: f64,
    }

    let mut buckets: BTreeMap<u64, Acc> = BTreeMap::new();
    for (_, req) in log {
        let (Some(submitted), Some(response)) = (req.time_submitted(), req.response_time())
        else {
            continue;
        };
        let key = (submitted / bucket_width).floor() as u64;
        let acc = buckets.entry(key).or_insert(Acc {
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        });
        acc.count += 1;
        acc.sum += response;
        if response < acc.min {
            acc.min = response;
        }
        if response > acc.max {
            acc.max = response;
        }
    }

    Ok(buckets
        .into_iter()
        .map(|(key, acc)| TimeBucket {
            start: key as f64 * bucket_width,
            count: acc.count,
            mean: acc.sum / acc.count as f64,
            min: acc.min,
            max: acc.max,
        })
        .collect())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
