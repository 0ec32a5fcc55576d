use std::rc::Rc;

use serde::Serialize;

use crate::results::{GroupSummary, ServerSummary};
use crate::service::request::SvcRequest;

// ---------------------------------------------------------------------------
// CSV export
// ---------------------------------------------------------------------------

/// Export a group's request log as CSV.
///
/// Produces a text document with:
/// - Leading comment lines (prefixed `#`) containing the group summary.
/// - A header row.
/// - One data row per logged request; requests still in flight at the end
///   of the run have empty `completed` and `response_time` fields.
pub fn export_requests_csv(
    summary: &GroupSummary,
    log: &[(String, Rc<SvcRequest>)],
) -> String {
    let mut out = String::new();

    out.push_str(&format!("# fleetsim run — group {}\n", summary.group_name));
    out.push_str(&format!(
        "# Responded: {}  Unresponded: {}\n",
        summary.responded_requests, summary.unresponded_requests
    ));
    out.push_str(&format!(
        "# Mean response: {:.6}  Std dev: {:.6}\n",
        summary.avg_response_time, summary.std_dev_response_time
    ));
    out.push_str(&format!(
        "# Min: {:.6}  Max: {:.6}\n",
        summary.min_response_time, summary.max_response_time
    ));
    for (q, value) in &summary.quantiles {
        out.push_str(&format!("# q{:02.0}: {:.6}\n", q * 100.0, value));
    }
    out.push_str(&format!("# Throughput: {:.6} req/s\n", summary.throughput));
    out.push('\n');

    out.push_str("group,svc_name,server,submitted,completed,response_time\n");

    for (group_name, req) in log {
        let server = req
            .server()
            .map(|s| s.name().to_string())
            .unwrap_or_default();
        let submitted = req
            .time_submitted()
            .map(|t| format!("{t:.6}"))
            .unwrap_or_default();
        let completed = req
            .time_completed()
            .map(|t| format!("{t:.6}"))
            .unwrap_or_default();
        let response = req
            .response_time()
            .map(|t| format!("{t:.6}"))
            .unwrap_or_default();
        out.push_str(&format!(
            "{},{},{},{},{},{}\n",
            csv_escape(group_name),
            csv_escape(req.svc_name()),
            csv_escape(&server),
            submitted,
            completed,
            response,
        ));
    }

    out
}

/// Wrap a field value in quotes and escape any embedded quotes.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

// ---------------------------------------------------------------------------
// JSON export
// ---------------------------------------------------------------------------

/// Complete serializable results of one simulation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub struct RunReport {
    /// Final virtual time of the run.
    pub horizon: f64,
    pub groups: Vec<GroupSummary>,
    pub servers: Vec<ServerSummary>,
}

/// Export a run report as pretty-printed JSON.
pub fn export_json(report: &RunReport) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
