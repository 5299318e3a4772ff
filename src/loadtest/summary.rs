//! Terminal summary renderer for test results.
//!
//! [`render_summary`] is a pure function: it takes a [`TestResult`] and
//! returns a formatted [`String`]. No I/O, so it is unit tested without a
//! terminal.
//!
//! Colors come from the `colored` crate and respect
//! `colored::control::set_override(false)`, which the CLI sets for
//! `--no-color`.

use colored::Colorize;

use crate::loadtest::endurance::EnduranceTestResult;
use crate::loadtest::result::{LoadTestResult, PhaseResult, TestResult};
use crate::loadtest::spike::SpikeTestResult;
use crate::loadtest::stress::StressTestResult;

/// Width for dotted metric row padding.
const PAD_WIDTH: usize = 36;

/// Recovery tolerance shown in spike summaries (fraction of base latency).
const SPIKE_RECOVERY_TOLERANCE: f64 = 0.5;

/// Render a summary of any test result.
///
/// ```text
///   loadrig  Stress Test
///   target:  http://localhost:3000/health
///
///   breaking_point..................: 6 users
///   stop_reason.....................: threshold_exceeded
///
///   phase        users    reqs   avg ms    p95   err%
///   ──────────────────────────────────────────────────
///   step 1           2     498     20.1     21   0.0%
/// ```
pub fn render_summary(result: &TestResult, target: &str) -> String {
    let mut lines = vec![render_header(result, target)];

    match result {
        TestResult::Load(r) => render_load(r, &mut lines),
        TestResult::Stress(r) => render_stress(r, &mut lines),
        TestResult::Spike(r) => render_spike(r, &mut lines),
        TestResult::Endurance(r) => render_endurance(r, &mut lines),
    }

    lines.join("\n")
}

fn render_header(result: &TestResult, target: &str) -> String {
    format!(
        "\n  {}  {}\n  target:  {}\n",
        "loadrig".bold(),
        result.test_type().to_string().bold(),
        target
    )
}

fn render_load(r: &LoadTestResult, lines: &mut Vec<String>) {
    lines.push(format_metric_row("users", &r.users.to_string(), PAD_WIDTH));

    let latency = format!(
        "avg={:.1}ms  min={:.1}ms  max={:.1}ms",
        r.avg_response_time, r.min_response_time, r.max_response_time
    );
    lines.push(format_metric_row("req_duration", &latency, PAD_WIDTH));

    let percentiles = format!("p50={}ms  p95={}ms  p99={}ms", r.p50, r.p95, r.p99);
    let percentiles = if r.p99 < 1000 {
        percentiles.green().to_string()
    } else {
        percentiles.yellow().to_string()
    };
    lines.push(format_metric_row("req_percentiles", &percentiles, PAD_WIDTH));

    lines.push(format_metric_row(
        "req_success_count",
        &r.successful_requests.to_string().green().to_string(),
        PAD_WIDTH,
    ));
    let failed = if r.failed_requests > 0 {
        r.failed_requests.to_string().red().to_string()
    } else {
        r.failed_requests.to_string()
    };
    lines.push(format_metric_row("req_error_count", &failed, PAD_WIDTH));
    lines.push(format_metric_row(
        "req_error_rate",
        &color_error_rate(r.error_rate),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "req_throughput",
        &format!("{:.1} req/s", r.throughput).green().to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "req_total",
        &r.total_requests.to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "elapsed",
        &format!("{:.1}s", r.duration),
        PAD_WIDTH,
    ));

    if !r.error_kinds.is_empty() {
        lines.push(String::new());
        lines.push("  errors:".to_string());
        let mut kinds: Vec<_> = r.error_kinds.iter().collect();
        kinds.sort_by(|a, b| b.1.cmp(a.1));
        for (kind, count) in kinds {
            lines.push(format_metric_row(
                &format!("    {kind}"),
                &count.to_string().red().to_string(),
                PAD_WIDTH,
            ));
        }
    }
}

fn render_stress(r: &StressTestResult, lines: &mut Vec<String>) {
    let breaking = match r.breaking_point {
        Some(users) => format!("{users} users").red().bold().to_string(),
        None => "not reached".green().to_string(),
    };
    lines.push(format_metric_row("breaking_point", &breaking, PAD_WIDTH));
    lines.push(format_metric_row(
        "error_threshold",
        &format!("{:.1}%", r.error_threshold),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "stop_reason",
        r.stop_reason.as_str(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "elapsed",
        &format!("{:.1}s", r.duration),
        PAD_WIDTH,
    ));
    render_phase_table(&r.results, lines);
}

fn render_spike(r: &SpikeTestResult, lines: &mut Vec<String>) {
    if let Some(delta) = r.recovery_delta_ms() {
        let value = format!("{delta:+.1}ms");
        let value = if r.recovered_within(SPIKE_RECOVERY_TOLERANCE) {
            value.green().to_string()
        } else {
            value.red().to_string()
        };
        lines.push(format_metric_row("recovery_vs_base", &value, PAD_WIDTH));
    }
    lines.push(format_metric_row(
        "elapsed",
        &format!("{:.1}s", r.duration),
        PAD_WIDTH,
    ));
    render_phase_table(&r.results, lines);
}

fn render_endurance(r: &EnduranceTestResult, lines: &mut Vec<String>) {
    lines.push(format_metric_row("users", &r.users.to_string(), PAD_WIDTH));
    lines.push(format_metric_row(
        "req_total",
        &r.total_requests.to_string(),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "req_duration",
        &format!(
            "avg={:.1}ms  max={:.1}ms  p95={}ms",
            r.avg_response_time, r.max_response_time, r.p95
        ),
        PAD_WIDTH,
    ));
    lines.push(format_metric_row(
        "avg_error_rate",
        &color_error_rate(r.avg_error_rate),
        PAD_WIDTH,
    ));
    if let Some(d) = r.degradation() {
        let value = format!("{:+.1}%", d.change_pct);
        let value = if d.change_pct > 50.0 {
            value.red().to_string()
        } else if d.change_pct > 10.0 {
            value.yellow().to_string()
        } else {
            value.green().to_string()
        };
        lines.push(format_metric_row("latency_drift", &value, PAD_WIDTH));
    }
    lines.push(format_metric_row(
        "elapsed",
        &format!("{:.1}s", r.elapsed_secs),
        PAD_WIDTH,
    ));

    if !r.monitoring_data.is_empty() {
        lines.push(String::new());
        lines.push(format!(
            "  {:>10} {:>9} {:>9} {:>9} {:>7}",
            "elapsed", "reqs", "avg ms", "max ms", "err%"
        ));
        lines.push(format!("  {}", "\u{2500}".repeat(48)));
        for point in &r.monitoring_data {
            lines.push(format!(
                "  {:>10} {:>9} {:>9.1} {:>9.1} {:>7}",
                format!("{:.0}s", point.elapsed_secs),
                point.sample_count,
                point.avg_response_time,
                point.max_response_time,
                format!("{:.1}%", point.error_rate),
            ));
        }
    }
}

fn render_phase_table(phases: &[PhaseResult], lines: &mut Vec<String>) {
    lines.push(String::new());
    lines.push(format!(
        "  {:<10} {:>6} {:>8} {:>9} {:>7} {:>7}",
        "phase", "users", "reqs", "avg ms", "p95", "err%"
    ));
    lines.push(format!("  {}", "\u{2500}".repeat(52)));
    for phase in phases {
        lines.push(format!(
            "  {:<10} {:>6} {:>8} {:>9.1} {:>7} {:>7}",
            phase.label,
            phase.users,
            phase.sample_count,
            phase.avg_response_time,
            phase.p95,
            color_error_rate(phase.error_rate),
        ));
    }
}

fn color_error_rate(pct: f64) -> String {
    let value = format!("{pct:.1}%");
    if pct > 5.0 {
        value.red().to_string()
    } else if pct > 1.0 {
        value.yellow().to_string()
    } else {
        value.green().to_string()
    }
}

/// Format a single metric row with dot-padding.
///
/// Produces: `"  metric_name..................: value_string"`
fn format_metric_row(name: &str, value: &str, pad_width: usize) -> String {
    format!("  {name:.<pad_width$}: {value}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loadtest::endurance::MonitoringPoint;
    use crate::loadtest::result::TestType;
    use crate::loadtest::stress::StopReason;
    use std::collections::BTreeMap;

    /// Disable colors in tests for deterministic assertions.
    fn setup_no_color() {
        colored::control::set_override(false);
    }

    fn load_result(failed: u64) -> LoadTestResult {
        LoadTestResult {
            test_type: TestType::Load,
            users: 5,
            total_requests: 1000,
            successful_requests: 1000 - failed,
            failed_requests: failed,
            error_rate: failed as f64 / 10.0,
            avg_response_time: 48.2,
            min_response_time: 40.0,
            max_response_time: 310.5,
            p50: 42,
            p95: 120,
            p99: 350,
            throughput: 33.3,
            duration: 30.0,
            error_kinds: if failed > 0 {
                BTreeMap::from([("timeout".to_string(), failed)])
            } else {
                BTreeMap::new()
            },
        }
    }

    fn phase(label: &str, users: u32, error_rate: f64) -> PhaseResult {
        PhaseResult {
            label: label.to_string(),
            users,
            avg_response_time: 20.0,
            p95: 25,
            error_rate,
            sample_count: 500,
            throughput: 100.0,
            duration_secs: 5.0,
        }
    }

    #[test]
    fn test_load_summary_contains_header_and_latency() {
        setup_no_color();
        let output = render_summary(
            &TestResult::Load(load_result(0)),
            "http://localhost:3000/health",
        );

        assert!(output.contains("loadrig"), "Missing header title");
        assert!(output.contains("Load Test"), "Missing test type");
        assert!(output.contains("http://localhost:3000/health"), "Missing target");
        assert!(output.contains("p50=42ms"), "Missing p50");
        assert!(output.contains("p99=350ms"), "Missing p99");
        assert!(output.contains("33.3 req/s"), "Missing throughput");
    }

    #[test]
    fn test_load_summary_error_section_only_with_errors() {
        setup_no_color();
        let clean = render_summary(&TestResult::Load(load_result(0)), "t");
        assert!(!clean.contains("errors:"));

        let failing = render_summary(&TestResult::Load(load_result(30)), "t");
        assert!(failing.contains("errors:"));
        assert!(failing.contains("timeout"));
        assert!(failing.contains("3.0%"));
    }

    #[test]
    fn test_stress_summary_shows_breaking_point_and_steps() {
        setup_no_color();
        let result = StressTestResult {
            test_type: TestType::Stress,
            breaking_point: Some(6),
            stop_reason: StopReason::ThresholdExceeded,
            error_threshold: 5.0,
            results: vec![
                phase("step 1", 2, 0.0),
                phase("step 2", 4, 0.0),
                phase("step 3", 6, 12.5),
            ],
            duration: 15.0,
        };
        let output = render_summary(&TestResult::Stress(result), "t");

        assert!(output.contains("6 users"));
        assert!(output.contains("threshold_exceeded"));
        assert!(output.contains("step 3"));
        assert!(output.contains("12.5%"));
    }

    #[test]
    fn test_stress_summary_without_breaking_point() {
        setup_no_color();
        let result = StressTestResult {
            test_type: TestType::Stress,
            breaking_point: None,
            stop_reason: StopReason::MaxUsersReached,
            error_threshold: 5.0,
            results: vec![phase("step 1", 2, 0.0)],
            duration: 5.0,
        };
        let output = render_summary(&TestResult::Stress(result), "t");
        assert!(output.contains("not reached"));
        assert!(output.contains("max_users_reached"));
    }

    #[test]
    fn test_spike_summary_shows_recovery() {
        setup_no_color();
        let mut recovery = phase("recovery", 2, 0.0);
        recovery.avg_response_time = 25.0;
        let result = SpikeTestResult {
            test_type: TestType::Spike,
            results: vec![phase("base", 2, 0.0), phase("spike", 10, 2.0), recovery],
            duration: 15.0,
        };
        let output = render_summary(&TestResult::Spike(result), "t");

        assert!(output.contains("Spike Test"));
        assert!(output.contains("+5.0ms"));
        assert!(output.contains("recovery"));
    }

    #[test]
    fn test_endurance_summary_lists_points() {
        setup_no_color();
        let result = EnduranceTestResult {
            test_type: TestType::Endurance,
            users: 3,
            duration: 0.1,
            elapsed_secs: 360.2,
            monitoring_data: vec![MonitoringPoint {
                elapsed_secs: 60.0,
                sample_count: 1800,
                error_count: 0,
                total_response_time_ms: 180_000.0,
                avg_response_time: 100.0,
                max_response_time: 140.0,
                error_rate: 0.0,
            }],
            total_requests: 10800,
            avg_response_time: 100.0,
            max_response_time: 150.0,
            p95: 120,
            avg_error_rate: 0.0,
            overall_error_rate: 0.0,
        };
        let output = render_summary(&TestResult::Endurance(result), "t");

        assert!(output.contains("Endurance Test"));
        assert!(output.contains("10800"));
        assert!(output.contains("60s"));
        assert!(output.contains("1800"));
    }

    #[test]
    fn test_format_metric_row_dot_padding() {
        let row = format_metric_row("test_metric", "42ms", 30);
        assert!(row.contains("test_metric"));
        assert!(row.contains("42ms"));
        assert!(row.contains("..."));
    }
}
