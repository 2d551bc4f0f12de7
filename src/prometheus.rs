use crate::state::State;
use std::collections::HashSet;
use std::time::Instant;

/// Generates metrics in Prometheus text format.
pub fn generate_metrics(state: &State, sse_counter: u64, start_time: &Instant) -> String {
    let mut lines = Vec::new();

    // --- Uptime ---
    lines.push("# HELP uptime_seconds Server process uptime in seconds.".to_string());
    lines.push("# TYPE uptime_seconds gauge".to_string());
    lines.push(format!(
        "uptime_seconds {}",
        start_time.elapsed().as_secs_f64()
    ));

    // --- Sessions ---
    lines.push(
        "# HELP readtracker_running_sessions Number of reading sessions in progress.".to_string(),
    );
    lines.push("# TYPE readtracker_running_sessions gauge".to_string());
    lines.push(format!(
        "readtracker_running_sessions {}",
        state.num_sessions()
    ));

    // --- SSE Streams ---
    lines.push(
        "# HELP readtracker_open_sse_streams Number of open SSE dashboard streams.".to_string(),
    );
    lines.push("# TYPE readtracker_open_sse_streams gauge".to_string());
    lines.push(format!("readtracker_open_sse_streams {sse_counter}"));

    // --- Fixes ---
    let total_fixes: usize = state.iter_sessions().map(|s| s.track.len()).sum();
    lines.push(
        "# HELP readtracker_buffered_fixes Total number of GPS fixes buffered in memory."
            .to_string(),
    );
    lines.push("# TYPE readtracker_buffered_fixes gauge".to_string());
    lines.push(format!("readtracker_buffered_fixes {total_fixes}"));

    // --- Distance ---
    let distance_km: f64 = state
        .iter_sessions()
        .map(|s| s.track.total_distance_km())
        .sum();
    lines.push(
        "# HELP readtracker_running_distance_km Path distance walked across running sessions."
            .to_string(),
    );
    lines.push("# TYPE readtracker_running_distance_km gauge".to_string());
    lines.push(format!("readtracker_running_distance_km {distance_km}"));

    // --- Books ---
    let open_titles: HashSet<_> = state.iter_sessions().map(|s| s.session.title()).collect();
    lines.push(
        "# HELP readtracker_open_titles Number of distinct titles currently being read."
            .to_string(),
    );
    lines.push("# TYPE readtracker_open_titles gauge".to_string());
    lines.push(format!("readtracker_open_titles {}", open_titles.len()));

    lines.push(
        "# HELP readtracker_info Build information about the readtracker server.".to_string(),
    );
    lines.push("# TYPE readtracker_info gauge".to_string());
    lines.push(format!(
        "readtracker_info{{version=\"{}\"}} 1",
        crate::version::VERSION
    ));

    lines.join("\n") + "\n"
}
