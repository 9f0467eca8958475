use serde_json::Value;

/// Render a job run's status line plus summary counters.
pub fn render_job_run(run: &Value) -> String {
    let mut out = String::new();
    out.push_str(&format!("job run {}\n", run["id"].as_str().unwrap_or("?")));
    out.push_str(&format!("  definition:  {}\n", run["job_definition_id"].as_str().unwrap_or("?")));
    out.push_str(&format!("  status:      {}\n", run["status"].as_str().unwrap_or("?")));
    out.push_str(&format!(
        "  devices:     {} succeeded / {} failed / {} total\n",
        run["succeeded_devices"], run["failed_devices"], run["total_devices"]
    ));
    if let Some(started) = run["started_at"].as_str() {
        out.push_str(&format!("  started at:  {started}\n"));
    }
    if let Some(completed) = run["completed_at"].as_str() {
        out.push_str(&format!("  completed at: {completed}\n"));
    }
    out
}

/// Render a list of per-device results as a compact table.
pub fn render_device_results(results: &[Value]) -> String {
    if results.is_empty() {
        return "No device results.\n".to_string();
    }
    let mut out = String::new();
    for r in results {
        let device = r["device_id"].as_str().unwrap_or("?");
        let status = r["status"].as_str().unwrap_or("?");
        out.push_str(&format!("  {device:<36}  {status:<10}"));
        if let Some(code) = r["error_code"].as_str() {
            out.push_str(&format!("  {code}"));
            if let Some(msg) = r["error_message"].as_str() {
                out.push_str(&format!(": {msg}"));
            }
        }
        out.push('\n');
    }
    out
}

/// Render a list of structured job log entries as one line each.
pub fn render_log_entries(entries: &[Value]) -> String {
    let mut out = String::new();
    for e in entries {
        out.push_str(&render_log_entry(e));
    }
    out
}

pub fn render_log_entry(e: &Value) -> String {
    let ts = e["timestamp"].as_str().unwrap_or("?");
    let level = e["level"].as_str().unwrap_or("?");
    let category = e["category"].as_str().unwrap_or("?");
    let message = e["message"].as_str().unwrap_or("");
    let device = e["device_id"].as_str();
    match device {
        Some(d) => format!("{ts} [{level:<8}] {category:<10} device={d} {message}\n"),
        None => format!("{ts} [{level:<8}] {category:<10} {message}\n"),
    }
}

/// Render the handler registry's metadata.
pub fn render_handlers(handlers: &[Value]) -> String {
    let mut out = String::new();
    for h in handlers {
        out.push_str(&format!(
            "  {:<16} {:<28} requires_session={}\n",
            h["job_type"].as_str().unwrap_or("?"),
            h["label"].as_str().unwrap_or("?"),
            h["requires_session"]
        ));
    }
    out
}

/// Render a list of job definitions.
pub fn render_job_definitions(defs: &[Value]) -> String {
    if defs.is_empty() {
        return "No active job definitions.\n".to_string();
    }
    let mut out = String::new();
    for d in defs {
        out.push_str(&format!(
            "  {}  {:<24} type={:<14} enabled={}\n",
            d["id"].as_str().unwrap_or("?"),
            d["name"].as_str().unwrap_or("?"),
            d["job_type"].as_str().unwrap_or("?"),
            d["enabled"],
        ));
    }
    out
}
