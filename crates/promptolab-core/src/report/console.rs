use crate::engine::baseline::BaselineSummary;
use crate::model::{CaseStatus, EvaluationResult, EvaluationRun, Grade};
use crate::report::progress::{ProgressEvent, ProgressSink};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Format a single progress line for display.
#[must_use]
pub fn format_progress_line(label: &str, done: usize, total: usize) -> String {
    format!("{label} {done}/{total}...")
}

pub fn emit_progress_line(line: &str) {
    eprintln!("{}", line);
}

/// Minimum interval between progress updates.
const PROGRESS_MIN_INTERVAL_MS: u64 = 200;

/// For large sets, emit at most every this many cases.
pub(crate) fn progress_step(total: usize) -> usize {
    if total <= 10 {
        1
    } else {
        std::cmp::max(1, total / 10)
    }
}

/// Throttled stderr progress sink. `None` for sets of one case.
/// The final update is always printed.
pub fn default_progress_sink(label: &str, total: usize) -> Option<ProgressSink> {
    if total <= 1 {
        return None;
    }
    let label = label.to_string();
    let step = progress_step(total);
    let last_emit: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));
    Some(Arc::new(move |ev: ProgressEvent| {
        if ev.total == 0 {
            return;
        }
        let now = Instant::now();
        let should_emit = match last_emit.lock() {
            Ok(mut last) => {
                let emit_final = ev.is_final();
                let emit_step = ev.done % step == 0 || ev.done == 1;
                let interval_ok = last
                    .map(|t| {
                        now.saturating_duration_since(t)
                            >= Duration::from_millis(PROGRESS_MIN_INTERVAL_MS)
                    })
                    .unwrap_or(true);
                let ok = emit_final || (emit_step && interval_ok);
                if ok {
                    *last = Some(now);
                }
                ok
            }
            Err(_) => ev.is_final(),
        };
        if should_emit {
            emit_progress_line(&format_progress_line(&label, ev.done, ev.total));
        }
    }))
}

fn icon(r: &EvaluationResult) -> &'static str {
    match (r.status, r.grade.is_pass()) {
        (CaseStatus::Failed, _) => "💥",
        (CaseStatus::Cancelled, _) => "⏹️ ",
        (_, Some(true)) => "✅",
        (_, Some(false)) => "❌",
        (_, None) if r.grade == Grade::Ungraded => "⚠️ ",
        _ => "➖",
    }
}

/// One line per finished case, used for incremental output.
#[must_use]
pub fn format_result_line(r: &EvaluationResult) -> String {
    let sim = r
        .similarity
        .value()
        .map(|v| format!("{v:.2}"))
        .unwrap_or_else(|| "n/a".into());
    let duration = format!("({:.1}s)", r.duration_ms as f64 / 1000.0);
    match (&r.error, r.status) {
        (Some(e), CaseStatus::Failed | CaseStatus::Cancelled) => format!(
            "{} {:<36} {}: {}",
            icon(r),
            r.case_id,
            r.status.as_str().to_uppercase(),
            e.message
        ),
        _ => format!(
            "{} {:<36} grade={:<8} similarity={}  {}",
            icon(r),
            r.case_id,
            r.grade.as_str(),
            sim,
            duration
        ),
    }
}

#[must_use]
pub fn format_summary_line(run: &EvaluationRun) -> String {
    let s = &run.summary;
    let mut passed = 0;
    let mut failed = 0;
    let mut ungraded = 0;
    for r in &run.results {
        match r.grade.is_pass() {
            Some(true) => passed += 1,
            Some(false) => failed += 1,
            None if r.grade == Grade::Ungraded => ungraded += 1,
            None => {}
        }
    }
    let mut line = format!(
        "Summary: {} passed, {} regressed, {} ungraded, {} errors, {} cancelled, {} not run",
        passed, failed, ungraded, s.failed, s.cancelled, s.not_dispatched
    );
    if s.partial {
        line.push_str(" (partial)");
    }
    line
}

pub fn print_summary(run: &EvaluationRun) {
    eprintln!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    eprintln!("{}", format_summary_line(run));
    if let Some(h) = &run.summary.halted {
        eprintln!("Dispatch halted: {h}");
    }
    for u in &run.summary.unattributed {
        eprintln!("💥 {u}");
    }
}

pub fn print_baseline_summary(summary: &BaselineSummary) {
    eprintln!();
    for f in &summary.failures {
        eprintln!("💥 {f}");
    }
    let mut line = format!(
        "Baselines: {} generated, {} failed, {} cancelled, {} not run",
        summary.succeeded, summary.failed, summary.cancelled, summary.not_dispatched
    );
    if let Some(h) = &summary.halted {
        line.push_str(&format!(" (halted: {h})"));
    }
    eprintln!("{line}");
}
