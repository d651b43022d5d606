use std::fmt::Write;

use rater_core::annotation::Completeness;
use rater_core::essay::{Essay, EssaySummary, Evidence};
use rater_core::security::User;
use rater_engine::{AnnotationSession, Dashboard, SessionStatus, TraitStatus};
use rater_telemetry::LogRecord;

pub const NO_SUMMARY: &str = "No summary available for this essay.";

pub fn dashboard(user: &User, dash: &Dashboard) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Signed in as {} ({})", user.full_name, user.username);
    let _ = writeln!(
        out,
        "Progress: {} / {} ({:.0}%)",
        dash.completed(),
        dash.total(),
        dash.percent()
    );
    for row in &dash.rows {
        let _ = writeln!(out, "{}", dashboard_row(row));
    }
    if dash.rows.is_empty() {
        let _ = writeln!(out, "  no essays assigned");
    }
    out
}

fn dashboard_row(row: &EssaySummary) -> String {
    let mark = if row.is_annotated { "done" } else { "todo" };
    let handle = row
        .blind_id
        .as_ref()
        .map_or_else(|| row.id.to_string(), |b| b.to_string());
    format!("  [{mark}] {:<10} {:<12} {}", row.title, handle, one_line(&row.question, 60))
}

fn one_line(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{cut}...")
    }
}

/// Essay text with the active trait's selection marked.
pub fn essay(session: &AnnotationSession, title: &str) -> String {
    let mut out = String::new();
    let e = session.essay();
    let _ = writeln!(out, "== {title} ==");
    if !e.question.is_empty() {
        let _ = writeln!(out, "Q: {}", e.question);
    }
    let active = session.active();
    let record = session.board().record(active);
    let selectable = active.selects_sentences();
    for (i, sentence) in session.sentences().iter().enumerate() {
        let mark = match (selectable, record.is_selected(i)) {
            (false, _) => "   ",
            (true, true) => "[x]",
            (true, false) => "[ ]",
        };
        let _ = writeln!(out, "{mark} {:>3}. {sentence}", i + 1);
    }
    out.push_str(&status(&session.status()));
    out
}

pub fn status(status: &SessionStatus) -> String {
    let mut out = String::new();
    for t in &status.traits {
        let cursor = if t.rubric_trait == status.active { ">" } else { " " };
        let _ = writeln!(out, "{cursor} {}", trait_line(t));
    }
    let verdict = if status.is_complete() {
        "all traits complete"
    } else {
        "incomplete"
    };
    let _ = writeln!(out, "  ({verdict})");
    out
}

fn trait_line(t: &TraitStatus) -> String {
    let score = t
        .score
        .map_or_else(|| "-".to_string(), |s| s.to_string());
    let progress = match t.completeness {
        Completeness::Unscored => "needs a score".to_string(),
        Completeness::Complete if !t.rubric_trait.selects_sentences() => "ok".to_string(),
        Completeness::Complete => format!("{}/{} sentences, ok", t.selected, t.required),
        Completeness::Pending { selected, required } => {
            format!("{selected}/{required} sentences, select {} more", required - selected)
        }
        Completeness::OverSelected { selected, required } => {
            format!("{selected}/{required} sentences, remove {}", selected - required)
        }
    };
    let mut line = format!("{:<13} score {score}  {progress}", t.rubric_trait.as_str());
    if !t.out_of_range.is_empty() {
        let stale: Vec<String> = t.out_of_range.iter().map(|i| (i + 1).to_string()).collect();
        let _ = write!(line, "  (ignoring missing sentences {})", stale.join(", "));
    }
    line
}

pub fn evidence(list: &[Evidence]) -> String {
    if list.is_empty() {
        return "No evidence passages for this essay.\n".into();
    }
    let mut out = String::new();
    for ev in list {
        if ev.section.is_empty() {
            let _ = writeln!(out, "- {}", ev.original_sentence);
        } else {
            let _ = writeln!(out, "- [{}] {}", ev.section, ev.original_sentence);
        }
    }
    out
}

pub fn summary(essay: &Essay, title: &str) -> String {
    let body = essay
        .paper_summary
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(NO_SUMMARY);
    format!("== {title} ==\n{body}\n")
}

pub fn logs(records: &[LogRecord]) -> String {
    if records.is_empty() {
        return "No warnings recorded.\n".into();
    }
    let mut out = String::new();
    for r in records {
        let _ = write!(out, "{} {:<5} {}", r.logged_at, r.level, r.message);
        let tags = [
            ("essay", &r.essay_id),
            ("blind", &r.blind_id),
            ("trait", &r.trait_name),
            ("kind", &r.error_kind),
        ];
        for (name, value) in tags {
            if let Some(value) = value {
                let _ = write!(out, " {name}={value}");
            }
        }
        if let Some(extra) = &r.extra {
            let _ = write!(out, " {extra}");
        }
        let _ = writeln!(out, "  ({})", r.target);
    }
    out
}
