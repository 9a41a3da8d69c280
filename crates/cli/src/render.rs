use std::io::{self, IsTerminal};
use std::time::Duration;

use core_model::{HistoryItem, LogItem, LogStatus, Payload};
use owo_colors::OwoColorize;

pub fn color_enabled() -> bool {
    io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none()
}

pub fn truncate_text(input: &str, max: usize) -> String {
    let mut out = String::new();
    for (i, ch) in input.chars().enumerate() {
        if i >= max {
            out.push_str("...");
            return out;
        }
        out.push(ch);
    }
    out
}

/// Coarse "how long ago", rounded to whole seconds.
pub fn age(created_at_ms: i64, now_ms: i64) -> String {
    let elapsed = now_ms.saturating_sub(created_at_ms).max(0) as u64 / 1000;
    if elapsed == 0 {
        return "just now".to_string();
    }
    format!(
        "{} ago",
        humantime::format_duration(Duration::from_secs(elapsed))
    )
}

pub fn payload_summary(payload: &Payload) -> String {
    match payload {
        Payload::Text(text) => truncate_text(&text.replace('\n', " "), 60),
        Payload::Binary(handle) => format!("<{} {} bytes>", handle.mime, handle.len),
    }
}

pub fn history_line(index: usize, item: &HistoryItem, now_ms: i64, use_color: bool) -> String {
    let kind = item.kind.as_str().to_string();
    let prompt = truncate_text(&item.prompt, 60);
    let payload = payload_summary(&item.payload);
    let age = age(item.created_at, now_ms);
    if use_color {
        let sep = " | ".dimmed().to_string();
        format!(
            "[{index}] {}{sep}{}{sep}{}{sep}{}{sep}{}",
            item.id.dimmed(),
            kind.cyan(),
            prompt.bold(),
            payload,
            age.dimmed()
        )
    } else {
        format!(
            "[{index}] {} | {kind} | {prompt} | {payload} | {age}",
            item.id
        )
    }
}

pub fn log_line(index: usize, item: &LogItem, now_ms: i64, use_color: bool) -> String {
    let status = match (&item.status, &item.error_detail) {
        (LogStatus::Error, Some(detail)) => format!("error: {}", truncate_text(detail, 40)),
        (status, _) => status.as_str().to_string(),
    };
    let prompt = truncate_text(&item.prompt, 50);
    let tokens = format!("{} tok", item.token_count);
    let age = age(item.created_at, now_ms);
    if use_color {
        let sep = " | ".dimmed().to_string();
        let status = match item.status {
            LogStatus::Success => status.green().to_string(),
            LogStatus::Error => status.red().to_string(),
        };
        format!(
            "[{index}] {}{sep}{}{sep}{status}{sep}{}{sep}{}{sep}{}",
            item.id.dimmed(),
            item.model.cyan(),
            prompt.bold(),
            tokens.magenta(),
            age.dimmed()
        )
    } else {
        format!(
            "[{index}] {} | {} | {status} | {prompt} | {tokens} | {age}",
            item.id, item.model
        )
    }
}
