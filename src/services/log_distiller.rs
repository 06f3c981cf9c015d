//! CI log distillation.
//!
//! Raw build logs are far too large to persist or hand to an LLM. Before any
//! log text leaves a backend it is ANSI-stripped and cut down to the lines
//! surrounding `##[error]` markers (the marker both ADO and GitHub Actions emit).

use regex::Regex;
use std::sync::OnceLock;

/// Marker emitted by ADO and GitHub Actions on error lines.
pub const ERROR_MARKER: &str = "##[error]";

/// Lines kept on each side of an error line.
pub const CONTEXT_LINES: usize = 5;

/// Lines kept from the end of the log when no marker is present.
pub const TAIL_LINES: usize = 50;

/// Separator inserted where lines were skipped between kept windows.
pub const GAP_SEPARATOR: &str = "...";

fn ansi_regex() -> &'static Regex {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    ANSI.get_or_init(|| {
        // CSI sequences: ESC [ params intermediates final-byte
        Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]").expect("static ANSI pattern")
    })
}

/// Remove ANSI CSI escape sequences.
pub fn strip_ansi(input: &str) -> String {
    ansi_regex().replace_all(input, "").into_owned()
}

/// Keep the `±CONTEXT_LINES` window around every error marker.
///
/// Overlapping or touching windows are merged and `...` marks each skipped
/// gap between them. With no marker, the last `TAIL_LINES` lines are kept.
pub fn extract_error_context(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();

    let hits: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, line)| line.contains(ERROR_MARKER))
        .map(|(idx, _)| idx)
        .collect();

    if hits.is_empty() {
        let start = lines.len().saturating_sub(TAIL_LINES);
        return lines[start..].join("\n");
    }

    let mut windows: Vec<(usize, usize)> = Vec::new();
    for idx in hits {
        let start = idx.saturating_sub(CONTEXT_LINES);
        let end = (idx + CONTEXT_LINES).min(lines.len() - 1);
        match windows.last_mut() {
            Some(last) if start <= last.1 + 1 => last.1 = last.1.max(end),
            _ => windows.push((start, end)),
        }
    }

    let mut out: Vec<&str> = Vec::new();
    for (i, (start, end)) in windows.iter().enumerate() {
        if i > 0 {
            out.push(GAP_SEPARATOR);
        }
        out.extend_from_slice(&lines[*start..=*end]);
    }
    out.join("\n")
}

/// Full distillation: strip ANSI, then cut around errors.
pub fn distill(raw: &str) -> String {
    extract_error_context(&strip_ansi(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("line {}", i)).collect()
    }

    #[test]
    fn test_strip_ansi() {
        assert_eq!(strip_ansi("\x1b[31mERROR\x1b[0m: x"), "ERROR: x");
        assert_eq!(strip_ansi("\x1b[1;32mok\x1b[K"), "ok");
    }

    #[test]
    fn test_strip_ansi_idempotent_on_clean_input() {
        let clean = "plain text ##[error] with [brackets]";
        assert_eq!(strip_ansi(clean), clean);
        assert_eq!(strip_ansi(&strip_ansi(clean)), clean);
    }

    #[test]
    fn test_error_window() {
        // Lines numbered 1..=20, line 10 is the error.
        let mut lines: Vec<String> = (1..=20).map(|i| format!("line {}", i)).collect();
        lines[9] = "##[error]build failed".to_string();
        let out = extract_error_context(&lines.join("\n"));
        let kept: Vec<&str> = out.lines().collect();

        for i in 5..=15 {
            if i == 10 {
                assert!(kept.contains(&"##[error]build failed"));
            } else {
                assert!(kept.contains(&format!("line {}", i).as_str()), "missing line {}", i);
            }
        }
        assert!(!kept.contains(&"line 4"));
        assert!(!kept.contains(&"line 16"));
        assert!(!out.contains(GAP_SEPARATOR));
    }

    #[test]
    fn test_no_marker_keeps_tail() {
        let lines = numbered(100);
        let out = extract_error_context(&lines.join("\n"));
        assert_eq!(out, lines[50..].join("\n"));
    }

    #[test]
    fn test_short_log_without_marker_is_kept_whole() {
        let lines = numbered(10);
        assert_eq!(extract_error_context(&lines.join("\n")), lines.join("\n"));
    }

    #[test]
    fn test_overlapping_windows_merge() {
        let mut lines = numbered(40);
        lines[10] = "##[error]a".to_string();
        lines[16] = "##[error]b".to_string();
        let out = extract_error_context(&lines.join("\n"));
        assert!(!out.contains(GAP_SEPARATOR));
        assert_eq!(out.lines().count(), 21 - 5 + 1); // 5..=21
    }

    #[test]
    fn test_distant_windows_get_separator() {
        let mut lines = numbered(60);
        lines[5] = "##[error]first".to_string();
        lines[50] = "##[error]second".to_string();
        let out = extract_error_context(&lines.join("\n"));
        let kept: Vec<&str> = out.lines().collect();
        assert_eq!(kept.iter().filter(|l| **l == GAP_SEPARATOR).count(), 1);
        assert!(kept.contains(&"line 0"));
        assert!(kept.contains(&"line 55"));
        assert!(!kept.contains(&"line 56"));
        assert!(!kept.contains(&"line 30"));
    }

    #[test]
    fn test_marker_at_edges_is_clamped() {
        let mut lines = numbered(3);
        lines[2] = "##[error]last".to_string();
        assert_eq!(extract_error_context(&lines.join("\n")), lines.join("\n"));
    }

    #[test]
    fn test_distill_strips_before_matching() {
        let raw = "setup\n\x1b[31m##[error]\x1b[0mboom\nteardown";
        let out = distill(raw);
        assert!(out.contains("##[error]boom"));
        assert!(!out.contains('\x1b'));
    }
}
