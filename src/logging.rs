use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use log::LevelFilter;
use simplelog::{ConfigBuilder, WriteLogger};

use crate::eval::Decision;
use crate::parse::ActionKind;

/// Environment variable selecting the log level (`error` … `trace`, `off`).
pub const LOG_ENV: &str = "GATEPOST_LOG";

/// `~/.local/share/gatepost/gatepost.log`.
pub fn log_path(home: &Path) -> PathBuf {
    home.join(".local/share/gatepost/gatepost.log")
}

fn level_from_env() -> LevelFilter {
    std::env::var(LOG_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the file logger. Best-effort: failures are silently ignored
/// (logging must never block the hook).
pub fn init(home: &Path) {
    let level = level_from_env();
    if level == LevelFilter::Off {
        return;
    }
    let path = log_path(home);
    if let Some(dir) = path.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let Ok(file) = OpenOptions::new().create(true).append(true).open(&path) else {
        return;
    };
    let config = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_target_level(LevelFilter::Off)
        .set_thread_level(LevelFilter::Off)
        .build();
    let _ = WriteLogger::init(level, config, file);
}

/// One line per decision: kind, verdict, truncated input, one-line reason.
pub fn log_decision(kind: ActionKind, input: &str, decision: &Decision) {
    log::info!("{}", decision_line(kind, input, decision));
}

fn decision_line(kind: ActionKind, input: &str, decision: &Decision) -> String {
    // Compact single-line reason for the log (replace newlines with "; ")
    let reason = decision.message.replace('\n', "; ");
    let input: String = input.chars().take(200).collect();
    let input = input.replace('\n', "\\n");
    let rule = decision
        .matched_rule
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".into());
    format!(
        "{kind}\t{}\t{input}\t{rule}\t{reason}",
        decision.verdict.as_str()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eval::Verdict;

    #[test]
    fn decision_line_is_single_line() {
        let decision = Decision {
            verdict: Verdict::Ask,
            message: "first\nsecond".into(),
            matched_rule: None,
        };
        let line = decision_line(ActionKind::Shell, "echo a\necho b", &decision);
        assert!(!line.contains('\n'));
        assert_eq!(line, "shell\task\techo a\\necho b\t-\tfirst; second");
    }

    #[test]
    fn long_input_is_truncated() {
        let decision = Decision {
            verdict: Verdict::Allow,
            message: "ok".into(),
            matched_rule: None,
        };
        let input = "x".repeat(500);
        let line = decision_line(ActionKind::Read, &input, &decision);
        assert!(line.len() < 300);
    }

    #[test]
    fn log_file_under_local_share() {
        assert_eq!(
            log_path(Path::new("/home/u")),
            PathBuf::from("/home/u/.local/share/gatepost/gatepost.log")
        );
    }
}
