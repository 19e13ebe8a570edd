//! Git-HEAD matching for the retrieval freshness gate.
//!
//! Only `current_head` and its date-formatting helpers are needed here —
//! blame, file-history, and churn queries live elsewhere. The hand-rolled
//! `chrono_from_epoch`/`days_to_ymd` algorithm avoids pulling in a `chrono`
//! dependency for two date fields.

use git2::Repository;
use std::path::Path;

/// Current HEAD commit hash, or `None` if the path isn't a git repository
/// or has no commits yet (a fresh `git init`).
pub fn current_head(repo_root: &Path) -> Option<String> {
    let repo = Repository::open(repo_root).ok()?;
    let head = repo.head().ok()?;
    let commit = head.peel_to_commit().ok()?;
    Some(commit.id().to_string())
}

pub fn format_git_time(epoch_seconds: i64, offset_minutes: i32) -> String {
    let adjusted = epoch_seconds + (offset_minutes as i64) * 60;
    let days = adjusted.div_euclid(86400);
    let rem = adjusted.rem_euclid(86400);
    let hours = rem / 3600;
    let mins = (rem % 3600) / 60;
    let (year, month, day) = days_to_ymd(days);
    format!("{year:04}-{month:02}-{day:02} {hours:02}:{mins:02}")
}

fn days_to_ymd(mut days: i64) -> (i64, i64, i64) {
    // http://howardhinnant.github.io/date_algorithms.html
    days += 719468;
    let era = if days >= 0 { days } else { days - 146096 } / 146097;
    let doe = days - era * 146097;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_repo_path_yields_no_head() {
        let dir = tempfile::TempDir::new().unwrap();
        assert!(current_head(dir.path()).is_none());
    }

    #[test]
    fn format_git_time_renders_unix_epoch() {
        assert_eq!(format_git_time(0, 0), "1970-01-01 00:00");
    }

    #[test]
    fn format_git_time_handles_known_date() {
        // 2020-01-01 00:00:00 UTC
        assert_eq!(format_git_time(1_577_836_800, 0), "2020-01-01 00:00");
    }
}
