//! fsck progress parsing
//!
//! fsck's `-C<fd>` option produces one of two streams:
//!
//! - fd > 0: machine-readable reports, `"<pass> <cur> <max> <device>\n"`,
//! - fd = 0: the human progress bar, redrawn with backspaces and wrapped
//!   in `\x01 ... \x0d\x02` by some fsck backends.
//!
//! Either way only the newest state matters, so the tracker keeps the
//! last complete line and renders it into the one-line text the splash
//! daemon displays.

use utf8line::{locale_to_utf8, merge_backspace};

/// Incremental parser for an fsck progress stream
pub struct ProgressTracker {
    cancel: bool,

    /// Pretty form: accumulated display line
    line: String,

    /// Pretty form: the previous chunk did not end in a newline, so the
    /// next one continues the same display line
    merge: bool,
}

impl ProgressTracker {
    pub fn new() -> ProgressTracker {
        ProgressTracker {
            cancel: false,
            line: String::new(),
            merge: true,
        }
    }

    /// Mark the run as being terminated; subsequent renders carry a
    /// `STOP` prefix so the splash daemon shows the teardown
    pub fn set_cancel(&mut self) {
        self.cancel = true;
    }

    fn stop_prefix(&self) -> &'static str {
        if self.cancel {
            "STOP\t "
        } else {
            ""
        }
    }

    /// Feed a chunk of the machine-readable stream
    ///
    /// Returns the rendered text when the chunk held a parsable report.
    /// Success is judged from parsing all four fields; a malformed line
    /// renders nothing.
    pub fn feed_report(&mut self, chunk: &[u8]) -> Option<String> {
        let text = String::from_utf8_lossy(chunk);
        let line = text.lines().rev().find(|l| !l.is_empty())?;
        let (pass, cur, max, device) = parse_report(line)?;

        let (pass, percent) = if pass < 0 {
            (0, 0.0)
        } else if max == 0 {
            (pass, 100.0)
        } else {
            (pass, cur as f64 / max as f64 * 100.0)
        };

        Some(format!(
            "{}{}: \tPass:{} {:.1}%",
            self.stop_prefix(),
            device,
            pass,
            percent
        ))
    }

    /// Feed a chunk of the human-readable stream
    ///
    /// Converts from the locale encoding, unwraps the `\x01..\x02`
    /// framing, keeps the last display line and collapses backspaces.
    /// Returns the rendered text, or `None` when the chunk yielded
    /// nothing displayable.
    pub fn feed_pretty(&mut self, chunk: &[u8]) -> Option<String> {
        let conv = locale_to_utf8(chunk).ok()?;
        if conv.text.is_empty() {
            return None;
        }

        let mut do_merge = self.merge;
        let (stripped, terminated) = strip_wrap(&conv.text);
        self.merge = !terminated;

        // Only the last line of the chunk is current
        let last = match stripped.rfind(['\n', '\r']) {
            Some(pos) => {
                do_merge = false;
                &stripped[pos + 1..]
            }
            None => stripped,
        };
        let (last, _) = strip_wrap(last);

        let mut current = last.to_string();
        merge_backspace(&mut current);

        if do_merge {
            self.line.push_str(&current);
            merge_backspace(&mut self.line);
        } else {
            self.line = current;
        }

        if self.line.is_empty() {
            return None;
        }
        Some(format!("{}{}", self.stop_prefix(), self.line))
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        ProgressTracker::new()
    }
}

fn parse_report(line: &str) -> Option<(i32, u64, u64, &str)> {
    let mut fields = line.split_whitespace();
    let pass = fields.next()?.parse().ok()?;
    let cur = fields.next()?.parse().ok()?;
    let max = fields.next()?.parse().ok()?;
    let device = fields.next()?;
    Some((pass, cur, max, device))
}

/// Strip the `\x01`/`\x02` framing and line terminators from both ends,
/// reporting whether a terminator ended the chunk
fn strip_wrap(s: &str) -> (&str, bool) {
    const FRAMING: [char; 4] = ['\r', '\n', '\x01', '\x02'];

    let tail_stripped = s.trim_end_matches(FRAMING);
    let terminated = s[tail_stripped.len()..]
        .chars()
        .any(|c| c == '\n' || c == '\r');
    let head_stripped = tail_stripped.trim_start_matches(FRAMING);

    (head_stripped, terminated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_basic() {
        let mut t = ProgressTracker::new();
        let info = t.feed_report(b"2 1234 4567 /dev/sda1\n").unwrap();
        assert_eq!(info, "/dev/sda1: \tPass:2 27.0%");
    }

    #[test]
    fn test_report_keeps_last_line() {
        let mut t = ProgressTracker::new();
        let info = t
            .feed_report(b"1 10 100 /dev/sda1\n2 50 100 /dev/sda1\n")
            .unwrap();
        assert_eq!(info, "/dev/sda1: \tPass:2 50.0%");
    }

    #[test]
    fn test_report_negative_pass_clamps() {
        let mut t = ProgressTracker::new();
        let info = t.feed_report(b"-1 5 10 /dev/sdb\n").unwrap();
        assert_eq!(info, "/dev/sdb: \tPass:0 0.0%");
    }

    #[test]
    fn test_report_zero_max_is_complete() {
        let mut t = ProgressTracker::new();
        let info = t.feed_report(b"5 0 0 /dev/sdb\n").unwrap();
        assert_eq!(info, "/dev/sdb: \tPass:5 100.0%");
    }

    #[test]
    fn test_report_malformed_renders_nothing() {
        let mut t = ProgressTracker::new();
        assert_eq!(t.feed_report(b"not a report\n"), None);
        assert_eq!(t.feed_report(b"1 2\n"), None);
        assert_eq!(t.feed_report(b""), None);
    }

    #[test]
    fn test_report_stop_prefix() {
        let mut t = ProgressTracker::new();
        t.set_cancel();
        let info = t.feed_report(b"2 1 2 /dev/sda1\n").unwrap();
        assert_eq!(info, "STOP\t /dev/sda1: \tPass:2 50.0%");
    }

    #[test]
    fn test_pretty_unwraps_framing() {
        let mut t = ProgressTracker::new();
        let info = t.feed_pretty(b"\x01/dev/sda1: 12.5%\x0d\x02").unwrap();
        assert_eq!(info, "/dev/sda1: 12.5%");
    }

    #[test]
    fn test_pretty_merges_backspace_redraw() {
        let mut t = ProgressTracker::new();
        let info = t.feed_pretty(b"12.5%\x08\x08\x08\x08\x0813.0%").unwrap();
        assert_eq!(info, "13.0%");
    }

    #[test]
    fn test_pretty_continuation_merges_across_chunks() {
        let mut t = ProgressTracker::new();
        assert_eq!(t.feed_pretty(b"Pass 1: "), Some("Pass 1: ".to_string()));
        // No newline yet: the next chunk extends the same display line.
        assert_eq!(
            t.feed_pretty(b"42.0%"),
            Some("Pass 1: 42.0%".to_string())
        );
    }

    #[test]
    fn test_pretty_newline_resets_line() {
        let mut t = ProgressTracker::new();
        assert_eq!(t.feed_pretty(b"old line\n"), Some("old line".to_string()));
        // The newline ended the previous display line.
        assert_eq!(t.feed_pretty(b"new"), Some("new".to_string()));
    }

    #[test]
    fn test_pretty_empty_chunk() {
        let mut t = ProgressTracker::new();
        assert_eq!(t.feed_pretty(b""), None);
    }
}
