/// Output inspection: the ready banner and crash traces.
///
/// The ready marker is an exact line. Crash patterns are regexes matched
/// against the whole captured log, e.g. a Python `Traceback` header.
use crate::output_log::LogCursor;
use regex::Regex;

/// Incrementally scans a log cursor for the ready marker line.
///
/// Once the marker has been seen the scanner stays latched.
pub struct MarkerScanner {
    cursor: LogCursor,
    marker: String,
    seen: bool,
}

impl MarkerScanner {
    pub fn new(cursor: LogCursor, marker: impl Into<String>) -> Self {
        Self {
            cursor,
            marker: marker.into(),
            seen: false,
        }
    }

    /// Consume lines appended since the last scan. Returns whether the marker has been seen.
    pub fn scan(&mut self) -> bool {
        if self.seen {
            return true;
        }
        for line in self.cursor.read_new() {
            if is_marker_line(&line, &self.marker) {
                tracing::debug!(line = %line, "ready marker found");
                self.seen = true;
                break;
            }
        }
        self.seen
    }

    #[cfg(test)]
    pub fn seen(&self) -> bool {
        self.seen
    }
}

fn is_marker_line(line: &str, marker: &str) -> bool {
    line.strip_suffix('\r').unwrap_or(line) == marker
}

/// Compiled crash patterns.
#[derive(Debug)]
pub struct CrashDetector {
    patterns: Vec<Regex>,
}

impl CrashDetector {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { patterns })
    }

    /// First pattern found in `text`, if any.
    pub fn detect(&self, text: &str) -> Option<String> {
        for pattern in &self.patterns {
            if pattern.is_match(text) {
                tracing::debug!(pattern = %pattern, "crash pattern matched");
                return Some(pattern.as_str().to_string());
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output_log::OutputLog;

    const MARKER: &str = "Quit the server with CTRL-C.";

    #[test]
    fn test_scanner_finds_exact_line() {
        let log = OutputLog::new();
        let mut scanner = MarkerScanner::new(log.cursor(), MARKER);
        assert!(!scanner.scan());

        log.push("Django version 1.11, using settings 'zproject.settings'".to_string());
        assert!(!scanner.scan());

        log.push(MARKER.to_string());
        assert!(scanner.scan());
        assert!(scanner.seen());
    }

    #[test]
    fn test_scanner_ignores_partial_matches() {
        let log = OutputLog::new();
        let mut scanner = MarkerScanner::new(log.cursor(), MARKER);
        log.push(format!("echo: {MARKER}"));
        log.push("Quit the server with CTRL-C".to_string());
        assert!(!scanner.scan());
    }

    #[test]
    fn test_scanner_tolerates_crlf() {
        let log = OutputLog::new();
        let mut scanner = MarkerScanner::new(log.cursor(), MARKER);
        log.push(format!("{MARKER}\r"));
        assert!(scanner.scan());
    }

    #[test]
    fn test_scanner_stays_latched() {
        let log = OutputLog::new();
        let mut scanner = MarkerScanner::new(log.cursor(), MARKER);
        log.push(MARKER.to_string());
        assert!(scanner.scan());
        log.push("shutting down".to_string());
        assert!(scanner.scan());
    }

    #[test]
    fn test_scanning_does_not_consume_report_view() {
        let log = OutputLog::new();
        let mut scanner = MarkerScanner::new(log.cursor(), MARKER);
        log.push("booting".to_string());
        log.push(MARKER.to_string());
        assert!(scanner.scan());
        assert_eq!(log.contents(), format!("booting\n{MARKER}\n"));
    }

    #[test]
    fn test_crash_detector_default_pattern() {
        let detector = CrashDetector::new(&["Traceback"]).unwrap();
        let log = "Quit the server with CTRL-C.\nTraceback (most recent call last):\n  File \"x.py\"\n";
        assert_eq!(detector.detect(log), Some("Traceback".to_string()));
        assert_eq!(detector.detect("all good\n"), None);
    }

    #[test]
    fn test_crash_detector_multiple_patterns() {
        let detector = CrashDetector::new(&["Traceback", r"(?i)panicked at"]).unwrap();
        assert_eq!(
            detector.detect("thread 'main' PANICKED AT src/main.rs:1"),
            Some("(?i)panicked at".to_string())
        );
    }

    #[test]
    fn test_crash_detector_no_patterns_never_matches() {
        let detector = CrashDetector::new::<&str>(&[]).unwrap();
        assert_eq!(detector.detect("Traceback"), None);
    }

    #[test]
    fn test_crash_detector_invalid_regex() {
        assert!(CrashDetector::new(&["("]).is_err());
    }
}
