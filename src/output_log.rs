/// Captured server output: one append-only buffer, any number of readers.
///
/// Each reader holds its own cursor, so the marker scanner can consume lines
/// incrementally while the final report still sees everything.
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    lines: Arc<Mutex<Vec<String>>>,
}

impl OutputLog {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A panicking writer can't leave a half-pushed line behind.
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn push(&self, line: String) {
        self.lock().push(line);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A reader positioned at the start of the log.
    pub fn cursor(&self) -> LogCursor {
        LogCursor {
            log: self.clone(),
            position: 0,
        }
    }

    /// Full log as text, each line newline-terminated.
    pub fn contents(&self) -> String {
        let lines = self.lock();
        let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
        for line in lines.iter() {
            out.push_str(line);
            out.push('\n');
        }
        out
    }
}

/// Independent read position into an [`OutputLog`].
#[derive(Debug)]
pub struct LogCursor {
    log: OutputLog,
    position: usize,
}

impl LogCursor {
    /// Lines appended since the previous call.
    pub fn read_new(&mut self) -> Vec<String> {
        let lines = self.log.lock();
        let fresh = lines[self.position..].to_vec();
        self.position = lines.len();
        fresh
    }

    #[cfg(test)]
    pub fn position(&self) -> usize {
        self.position
    }
}
