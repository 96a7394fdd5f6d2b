//! Encoder diagnostic stream classification
//!
//! The encoder writes warnings, errors and progress reports to stderr. Each
//! line is classified by keyword (first match wins); progress is throttled
//! and chatter is batched so the log stays readable.

use std::time::{Duration, Instant};

/// Minimum spacing between logged progress reports
const PROGRESS_INTERVAL: Duration = Duration::from_secs(1);

/// Batch size bounds for informational output
pub const MIN_BATCH_LINES: usize = 5;
pub const MAX_BATCH_LINES: usize = 10;

/// Severity assigned to a line of encoder output
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OutputLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

/// Keyword class of a single line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    AudioSync,
    Critical,
    Error,
    Warning,
    Progress,
    Banner,
    Info,
    Blank,
}

/// Classify one line, checking keywords in priority order
pub fn classify_line(line: &str) -> LineClass {
    let lower = line.trim().to_lowercase();
    if lower.is_empty() {
        return LineClass::Blank;
    }

    if lower.contains("a/v sync") || lower.contains("late audio frame") || lower.contains("asynchronous") {
        LineClass::AudioSync
    } else if lower.contains("error") && lower.contains("fatal") {
        LineClass::Critical
    } else if lower.contains("error") {
        LineClass::Error
    } else if lower.contains("warning") {
        LineClass::Warning
    } else if lower.contains("frame=") || lower.contains("fps=") || lower.contains("size=") {
        LineClass::Progress
    } else if lower.contains("configuration:") || lower.contains("libav") {
        LineClass::Banner
    } else {
        LineClass::Info
    }
}

/// A classified message ready to log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedOutput {
    pub level: OutputLevel,
    pub message: String,
}

impl ClassifiedOutput {
    fn new(level: OutputLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
        }
    }
}

/// Stateful classifier for one encoder's output stream
#[derive(Debug)]
pub struct OutputClassifier {
    batch_lines: usize,
    pending: Vec<String>,
    last_progress: Option<Instant>,
}

impl OutputClassifier {
    /// `batch_lines` is clamped to the supported range
    pub fn new(batch_lines: usize) -> Self {
        let batch_lines = batch_lines.clamp(MIN_BATCH_LINES, MAX_BATCH_LINES);
        Self {
            batch_lines,
            pending: Vec::with_capacity(batch_lines),
            last_progress: None,
        }
    }

    pub fn batch_lines(&self) -> usize {
        self.batch_lines
    }

    /// Feed one line; returns a message when something should be logged
    pub fn push(&mut self, line: &str, now: Instant) -> Option<ClassifiedOutput> {
        let trimmed = line.trim();
        match classify_line(trimmed) {
            LineClass::AudioSync => Some(ClassifiedOutput::new(
                OutputLevel::Warning,
                format!("Audio sync issue: {}", trimmed),
            )),
            LineClass::Critical => Some(ClassifiedOutput::new(OutputLevel::Critical, trimmed)),
            LineClass::Error => Some(ClassifiedOutput::new(OutputLevel::Error, trimmed)),
            LineClass::Warning => Some(ClassifiedOutput::new(OutputLevel::Warning, trimmed)),
            LineClass::Progress => {
                let due = self
                    .last_progress
                    .map_or(true, |last| now.saturating_duration_since(last) >= PROGRESS_INTERVAL);
                if due {
                    self.last_progress = Some(now);
                    Some(ClassifiedOutput::new(OutputLevel::Debug, trimmed))
                } else {
                    None
                }
            }
            LineClass::Banner | LineClass::Blank => None,
            LineClass::Info => {
                self.pending.push(trimmed.to_string());
                if self.pending.len() >= self.batch_lines {
                    self.flush()
                } else {
                    None
                }
            }
        }
    }

    /// Flush buffered informational lines, e.g. when the stream closes
    pub fn flush(&mut self) -> Option<ClassifiedOutput> {
        if self.pending.is_empty() {
            return None;
        }
        let message = self.pending.join(" | ");
        self.pending.clear();
        Some(ClassifiedOutput::new(OutputLevel::Info, message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_priority() {
        assert_eq!(classify_line("Fatal error opening input"), LineClass::Critical);
        assert_eq!(classify_line("Error while decoding stream"), LineClass::Error);
        assert_eq!(classify_line("WARNING: dropping frame"), LineClass::Warning);
        // Sync keywords win even when an error keyword is present
        assert_eq!(
            classify_line("error: Non-monotonous DTS, A/V sync drift"),
            LineClass::AudioSync
        );
        assert_eq!(classify_line("[alsa] late audio frame"), LineClass::AudioSync);
        assert_eq!(classify_line("frame=  120 fps= 60 q=23.0 size=  1024kB"), LineClass::Progress);
        assert_eq!(classify_line("  configuration: --enable-gpl"), LineClass::Banner);
        assert_eq!(classify_line("  libavutil      58. 29.100"), LineClass::Banner);
        assert_eq!(classify_line("Input #0, x11grab"), LineClass::Info);
        assert_eq!(classify_line("   "), LineClass::Blank);
    }

    #[test]
    fn test_progress_is_throttled_to_once_per_second() {
        let mut classifier = OutputClassifier::new(10);
        let start = Instant::now();

        let first = classifier.push("frame=1 fps=60", start);
        assert_eq!(first.map(|o| o.level), Some(OutputLevel::Debug));
        assert!(classifier.push("frame=2 fps=60", start + Duration::from_millis(400)).is_none());
        assert!(classifier.push("frame=3 fps=60", start + Duration::from_millis(999)).is_none());
        assert!(classifier.push("frame=4 fps=60", start + Duration::from_millis(1000)).is_some());
    }

    #[test]
    fn test_info_lines_are_batched() {
        let mut classifier = OutputClassifier::new(5);
        let now = Instant::now();

        for i in 0..4 {
            assert!(classifier.push(&format!("line {}", i), now).is_none());
        }
        let batch = classifier.push("line 4", now).unwrap();
        assert_eq!(batch.level, OutputLevel::Info);
        assert_eq!(batch.message, "line 0 | line 1 | line 2 | line 3 | line 4");

        assert!(classifier.push("tail", now).is_none());
        assert_eq!(classifier.flush().unwrap().message, "tail");
        assert!(classifier.flush().is_none());
    }

    #[test]
    fn test_batch_size_is_clamped() {
        assert_eq!(OutputClassifier::new(1).batch_lines(), MIN_BATCH_LINES);
        assert_eq!(OutputClassifier::new(50).batch_lines(), MAX_BATCH_LINES);
        assert_eq!(OutputClassifier::new(7).batch_lines(), 7);
    }

    #[test]
    fn test_errors_bypass_the_batch() {
        let mut classifier = OutputClassifier::new(10);
        let now = Instant::now();
        assert!(classifier.push("Input #0", now).is_none());

        let out = classifier.push("[pulse] error opening device", now).unwrap();
        assert_eq!(out.level, OutputLevel::Error);
        assert_eq!(out.message, "[pulse] error opening device");
        assert_eq!(classifier.flush().unwrap().message, "Input #0");
    }
}
