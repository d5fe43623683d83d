//! Incremental parser for the sandbox's framed stdout protocol (§4.2, §6).
//!
//! Frames are delimited by two fixed sentinel lines; everything between a
//! `START`/`END` pair is one JSON object, and everything outside a frame is
//! log noise the Runner discards. The parser tolerates partial lines,
//! arbitrary non-framed text, and multiple frames per run.

use crate::types::SandboxFrame;

pub const START_SENTINEL: &str = "---OUTPUT_START---";
pub const END_SENTINEL: &str = "---OUTPUT_END---";

/// Stateful line-oriented framer. Feed it output as it arrives (one call per
/// line, no trailing `\n`); it returns a decoded [`SandboxFrame`] whenever a
/// complete frame closes, or `None` for a log line / an in-progress frame.
#[derive(Debug, Default)]
pub struct FrameParser {
    inside: bool,
    buf: String,
    /// Set once a malformed frame is seen, so the Runner surfaces at most
    /// one diagnostic per invocation (§7 "Protocol" error policy).
    diagnostic_emitted: bool,
}

pub enum FrameEvent {
    /// A complete, successfully-parsed frame.
    Frame(SandboxFrame),
    /// A frame closed but its body was not valid JSON — discarded per §7.
    /// Carries whether this is the first such diagnostic this invocation.
    ParseError { first: bool },
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed_line(&mut self, line: &str) -> Option<FrameEvent> {
        let trimmed = line.trim_end_matches('\r');

        if !self.inside {
            if trimmed.trim() == START_SENTINEL {
                self.inside = true;
                self.buf.clear();
            }
            return None;
        }

        if trimmed.trim() == END_SENTINEL {
            self.inside = false;
            let body = std::mem::take(&mut self.buf);
            return Some(match serde_json::from_str::<SandboxFrame>(&body) {
                Ok(frame) => FrameEvent::Frame(frame),
                Err(_) => {
                    let first = !self.diagnostic_emitted;
                    self.diagnostic_emitted = true;
                    FrameEvent::ParseError { first }
                }
            });
        }

        if !self.buf.is_empty() {
            self.buf.push('\n');
        }
        self.buf.push_str(trimmed);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(lines: &[&str]) -> Vec<SandboxFrame> {
        let mut parser = FrameParser::new();
        let mut frames = Vec::new();
        for line in lines {
            if let Some(FrameEvent::Frame(f)) = parser.feed_line(line) {
                frames.push(f);
            }
        }
        frames
    }

    #[test]
    fn parses_single_frame_with_surrounding_noise() {
        let frames = parse_all(&[
            "booting runtime...",
            START_SENTINEL,
            r#"{"status":"success","result":"hello"}"#,
            END_SENTINEL,
            "shutting down",
        ]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].result.as_deref(), Some("hello"));
    }

    #[test]
    fn tolerates_multiline_json_inside_a_frame() {
        let frames = parse_all(&[
            START_SENTINEL,
            "{\"status\":\"success\",",
            "\"result\":\"hi\"}",
            END_SENTINEL,
        ]);
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].result.as_deref(), Some("hi"));
    }

    #[test]
    fn multiple_frames_in_one_run() {
        let frames = parse_all(&[
            START_SENTINEL,
            r#"{"status":"success","event":{"type":"tool_start","summary":"bash"}}"#,
            END_SENTINEL,
            "log noise between frames",
            START_SENTINEL,
            r#"{"status":"success","result":"done"}"#,
            END_SENTINEL,
        ]);
        assert_eq!(frames.len(), 2);
        assert!(frames[0].result.is_none());
        assert_eq!(frames[1].result.as_deref(), Some("done"));
    }

    #[test]
    fn malformed_frame_is_discarded_not_fatal() {
        let mut parser = FrameParser::new();
        let mut saw_error = false;
        let mut saw_frame = false;
        for line in [
            START_SENTINEL,
            "not json at all",
            END_SENTINEL,
            START_SENTINEL,
            r#"{"status":"success","result":"ok"}"#,
            END_SENTINEL,
        ] {
            match parser.feed_line(line) {
                Some(FrameEvent::ParseError { first }) => {
                    assert!(first);
                    saw_error = true;
                }
                Some(FrameEvent::Frame(f)) => {
                    assert_eq!(f.result.as_deref(), Some("ok"));
                    saw_frame = true;
                }
                None => {}
            }
        }
        assert!(saw_error && saw_frame);
    }

    #[test]
    fn out_of_frame_bytes_produce_no_events() {
        let mut parser = FrameParser::new();
        for line in ["just some log line", "another log line"] {
            assert!(parser.feed_line(line).is_none());
        }
    }
}
