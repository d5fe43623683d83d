//! Per-invocation Stream Accumulator state machine (§4.6).

use std::sync::Arc;
use std::time::Duration;

use meshrelay_channels::Channel;
use meshrelay_core::Jid;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::Result;
use crate::strip::strip_internal_blocks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Accumulating,
    Finalizing,
    Done,
}

struct Buffer {
    tool_lines: Vec<String>,
    tool_overflow: usize,
    text: String,
    phase: Phase,
}

impl Buffer {
    fn render(&self, max_tool_lines: usize) -> String {
        let mut out = String::new();
        for line in self.tool_lines.iter().take(max_tool_lines) {
            out.push_str("- ");
            out.push_str(line);
            out.push('\n');
        }
        if self.tool_overflow > 0 {
            out.push_str(&format!("- …and {} more tools\n", self.tool_overflow));
        }
        if !self.tool_lines.is_empty() || self.tool_overflow > 0 {
            out.push('\n');
        }
        out.push_str(&self.text);
        out
    }
}

/// Presents one progressively-edited outbound message per sandbox
/// invocation (§4.6). One instance is created per invocation and discarded
/// after `finalize`.
pub struct Accumulator {
    channel: Arc<dyn Channel>,
    jid: Jid,
    max_tool_lines: usize,
    debounce: Duration,
    buffer: Mutex<Buffer>,
    /// Serializes every outbound write so the flush chain is strictly
    /// ordered: a later-scheduled write never overtakes an earlier one
    /// (§4.6 "flush-chain ordering invariant", §5).
    write_lock: Mutex<()>,
    sent_message_id: Mutex<Option<String>>,
    pending_flush: Mutex<Option<JoinHandle<()>>>,
}

impl Accumulator {
    pub fn new(channel: Arc<dyn Channel>, jid: Jid, max_tool_lines: usize, debounce: Duration) -> Arc<Self> {
        Arc::new(Self {
            channel,
            jid,
            max_tool_lines,
            debounce,
            buffer: Mutex::new(Buffer {
                tool_lines: Vec::new(),
                tool_overflow: 0,
                text: String::new(),
                phase: Phase::Idle,
            }),
            write_lock: Mutex::new(()),
            sent_message_id: Mutex::new(None),
            pending_flush: Mutex::new(None),
        })
    }

    /// Records a tool-start event, capped at `max_tool_lines` with a
    /// "more tools" marker beyond that (§4.6).
    pub async fn add_tool_start(self: &Arc<Self>, summary: String) {
        {
            let mut buf = self.buffer.lock().await;
            if buf.tool_lines.len() < self.max_tool_lines {
                buf.tool_lines.push(summary);
            } else {
                buf.tool_overflow += 1;
            }
            buf.phase = Phase::Accumulating;
        }
        self.schedule_flush();
    }

    /// Appends a text delta in order (§4.6).
    pub async fn add_text_delta(self: &Arc<Self>, text: String) {
        {
            let mut buf = self.buffer.lock().await;
            buf.text.push_str(&text);
            buf.phase = Phase::Accumulating;
        }
        self.schedule_flush();
    }

    /// Coalesces bursts into at most one channel write per debounce
    /// interval (§4.6). A no-op if a flush is already pending.
    fn schedule_flush(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            {
                let mut pending = this.pending_flush.lock().await;
                if pending.is_some() {
                    return;
                }
                let this2 = this.clone();
                let debounce = this.debounce;
                *pending = Some(tokio::spawn(async move {
                    tokio::time::sleep(debounce).await;
                    this2.flush().await;
                }));
            }
        });
    }

    async fn flush(self: &Arc<Self>) {
        {
            let mut pending = self.pending_flush.lock().await;
            *pending = None;
        }

        let rendered = {
            let buf = self.buffer.lock().await;
            if buf.phase != Phase::Accumulating {
                return;
            }
            buf.render(self.max_tool_lines)
        };
        if rendered.trim().is_empty() {
            return;
        }

        let _guard = self.write_lock.lock().await;
        let existing_id = self.sent_message_id.lock().await.clone();
        match existing_id {
            None => match self.channel.send(&self.jid, &rendered).await {
                Ok(Some(id)) => {
                    *self.sent_message_id.lock().await = Some(id);
                }
                Ok(None) => {}
                Err(e) => warn!(jid = %self.jid, error = %e, "accumulator flush send failed"),
            },
            Some(id) => {
                if self.channel.supports_edit() {
                    if let Err(e) = self.channel.edit(&self.jid, &id, &rendered).await {
                        warn!(jid = %self.jid, error = %e, "accumulator flush edit failed");
                    }
                }
            }
        }
    }

    /// Finalizes the invocation: strips internal-reasoning blocks, then
    /// replaces or extends the edited message. Falls back to a plain send
    /// when the channel cannot edit or the clean text exceeds the
    /// channel's max length (§4.6).
    pub async fn finalize(self: &Arc<Self>, raw_result: &str) -> Result<()> {
        {
            let mut buf = self.buffer.lock().await;
            buf.phase = Phase::Finalizing;
        }
        // Cancel any in-flight debounce timer; finalize supersedes it, but
        // the write_lock below still waits for a flush already in the
        // channel-call critical section, preserving ordering.
        if let Some(handle) = self.pending_flush.lock().await.take() {
            handle.abort();
        }

        let clean = strip_internal_blocks(raw_result);
        let fits = self
            .channel
            .max_message_len()
            .map(|max| clean.chars().count() <= max)
            .unwrap_or(true);

        let _guard = self.write_lock.lock().await;
        let existing_id = self.sent_message_id.lock().await.clone();

        let outcome = match existing_id {
            Some(id) if self.channel.supports_edit() && fits => {
                self.channel.edit(&self.jid, &id, &clean).await
            }
            _ => self.channel.send(&self.jid, &clean).await.map(|_| true),
        };

        match outcome {
            Ok(_) => debug!(jid = %self.jid, "accumulator finalized"),
            Err(e) => warn!(jid = %self.jid, error = %e, "accumulator finalize failed"),
        }

        let mut buf = self.buffer.lock().await;
        buf.phase = Phase::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use meshrelay_channels::error::Result as ChannelResult;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    struct RecordingChannel {
        sends: AtomicUsize,
        edits: AtomicUsize,
        last_text: StdMutex<String>,
        edit_capable: bool,
        max_len: Option<usize>,
    }

    #[async_trait]
    impl Channel for RecordingChannel {
        fn name(&self) -> &str {
            "fake"
        }
        fn owns(&self, _jid: &Jid) -> bool {
            true
        }
        async fn send(&self, _jid: &Jid, text: &str) -> ChannelResult<Option<String>> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            *self.last_text.lock().unwrap() = text.to_string();
            Ok(Some("m1".to_string()))
        }
        async fn edit(&self, _jid: &Jid, _id: &str, text: &str) -> ChannelResult<bool> {
            self.edits.fetch_add(1, Ordering::SeqCst);
            *self.last_text.lock().unwrap() = text.to_string();
            Ok(true)
        }
        async fn set_typing(&self, _jid: &Jid, _on: bool) -> ChannelResult<()> {
            Ok(())
        }
        fn supports_edit(&self) -> bool {
            self.edit_capable
        }
        fn max_message_len(&self) -> Option<usize> {
            self.max_len
        }
    }

    #[tokio::test]
    async fn finalize_without_prior_send_sends_once() {
        let channel = Arc::new(RecordingChannel {
            sends: AtomicUsize::new(0),
            edits: AtomicUsize::new(0),
            last_text: StdMutex::new(String::new()),
            edit_capable: true,
            max_len: None,
        });
        let acc = Accumulator::new(channel.clone(), Jid::from("tg:1"), 20, Duration::from_millis(10));
        acc.finalize("hello <internal>secret</internal>world").await.unwrap();

        assert_eq!(channel.sends.load(Ordering::SeqCst), 1);
        assert_eq!(channel.edits.load(Ordering::SeqCst), 0);
        assert_eq!(*channel.last_text.lock().unwrap(), "hello world");
    }

    #[tokio::test]
    async fn flush_then_finalize_uses_edit() {
        let channel = Arc::new(RecordingChannel {
            sends: AtomicUsize::new(0),
            edits: AtomicUsize::new(0),
            last_text: StdMutex::new(String::new()),
            edit_capable: true,
            max_len: None,
        });
        let acc = Accumulator::new(channel.clone(), Jid::from("tg:1"), 20, Duration::from_millis(10));
        acc.add_text_delta("partial...".to_string()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(channel.sends.load(Ordering::SeqCst), 1);

        acc.finalize("final answer").await.unwrap();
        assert_eq!(channel.edits.load(Ordering::SeqCst), 1);
        assert_eq!(*channel.last_text.lock().unwrap(), "final answer");
    }

    #[tokio::test]
    async fn finalize_falls_back_to_send_when_edit_unsupported() {
        let channel = Arc::new(RecordingChannel {
            sends: AtomicUsize::new(0),
            edits: AtomicUsize::new(0),
            last_text: StdMutex::new(String::new()),
            edit_capable: false,
            max_len: None,
        });
        let acc = Accumulator::new(channel.clone(), Jid::from("wa:1"), 20, Duration::from_millis(10));
        acc.add_text_delta("streaming...".to_string()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        acc.finalize("done").await.unwrap();
        assert_eq!(channel.edits.load(Ordering::SeqCst), 0);
        assert!(channel.sends.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn finalize_falls_back_to_send_when_text_exceeds_max_len() {
        let channel = Arc::new(RecordingChannel {
            sends: AtomicUsize::new(0),
            edits: AtomicUsize::new(0),
            last_text: StdMutex::new(String::new()),
            edit_capable: true,
            max_len: Some(5),
        });
        let acc = Accumulator::new(channel.clone(), Jid::from("tg:1"), 20, Duration::from_millis(10));
        acc.add_text_delta("hi".to_string()).await;
        tokio::time::sleep(Duration::from_millis(40)).await;

        acc.finalize("this is definitely longer than five chars").await.unwrap();
        assert_eq!(channel.edits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn tool_lines_cap_and_overflow_marker() {
        let channel = Arc::new(RecordingChannel {
            sends: AtomicUsize::new(0),
            edits: AtomicUsize::new(0),
            last_text: StdMutex::new(String::new()),
            edit_capable: true,
            max_len: None,
        });
        let acc = Accumulator::new(channel.clone(), Jid::from("tg:1"), 2, Duration::from_millis(10));
        for i in 0..5 {
            acc.add_tool_start(format!("tool-{i}")).await;
        }
        tokio::time::sleep(Duration::from_millis(40)).await;

        let text = channel.last_text.lock().unwrap().clone();
        assert!(text.contains("tool-0"));
        assert!(text.contains("tool-1"));
        assert!(!text.contains("tool-2"));
        assert!(text.contains("3 more tools"));
    }
}
