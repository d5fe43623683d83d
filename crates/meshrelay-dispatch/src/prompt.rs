//! Renders a batch of stored messages into the plain-text prompt body
//! handed to a sandbox's stdin document (§4.2 "Input", §4.4).

use meshrelay_core::Message;

/// One line per message, oldest first, in the form the sandbox's agent
/// loop expects to see chat history: `sender: body`, with the assistant's
/// own prior replies labelled distinctly so the model can tell who said
/// what.
pub fn format_messages(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let sender = if m.is_from_assistant {
                "assistant".to_string()
            } else {
                m.sender_display_name.clone().unwrap_or_else(|| m.sender_id.clone())
            };
            format!("{sender}: {}", m.body)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Wraps a scheduled task's prompt with the `[SCHEDULED TASK]` prefix so
/// the agent knows the source (§4.5).
pub fn scheduled_task_prompt(prompt: &str) -> String {
    format!("[SCHEDULED TASK]\n{prompt}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use meshrelay_core::{Jid, Timestamp};

    fn msg(body: &str, is_assistant: bool) -> Message {
        Message {
            id: "1".to_string(),
            jid: Jid::from("tg:1"),
            sender_id: "u1".to_string(),
            sender_display_name: Some("Alice".to_string()),
            timestamp: Timestamp::now(),
            body: body.to_string(),
            is_from_assistant: is_assistant,
        }
    }

    #[test]
    fn formats_user_and_assistant_lines() {
        let rendered = format_messages(&[msg("hi", false), msg("hello there", true)]);
        assert_eq!(rendered, "Alice: hi\nassistant: hello there");
    }

    #[test]
    fn scheduled_prompt_carries_prefix() {
        assert!(scheduled_task_prompt("status").starts_with("[SCHEDULED TASK]"));
    }
}
