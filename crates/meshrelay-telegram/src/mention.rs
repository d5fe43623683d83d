//! Trigger-normalization: rewrite Telegram's native `@bot_username` mention
//! into the orchestrator's `@AssistantName ` start-anchored trigger
//! convention (§4.4, §6 "Trigger-normalization… is done in the adapter").

/// If `text` mentions `bot_username` anywhere, strip that mention and
/// re-prefix the message with `@assistant_name ` so the Message Loop's
/// case-insensitive start-anchored match (§4.4a) sees it regardless of
/// where the user actually typed the mention.
///
/// Leaves `text` untouched when no mention of `bot_username` is present —
/// a message that already starts with the trigger literally (the user typed
/// `@AssistantName` themselves) passes through unchanged either way.
pub fn normalize_mentions(text: &str, bot_username: &str, assistant_name: &str) -> String {
    if bot_username.is_empty() {
        return text.to_string();
    }
    let needle = format!("@{bot_username}");
    let Some(pos) = find_ci(text, &needle) else {
        return text.to_string();
    };

    let mut rest = String::with_capacity(text.len());
    rest.push_str(&text[..pos]);
    rest.push_str(&text[pos + needle.len()..]);
    let rest = rest.trim();

    if rest.is_empty() {
        format!("@{assistant_name}")
    } else {
        format!("@{assistant_name} {rest}")
    }
}

fn find_ci(haystack: &str, needle: &str) -> Option<usize> {
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    haystack_lower.find(&needle_lower)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mention_anywhere_moves_to_front() {
        let out = normalize_mentions("hey @MyBot can you help", "MyBot", "Assistant");
        assert_eq!(out, "@Assistant hey  can you help");
    }

    #[test]
    fn mention_is_case_insensitive() {
        let out = normalize_mentions("@mybot status please", "MyBot", "Assistant");
        assert_eq!(out, "@Assistant status please");
    }

    #[test]
    fn no_mention_leaves_text_unchanged() {
        let out = normalize_mentions("just chatting", "MyBot", "Assistant");
        assert_eq!(out, "just chatting");
    }

    #[test]
    fn bare_mention_with_no_body() {
        let out = normalize_mentions("@MyBot", "MyBot", "Assistant");
        assert_eq!(out, "@Assistant");
    }
}
