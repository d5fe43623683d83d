//! Trigger gating for non-main groups (§4.4a, §8 "Trigger gating").
//!
//! The core's own match is deliberately dumber than the adapter-side
//! mention-normalization in `meshrelay-telegram::mention`: by the time a
//! message reaches the Store it is expected to already carry a literal
//! `@AssistantName` token if the user meant to address the assistant. This
//! module only checks for that literal, case-insensitive, start-anchored.

/// Whether `body` starts with `trigger`, ignoring case and any leading
/// whitespace (§4.4a: "case-insensitive start-anchored `@AssistantName`
/// token").
pub fn matches_trigger(body: &str, trigger: &str) -> bool {
    if trigger.is_empty() {
        return false;
    }
    let trimmed = body.trim_start();
    match trimmed.get(..trigger.len()) {
        Some(prefix) => prefix.eq_ignore_ascii_case(trigger),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_case_insensitively_at_start() {
        assert!(matches_trigger("@Assistant hello", "@assistant"));
        assert!(matches_trigger("@ASSISTANT hello", "@Assistant"));
    }

    #[test]
    fn requires_start_anchor() {
        assert!(!matches_trigger("hey @Assistant", "@Assistant"));
    }

    #[test]
    fn ignores_leading_whitespace() {
        assert!(matches_trigger("   @Assistant hi", "@Assistant"));
    }

    #[test]
    fn empty_trigger_never_matches() {
        assert!(!matches_trigger("@Assistant hi", ""));
    }

    #[test]
    fn non_char_boundary_prefix_does_not_panic() {
        assert!(!matches_trigger("\u{20ac}hi", "@A"));
    }
}
