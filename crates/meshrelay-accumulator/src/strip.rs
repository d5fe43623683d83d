//! Removes internal-reasoning blocks from a sandbox's final result before it
//! reaches a channel (§4.6 `finalize`).

const OPEN_TAG: &str = "<internal>";
const CLOSE_TAG: &str = "</internal>";

/// Strips every `<internal>...</internal>` span, including the tags
/// themselves. An unterminated opening tag drops everything from that point
/// on, since the remainder cannot be distinguished from reasoning content.
pub fn strip_internal_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        match rest.find(OPEN_TAG) {
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + OPEN_TAG.len()..];
                match after_open.find(CLOSE_TAG) {
                    Some(end) => {
                        rest = &after_open[end + CLOSE_TAG.len()..];
                    }
                    None => return out,
                }
            }
            None => {
                out.push_str(rest);
                return out;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_a_single_block() {
        let input = "before <internal>hidden reasoning</internal> after";
        assert_eq!(strip_internal_blocks(input), "before  after");
    }

    #[test]
    fn strips_multiple_blocks() {
        let input = "a<internal>x</internal>b<internal>y</internal>c";
        assert_eq!(strip_internal_blocks(input), "abc");
    }

    #[test]
    fn passes_through_text_without_tags() {
        let input = "plain reply with no tags";
        assert_eq!(strip_internal_blocks(input), input);
    }

    #[test]
    fn drops_trailing_content_after_unterminated_open_tag() {
        let input = "visible<internal>never closed";
        assert_eq!(strip_internal_blocks(input), "visible");
    }
}
