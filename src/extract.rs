//! Tag-balance block extractor. The decorative panel receives HTML as a
//! live token stream, so at any instant the buffer may end mid-tag or
//! inside an unclosed element. `stable_prefix_len` scans left to right
//! tracking open tags and reports the longest prefix that is safe to
//! hand to the DOM patcher: fully-closed top-level blocks only, with the
//! unfinished remainder deferred to the next update.

/// Tags consumed in one step without affecting nesting depth.
const VOID_TAGS: [&str; 14] = [
    "img", "br", "hr", "input", "meta", "link", "area", "base", "col", "embed", "param", "source",
    "track", "wbr",
];

pub fn is_void_tag(name: &str) -> bool {
    VOID_TAGS.iter().any(|t| t.eq_ignore_ascii_case(name))
}

/// Byte length of the longest prefix of `raw` consisting of complete
/// top-level content. Never panics; unparsable trailing content is
/// excluded, not rejected.
pub fn stable_prefix_len(raw: &str) -> usize {
    let mut stack: Vec<String> = Vec::new();
    let mut committed = 0usize;
    let mut i = 0usize;

    while i < raw.len() {
        let rest = &raw[i..];
        if !rest.starts_with('<') {
            // Text content; width-aware advance, committed while at top level.
            let ch = match rest.chars().next() {
                Some(c) => c,
                None => break,
            };
            i += ch.len_utf8();
            if stack.is_empty() {
                committed = i;
            }
            continue;
        }

        if rest.starts_with("<!--") {
            match rest.find("-->") {
                Some(end) => {
                    i += end + 3;
                    if stack.is_empty() {
                        committed = i;
                    }
                    continue;
                }
                // Unterminated comment: wait for more input.
                None => break,
            }
        }

        let gt = match find_tag_end(rest) {
            Some(off) => i + off,
            // Partial tag at the end of the buffer.
            None => break,
        };
        let inner = &raw[i + 1..gt];

        if let Some(close) = inner.strip_prefix('/') {
            let name = tag_name(close);
            // Tolerate stray close tags; match on name equality only.
            if let Some(pos) = stack.iter().rposition(|t| t.eq_ignore_ascii_case(&name)) {
                stack.truncate(pos);
            }
            i = gt + 1;
        } else if inner.starts_with('!') || inner.starts_with('?') {
            // Doctype / processing instruction noise.
            i = gt + 1;
        } else {
            let name = tag_name(inner);
            if name.is_empty() {
                // A bare '<' in text ("a < b"); treat as text.
                i += 1;
                if stack.is_empty() {
                    committed = i;
                }
                continue;
            }
            let self_closing = inner.trim_end().ends_with('/');
            i = gt + 1;
            if name.eq_ignore_ascii_case("style") || name.eq_ignore_ascii_case("script") {
                // Rawtext element: its body may contain '<' and '>' freely,
                // so skip straight to the matching close tag.
                match rawtext_end(raw, i, &name) {
                    Some(end) => i = end,
                    None => break,
                }
            } else if !is_void_tag(&name) && !self_closing {
                stack.push(name.to_ascii_lowercase());
            }
        }

        if stack.is_empty() {
            committed = i;
        }
    }

    committed
}

/// The committed prefix itself.
pub fn extract(raw: &str) -> &str {
    &raw[..stable_prefix_len(raw)]
}

/// Offset of the closing '>' of the tag starting at `rest[0] == '<'`,
/// skipping over quoted attribute values.
pub(crate) fn find_tag_end(rest: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (off, ch) in rest.char_indices() {
        match quote {
            Some(q) => {
                if ch == q {
                    quote = None;
                }
            }
            None => match ch {
                '"' | '\'' => quote = Some(ch),
                '>' => return Some(off),
                _ => {}
            },
        }
    }
    None
}

/// End offset (just past '>') of the `</name ...>` close tag terminating
/// a rawtext element whose body starts at `from`.
fn rawtext_end(raw: &str, from: usize, name: &str) -> Option<usize> {
    let haystack = raw[from..].to_ascii_lowercase();
    let needle = format!("</{}", name.to_ascii_lowercase());
    let rel = haystack.find(&needle)?;
    let after = from + rel + needle.len();
    let gt = raw[after..].find('>')?;
    Some(after + gt + 1)
}

fn tag_name(inner: &str) -> String {
    inner
        .trim_start()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect()
}

// ---------------------------------------------------------------------------
// HtmlBuffer — per-generation accumulator
// ---------------------------------------------------------------------------

/// Raw/committed pair for one panel generation. `committed` is always a
/// prefix of `raw` and never shrinks until `reset`.
#[derive(Debug, Default)]
pub struct HtmlBuffer {
    raw: String,
    committed_len: usize,
}

impl HtmlBuffer {
    pub fn new() -> Self {
        HtmlBuffer::default()
    }

    /// Append a streamed chunk; returns true when the committed prefix grew.
    pub fn push(&mut self, chunk: &str) -> bool {
        self.raw.push_str(chunk);
        let len = stable_prefix_len(&self.raw);
        if len > self.committed_len {
            self.committed_len = len;
            true
        } else {
            false
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn committed(&self) -> &str {
        &self.raw[..self.committed_len]
    }

    pub fn reset(&mut self) {
        self.raw.clear();
        self.committed_len = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_empty_and_whitespace() {
        assert_eq!(extract(""), "");
        assert_eq!(extract("   "), "   ");
    }

    #[test]
    fn test_complete_input_fully_accepted() {
        let s = "<div><p>hi</p></div>";
        assert_eq!(extract(s), s);
    }

    #[test]
    fn test_unclosed_outer_element_yields_nothing() {
        assert_eq!(extract("<div><p>hi</p>"), "");
    }

    #[test]
    fn test_trailing_unclosed_sibling_dropped() {
        assert_eq!(
            extract("<div><p>hi</p></div><span>"),
            "<div><p>hi</p></div>"
        );
    }

    #[test]
    fn test_partial_tag_dropped() {
        assert_eq!(extract("<div>x</div><di"), "<div>x</div>");
        assert_eq!(extract("<div>x</div><div class=\"a"), "<div>x</div>");
    }

    #[rstest]
    #[case("<img src='x'>")]
    #[case("<br>")]
    #[case("<hr/>")]
    #[case("<input type=\"text\">")]
    fn test_void_tags_accepted_without_close(#[case] s: &str) {
        assert_eq!(extract(s), s);
    }

    #[test]
    fn test_self_closing_non_void_accepted() {
        assert_eq!(extract("<custom-el/>"), "<custom-el/>");
    }

    #[test]
    fn test_case_insensitive_close_matching() {
        let s = "<DIV><p>hi</P></div>";
        assert_eq!(extract(s), s);
    }

    #[test]
    fn test_leading_style_block_committed_before_body() {
        let s = "<style>.a{color:red}</style><div>";
        assert_eq!(extract(s), "<style>.a{color:red}</style>");
    }

    #[test]
    fn test_style_body_with_angle_brackets() {
        let s = "<style>.a > .b { color: red } /* < */</style>";
        assert_eq!(extract(s), s);
    }

    #[test]
    fn test_unterminated_style_yields_nothing() {
        assert_eq!(extract("<style>.a{col"), "");
    }

    #[test]
    fn test_quoted_gt_inside_attribute() {
        let s = "<div title=\"a>b\">x</div>";
        assert_eq!(extract(s), s);
    }

    #[test]
    fn test_comment_complete_and_partial() {
        assert_eq!(extract("<!-- note --><p>x</p>"), "<!-- note --><p>x</p>");
        assert_eq!(extract("<p>x</p><!-- dangl"), "<p>x</p>");
    }

    #[test]
    fn test_stray_close_tag_tolerated() {
        let s = "</div><p>x</p>";
        assert_eq!(extract(s), s);
    }

    #[test]
    fn test_top_level_text_committed() {
        assert_eq!(extract("Привет <b>мир</b>"), "Привет <b>мир</b>");
        assert_eq!(extract("Привет <b>ми"), "Привет ");
    }

    #[test]
    fn test_prefix_property_on_growing_stream() {
        let full = "<style>.x{}</style><div><p>Hi</p></div><ul><li>a</li></ul>";
        let mut prev = 0usize;
        for cut in 0..=full.len() {
            if !full.is_char_boundary(cut) {
                continue;
            }
            let len = stable_prefix_len(&full[..cut]);
            assert!(len <= cut);
            assert!(len >= prev, "committed shrank at cut {}", cut);
            prev = len;
        }
        assert_eq!(prev, full.len());
    }

    #[test]
    fn test_buffer_cross_chunk_scenario() {
        let mut buf = HtmlBuffer::new();
        assert!(buf.push("<style>.a{color:red}</style><div>"));
        assert_eq!(buf.committed(), "<style>.a{color:red}</style>");
        // <p> completes but sits inside the still-open div: nothing promoted.
        assert!(!buf.push("<p>Hi</p>"));
        assert_eq!(buf.committed(), "<style>.a{color:red}</style>");
        assert!(buf.push("</div>"));
        assert_eq!(
            buf.committed(),
            "<style>.a{color:red}</style><div><p>Hi</p></div>"
        );
        assert_eq!(buf.raw(), buf.committed());
    }

    #[test]
    fn test_buffer_reset_clears_both_sides() {
        let mut buf = HtmlBuffer::new();
        buf.push("<p>x</p><div>");
        buf.reset();
        assert_eq!(buf.raw(), "");
        assert_eq!(buf.committed(), "");
    }
}
