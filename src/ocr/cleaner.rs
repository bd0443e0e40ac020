use once_cell::sync::Lazy;
use regex::Regex;

/// Strip-only-tags helper used both by the cleaner and the merger.
fn strip_tags(s: &str) -> String {
    static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
    TAG_RE.replace_all(s, "").to_string()
}

static BLANK_PAGE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*\d+\s*$").unwrap());
static THINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());
static THINKING_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<thinking>.*?</thinking>").unwrap());
static HTML_COMMENT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static CODE_FENCE_OPEN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^```html?\s*\n?").unwrap());
static CODE_FENCE_CLOSE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?```\s*$").unwrap());
static CODE_FENCE_ANY_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)```html?\s*\n?|\n?```").unwrap());
static MODEL_MARKER_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<\|begin_of_box\|>|<\|end_of_box\|>|<\|begin_of_text\|>|<\|end_of_text\|>")
        .unwrap()
});
static PAGE_NUMBER_P_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<p>\s*\d+\s*</p>").unwrap());
static PAGE_NUMBER_DIV_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<div>\s*\d+\s*</div>").unwrap());
static PAGE_NUMBER_H_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<h[1-6]>\s*\d+\s*</h[1-6]>").unwrap());

/// Drops an unclosed top-level `<tag ...>` fragment and everything after
/// it: the `regex` crate has no look-around support, so this walks the
/// open-tag occurrences in order and truncates at the first one with no
/// matching close anywhere after it (equivalent to the source's
/// `<tag[^>]*>(?:(?!</tag>).)*$` but expressed without negative lookahead).
fn strip_unclosed_tail(s: &str, tag: &str) -> String {
    let open_pat = format!("<{tag}");
    let close_pat = format!("</{tag}>");
    let mut search_from = 0;
    while let Some(rel_idx) = s[search_from..].find(&open_pat) {
        let idx = search_from + rel_idx;
        if !s[idx..].contains(&close_pat) {
            return s[..idx].to_string();
        }
        search_from = idx + open_pat.len();
    }
    s.to_string()
}

/// Removes every occurrence of `phrase` up to (but not including) the next
/// `<` or end of string — a plain-Rust stand-in for the source's
/// `{phrase}.*?(?=<|$)` lookahead, which `regex` cannot express.
fn strip_phrase_preamble(input: &str, phrase: &str) -> String {
    let mut result = String::new();
    let mut remaining = input;
    while let Some(pos) = remaining.find(phrase) {
        result.push_str(&remaining[..pos]);
        let after_phrase = &remaining[pos + phrase.len()..];
        match after_phrase.find('<') {
            Some(tag_pos) => remaining = &after_phrase[tag_pos..],
            None => {
                remaining = "";
                break;
            }
        }
    }
    result.push_str(remaining);
    result
}

/// Per-page output sanitizer (§4.3 C3). `thought_preamble_phrases` is the
/// model-specific blocklist from `SanitizerConfig`; any paragraph whose
/// first token starts with one of these phrases is dropped up to the next
/// tag (or end of string), matching the source's thought-preamble removal.
pub fn clean_page_content(content: &str, thought_preamble_phrases: &[String]) -> String {
    if content.is_empty() {
        return String::new();
    }

    let content_text = strip_tags(content).trim().to_string();
    if content_text.is_empty() || BLANK_PAGE_RE.is_match(&content_text) {
        return String::new();
    }

    let mut out = content.to_string();
    out = THINK_RE.replace_all(&out, "").to_string();
    out = THINKING_RE.replace_all(&out, "").to_string();

    for phrase in thought_preamble_phrases {
        if phrase.is_empty() {
            continue;
        }
        out = strip_phrase_preamble(&out, phrase);
    }

    out = HTML_COMMENT_RE.replace_all(&out, "").to_string();

    out = CODE_FENCE_OPEN_RE.replace(&out, "").to_string();
    out = CODE_FENCE_CLOSE_RE.replace(&out, "").to_string();
    out = CODE_FENCE_ANY_RE.replace_all(&out, "").to_string();

    out = MODEL_MARKER_RE.replace_all(&out, "").to_string();

    out = PAGE_NUMBER_P_RE.replace_all(&out, "").to_string();
    out = PAGE_NUMBER_DIV_RE.replace_all(&out, "").to_string();
    out = PAGE_NUMBER_H_RE.replace_all(&out, "").to_string();

    out = strip_unclosed_tail(&out, "table");
    out = strip_unclosed_tail(&out, "div");
    out = strip_unclosed_tail(&out, "svg");

    let final_text = strip_tags(&out).trim().to_string();
    if final_text.is_empty() || final_text.chars().count() < 3 {
        return String::new();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phrases() -> Vec<String> {
        vec!["我需要".to_string(), "让我".to_string()]
    }

    #[test]
    fn blank_page_returns_empty() {
        assert_eq!(clean_page_content("", &phrases()), "");
        assert_eq!(clean_page_content("<p>  12  </p>", &phrases()), "");
    }

    #[test]
    fn strips_think_tags() {
        let input = "<think>reasoning about the page</think><p>合同内容</p>";
        let cleaned = clean_page_content(input, &phrases());
        assert!(!cleaned.contains("think"));
        assert!(cleaned.contains("合同内容"));
    }

    #[test]
    fn strips_thought_preamble_paragraph() {
        let input = "我需要仔细分析这张图片<p>合同标题</p>";
        let cleaned = clean_page_content(input, &phrases());
        assert!(!cleaned.contains("我需要"));
        assert!(cleaned.contains("合同标题"));
    }

    #[test]
    fn strips_code_fences_and_markers() {
        let input = "```html\n<h1>标题内容</h1>\n```";
        let cleaned = clean_page_content(input, &phrases());
        assert_eq!(cleaned.trim(), "<h1>标题内容</h1>");

        let input2 = "<|begin_of_box|><p>内容</p><|end_of_box|>";
        let cleaned2 = clean_page_content(input2, &phrases());
        assert!(!cleaned2.contains("begin_of_box"));
    }

    #[test]
    fn strips_page_number_only_elements() {
        let input = "<h1>3</h1><p>正文内容在这里</p>";
        let cleaned = clean_page_content(input, &phrases());
        assert!(!cleaned.contains("<h1>3</h1>"));
        assert!(cleaned.contains("正文内容在这里"));
    }

    #[test]
    fn residue_shorter_than_three_chars_is_empty() {
        assert_eq!(clean_page_content("<p>ab</p>", &phrases()), "");
    }

    #[test]
    fn idempotent() {
        let input = "我需要想想<think>nope</think><p>合同正文内容</p>";
        let once = clean_page_content(input, &phrases());
        let twice = clean_page_content(&once, &phrases());
        assert_eq!(once, twice);
    }
}
