use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};

/// One page's OCR output, as produced by the per-page processor (§4.3).
#[derive(Debug, Clone)]
pub struct PageResult {
    pub page_num: usize,
    pub html: String,
    pub success: bool,
}

static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static TABLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)<table.*?</table>").unwrap());
static FIRST_TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^<[^>]*>").unwrap());
static FIRST_TAG_TEXT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>([^<]*)").unwrap());

const TERMINATORS: &[&str] = &[
    "。", "！", "？", "；", "</p>", "</h1>", "</h2>", "</h3>", "</table>",
];

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fff}').contains(&c)
}

fn strip_tags(s: &str) -> String {
    TAG_RE.replace_all(s, "").to_string()
}

fn table_hash(table_html: &str) -> String {
    let text = strip_tags(table_html);
    let mut hasher = Sha256::new();
    hasher.update(text.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Cross-page dedup, table-hash dedup, and junction smoothing (§4.4 C4).
/// Deterministic in `page_num` regardless of the order pages completed in
/// (§5 "OCR page merge is deterministic"), and idempotent when fed the
/// same page list twice (§8 "Merger idempotence") since a page whose
/// tables were already emitted by an earlier page in the same call
/// produces the same trimmed output both times.
pub fn merge_pages(page_results: &[PageResult]) -> String {
    let mut sorted: Vec<&PageResult> = page_results.iter().collect();
    sorted.sort_by_key(|p| p.page_num);

    let mut merged: Vec<String> = Vec::new();
    let mut seen_tables: std::collections::HashSet<String> = std::collections::HashSet::new();

    for result in sorted {
        if !result.success || result.html.is_empty() {
            continue;
        }

        let mut content = result.html.clone();

        let text_only = strip_tags(&content).trim().to_string();
        if text_only.chars().count() < 3 {
            continue;
        }

        if content.to_lowercase().contains("<table>") || content.to_lowercase().contains("<table ")
        {
            for table_match in TABLE_RE.find_iter(&result.html.clone()) {
                let table_html = table_match.as_str();
                let hash = table_hash(table_html);
                if seen_tables.contains(&hash) {
                    content = content.replace(table_html, "");
                } else {
                    seen_tables.insert(hash);
                }
            }
        }

        if let Some(prev) = merged.last() {
            let prev_trimmed = prev.trim_end();
            let ends_with_terminator = TERMINATORS.iter().any(|t| prev_trimmed.ends_with(t));
            if !prev_trimmed.is_empty() && !ends_with_terminator {
                if let Some(caps) = FIRST_TAG_TEXT_RE.captures(&content) {
                    let start_text = caps.get(1).map(|m| m.as_str().trim()).unwrap_or("");
                    let continues = start_text
                        .chars()
                        .next()
                        .map(|c| c.is_ascii_lowercase() || is_cjk(c))
                        .unwrap_or(false);
                    if continues {
                        content = FIRST_TAG_RE.replacen(&content, 1, "").to_string();
                    }
                }
            }
        }

        merged.push(content);
    }

    merged.join("\n\n")
}

static ELEMENT_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("h1,h2,h3,h4,h5,h6,p,div,li,table").unwrap());
static ROW_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("tr").unwrap());
static CELL_SELECTOR: Lazy<Selector> = Lazy::new(|| Selector::parse("th,td").unwrap());

/// Derives the plain-text rendition of merged HTML: headings/paragraphs/
/// lists/divs in document order, tables rendered as
/// `【表格内容】`/`header：cell` rows/`【表格结束】` (§4.4).
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_fragment(html);
    let mut paragraphs: Vec<String> = Vec::new();

    for element in document.select(&ELEMENT_SELECTOR) {
        if element.value().name() == "table" {
            let mut rows: Vec<Vec<String>> = Vec::new();
            for row in element.select(&ROW_SELECTOR) {
                let cells: Vec<String> = row
                    .select(&CELL_SELECTOR)
                    .map(|c| c.text().collect::<String>().trim().to_string())
                    .collect();
                if cells.iter().any(|c| !c.is_empty()) {
                    rows.push(cells);
                }
            }

            if rows.is_empty() {
                continue;
            }

            paragraphs.push("【表格内容】".to_string());

            if rows.len() > 1 {
                let headers = rows[0].clone();
                paragraphs.push(format!("表格列：{}", headers.join(" | ")));
                for data_row in &rows[1..] {
                    let mut row_text = Vec::new();
                    for (i, cell) in data_row.iter().enumerate() {
                        if i < headers.len() && !cell.is_empty() {
                            row_text.push(format!("{}：{}", headers[i], cell));
                        }
                    }
                    if !row_text.is_empty() {
                        paragraphs.push(row_text.join("；"));
                    }
                }
            } else {
                paragraphs.push(rows[0].join("；"));
            }

            paragraphs.push("【表格结束】".to_string());
        } else {
            let text = element.text().collect::<String>().trim().to_string();
            if !text.is_empty() {
                paragraphs.push(text);
            }
        }
    }

    paragraphs.join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(num: usize, html: &str) -> PageResult {
        PageResult {
            page_num: num,
            html: html.to_string(),
            success: true,
        }
    }

    #[test]
    fn dedups_identical_tables_across_pages() {
        // Cell text must clear the page's own `< 3` char residue guard
        // (merger.rs:60, ported from ocr_service.py:268) or the whole page
        // is dropped before table dedup ever runs.
        let table = "<table><tr><td>XYZ</td></tr></table>";
        let pages = vec![page(1, table), page(2, table)];
        let merged = merge_pages(&pages);
        assert_eq!(merged.matches("<table>").count(), 1);
    }

    #[test]
    fn merges_in_page_num_order_regardless_of_input_order() {
        let pages = vec![
            page(2, "<p>second</p>"),
            page(1, "<p>first</p>"),
        ];
        let merged = merge_pages(&pages);
        assert!(merged.find("first").unwrap() < merged.find("second").unwrap());
    }

    #[test]
    fn idempotent_merge() {
        let pages = vec![page(1, "<p>合同条款</p>"), page(2, "<p>第二条</p>")];
        let once = merge_pages(&pages);
        let pages_again = vec![page(1, "<p>合同条款</p>"), page(2, "<p>第二条</p>")];
        let twice = merge_pages(&pages_again);
        assert_eq!(once, twice);
    }

    #[test]
    fn junction_smoothing_strips_continuation_tag() {
        let pages = vec![
            page(1, "<p>未完待续"),
            page(2, "<p>续的文字</p>"),
        ];
        let merged = merge_pages(&pages);
        // second page's opening <p> is treated as a continuation, not a new block
        assert!(!merged.contains("<p>续的文字"));
    }

    #[test]
    fn html_to_text_renders_table_markers() {
        let html = "<h1>标题</h1><table><tr><th>字段</th><th>值</th></tr><tr><td>甲方</td><td>张三</td></tr></table>";
        let text = html_to_text(html);
        assert!(text.contains("【表格内容】"));
        assert!(text.contains("字段：甲方"));
        assert!(text.contains("【表格结束】"));
    }
}
