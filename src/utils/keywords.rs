use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};

/// Extracts a ranked keyword list from chunk text. Behind a trait per the
/// Design Note under §9 ("Keyword extraction language dependency") so a
/// language-specific tokenizer can be swapped in without touching the
/// chunker or the lexical-index adapter that both call it.
pub trait KeywordExtractor: Send + Sync {
    fn extract(&self, text: &str, max_keywords: usize) -> Vec<String>;
}

static DEFAULT_STOPWORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上",
        "也", "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这",
    ]
    .into_iter()
    .collect()
});

/// Whitespace/punctuation-based tokenizer with CJK-run preservation: any
/// run of alphanumerics, underscores, whitespace, or CJK ideographs
/// (U+4E00..U+9FFF) survives; everything else becomes a separator.
pub struct DefaultKeywordExtractor;

impl DefaultKeywordExtractor {
    fn is_kept(c: char) -> bool {
        c.is_alphanumeric() || c == '_' || c.is_whitespace() || ('\u{4e00}'..='\u{9fff}').contains(&c)
    }
}

impl KeywordExtractor for DefaultKeywordExtractor {
    fn extract(&self, text: &str, max_keywords: usize) -> Vec<String> {
        let cleaned: String = text
            .chars()
            .map(|c| if Self::is_kept(c) { c } else { ' ' })
            .collect();

        let mut freq: HashMap<&str, usize> = HashMap::new();
        for word in cleaned.split_whitespace() {
            if word.chars().count() <= 1 {
                continue;
            }
            if DEFAULT_STOPWORDS.contains(word) {
                continue;
            }
            *freq.entry(word).or_insert(0) += 1;
        }

        let mut ranked: Vec<(&str, usize)> = freq.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        ranked
            .into_iter()
            .take(max_keywords)
            .map(|(w, _)| w.to_string())
            .collect()
    }
}

pub fn has_chinese(text: &str) -> bool {
    text.chars().any(|c| ('\u{4e00}'..='\u{9fff}').contains(&c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_stopwords_and_short_tokens() {
        let extractor = DefaultKeywordExtractor;
        let keywords = extractor.extract("合同 合同 合同 的 是 a", 5);
        assert!(keywords.contains(&"合同".to_string()));
        assert!(!keywords.iter().any(|k| k == "的" || k == "是" || k == "a"));
    }

    #[test]
    fn ranks_by_frequency() {
        let extractor = DefaultKeywordExtractor;
        let keywords = extractor.extract("alpha alpha beta beta beta gamma", 2);
        assert_eq!(keywords, vec!["beta".to_string(), "alpha".to_string()]);
    }

    #[test]
    fn detects_chinese() {
        assert!(has_chinese("合同编号"));
        assert!(!has_chinese("contract number"));
    }
}
