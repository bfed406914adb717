use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// 段落中的一段文本，`highlighted` 为真时按关键词样式显示
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextSegment {
    pub text: String,
    pub highlighted: bool,
}

impl TextSegment {
    fn plain(text: &str) -> Self {
        Self {
            text: text.to_string(),
            highlighted: false,
        }
    }

    fn keyword(text: &str) -> Self {
        Self {
            text: text.to_string(),
            highlighted: true,
        }
    }
}

// 教材里用来引出提示的关键词
fn keyword_regex() -> &'static Regex {
    static KEYWORDS: OnceLock<Regex> = OnceLock::new();
    KEYWORDS.get_or_init(|| {
        Regex::new(r"(?i)\b(?:remarque|note|rappelle)\b").expect("关键词正则是常量")
    })
}

/// 把段落切分为普通文本段和关键词段
///
/// 拼接所有段的文本等于原文
pub fn highlight_segments(text: &str) -> Vec<TextSegment> {
    let mut segments = Vec::new();
    let mut last = 0;

    for m in keyword_regex().find_iter(text) {
        if m.start() > last {
            segments.push(TextSegment::plain(&text[last..m.start()]));
        }
        segments.push(TextSegment::keyword(m.as_str()));
        last = m.end();
    }

    if last < text.len() {
        segments.push(TextSegment::plain(&text[last..]));
    }

    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keywords_are_highlighted() {
        let segments = highlight_segments("Remarque : on note que x.");
        let highlighted: Vec<&str> = segments
            .iter()
            .filter(|s| s.highlighted)
            .map(|s| s.text.as_str())
            .collect();
        assert_eq!(highlighted, vec!["Remarque", "note"]);
    }

    #[test]
    fn test_whole_words_only() {
        let segments = highlight_segments("notes et notation");
        assert!(segments.iter().all(|s| !s.highlighted));
    }

    #[test]
    fn test_segments_cover_text() {
        let text = "On rappelle la règle. NOTE finale";
        let joined: String = highlight_segments(text)
            .into_iter()
            .map(|s| s.text)
            .collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_empty_text() {
        assert!(highlight_segments("").is_empty());
    }
}
