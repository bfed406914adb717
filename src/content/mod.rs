//! 正文内容块解析
//!
//! 把节点的原始文本切分成段落块和 `<article>` 标注块（提示框）。

use serde::{Deserialize, Serialize};

pub mod highlight;
pub mod table;

pub use highlight::{highlight_segments, TextSegment};
pub use table::{ImageEntry, TableDescriptor, TableGrid};

const CALLOUT_OPEN: &str = "<article>";
const CALLOUT_CLOSE: &str = "</article>";

/// 显示块
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Block {
    /// 普通段落
    Paragraph { text: String },
    /// 标注块，按原顺序保存非空行
    Callout { lines: Vec<String> },
}

impl Block {
    pub fn paragraph(text: impl Into<String>) -> Self {
        Block::Paragraph { text: text.into() }
    }

    pub fn callout<S: Into<String>>(lines: impl IntoIterator<Item = S>) -> Self {
        Block::Callout {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    /// 块内可见字符数
    pub fn char_count(&self) -> usize {
        match self {
            Block::Paragraph { text } => text.chars().count(),
            Block::Callout { lines } => lines.iter().map(|l| l.chars().count()).sum(),
        }
    }
}

/// 解析结果
///
/// `Empty` 表示节点没有可显示的正文，这不是错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedContent {
    Empty,
    Blocks(Vec<Block>),
}

impl ParsedContent {
    pub fn is_empty(&self) -> bool {
        matches!(self, ParsedContent::Empty)
    }

    pub fn blocks(&self) -> &[Block] {
        match self {
            ParsedContent::Empty => &[],
            ParsedContent::Blocks(blocks) => blocks,
        }
    }

    pub fn char_count(&self) -> usize {
        self.blocks().iter().map(Block::char_count).sum()
    }
}

/// 扫描出的原始区域
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Region<'a> {
    Plain(&'a str),
    Callout(&'a str),
}

/// 单向扫描器，按出现顺序产出普通区域和标注区域
///
/// 标记不区分大小写且不嵌套：开标记之后遇到的第一个闭标记结束区域，
/// 没有闭标记的开标记一直延伸到文本末尾，区域外多余的闭标记被丢弃。
struct MarkerScanner<'a> {
    text: &'a str,
    // 与 text 字节位置一一对应（只做 ASCII 小写转换）
    folded: String,
    pos: usize,
}

impl<'a> MarkerScanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            folded: text.to_ascii_lowercase(),
            pos: 0,
        }
    }

    fn find_from(&self, from: usize, marker: &str) -> Option<usize> {
        self.folded[from..].find(marker).map(|i| from + i)
    }
}

impl<'a> Iterator for MarkerScanner<'a> {
    type Item = Region<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.text.len();
        if self.pos >= len {
            return None;
        }

        let start = self.pos;
        let open = self.find_from(start, CALLOUT_OPEN);
        let stray_close = self.find_from(start, CALLOUT_CLOSE);

        if let Some(close) = stray_close {
            if open.map_or(true, |o| close < o) {
                self.pos = close + CALLOUT_CLOSE.len();
                return Some(Region::Plain(&self.text[start..close]));
            }
        }

        match open {
            None => {
                self.pos = len;
                Some(Region::Plain(&self.text[start..]))
            }
            Some(open) if open > start => {
                // 先交出开标记之前的普通文本，下一轮再处理标注区域
                self.pos = open;
                Some(Region::Plain(&self.text[start..open]))
            }
            Some(open) => {
                let body_start = open + CALLOUT_OPEN.len();
                match self.find_from(body_start, CALLOUT_CLOSE) {
                    Some(close) => {
                        self.pos = close + CALLOUT_CLOSE.len();
                        Some(Region::Callout(&self.text[body_start..close]))
                    }
                    None => {
                        self.pos = len;
                        Some(Region::Callout(&self.text[body_start..]))
                    }
                }
            }
        }
    }
}

/// 按空行切分段落，去掉首尾空白，空段落不产出
fn split_paragraphs(text: &str) -> Vec<String> {
    let mut paragraphs = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    for line in text.lines() {
        if line.trim().is_empty() {
            flush_paragraph(&mut current, &mut paragraphs);
        } else {
            current.push(line);
        }
    }
    flush_paragraph(&mut current, &mut paragraphs);

    paragraphs
}

fn flush_paragraph(current: &mut Vec<&str>, paragraphs: &mut Vec<String>) {
    if current.is_empty() {
        return;
    }
    let joined = current.join("\n");
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        paragraphs.push(trimmed.to_string());
    }
    current.clear();
}

/// 解析原始文本为显示块序列
///
/// 对相同输入输出完全一致；没有可见内容时返回空序列
pub fn parse_blocks(raw: &str) -> Vec<Block> {
    let mut blocks = Vec::new();

    for region in MarkerScanner::new(raw) {
        match region {
            Region::Plain(text) => {
                blocks.extend(split_paragraphs(text).into_iter().map(Block::paragraph));
            }
            Region::Callout(text) => {
                let lines: Vec<String> = text
                    .lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(str::to_string)
                    .collect();
                if !lines.is_empty() {
                    blocks.push(Block::Callout { lines });
                }
            }
        }
    }

    blocks
}

/// 解析节点正文
///
/// # 参数
/// - `raw`: 节点正文，缺失时为 `None`
///
/// # 返回
/// 无正文或只有空白时返回 `ParsedContent::Empty`
pub fn parse_content(raw: Option<&str>) -> ParsedContent {
    match raw {
        None => ParsedContent::Empty,
        Some(text) => {
            let blocks = parse_blocks(text);
            if blocks.is_empty() {
                ParsedContent::Empty
            } else {
                ParsedContent::Blocks(blocks)
            }
        }
    }
}

/// 正文的可见字符数（不含标记），用于估算阅读时间
pub fn visible_char_count(raw: Option<&str>) -> usize {
    parse_content(raw).char_count()
}
