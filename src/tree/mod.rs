//! 文档树模型：书 → 章 → 节 → 小节
//!
//! 树只能通过 `replace` 整体替换，或由编辑器提交覆盖值；
//! 覆盖值在下一次 `replace` 时全部丢弃。

use log::{info, warn};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

use crate::content::{ImageEntry, TableDescriptor};
use crate::error::{Result, ViewerError};

pub mod types;

pub use types::*;

/// 编辑保存后生效的覆盖值，优先于节点原值
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeOverride {
    pub content: Option<String>,
    pub images: Option<Vec<ImageEntry>>,
    pub tables: Option<Vec<TableDescriptor>>,
    pub is_intro: Option<bool>,
}

/// 显示编号
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayNumber {
    Numbered(u32),
    /// 引言章节，不显示编号
    Intro,
}

impl DisplayNumber {
    pub fn number(&self) -> Option<u32> {
        match self {
            DisplayNumber::Numbered(n) => Some(*n),
            DisplayNumber::Intro => None,
        }
    }
}

/// 按主题分组后的一组章节
#[derive(Debug, Clone)]
pub struct ThematiqueGroup<'a> {
    /// `None` 表示没有主题的章节
    pub thematique: Option<&'a Thematique>,
    pub chapters: Vec<&'a Chapter>,
}

/// 内存中的文档树
#[derive(Debug, Clone)]
pub struct DocumentTree {
    book: Book,
    index: HashMap<NodeKey, NodePath>,
    overrides: HashMap<NodeKey, NodeOverride>,
}

impl DocumentTree {
    pub fn new(book: Book) -> Self {
        let mut tree = Self {
            book: Book {
                id: book.id,
                title: String::new(),
                description: None,
                cover: None,
                chapters: Vec::new(),
            },
            index: HashMap::new(),
            overrides: HashMap::new(),
        };
        tree.replace(book);
        tree
    }

    /// 从 `export_structure` 的 JSON 构建
    pub fn from_json(value: Value) -> Result<Self> {
        let book: Book = serde_json::from_value(value)?;
        Ok(Self::new(book))
    }

    /// 整体替换树，同时丢弃所有覆盖值
    pub fn replace(&mut self, mut book: Book) {
        sort_book(&mut book);
        self.index = build_index(&book);
        self.overrides.clear();

        info!(
            "文档树已加载: book={} 章节数={} 节点数={}",
            book.id,
            book.chapters.len(),
            self.index.len()
        );
        self.book = book;
    }

    pub fn book(&self) -> &Book {
        &self.book
    }

    pub fn book_id(&self) -> i64 {
        self.book.id
    }

    pub fn set_book_title(&mut self, title: String) {
        self.book.title = title;
    }

    /// 按 `order` 升序的章节
    pub fn chapters(&self) -> &[Chapter] {
        &self.book.chapters
    }

    pub fn is_empty(&self) -> bool {
        self.book.chapters.is_empty()
    }

    pub fn chapter_at(&self, order: i64) -> Option<&Chapter> {
        self.book.chapters.iter().find(|c| c.order == order)
    }

    pub fn contains(&self, key: NodeKey) -> bool {
        self.index.contains_key(&key)
    }

    pub fn path_of(&self, key: NodeKey) -> Option<NodePath> {
        self.index.get(&key).copied()
    }

    pub fn chapter(&self, id: i64) -> Option<&Chapter> {
        self.book.chapters.iter().find(|c| c.id == id)
    }

    pub fn section(&self, chapter_id: i64, section_id: i64) -> Option<&Section> {
        self.chapter(chapter_id)?
            .sections
            .iter()
            .find(|s| s.id == section_id)
    }

    pub fn node(&self, key: NodeKey) -> Option<NodeRef<'_>> {
        let path = self.path_of(key)?;
        let chapter = self.chapter(path.chapter_id)?;
        let Some(section_id) = path.section_id else {
            return Some(NodeRef::Chapter(chapter));
        };
        let section = chapter.sections.iter().find(|s| s.id == section_id)?;
        match path.subsection_id {
            None => Some(NodeRef::Section(section)),
            Some(sub_id) => section
                .subsections
                .iter()
                .find(|s| s.id == sub_id)
                .map(NodeRef::Subsection),
        }
    }

    /// 同级节点（含自身），按 `order` 升序
    pub fn siblings_of(&self, key: NodeKey) -> Option<Vec<NodeRef<'_>>> {
        let path = self.path_of(key)?;
        let siblings = match key.kind {
            NodeKind::Chapter => self.book.chapters.iter().map(NodeRef::Chapter).collect(),
            NodeKind::Section => self
                .chapter(path.chapter_id)?
                .sections
                .iter()
                .map(NodeRef::Section)
                .collect(),
            NodeKind::Subsection => self
                .section(path.chapter_id, path.section_id?)?
                .subsections
                .iter()
                .map(NodeRef::Subsection)
                .collect(),
        };
        Some(siblings)
    }

    /// 章节是否为引言，覆盖值优先
    pub fn effective_is_intro(&self, node: &NodeRef<'_>) -> bool {
        self.overrides
            .get(&node.key())
            .and_then(|o| o.is_intro)
            .unwrap_or_else(|| node.is_intro())
    }

    /// 节点的显示编号
    ///
    /// 引言节点不编号；其余节点的编号为 1 加上 `order` 更小的非引言同级节点数
    pub fn display_number_of(&self, key: NodeKey) -> Option<DisplayNumber> {
        let siblings = self.siblings_of(key)?;
        let node = siblings.iter().find(|n| n.key() == key)?;
        if self.effective_is_intro(node) {
            return Some(DisplayNumber::Intro);
        }

        let before = siblings
            .iter()
            .filter(|s| s.order() < node.order() && !self.effective_is_intro(s))
            .count();
        Some(DisplayNumber::Numbered(before as u32 + 1))
    }

    /// 层级编号，例如 `2.1.3`；引言章节及其子节点没有编号
    pub fn display_label_of(&self, key: NodeKey) -> Option<String> {
        let path = self.path_of(key)?;
        let mut parts = Vec::new();
        let mut chain = vec![NodeKey::chapter(path.chapter_id)];
        if let Some(section_id) = path.section_id {
            chain.push(NodeKey::section(section_id));
        }
        if let Some(sub_id) = path.subsection_id {
            chain.push(NodeKey::subsection(sub_id));
        }

        for link in chain {
            parts.push(self.display_number_of(link)?.number()?.to_string());
        }
        Some(parts.join("."))
    }

    /// 按主题分组，组顺序为首次出现顺序，组内保持章节顺序
    pub fn group_by_thematique(&self) -> Vec<ThematiqueGroup<'_>> {
        let mut groups: Vec<ThematiqueGroup<'_>> = Vec::new();
        let mut slots: HashMap<Option<i64>, usize> = HashMap::new();

        for chapter in &self.book.chapters {
            let key = chapter.thematique.as_ref().map(|t| t.id);
            let slot = *slots.entry(key).or_insert_with(|| {
                groups.push(ThematiqueGroup {
                    thematique: chapter.thematique.as_ref(),
                    chapters: Vec::new(),
                });
                groups.len() - 1
            });
            groups[slot].chapters.push(chapter);
        }

        groups
    }

    /// 文档顺序（先序遍历）下的全部节点
    pub fn document_order(&self) -> Vec<NodeKey> {
        let mut keys = Vec::with_capacity(self.index.len());
        for chapter in &self.book.chapters {
            keys.push(NodeKey::chapter(chapter.id));
            for section in &chapter.sections {
                keys.push(NodeKey::section(section.id));
                for sub in &section.subsections {
                    keys.push(NodeKey::subsection(sub.id));
                }
            }
        }
        keys
    }

    /// 某一层级的全部节点，保持文档顺序
    pub fn nodes_of_kind(&self, kind: NodeKind) -> Vec<NodeKey> {
        self.document_order()
            .into_iter()
            .filter(|k| k.kind == kind)
            .collect()
    }

    pub fn override_of(&self, key: NodeKey) -> Option<&NodeOverride> {
        self.overrides.get(&key)
    }

    /// 提交覆盖值，只覆盖其中给出的字段
    pub fn commit_override(&mut self, key: NodeKey, update: NodeOverride) -> Result<()> {
        if !self.contains(key) {
            return Err(ViewerError::NotFound(key.to_string()));
        }
        let entry = self.overrides.entry(key).or_default();
        if update.content.is_some() {
            entry.content = update.content;
        }
        if update.images.is_some() {
            entry.images = update.images;
        }
        if update.tables.is_some() {
            entry.tables = update.tables;
        }
        if update.is_intro.is_some() {
            entry.is_intro = update.is_intro;
        }
        Ok(())
    }

    pub fn effective_content(&self, key: NodeKey) -> Option<&str> {
        if let Some(content) = self.overrides.get(&key).and_then(|o| o.content.as_deref()) {
            return Some(content);
        }
        self.node(key)?.content()
    }

    pub fn effective_images(&self, key: NodeKey) -> &[ImageEntry] {
        if let Some(images) = self.overrides.get(&key).and_then(|o| o.images.as_deref()) {
            return images;
        }
        self.node(key).map(|n| n.images()).unwrap_or(&[])
    }

    pub fn effective_tables(&self, key: NodeKey) -> &[TableDescriptor] {
        if let Some(tables) = self.overrides.get(&key).and_then(|o| o.tables.as_deref()) {
            return tables;
        }
        self.node(key).map(|n| n.tables()).unwrap_or(&[])
    }
}

fn sort_book(book: &mut Book) {
    book.chapters.sort_by_key(|c| c.order);
    warn_duplicate_orders("book", book.id, book.chapters.iter().map(|c| c.order));

    for chapter in &mut book.chapters {
        chapter.sections.sort_by_key(|s| s.order);
        warn_duplicate_orders("chapter", chapter.id, chapter.sections.iter().map(|s| s.order));

        for section in &mut chapter.sections {
            section.subsections.sort_by_key(|s| s.order);
            warn_duplicate_orders(
                "section",
                section.id,
                section.subsections.iter().map(|s| s.order),
            );
        }
    }
}

fn warn_duplicate_orders(scope: &str, id: i64, orders: impl Iterator<Item = i64>) {
    let mut seen = HashSet::new();
    for order in orders {
        if !seen.insert(order) {
            warn!("{} {} 下存在重复的 order: {}", scope, id, order);
        }
    }
}

fn build_index(book: &Book) -> HashMap<NodeKey, NodePath> {
    let mut index = HashMap::new();
    for chapter in &book.chapters {
        index.insert(
            NodeKey::chapter(chapter.id),
            NodePath {
                chapter_id: chapter.id,
                section_id: None,
                subsection_id: None,
            },
        );
        for section in &chapter.sections {
            index.insert(
                NodeKey::section(section.id),
                NodePath {
                    chapter_id: chapter.id,
                    section_id: Some(section.id),
                    subsection_id: None,
                },
            );
            for sub in &section.subsections {
                index.insert(
                    NodeKey::subsection(sub.id),
                    NodePath {
                        chapter_id: chapter.id,
                        section_id: Some(section.id),
                        subsection_id: Some(sub.id),
                    },
                );
            }
        }
    }
    index
}
