use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

use crate::content::table::{images_from_value, tables_from_value};
use crate::content::{ImageEntry, TableDescriptor};

/// 节点层级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Chapter,
    Section,
    Subsection,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Chapter => "chapter",
            NodeKind::Section => "section",
            NodeKind::Subsection => "subsection",
        }
    }
}

/// 树中节点的唯一键
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NodeKey {
    pub kind: NodeKind,
    pub id: i64,
}

impl NodeKey {
    pub fn chapter(id: i64) -> Self {
        Self { kind: NodeKind::Chapter, id }
    }

    pub fn section(id: i64) -> Self {
        Self { kind: NodeKind::Section, id }
    }

    pub fn subsection(id: i64) -> Self {
        Self { kind: NodeKind::Subsection, id }
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

/// 节点在树中的位置，用于拼接 API 路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodePath {
    pub chapter_id: i64,
    pub section_id: Option<i64>,
    pub subsection_id: Option<i64>,
}

impl NodePath {
    pub fn key(&self) -> NodeKey {
        match (self.section_id, self.subsection_id) {
            (Some(_), Some(sub)) => NodeKey::subsection(sub),
            (Some(section), None) => NodeKey::section(section),
            _ => NodeKey::chapter(self.chapter_id),
        }
    }
}

/// 章节分组标签
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Thematique {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Subsection {
    pub id: i64,
    #[serde(default)]
    pub order: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_images")]
    pub images: Vec<ImageEntry>,
    #[serde(default, deserialize_with = "lenient_tables")]
    pub tables: Vec<TableDescriptor>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    pub id: i64,
    #[serde(default)]
    pub order: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_images")]
    pub images: Vec<ImageEntry>,
    #[serde(default, deserialize_with = "lenient_tables")]
    pub tables: Vec<TableDescriptor>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub subsections: Vec<Subsection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Chapter {
    pub id: i64,
    #[serde(default)]
    pub order: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub is_intro: bool,
    #[serde(default, deserialize_with = "lenient_text")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_images")]
    pub images: Vec<ImageEntry>,
    #[serde(default, deserialize_with = "lenient_tables")]
    pub tables: Vec<TableDescriptor>,
    #[serde(default, deserialize_with = "lenient_thematique")]
    pub thematique: Option<Thematique>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub sections: Vec<Section>,
}

/// `export_structure` 返回的整本书
#[derive(Debug, Clone, Deserialize)]
pub struct Book {
    pub id: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub description: Option<String>,
    #[serde(default, alias = "cover_image", deserialize_with = "lenient_text")]
    pub cover: Option<String>,
    #[serde(default, deserialize_with = "lenient_list")]
    pub chapters: Vec<Chapter>,
}

/// 对树中任意节点的只读引用
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Chapter(&'a Chapter),
    Section(&'a Section),
    Subsection(&'a Subsection),
}

impl<'a> NodeRef<'a> {
    pub fn key(&self) -> NodeKey {
        match self {
            NodeRef::Chapter(c) => NodeKey::chapter(c.id),
            NodeRef::Section(s) => NodeKey::section(s.id),
            NodeRef::Subsection(s) => NodeKey::subsection(s.id),
        }
    }

    pub fn title(&self) -> &'a str {
        match self {
            NodeRef::Chapter(c) => &c.title,
            NodeRef::Section(s) => &s.title,
            NodeRef::Subsection(s) => &s.title,
        }
    }

    pub fn order(&self) -> i64 {
        match self {
            NodeRef::Chapter(c) => c.order,
            NodeRef::Section(s) => s.order,
            NodeRef::Subsection(s) => s.order,
        }
    }

    pub fn content(&self) -> Option<&'a str> {
        match self {
            NodeRef::Chapter(c) => c.content.as_deref(),
            NodeRef::Section(s) => s.content.as_deref(),
            NodeRef::Subsection(s) => s.content.as_deref(),
        }
    }

    pub fn images(&self) -> &'a [ImageEntry] {
        match self {
            NodeRef::Chapter(c) => &c.images,
            NodeRef::Section(s) => &s.images,
            NodeRef::Subsection(s) => &s.images,
        }
    }

    pub fn tables(&self) -> &'a [TableDescriptor] {
        match self {
            NodeRef::Chapter(c) => &c.tables,
            NodeRef::Section(s) => &s.tables,
            NodeRef::Subsection(s) => &s.tables,
        }
    }

    /// 只有章节带有 `is_intro` 标记
    pub fn is_intro(&self) -> bool {
        matches!(self, NodeRef::Chapter(c) if c.is_intro)
    }
}

// ==================== 宽松反序列化 ====================
// 服务器数据可能缺字段或类型不对，这些字段统一降级为空值

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        _ => None,
    })
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(lenient_text(deserializer)?.unwrap_or_default())
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(matches!(Value::deserialize(deserializer)?, Value::Bool(true)))
}

fn lenient_images<'de, D>(deserializer: D) -> Result<Vec<ImageEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(images_from_value(&Value::deserialize(deserializer)?))
}

fn lenient_tables<'de, D>(deserializer: D) -> Result<Vec<TableDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(tables_from_value(&Value::deserialize(deserializer)?))
}

fn lenient_thematique<'de, D>(deserializer: D) -> Result<Option<Thematique>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(serde_json::from_value(value).ok())
}

fn lenient_list<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: serde::de::DeserializeOwned,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| serde_json::from_value(item).ok())
            .collect(),
        _ => Vec::new(),
    })
}
