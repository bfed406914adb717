//! 整书阅读视图的核心引擎
//!
//! - `content`: 正文解析（段落、`<article>` 标注块、表格、关键词）
//! - `tree`: 书 → 章 → 节 → 小节的文档树
//! - `anchor`: 根据视口几何计算当前阅读锚点
//! - `progress`: 阅读进度调度与写入
//! - `editor`: 结构编辑
//! - `viewer`: 把以上部分组装成一个阅读会话

pub mod anchor;
pub mod api;
pub mod config;
pub mod content;
pub mod editor;
pub mod error;
pub mod progress;
pub mod render;
pub mod tree;
pub mod viewer;


// 重新导出主要类型
pub use anchor::{AnchorReading, AnchorTracker, AnchorType, ScrollMetrics, ViewportMeasurer};
pub use api::{BookApi, HttpBookApi};
pub use config::{ProgressConfig, ViewerConfig};
pub use content::{parse_blocks, parse_content, Block, ParsedContent};
pub use editor::{EditState, EditorSlot, StructureEditor};
pub use error::{Result, ViewerError};
pub use progress::{Clock, ManualClock, ReadingProgress, ReadingProgressScheduler, SystemClock};
pub use render::render_book;
pub use tree::{DocumentTree, NodeKey, NodeKind};
pub use viewer::{BookViewer, Capability};
