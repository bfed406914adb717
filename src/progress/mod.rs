//! 阅读进度：传输格式、快照、时钟

use chrono::Utc;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::anchor::{round2, AnchorReading, AnchorType};
use crate::tree::{NodeKey, NodeKind};

pub mod persister;
pub mod scheduler;

pub use persister::{ProgressPersister, ProgressTicker};
pub use scheduler::{CheckOutcome, ReadingProgressScheduler, SchedulerState};

/// 每个（读者，书）一条的阅读进度
///
/// 三个锚点字段互斥，最多只有一个有值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReadingProgress {
    #[serde(default, deserialize_with = "lenient_f64")]
    pub percentage: f64,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub position_in_text: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsection_id: Option<i64>,
}

impl ReadingProgress {
    pub fn from_snapshot(snapshot: &ProgressSnapshot) -> Self {
        let mut progress = Self {
            percentage: round2(snapshot.percentage.clamp(0.0, 100.0)),
            position_in_text: snapshot.position_in_text,
            ..Self::default()
        };
        progress.set_anchor(snapshot.anchor);
        progress
    }

    /// 设置锚点，同时清空其余两个字段
    pub fn set_anchor(&mut self, anchor: Option<NodeKey>) {
        self.chapter_id = None;
        self.section_id = None;
        self.subsection_id = None;
        match anchor {
            Some(NodeKey { kind: NodeKind::Chapter, id }) => self.chapter_id = Some(id),
            Some(NodeKey { kind: NodeKind::Section, id }) => self.section_id = Some(id),
            Some(NodeKey { kind: NodeKind::Subsection, id }) => self.subsection_id = Some(id),
            None => {}
        }
    }

    /// 最细粒度的锚点；服务器数据若同时给出多个字段，取最细的一个
    pub fn anchor(&self) -> Option<NodeKey> {
        self.subsection_id
            .map(NodeKey::subsection)
            .or_else(|| self.section_id.map(NodeKey::section))
            .or_else(|| self.chapter_id.map(NodeKey::chapter))
    }
}

/// 待持久化的候选进度
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSnapshot {
    pub percentage: f64,
    pub position_in_text: i64,
    pub anchor: Option<NodeKey>,
}

impl ProgressSnapshot {
    pub fn from_reading(reading: &AnchorReading) -> Self {
        Self {
            percentage: reading.scroll_percentage,
            position_in_text: reading.scroll_top.max(0.0).round() as i64,
            anchor: reading.anchor,
        }
    }

    pub fn anchor_type(&self) -> AnchorType {
        self.anchor.map_or(AnchorType::None, |k| k.kind.into())
    }
}

/// 毫秒时钟
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// 墙上时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }
}

/// 手动推进的时钟，用于模拟时间
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ms)),
        }
    }

    pub fn set(&self, ms: u64) {
        self.now.store(ms, Ordering::SeqCst);
    }

    pub fn advance(&self, ms: u64) {
        self.now.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

// Django 的 DecimalField 会序列化成字符串
fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    })
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}
