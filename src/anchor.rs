//! 阅读锚点追踪
//!
//! 每次滚动或节点高度变化时，根据视口几何找出读者当前所在的最细粒度节点。

use serde::{Deserialize, Serialize};

use crate::tree::{DocumentTree, NodeKey, NodeKind};

/// 视口滚动度量
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

/// 视口测量能力
///
/// 生产实现查询真实渲染表面，测试实现提供合成几何
pub trait ViewportMeasurer {
    /// 节点顶边相对视口顶部的位置，节点未渲染时返回 `None`
    fn node_top(&self, key: NodeKey) -> Option<f64>;

    fn scroll_metrics(&self) -> ScrollMetrics;
}

/// 锚点类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnchorType {
    Chapter,
    Section,
    Subsection,
    None,
}

impl From<NodeKind> for AnchorType {
    fn from(kind: NodeKind) -> Self {
        match kind {
            NodeKind::Chapter => AnchorType::Chapter,
            NodeKind::Section => AnchorType::Section,
            NodeKind::Subsection => AnchorType::Subsection,
        }
    }
}

/// 一次锚点计算的结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorReading {
    pub anchor_type: AnchorType,
    pub anchor: Option<NodeKey>,
    /// 0 ~ 100，保留两位小数
    pub scroll_percentage: f64,
    /// 原始滚动偏移（像素）
    pub scroll_top: f64,
}

impl AnchorReading {
    pub fn none() -> Self {
        Self {
            anchor_type: AnchorType::None,
            anchor: None,
            scroll_percentage: 0.0,
            scroll_top: 0.0,
        }
    }
}

// 从最细到最粗
const GRANULARITY: [NodeKind; 3] = [NodeKind::Subsection, NodeKind::Section, NodeKind::Chapter];

/// 锚点追踪器
pub struct AnchorTracker {
    /// 阅读线距视口顶部的像素距离
    threshold_px: f64,
}

impl AnchorTracker {
    pub fn new(threshold_px: f64) -> Self {
        Self { threshold_px }
    }

    pub fn threshold_px(&self) -> f64 {
        self.threshold_px
    }

    /// 计算当前锚点和滚动百分比
    ///
    /// # 参数
    /// - `tree`: 当前文档树
    /// - `measurer`: 视口测量实现
    ///
    /// # 返回
    /// 依次在小节、节、章中寻找顶边已越过阅读线的节点，
    /// 第一个有结果的层级决定锚点；都没有时锚点类型为 `None`
    pub fn compute_anchor(
        &self,
        tree: &DocumentTree,
        measurer: &dyn ViewportMeasurer,
    ) -> AnchorReading {
        if tree.is_empty() {
            return AnchorReading::none();
        }

        let metrics = measurer.scroll_metrics();
        let mut reading = AnchorReading {
            scroll_percentage: scroll_percentage(&metrics),
            scroll_top: metrics.scroll_top,
            ..AnchorReading::none()
        };

        for kind in GRANULARITY {
            if let Some(key) = self.last_passed(tree, measurer, kind) {
                reading.anchor_type = kind.into();
                reading.anchor = Some(key);
                break;
            }
        }

        reading
    }

    /// 某层级中顶边 <= 阅读线且最靠近阅读线的节点，相同位置取文档顺序靠后者
    fn last_passed(
        &self,
        tree: &DocumentTree,
        measurer: &dyn ViewportMeasurer,
        kind: NodeKind,
    ) -> Option<NodeKey> {
        let mut best: Option<(NodeKey, f64)> = None;

        for key in tree.nodes_of_kind(kind) {
            let Some(top) = measurer.node_top(key) else {
                continue;
            };
            if !top.is_finite() || top > self.threshold_px {
                continue;
            }
            if best.map_or(true, |(_, best_top)| top >= best_top) {
                best = Some((key, top));
            }
        }

        best.map(|(key, _)| key)
    }
}

/// 滚动百分比，限制在 [0, 100] 并保留两位小数
pub fn scroll_percentage(metrics: &ScrollMetrics) -> f64 {
    let scrollable = (metrics.scroll_height - metrics.client_height).max(1.0);
    let raw = metrics.scroll_top / scrollable * 100.0;
    if !raw.is_finite() {
        return 0.0;
    }
    round2(raw.clamp(0.0, 100.0))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
