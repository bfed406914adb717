use log::debug;

use crate::anchor::AnchorReading;
use crate::config::ProgressConfig;
use crate::progress::ProgressSnapshot;
use crate::tree::NodeKey;

/// 调度器状态
#[derive(Debug, Clone, PartialEq)]
pub enum SchedulerState {
    /// 没有待写入的进度
    Idle,
    /// 候选进度等待稳定，`armed_at` 是当前锚点开始停留的时刻
    Armed {
        candidate: ProgressSnapshot,
        armed_at: u64,
    },
}

/// 一次稳定性检查的结果
#[derive(Debug, Clone, PartialEq)]
pub enum CheckOutcome {
    Idle,
    /// 条件未满足，下个周期再检查
    Waiting {
        idle_remaining_ms: u64,
        dwell_remaining_ms: u64,
    },
    /// 进度已稳定，应写入
    Fire(ProgressSnapshot),
}

#[derive(Debug, Clone, Copy)]
struct TrackedAnchor {
    anchor: Option<NodeKey>,
    changed_at: u64,
    required_dwell_ms: u64,
}

/// 阅读进度调度器
///
/// 只在读者停止滚动足够久、并且在当前锚点上停留了足以读完一部分内容的时间后，
/// 才交出一次写入。新的滚动只更新候选和时间戳，旧候选直接被覆盖。
pub struct ReadingProgressScheduler {
    config: ProgressConfig,
    state: SchedulerState,
    tracked: Option<TrackedAnchor>,
    last_scroll_at: u64,
}

impl ReadingProgressScheduler {
    pub fn new(config: ProgressConfig) -> Self {
        Self {
            config,
            state: SchedulerState::Idle,
            tracked: None,
            last_scroll_at: 0,
        }
    }

    pub fn state(&self) -> &SchedulerState {
        &self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, SchedulerState::Armed { .. })
    }

    /// 估算读完给定字符数所需的毫秒数，限制在 [min_read_ms, max_read_ms]
    pub fn estimated_read_ms(&self, char_count: usize) -> u64 {
        let cps = self.config.chars_per_second;
        let raw = if cps > 0.0 {
            (char_count as f64 * 1000.0 / cps).ceil()
        } else {
            self.config.max_read_ms as f64
        };
        clamp_ms(raw, self.config.min_read_ms, self.config.max_read_ms)
    }

    /// 持久化前需要在锚点上停留的毫秒数
    pub fn required_dwell_ms(&self, char_count: usize) -> u64 {
        let estimated = self.estimated_read_ms(char_count) as f64;
        clamp_ms(
            (self.config.reading_ratio * estimated).round(),
            self.config.min_read_ms,
            self.config.max_read_ms,
        )
    }

    /// 记录一次锚点计算结果
    ///
    /// # 参数
    /// - `reading`: 锚点计算结果
    /// - `anchor_chars`: 锚点节点当前生效正文的可见字符数
    /// - `now`: 当前毫秒时间
    pub fn record(&mut self, reading: &AnchorReading, anchor_chars: usize, now: u64) {
        self.last_scroll_at = now;
        let required_dwell_ms = self.required_dwell_ms(anchor_chars);

        let tracked = match self.tracked {
            Some(mut tracked) if tracked.anchor == reading.anchor => {
                // 内容可能被编辑过，停留要求跟着当前内容走
                tracked.required_dwell_ms = required_dwell_ms;
                tracked
            }
            _ => {
                debug!(
                    "锚点变化: {:?} -> {:?}，需停留 {}ms",
                    self.tracked.and_then(|t| t.anchor),
                    reading.anchor,
                    required_dwell_ms
                );
                TrackedAnchor {
                    anchor: reading.anchor,
                    changed_at: now,
                    required_dwell_ms,
                }
            }
        };
        self.tracked = Some(tracked);

        self.state = SchedulerState::Armed {
            candidate: ProgressSnapshot::from_reading(reading),
            armed_at: tracked.changed_at,
        };
    }

    /// 周期性稳定性检查
    ///
    /// 空闲时间和停留时间都达标才返回 `Fire` 并回到 `Idle`
    pub fn check(&mut self, now: u64) -> CheckOutcome {
        let SchedulerState::Armed { candidate, armed_at } = &self.state else {
            return CheckOutcome::Idle;
        };
        let required_dwell_ms = self.tracked.map_or(0, |t| t.required_dwell_ms);

        let idle_elapsed = now.saturating_sub(self.last_scroll_at);
        let dwell_elapsed = now.saturating_sub(*armed_at);

        if idle_elapsed >= self.config.idle_ms && dwell_elapsed >= required_dwell_ms {
            let snapshot = *candidate;
            debug!(
                "进度稳定: anchor={:?} percentage={} 停留 {}ms",
                snapshot.anchor, snapshot.percentage, dwell_elapsed
            );
            self.state = SchedulerState::Idle;
            return CheckOutcome::Fire(snapshot);
        }

        CheckOutcome::Waiting {
            idle_remaining_ms: self.config.idle_ms.saturating_sub(idle_elapsed),
            dwell_remaining_ms: required_dwell_ms.saturating_sub(dwell_elapsed),
        }
    }

    /// 丢弃候选和锚点追踪，文档树重新加载或视图关闭时使用
    pub fn reset(&mut self) {
        self.state = SchedulerState::Idle;
        self.tracked = None;
    }
}

fn clamp_ms(value: f64, min: u64, max: u64) -> u64 {
    let max = max.max(min);
    if !value.is_finite() {
        return max;
    }
    (value.max(0.0) as u64).clamp(min, max)
}
