use log::{debug, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::BookApi;
use crate::progress::{CheckOutcome, Clock, ProgressSnapshot, ReadingProgress, ReadingProgressScheduler};

/// 阅读进度的写入端
///
/// 写入是尽力而为的：失败只记日志，不重试，也不影响阅读
pub struct ProgressPersister<A: BookApi + ?Sized> {
    api: Arc<A>,
    book_id: i64,
}

impl<A: BookApi + ?Sized> ProgressPersister<A> {
    pub fn new(api: Arc<A>, book_id: i64) -> Self {
        Self { api, book_id }
    }

    /// 写入一次进度快照，返回是否成功
    pub async fn write(&self, snapshot: &ProgressSnapshot) -> bool {
        let progress = ReadingProgress::from_snapshot(snapshot);
        match self.api.save_progress(self.book_id, &progress).await {
            Ok(()) => {
                debug!(
                    "阅读进度已保存: book={} {}%",
                    self.book_id, progress.percentage
                );
                true
            }
            Err(e) => {
                warn!("保存阅读进度失败 (book_id: {}): {}", self.book_id, e);
                false
            }
        }
    }

    /// 打开书时读取上次的进度，失败时返回 `None`
    pub async fn restore(&self) -> Option<ReadingProgress> {
        match self.api.fetch_progress(self.book_id).await {
            Ok(progress) => progress,
            Err(e) => {
                warn!("读取阅读进度失败 (book_id: {}): {}", self.book_id, e);
                None
            }
        }
    }
}

/// 周期性执行稳定性检查的后台任务
///
/// 被丢弃或调用 `stop` 时取消定时器，视图销毁后不会再写入
pub struct ProgressTicker {
    handle: JoinHandle<()>,
}

impl ProgressTicker {
    /// 启动检查循环
    ///
    /// # 参数
    /// - `scheduler`: 与滚动处理共享的调度器
    /// - `clock`: 毫秒时钟
    /// - `persister`: 稳定后写入的目标
    /// - `interval`: 检查周期
    pub fn spawn<A>(
        scheduler: Arc<Mutex<ReadingProgressScheduler>>,
        clock: Arc<dyn Clock>,
        persister: Arc<ProgressPersister<A>>,
        interval: Duration,
    ) -> Self
    where
        A: BookApi + ?Sized + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let outcome = match scheduler.lock() {
                    Ok(mut scheduler) => scheduler.check(clock.now_ms()),
                    Err(_) => {
                        warn!("进度调度器锁已损坏，停止检查");
                        break;
                    }
                };

                if let CheckOutcome::Fire(snapshot) = outcome {
                    persister.write(&snapshot).await;
                }
            }
        });

        Self { handle }
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.handle.abort();
    }
}

impl Drop for ProgressTicker {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
