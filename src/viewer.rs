//! 阅读视图会话
//!
//! 把文档树、锚点追踪、进度调度、进度写入和结构编辑组装在一起，
//! 对外层界面只暴露事件入口（滚动、编辑操作、关闭）。

use log::{debug, info, warn};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::anchor::{AnchorReading, AnchorTracker, ViewportMeasurer};
use crate::api::{BookApi, InsertPosition};
use crate::config::ViewerConfig;
use crate::content::{visible_char_count, ImageEntry};
use crate::editor::{CreateField, EditField, EditorSlot, StructureEditor};
use crate::error::{Result, ViewerError};
use crate::progress::{
    CheckOutcome, Clock, ProgressPersister, ProgressTicker, ReadingProgress,
    ReadingProgressScheduler, SchedulerState,
};
use crate::render::render_book;
use crate::tree::{DocumentTree, NodeKey};

/// 当前用户的权限
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Reader,
    /// 可以编辑结构
    Editor,
}

/// 打开时恢复的阅读位置
#[derive(Debug, Clone, PartialEq)]
pub struct RestoredPosition {
    pub progress: ReadingProgress,
    /// 保存的锚点仍在树中时才有值
    pub anchor: Option<NodeKey>,
}

/// 一本书的阅读视图
pub struct BookViewer<A: BookApi + ?Sized + 'static> {
    api: Arc<A>,
    config: ViewerConfig,
    capability: Capability,
    tree: DocumentTree,
    editor: StructureEditor,
    tracker: AnchorTracker,
    scheduler: Arc<Mutex<ReadingProgressScheduler>>,
    clock: Arc<dyn Clock>,
    persister: Arc<ProgressPersister<A>>,
    ticker: Option<ProgressTicker>,
    restored: Option<RestoredPosition>,
    last_reading: AnchorReading,
}

impl<A: BookApi + ?Sized + 'static> BookViewer<A> {
    /// 打开一本书
    ///
    /// # 参数
    /// - `api`: 后端接口
    /// - `book_id`: 书 id
    /// - `config`: 视图配置
    /// - `capability`: 当前用户权限
    /// - `clock`: 毫秒时钟
    ///
    /// # 返回
    /// 文档树加载失败时返回错误；读取已保存进度失败不影响打开
    pub async fn open(
        api: Arc<A>,
        book_id: i64,
        config: ViewerConfig,
        capability: Capability,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let book = api.fetch_structure(book_id).await?;
        let tree = DocumentTree::new(book);

        let persister = Arc::new(ProgressPersister::new(api.clone(), book_id));
        let restored = persister.restore().await.map(|progress| {
            let anchor = progress.anchor().filter(|key| tree.contains(*key));
            if anchor.is_none() && progress.anchor().is_some() {
                warn!("保存的锚点 {:?} 已不在书中", progress.anchor());
            }
            RestoredPosition { progress, anchor }
        });
        if let Some(position) = &restored {
            info!(
                "恢复阅读进度: book={} {}% anchor={:?}",
                book_id, position.progress.percentage, position.anchor
            );
        }

        Ok(Self {
            tracker: AnchorTracker::new(config.progress.anchor_threshold_px),
            scheduler: Arc::new(Mutex::new(ReadingProgressScheduler::new(
                config.progress.clone(),
            ))),
            api,
            config,
            capability,
            tree,
            editor: StructureEditor::new(),
            clock,
            persister,
            ticker: None,
            restored,
            last_reading: AnchorReading::none(),
        })
    }

    pub fn tree(&self) -> &DocumentTree {
        &self.tree
    }

    pub fn editor(&self) -> &StructureEditor {
        &self.editor
    }

    pub fn capability(&self) -> Capability {
        self.capability
    }

    pub fn restored(&self) -> Option<&RestoredPosition> {
        self.restored.as_ref()
    }

    pub fn last_reading(&self) -> &AnchorReading {
        &self.last_reading
    }

    pub fn render(&self) -> String {
        render_book(&self.tree)
    }

    pub fn scheduler_state(&self) -> SchedulerState {
        self.scheduler
            .lock()
            .map(|s| s.state().clone())
            .unwrap_or(SchedulerState::Idle)
    }

    /// 滚动或窗口大小变化
    ///
    /// 计算锚点并交给调度器，不做任何 I/O
    pub fn on_scroll(&mut self, measurer: &dyn ViewportMeasurer) -> AnchorReading {
        let reading = self.tracker.compute_anchor(&self.tree, measurer);
        self.last_reading = reading;

        if self.tree.is_empty() {
            return reading;
        }

        let anchor_chars = reading
            .anchor
            .map_or(0, |key| visible_char_count(self.tree.effective_content(key)));

        match self.scheduler.lock() {
            Ok(mut scheduler) => scheduler.record(&reading, anchor_chars, self.clock.now_ms()),
            Err(_) => warn!("进度调度器锁已损坏，忽略本次滚动"),
        }
        reading
    }

    /// 手动执行一次稳定性检查，稳定时写入进度
    pub async fn check_progress(&self) -> CheckOutcome {
        let outcome = match self.scheduler.lock() {
            Ok(mut scheduler) => scheduler.check(self.clock.now_ms()),
            Err(_) => return CheckOutcome::Idle,
        };
        if let CheckOutcome::Fire(snapshot) = &outcome {
            self.persister.write(snapshot).await;
        }
        outcome
    }

    /// 启动周期性检查，需要在 tokio 运行时中调用
    pub fn start_ticker(&mut self) {
        if self.ticker.as_ref().map_or(false, ProgressTicker::is_running) {
            return;
        }
        let interval = Duration::from_millis(self.config.progress.check_interval_ms.max(1));
        self.ticker = Some(ProgressTicker::spawn(
            self.scheduler.clone(),
            self.clock.clone(),
            self.persister.clone(),
            interval,
        ));
        debug!("进度检查已启动，周期 {:?}", interval);
    }

    pub fn is_ticking(&self) -> bool {
        self.ticker.as_ref().map_or(false, ProgressTicker::is_running)
    }

    /// 关闭视图：停止定时器，丢弃候选进度和所有草稿
    pub fn close(&mut self) {
        if let Some(ticker) = self.ticker.take() {
            ticker.stop();
        }
        if let Ok(mut scheduler) = self.scheduler.lock() {
            scheduler.reset();
        }
        self.editor.discard_all();
        debug!("阅读视图已关闭: book={}", self.tree.book_id());
    }

    fn require_editor(&self, action: &str) -> Result<()> {
        match self.capability {
            Capability::Editor => Ok(()),
            Capability::Reader => Err(ViewerError::Forbidden(action.to_string())),
        }
    }

    // 树被整体替换后，旧候选可能指向已删除的节点
    fn after_reload(&mut self) {
        if let Ok(mut scheduler) = self.scheduler.lock() {
            scheduler.reset();
        }
    }

    pub fn start_edit(&mut self, key: NodeKey) -> Result<()> {
        self.require_editor("编辑节点")?;
        self.editor.start(&self.tree, key)
    }

    pub fn change_field(&mut self, key: NodeKey, field: EditField) -> Result<()> {
        self.require_editor("编辑节点")?;
        self.editor.change_field(key, field)
    }

    pub fn cancel(&mut self, slot: EditorSlot) {
        self.editor.cancel(slot);
    }

    pub async fn save(&mut self, key: NodeKey) -> Result<()> {
        self.require_editor("保存节点")?;
        self.editor.save(&mut self.tree, &*self.api, key).await
    }

    pub fn start_create(&mut self, slot: EditorSlot) -> Result<()> {
        self.require_editor("新建节点")?;
        self.editor.start_create(&self.tree, slot)
    }

    pub fn change_create_field(&mut self, slot: EditorSlot, field: CreateField) -> Result<()> {
        self.require_editor("新建节点")?;
        self.editor.change_create_field(slot, field)
    }

    pub async fn save_create(&mut self, slot: EditorSlot) -> Result<()> {
        self.require_editor("新建节点")?;
        self.editor.save_create(&mut self.tree, &*self.api, slot).await?;
        self.after_reload();
        Ok(())
    }

    /// 新建章节的便捷入口
    pub async fn create_chapter(
        &mut self,
        title: &str,
        position: InsertPosition,
        after_id: Option<i64>,
    ) -> Result<()> {
        let slot = EditorSlot::NewChapter;
        self.start_create(slot)?;
        self.change_create_field(slot, CreateField::Title(title.to_string()))?;
        self.change_create_field(slot, CreateField::Position(position))?;
        self.change_create_field(slot, CreateField::AfterId(after_id))?;
        self.save_create(slot).await
    }

    pub async fn reorder_chapters(&mut self, dragged_id: i64, target_id: i64) -> Result<()> {
        self.require_editor("章节排序")?;
        let result = self
            .editor
            .reorder_chapters(&mut self.tree, &*self.api, dragged_id, target_id)
            .await;
        // 失败时编辑器同样会重新加载
        self.after_reload();
        result
    }

    pub async fn rename_book(&mut self, title: &str) -> Result<()> {
        self.require_editor("修改书名")?;
        self.editor.rename_book(&mut self.tree, &*self.api, title).await
    }

    pub async fn upload_image(
        &mut self,
        key: NodeKey,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImageEntry> {
        self.require_editor("上传图片")?;
        self.editor
            .upload_image(&*self.api, key, file_name, bytes)
            .await
    }
}
