//! 结构编辑：节点内容编辑、新建节点、章节拖拽排序
//!
//! 每个编辑位置（已有节点或"新建"占位）在 `StructureEditor` 里有一个状态，
//! 草稿只保存在内存中，保存成功后才写入文档树的覆盖值。

use log::{debug, error, info};
use std::collections::HashMap;

use crate::api::{BookApi, CreateNodeRequest, InsertPosition, NodeUpdate, ParentScope};
use crate::content::table::{images_from_json_str, tables_from_json_str};
use crate::content::{ImageEntry, TableDescriptor, TableGrid};
use crate::error::{Result, ViewerError};
use crate::tree::{DocumentTree, NodeKey, NodeKind, NodeOverride, NodePath};

/// 编辑位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EditorSlot {
    /// 已有节点
    Node(NodeKey),
    NewChapter,
    NewSection { chapter_id: i64 },
    NewSubsection { chapter_id: i64, section_id: i64 },
}

impl EditorSlot {
    fn parent_scope(&self) -> Option<ParentScope> {
        match *self {
            EditorSlot::Node(_) => None,
            EditorSlot::NewChapter => Some(ParentScope::Book),
            EditorSlot::NewSection { chapter_id } => Some(ParentScope::Chapter(chapter_id)),
            EditorSlot::NewSubsection {
                chapter_id,
                section_id,
            } => Some(ParentScope::Section {
                chapter_id,
                section_id,
            }),
        }
    }

    fn describe(&self) -> String {
        match self {
            EditorSlot::Node(key) => key.to_string(),
            EditorSlot::NewChapter => "new-chapter".to_string(),
            EditorSlot::NewSection { chapter_id } => format!("new-section@chapter:{}", chapter_id),
            EditorSlot::NewSubsection { section_id, .. } => {
                format!("new-subsection@section:{}", section_id)
            }
        }
    }
}

/// 已有节点的编辑草稿
#[derive(Debug, Clone, PartialEq)]
pub struct EditDraft {
    pub content: String,
    pub images: Vec<ImageEntry>,
    pub tables: Vec<TableDescriptor>,
    /// 只有章节有此字段
    pub is_intro: Option<bool>,
}

/// 新建节点的草稿
#[derive(Debug, Clone, PartialEq)]
pub struct CreateDraft {
    pub title: String,
    pub content: String,
    pub position: InsertPosition,
    pub after_id: Option<i64>,
}

impl Default for CreateDraft {
    fn default() -> Self {
        Self {
            title: String::new(),
            content: String::new(),
            position: InsertPosition::Last,
            after_id: None,
        }
    }
}

/// 编辑位置的状态
#[derive(Debug, Clone, PartialEq)]
pub enum EditState {
    Closed,
    Editing(EditDraft),
    Creating(CreateDraft),
}

/// 对编辑草稿的一次修改
#[derive(Debug, Clone, PartialEq)]
pub enum EditField {
    Content(String),
    IsIntro(bool),
    AddImage(ImageEntry),
    RemoveImage(usize),
    ImageCaption { index: usize, caption: String },
    /// 粘贴的 JSON 图片列表，格式错误时清空
    ImagesJson(String),
    AddTable { rows: usize, columns: usize },
    AddSnapshotTable { url: String, title: Option<String> },
    RemoveTable(usize),
    TableTitle { table: usize, title: String },
    TableCell { table: usize, row: usize, column: usize, value: String },
    TableSize { table: usize, rows: usize, columns: usize },
    /// 粘贴的 JSON 表格列表，格式错误时清空
    TablesJson(String),
}

/// 对新建草稿的一次修改
#[derive(Debug, Clone, PartialEq)]
pub enum CreateField {
    Title(String),
    Content(String),
    Position(InsertPosition),
    AfterId(Option<i64>),
}

static CLOSED: EditState = EditState::Closed;

/// 结构编辑器
#[derive(Debug, Default)]
pub struct StructureEditor {
    slots: HashMap<EditorSlot, EditState>,
}

impl StructureEditor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, slot: EditorSlot) -> &EditState {
        self.slots.get(&slot).unwrap_or(&CLOSED)
    }

    pub fn is_editing(&self, key: NodeKey) -> bool {
        matches!(self.state(EditorSlot::Node(key)), EditState::Editing(_))
    }

    /// 打开中的编辑位置数量
    pub fn open_count(&self) -> usize {
        self.slots.len()
    }

    /// 开始编辑节点，草稿取覆盖值或原值
    pub fn start(&mut self, tree: &DocumentTree, key: NodeKey) -> Result<()> {
        let node = tree
            .node(key)
            .ok_or_else(|| ViewerError::NotFound(key.to_string()))?;

        let mut tables = tree.effective_tables(key).to_vec();
        for table in &mut tables {
            if let TableDescriptor::Grid(grid) = table {
                grid.normalize();
            }
        }

        let draft = EditDraft {
            content: tree.effective_content(key).unwrap_or_default().to_string(),
            images: tree.effective_images(key).to_vec(),
            tables,
            is_intro: (key.kind == NodeKind::Chapter).then(|| tree.effective_is_intro(&node)),
        };

        debug!("开始编辑 {}", key);
        self.slots.insert(EditorSlot::Node(key), EditState::Editing(draft));
        Ok(())
    }

    fn draft_mut(&mut self, key: NodeKey) -> Result<&mut EditDraft> {
        match self.slots.get_mut(&EditorSlot::Node(key)) {
            Some(EditState::Editing(draft)) => Ok(draft),
            _ => Err(ViewerError::NotEditing(key.to_string())),
        }
    }

    /// 修改草稿中的一个字段，只影响内存
    pub fn change_field(&mut self, key: NodeKey, field: EditField) -> Result<()> {
        let draft = self.draft_mut(key)?;

        match field {
            EditField::Content(content) => draft.content = content,
            EditField::IsIntro(is_intro) => {
                if key.kind != NodeKind::Chapter {
                    return Err(ViewerError::InvalidDraft(format!(
                        "{} 没有 is_intro 字段",
                        key
                    )));
                }
                draft.is_intro = Some(is_intro);
            }
            EditField::AddImage(image) => draft.images.push(image),
            EditField::RemoveImage(index) => {
                check_index(index, draft.images.len(), "图片")?;
                draft.images.remove(index);
            }
            EditField::ImageCaption { index, caption } => {
                check_index(index, draft.images.len(), "图片")?;
                draft.images[index].caption = if caption.is_empty() { None } else { Some(caption) };
            }
            EditField::ImagesJson(json) => draft.images = images_from_json_str(&json),
            EditField::AddTable { rows, columns } => {
                draft
                    .tables
                    .push(TableDescriptor::Grid(TableGrid::blank(rows.max(1), columns.max(1))));
            }
            EditField::AddSnapshotTable { url, title } => {
                draft.tables.push(TableDescriptor::Snapshot { title, url });
            }
            EditField::RemoveTable(index) => {
                check_index(index, draft.tables.len(), "表格")?;
                draft.tables.remove(index);
            }
            EditField::TableTitle { table, title } => {
                check_index(table, draft.tables.len(), "表格")?;
                let title = if title.is_empty() { None } else { Some(title) };
                match &mut draft.tables[table] {
                    TableDescriptor::Snapshot { title: t, .. } => *t = title,
                    TableDescriptor::Grid(grid) => grid.title = title,
                }
            }
            EditField::TableCell {
                table,
                row,
                column,
                value,
            } => {
                // 单元格以 `|` 分隔、行以换行分隔
                if value.contains(['|', '\n', '\r']) {
                    return Err(ViewerError::InvalidDraft(format!(
                        "单元格不能包含 | 或换行: {:?}",
                        value
                    )));
                }
                grid_mut(draft, table)?.set_cell(row, column, value)
            }
            EditField::TableSize {
                table,
                rows,
                columns,
            } => grid_mut(draft, table)?.resize(rows, columns),
            EditField::TablesJson(json) => {
                let mut tables = tables_from_json_str(&json);
                for table in &mut tables {
                    if let TableDescriptor::Grid(grid) = table {
                        grid.normalize();
                    }
                }
                draft.tables = tables;
            }
        }

        Ok(())
    }

    /// 放弃编辑或新建草稿，不修改文档树
    pub fn cancel(&mut self, slot: EditorSlot) {
        if self.slots.remove(&slot).is_some() {
            debug!("取消编辑 {}", slot.describe());
        }
    }

    /// 文档树重新加载后丢弃全部草稿
    pub fn discard_all(&mut self) {
        if !self.slots.is_empty() {
            debug!("文档树已重新加载，丢弃 {} 个草稿", self.slots.len());
        }
        self.slots.clear();
    }

    /// 保存节点编辑
    ///
    /// 表格在这里序列化为文本形式；成功后草稿成为节点的覆盖值并退出编辑，
    /// 失败时草稿保持打开以便重试
    pub async fn save<A>(&mut self, tree: &mut DocumentTree, api: &A, key: NodeKey) -> Result<()>
    where
        A: BookApi + ?Sized,
    {
        let draft = match self.state(EditorSlot::Node(key)) {
            EditState::Editing(draft) => draft.clone(),
            _ => return Err(ViewerError::NotEditing(key.to_string())),
        };
        let path = tree
            .path_of(key)
            .ok_or_else(|| ViewerError::NotFound(key.to_string()))?;

        let mut tables = draft.tables.clone();
        for table in &mut tables {
            if let TableDescriptor::Grid(grid) = table {
                grid.normalize();
            }
        }

        let update = NodeUpdate {
            content: Some(draft.content.clone()),
            images: Some(draft.images.clone()),
            tables: Some(tables.iter().map(TableDescriptor::to_wire).collect()),
            is_intro: draft.is_intro,
            order: None,
        };

        if let Err(e) = api.update_node(tree.book_id(), path, &update).await {
            error!("保存 {} 失败: {}", key, e);
            return Err(e);
        }

        tree.commit_override(
            key,
            NodeOverride {
                content: Some(draft.content),
                images: Some(draft.images),
                tables: Some(tables),
                is_intro: draft.is_intro,
            },
        )?;
        self.slots.remove(&EditorSlot::Node(key));
        info!("已保存 {}", key);
        Ok(())
    }

    /// 打开新建草稿
    pub fn start_create(&mut self, tree: &DocumentTree, slot: EditorSlot) -> Result<()> {
        match slot {
            EditorSlot::Node(key) => {
                return Err(ViewerError::InvalidDraft(format!("{} 不是新建位置", key)));
            }
            EditorSlot::NewChapter => {}
            EditorSlot::NewSection { chapter_id } => {
                tree.chapter(chapter_id)
                    .ok_or_else(|| ViewerError::NotFound(NodeKey::chapter(chapter_id).to_string()))?;
            }
            EditorSlot::NewSubsection {
                chapter_id,
                section_id,
            } => {
                tree.section(chapter_id, section_id)
                    .ok_or_else(|| ViewerError::NotFound(NodeKey::section(section_id).to_string()))?;
            }
        }

        self.slots
            .insert(slot, EditState::Creating(CreateDraft::default()));
        Ok(())
    }

    pub fn change_create_field(&mut self, slot: EditorSlot, field: CreateField) -> Result<()> {
        let draft = match self.slots.get_mut(&slot) {
            Some(EditState::Creating(draft)) => draft,
            _ => return Err(ViewerError::NotEditing(slot.describe())),
        };

        match field {
            CreateField::Title(title) => draft.title = title,
            CreateField::Content(content) => draft.content = content,
            CreateField::Position(position) => draft.position = position,
            CreateField::AfterId(after_id) => draft.after_id = after_id,
        }
        Ok(())
    }

    /// 提交新建请求，成功后重新加载整棵树
    ///
    /// 新节点的 `order` 由服务器决定，所以不在本地插入
    pub async fn save_create<A>(
        &mut self,
        tree: &mut DocumentTree,
        api: &A,
        slot: EditorSlot,
    ) -> Result<()>
    where
        A: BookApi + ?Sized,
    {
        let draft = match self.state(slot) {
            EditState::Creating(draft) => draft.clone(),
            _ => return Err(ViewerError::NotEditing(slot.describe())),
        };
        let parent = slot
            .parent_scope()
            .ok_or_else(|| ViewerError::InvalidDraft(slot.describe()))?;

        if draft.title.trim().is_empty() {
            return Err(ViewerError::InvalidDraft("标题不能为空".to_string()));
        }

        let after_id = match draft.position {
            InsertPosition::After => {
                let after_id = draft
                    .after_id
                    .ok_or_else(|| ViewerError::InvalidDraft("position=after 需要 after_id".to_string()))?;
                if !sibling_exists(tree, parent, after_id) {
                    return Err(ViewerError::InvalidDraft(format!(
                        "after_id {} 不是同级节点",
                        after_id
                    )));
                }
                Some(after_id)
            }
            _ => None,
        };

        let request = CreateNodeRequest {
            title: draft.title.trim().to_string(),
            content: draft.content,
            position: draft.position,
            after_id,
        };

        if let Err(e) = api.create_node(tree.book_id(), parent, &request).await {
            error!("创建 {} 失败: {}", slot.describe(), e);
            return Err(e);
        }
        info!("已创建 {} \"{}\"", slot.describe(), request.title);

        self.slots.remove(&slot);
        self.reload(tree, api).await
    }

    /// 章节拖拽排序：把 `dragged_id` 移到 `target_id` 的位置，再整体重新编号
    ///
    /// 成功或中途失败都会重新加载文档树
    pub async fn reorder_chapters<A>(
        &mut self,
        tree: &mut DocumentTree,
        api: &A,
        dragged_id: i64,
        target_id: i64,
    ) -> Result<()>
    where
        A: BookApi + ?Sized,
    {
        let current: Vec<(i64, i64)> = tree.chapters().iter().map(|c| (c.id, c.order)).collect();
        let writes = plan_reorder(&current, dragged_id, target_id)?;
        if writes.is_empty() {
            return Ok(());
        }

        for (chapter_id, order) in &writes {
            let path = NodePath {
                chapter_id: *chapter_id,
                section_id: None,
                subsection_id: None,
            };
            if let Err(e) = api
                .update_node(tree.book_id(), path, &NodeUpdate::order(*order))
                .await
            {
                error!("章节排序失败 (chapter {} -> order {}): {}", chapter_id, order, e);
                // 已成功的写入留在服务器上，本地 order 要与之一致
                let _ = self.reload(tree, api).await;
                return Err(e);
            }
        }
        info!("章节排序完成，更新了 {} 个章节", writes.len());

        self.reload(tree, api).await
    }

    /// 修改书名
    pub async fn rename_book<A>(&self, tree: &mut DocumentTree, api: &A, title: &str) -> Result<()>
    where
        A: BookApi + ?Sized,
    {
        let title = title.trim();
        if title.is_empty() {
            return Err(ViewerError::InvalidDraft("书名不能为空".to_string()));
        }
        if let Err(e) = api.update_book_title(tree.book_id(), title).await {
            error!("修改书名失败: {}", e);
            return Err(e);
        }
        tree.set_book_title(title.to_string());
        Ok(())
    }

    /// 上传图片并追加到正在编辑的草稿
    pub async fn upload_image<A>(
        &mut self,
        api: &A,
        key: NodeKey,
        file_name: &str,
        bytes: Vec<u8>,
    ) -> Result<ImageEntry>
    where
        A: BookApi + ?Sized,
    {
        self.draft_mut(key)?;
        let image = match api.upload_image(file_name, bytes).await {
            Ok(image) => image,
            Err(e) => {
                error!("上传图片 {} 失败: {}", file_name, e);
                return Err(e);
            }
        };
        // 上传期间草稿可能已被取消
        self.draft_mut(key)?.images.push(image.clone());
        Ok(image)
    }

    async fn reload<A>(&mut self, tree: &mut DocumentTree, api: &A) -> Result<()>
    where
        A: BookApi + ?Sized,
    {
        match api.fetch_structure(tree.book_id()).await {
            Ok(book) => {
                tree.replace(book);
                self.discard_all();
                Ok(())
            }
            Err(e) => {
                error!("重新加载文档树失败: {}", e);
                Err(e)
            }
        }
    }
}

fn check_index(index: usize, len: usize, what: &str) -> Result<()> {
    if index < len {
        Ok(())
    } else {
        Err(ViewerError::InvalidDraft(format!(
            "{}下标 {} 越界（共 {} 个）",
            what, index, len
        )))
    }
}

fn grid_mut(draft: &mut EditDraft, table: usize) -> Result<&mut TableGrid> {
    check_index(table, draft.tables.len(), "表格")?;
    match &mut draft.tables[table] {
        TableDescriptor::Grid(grid) => Ok(grid),
        TableDescriptor::Snapshot { .. } => Err(ViewerError::InvalidDraft(format!(
            "表格 {} 是截图，不能编辑单元格",
            table
        ))),
    }
}

fn sibling_exists(tree: &DocumentTree, parent: ParentScope, id: i64) -> bool {
    match parent {
        ParentScope::Book => tree.chapter(id).is_some(),
        ParentScope::Chapter(chapter_id) => tree.section(chapter_id, id).is_some(),
        ParentScope::Section {
            chapter_id,
            section_id,
        } => tree
            .section(chapter_id, section_id)
            .map_or(false, |s| s.subsections.iter().any(|sub| sub.id == id)),
    }
}

/// 计算拖拽后需要写入的 (chapter_id, 新 order)
///
/// 按当前 order 排序后把拖动的章节放到目标章节的下标，每个章节的新 order 即其下标；
/// 已经等于下标的章节不需要写入
pub fn plan_reorder(current: &[(i64, i64)], dragged_id: i64, target_id: i64) -> Result<Vec<(i64, i64)>> {
    let mut chapters = current.to_vec();
    chapters.sort_by_key(|&(_, order)| order);

    let from = chapters
        .iter()
        .position(|&(id, _)| id == dragged_id)
        .ok_or_else(|| ViewerError::NotFound(NodeKey::chapter(dragged_id).to_string()))?;
    let to = chapters
        .iter()
        .position(|&(id, _)| id == target_id)
        .ok_or_else(|| ViewerError::NotFound(NodeKey::chapter(target_id).to_string()))?;

    let moved = chapters.remove(from);
    chapters.insert(to, moved);

    Ok(chapters
        .into_iter()
        .enumerate()
        .filter(|&(index, (_, order))| order != index as i64)
        .map(|(index, (id, _))| (id, index as i64))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::testing::{ApiCall, FakeBookApi};
    use crate::tree::tests::sample_tree;
    use serde_json::json;

    fn api_for(tree: &DocumentTree) -> FakeBookApi {
        // 服务器端的结构与本地一致
        let chapters: Vec<_> = tree
            .chapters()
            .iter()
            .map(|c| json!({"id": c.id, "order": c.order, "title": c.title, "is_intro": c.is_intro}))
            .collect();
        FakeBookApi::new(json!({"id": tree.book_id(), "title": "Physique", "chapters": chapters}))
    }

    #[test]
    fn test_start_seeds_from_effective_values() {
        let mut tree = sample_tree();
        let key = NodeKey::chapter(11);
        tree.commit_override(
            key,
            NodeOverride {
                content: Some("Déjà modifié".to_string()),
                ..NodeOverride::default()
            },
        )
        .unwrap();

        let mut editor = StructureEditor::new();
        editor.start(&tree, key).unwrap();
        match editor.state(EditorSlot::Node(key)) {
            EditState::Editing(draft) => {
                assert_eq!(draft.content, "Déjà modifié");
                assert_eq!(draft.is_intro, Some(false));
            }
            other => panic!("unexpected {:?}", other),
        }

        editor.start(&tree, NodeKey::section(30)).unwrap();
        assert!(editor.is_editing(NodeKey::section(30)));
        assert!(matches!(
            editor.start(&tree, NodeKey::section(999)),
            Err(ViewerError::NotFound(_))
        ));
    }

    #[test]
    fn test_change_field_requires_editing() {
        let mut editor = StructureEditor::new();
        let result = editor.change_field(NodeKey::chapter(11), EditField::Content("x".into()));
        assert!(matches!(result, Err(ViewerError::NotEditing(_))));
    }

    #[test]
    fn test_table_edits_and_json_fallback() {
        let tree = sample_tree();
        let key = NodeKey::section(30);
        let mut editor = StructureEditor::new();
        editor.start(&tree, key).unwrap();

        editor
            .change_field(key, EditField::AddTable { rows: 1, columns: 2 })
            .unwrap();
        editor
            .change_field(
                key,
                EditField::TableCell {
                    table: 0,
                    row: 1,
                    column: 0,
                    value: "c".into(),
                },
            )
            .unwrap();
        editor
            .change_field(key, EditField::IsIntro(true))
            .unwrap_err();

        match editor.state(EditorSlot::Node(key)) {
            EditState::Editing(draft) => match &draft.tables[0] {
                TableDescriptor::Grid(grid) => {
                    assert_eq!(grid.rows, 2);
                    assert_eq!(grid.grid[1], vec!["c", ""]);
                }
                other => panic!("unexpected {:?}", other),
            },
            other => panic!("unexpected {:?}", other),
        }

        editor
            .change_field(key, EditField::TablesJson("[{\"content\": ".into()))
            .unwrap();
        editor
            .change_field(key, EditField::ImagesJson("not json".into()))
            .unwrap();
        match editor.state(EditorSlot::Node(key)) {
            EditState::Editing(draft) => {
                assert!(draft.tables.is_empty());
                assert!(draft.images.is_empty());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_save_commits_override() {
        let mut tree = sample_tree();
        let api = api_for(&tree);
        let key = NodeKey::subsection(51);
        let mut editor = StructureEditor::new();

        editor.start(&tree, key).unwrap();
        editor
            .change_field(key, EditField::Content("Intro.\n\n<article>Attention</article>".into()))
            .unwrap();
        editor
            .change_field(
                key,
                EditField::AddImage(ImageEntry {
                    url: "/m/a.png".into(),
                    caption: Some("Schéma".into()),
                }),
            )
            .unwrap();
        editor
            .change_field(key, EditField::AddTable { rows: 2, columns: 2 })
            .unwrap();

        editor.save(&mut tree, &api, key).await.unwrap();

        assert!(!editor.is_editing(key));
        assert_eq!(
            tree.effective_content(key),
            Some("Intro.\n\n<article>Attention</article>")
        );
        assert_eq!(tree.effective_images(key).len(), 1);

        let calls = api.calls();
        match &calls[0] {
            ApiCall::UpdateNode(url, update) => {
                assert_eq!(url, "/books/7/chapters/12/sections/31/subsections/51/");
                assert_eq!(update.is_intro, None);
                let tables = update.tables.as_ref().unwrap();
                assert_eq!(
                    tables[0].content,
                    Some(crate::content::table::TableContent::Text(" | \n | ".into()))
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_failed_save_keeps_draft() {
        let mut tree = sample_tree();
        let api = api_for(&tree);
        api.fail_writes(true);
        let key = NodeKey::chapter(11);
        let mut editor = StructureEditor::new();

        editor.start(&tree, key).unwrap();
        editor
            .change_field(key, EditField::Content("Brouillon".into()))
            .unwrap();

        assert!(editor.save(&mut tree, &api, key).await.is_err());
        assert!(editor.is_editing(key));
        assert!(tree.override_of(key).is_none());
        assert_eq!(tree.effective_content(key), Some("F = ma"));
    }

    #[tokio::test]
    async fn test_cancel_discards_draft() {
        let tree = sample_tree();
        let key = NodeKey::chapter(12);
        let mut editor = StructureEditor::new();
        editor.start(&tree, key).unwrap();
        editor
            .change_field(key, EditField::Content("jeté".into()))
            .unwrap();
        editor.cancel(EditorSlot::Node(key));

        assert_eq!(editor.state(EditorSlot::Node(key)), &EditState::Closed);
        assert_eq!(tree.effective_content(key), Some("Les ondes."));
    }

    #[tokio::test]
    async fn test_create_after_reloads_tree() {
        let mut tree = sample_tree();
        let api = api_for(&tree);
        let mut editor = StructureEditor::new();

        editor.start_create(&tree, EditorSlot::NewChapter).unwrap();
        editor
            .change_create_field(EditorSlot::NewChapter, CreateField::Title("Énergie".into()))
            .unwrap();
        editor
            .change_create_field(
                EditorSlot::NewChapter,
                CreateField::Position(InsertPosition::After),
            )
            .unwrap();

        // after_id 缺失
        assert!(matches!(
            editor.save_create(&mut tree, &api, EditorSlot::NewChapter).await,
            Err(ViewerError::InvalidDraft(_))
        ));

        editor
            .change_create_field(EditorSlot::NewChapter, CreateField::AfterId(Some(404)))
            .unwrap();
        assert!(matches!(
            editor.save_create(&mut tree, &api, EditorSlot::NewChapter).await,
            Err(ViewerError::InvalidDraft(_))
        ));
        assert!(api.calls().is_empty());

        editor
            .change_create_field(EditorSlot::NewChapter, CreateField::AfterId(Some(11)))
            .unwrap();
        editor
            .save_create(&mut tree, &api, EditorSlot::NewChapter)
            .await
            .unwrap();

        let titles: Vec<&str> = tree.chapters().iter().map(|c| c.title.as_str()).collect();
        assert_eq!(titles, vec!["Introduction", "Forces", "Énergie", "Ondes"]);
        assert_eq!(editor.state(EditorSlot::NewChapter), &EditState::Closed);
        assert!(matches!(api.calls()[0], ApiCall::CreateNode(ref url, _) if url == "/books/7/chapters/"));
    }

    #[tokio::test]
    async fn test_create_section_requires_parent() {
        let tree = sample_tree();
        let mut editor = StructureEditor::new();
        assert!(editor
            .start_create(&tree, EditorSlot::NewSection { chapter_id: 404 })
            .is_err());
        assert!(editor
            .start_create(
                &tree,
                EditorSlot::NewSubsection {
                    chapter_id: 12,
                    section_id: 31
                }
            )
            .is_ok());
    }

    #[test]
    fn test_plan_reorder_moves_and_renumbers() {
        let current = vec![(10, 0), (11, 1), (12, 2), (13, 3)];
        // 把 13 拖到 11 的位置
        let writes = plan_reorder(&current, 13, 11).unwrap();
        assert_eq!(writes, vec![(13, 1), (11, 2), (12, 3)]);

        // 拖到自身不产生写入
        assert!(plan_reorder(&current, 12, 12).unwrap().is_empty());

        // 有空洞的 order 也会被整理成连续下标
        let sparse = vec![(1, 5), (2, 9), (3, 20)];
        assert_eq!(
            plan_reorder(&sparse, 1, 3).unwrap(),
            vec![(2, 0), (3, 1), (1, 2)]
        );

        assert!(plan_reorder(&current, 99, 10).is_err());
    }

    #[tokio::test]
    async fn test_reorder_failure_reloads_before_retry() {
        let mut tree = DocumentTree::from_json(json!({
            "id": 7,
            "chapters": [
                {"id": 10, "order": 0, "title": "A"},
                {"id": 11, "order": 1, "title": "B"},
                {"id": 12, "order": 2, "title": "C"},
                {"id": 13, "order": 3, "title": "D"}
            ]
        }))
        .unwrap();
        let api = api_for(&tree);
        let mut editor = StructureEditor::new();

        // 13 -> order 1 写入成功后网络中断
        api.fail_writes_after(Some(1));
        assert!(editor.reorder_chapters(&mut tree, &api, 13, 11).await.is_err());
        assert_eq!(tree.chapter(13).map(|c| c.order), Some(1));

        api.fail_writes_after(None);
        editor
            .reorder_chapters(&mut tree, &api, 12, 10)
            .await
            .unwrap();

        let orders: Vec<(i64, i64)> = tree.chapters().iter().map(|c| (c.id, c.order)).collect();
        assert_eq!(orders, vec![(12, 0), (10, 1), (11, 2), (13, 3)]);
    }

    #[test]
    fn test_table_cell_rejects_separators() {
        let tree = sample_tree();
        let key = NodeKey::section(30);
        let mut editor = StructureEditor::new();
        editor.start(&tree, key).unwrap();
        editor
            .change_field(key, EditField::AddTable { rows: 1, columns: 2 })
            .unwrap();

        for value in ["x|y", "ligne\nsuivante"] {
            let result = editor.change_field(
                key,
                EditField::TableCell {
                    table: 0,
                    row: 0,
                    column: 0,
                    value: value.to_string(),
                },
            );
            assert!(matches!(result, Err(ViewerError::InvalidDraft(_))));
        }

        match editor.state(EditorSlot::Node(key)) {
            EditState::Editing(draft) => {
                assert_eq!(draft.tables[0], TableDescriptor::Grid(TableGrid::blank(1, 2)));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_reorder_reloads_tree() {
        let mut tree = sample_tree();
        let api = api_for(&tree);
        let mut editor = StructureEditor::new();
        editor.start(&tree, NodeKey::chapter(10)).unwrap();

        editor
            .reorder_chapters(&mut tree, &api, 12, 10)
            .await
            .unwrap();

        let ids: Vec<i64> = tree.chapters().iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![12, 10, 11]);
        assert_eq!(editor.open_count(), 0);
        assert!(matches!(api.calls().last(), Some(ApiCall::FetchStructure)));
    }

    #[tokio::test]
    async fn test_rename_and_upload() {
        let mut tree = sample_tree();
        let api = api_for(&tree);
        let mut editor = StructureEditor::new();

        editor
            .rename_book(&mut tree, &api, "  Physique générale ")
            .await
            .unwrap();
        assert_eq!(tree.book().title, "Physique générale");

        let key = NodeKey::section(30);
        assert!(editor
            .upload_image(&api, key, "onde.png", vec![1, 2, 3])
            .await
            .is_err());

        editor.start(&tree, key).unwrap();
        let image = editor
            .upload_image(&api, key, "onde.png", vec![1, 2, 3])
            .await
            .unwrap();
        assert_eq!(image.url, "/media/uploads/onde.png");
        match editor.state(EditorSlot::Node(key)) {
            EditState::Editing(draft) => assert_eq!(draft.images, vec![image]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
