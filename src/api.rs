//! 后端 REST 接口
//!
//! `BookApi` 是阅读视图与服务器之间唯一的 I/O 边界，
//! `HttpBookApi` 用 reqwest 实现，测试使用内存实现。

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ViewerConfig;
use crate::content::table::TableWire;
use crate::content::ImageEntry;
use crate::error::{Result, ViewerError};
use crate::progress::ReadingProgress;
use crate::tree::{Book, NodePath};

/// 节点的部分更新，未设置的字段不发送
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<ImageEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tables: Option<Vec<TableWire>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_intro: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i64>,
}

impl NodeUpdate {
    pub fn order(order: i64) -> Self {
        Self {
            order: Some(order),
            ..Self::default()
        }
    }
}

/// 新节点插入位置
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsertPosition {
    First,
    Last,
    After,
}

/// 创建节点的请求体
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateNodeRequest {
    pub title: String,
    pub content: String,
    pub position: InsertPosition,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_id: Option<i64>,
}

/// 新节点的父级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParentScope {
    /// 在书下创建章
    Book,
    /// 在章下创建节
    Chapter(i64),
    /// 在节下创建小节
    Section { chapter_id: i64, section_id: i64 },
}

/// 后端接口
#[async_trait]
pub trait BookApi: Send + Sync {
    /// `GET /books/{id}/export_structure/`
    async fn fetch_structure(&self, book_id: i64) -> Result<Book>;

    /// `GET /books/{id}/reading-progress/`，没有记录时返回 `None`
    async fn fetch_progress(&self, book_id: i64) -> Result<Option<ReadingProgress>>;

    /// `PATCH /books/{id}/reading-progress/`
    async fn save_progress(&self, book_id: i64, progress: &ReadingProgress) -> Result<()>;

    /// `PATCH /books/{id}/`
    async fn update_book_title(&self, book_id: i64, title: &str) -> Result<()>;

    /// `PATCH` 章、节或小节
    async fn update_node(&self, book_id: i64, path: NodePath, update: &NodeUpdate) -> Result<()>;

    /// `POST` 新的章、节或小节
    async fn create_node(
        &self,
        book_id: i64,
        parent: ParentScope,
        request: &CreateNodeRequest,
    ) -> Result<()>;

    /// `POST /uploads/images/`（multipart）
    async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<ImageEntry>;
}

/// 节点的 REST 路径
pub fn node_path(book_id: i64, path: NodePath) -> String {
    let mut url = format!("/books/{}/chapters/{}/", book_id, path.chapter_id);
    if let Some(section_id) = path.section_id {
        url.push_str(&format!("sections/{}/", section_id));
        if let Some(sub_id) = path.subsection_id {
            url.push_str(&format!("subsections/{}/", sub_id));
        }
    }
    url
}

/// 创建节点的集合路径
pub fn collection_path(book_id: i64, parent: ParentScope) -> String {
    match parent {
        ParentScope::Book => format!("/books/{}/chapters/", book_id),
        ParentScope::Chapter(chapter_id) => {
            format!("/books/{}/chapters/{}/sections/", book_id, chapter_id)
        }
        ParentScope::Section {
            chapter_id,
            section_id,
        } => format!(
            "/books/{}/chapters/{}/sections/{}/subsections/",
            book_id, chapter_id, section_id
        ),
    }
}

/// 基于 reqwest 的实现
pub struct HttpBookApi {
    client: Client,
    base: String,
    token: Option<String>,
}

impl HttpBookApi {
    pub fn new(config: &ViewerConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base: config.api_base.trim_end_matches('/').to_string(),
            token: config.auth_token.clone(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    /// 非 2xx 响应转换为 `ViewerError::Api`
    async fn checked(response: Response) -> Result<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response.text().await.unwrap_or_default();
        Err(ViewerError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl BookApi for HttpBookApi {
    async fn fetch_structure(&self, book_id: i64) -> Result<Book> {
        let path = format!("/books/{}/export_structure/", book_id);
        let response = Self::checked(self.request(Method::GET, &path).send().await?).await?;
        Ok(response.json::<Book>().await?)
    }

    async fn fetch_progress(&self, book_id: i64) -> Result<Option<ReadingProgress>> {
        let path = format!("/books/{}/reading-progress/", book_id);
        let response = self.request(Method::GET, &path).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = Self::checked(response).await?;
        Ok(Some(response.json::<ReadingProgress>().await?))
    }

    async fn save_progress(&self, book_id: i64, progress: &ReadingProgress) -> Result<()> {
        let path = format!("/books/{}/reading-progress/", book_id);
        Self::checked(self.request(Method::PATCH, &path).json(progress).send().await?).await?;
        Ok(())
    }

    async fn update_book_title(&self, book_id: i64, title: &str) -> Result<()> {
        let path = format!("/books/{}/", book_id);
        let body = serde_json::json!({ "title": title });
        Self::checked(self.request(Method::PATCH, &path).json(&body).send().await?).await?;
        Ok(())
    }

    async fn update_node(&self, book_id: i64, path: NodePath, update: &NodeUpdate) -> Result<()> {
        let url = node_path(book_id, path);
        Self::checked(self.request(Method::PATCH, &url).json(update).send().await?).await?;
        Ok(())
    }

    async fn create_node(
        &self,
        book_id: i64,
        parent: ParentScope,
        request: &CreateNodeRequest,
    ) -> Result<()> {
        let url = collection_path(book_id, parent);
        Self::checked(self.request(Method::POST, &url).json(request).send().await?).await?;
        Ok(())
    }

    async fn upload_image(&self, file_name: &str, bytes: Vec<u8>) -> Result<ImageEntry> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new().part("image", part);
        let response = Self::checked(
            self.request(Method::POST, "/uploads/images/")
                .multipart(form)
                .send()
                .await?,
        )
        .await?;
        Ok(response.json::<ImageEntry>().await?)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! 内存中的后端，记录调用并模拟服务器行为

    use super::*;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq)]
    pub(crate) enum ApiCall {
        FetchStructure,
        FetchProgress,
        SaveProgress(ReadingProgress),
        UpdateTitle(String),
        UpdateNode(String, NodeUpdate),
        CreateNode(String, CreateNodeRequest),
        UploadImage(String),
    }

    pub(crate) struct FakeBookApi {
        structure: Mutex<Value>,
        progress: Mutex<Option<ReadingProgress>>,
        calls: Mutex<Vec<ApiCall>>,
        fail_writes: AtomicBool,
        fail_reads: AtomicBool,
        /// 还允许成功的写入次数，用完后写入失败
        writes_left: Mutex<Option<usize>>,
        next_id: AtomicI64,
    }

    impl FakeBookApi {
        pub(crate) fn new(structure: Value) -> Self {
            Self {
                structure: Mutex::new(structure),
                progress: Mutex::new(None),
                calls: Mutex::new(Vec::new()),
                fail_writes: AtomicBool::new(false),
                fail_reads: AtomicBool::new(false),
                writes_left: Mutex::new(None),
                next_id: AtomicI64::new(1000),
            }
        }

        pub(crate) fn set_progress(&self, progress: Option<ReadingProgress>) {
            *self.progress.lock().unwrap() = progress;
        }

        pub(crate) fn fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// 再成功 `count` 次写入后开始失败，`None` 取消限制
        pub(crate) fn fail_writes_after(&self, count: Option<usize>) {
            *self.writes_left.lock().unwrap() = count;
        }

        pub(crate) fn fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        pub(crate) fn calls(&self) -> Vec<ApiCall> {
            self.calls.lock().unwrap().clone()
        }

        pub(crate) fn progress_writes(&self) -> Vec<ReadingProgress> {
            self.calls()
                .into_iter()
                .filter_map(|c| match c {
                    ApiCall::SaveProgress(p) => Some(p),
                    _ => None,
                })
                .collect()
        }

        fn record(&self, call: ApiCall) {
            self.calls.lock().unwrap().push(call);
        }

        fn check_write(&self) -> Result<()> {
            let mut writes_left = self.writes_left.lock().unwrap();
            let exhausted = match writes_left.as_mut() {
                Some(n) if *n == 0 => true,
                Some(n) => {
                    *n -= 1;
                    false
                }
                None => false,
            };
            if exhausted || self.fail_writes.load(Ordering::SeqCst) {
                return Err(ViewerError::Api {
                    status: 500,
                    message: "simulated failure".to_string(),
                });
            }
            Ok(())
        }

        fn check_read(&self) -> Result<()> {
            if self.fail_reads.load(Ordering::SeqCst) {
                return Err(ViewerError::Api {
                    status: 503,
                    message: "simulated failure".to_string(),
                });
            }
            Ok(())
        }

        /// 按服务器的方式插入新章节并重排 order
        fn insert_chapter(&self, request: &CreateNodeRequest) {
            let mut structure = self.structure.lock().unwrap();
            let mut chapters: Vec<Value> = structure["chapters"].as_array().cloned().unwrap_or_default();
            chapters.sort_by_key(|c| c["order"].as_i64().unwrap_or(0));

            let index = match request.position {
                InsertPosition::First => 0,
                InsertPosition::Last => chapters.len(),
                InsertPosition::After => chapters
                    .iter()
                    .position(|c| c["id"].as_i64() == request.after_id)
                    .map(|i| i + 1)
                    .unwrap_or(chapters.len()),
            };
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            chapters.insert(
                index,
                json!({"id": id, "title": request.title, "content": request.content}),
            );
            for (order, chapter) in chapters.iter_mut().enumerate() {
                chapter["order"] = json!(order);
            }
            structure["chapters"] = Value::Array(chapters);
        }

        fn apply_chapter_order(&self, chapter_id: i64, order: i64) {
            let mut structure = self.structure.lock().unwrap();
            if let Some(chapters) = structure["chapters"].as_array_mut() {
                for chapter in chapters {
                    if chapter["id"].as_i64() == Some(chapter_id) {
                        chapter["order"] = json!(order);
                    }
                }
            }
        }
    }

    #[async_trait]
    impl BookApi for FakeBookApi {
        async fn fetch_structure(&self, _book_id: i64) -> Result<Book> {
            self.record(ApiCall::FetchStructure);
            self.check_read()?;
            let value = self.structure.lock().unwrap().clone();
            Ok(serde_json::from_value(value)?)
        }

        async fn fetch_progress(&self, _book_id: i64) -> Result<Option<ReadingProgress>> {
            self.record(ApiCall::FetchProgress);
            self.check_read()?;
            Ok(self.progress.lock().unwrap().clone())
        }

        async fn save_progress(&self, _book_id: i64, progress: &ReadingProgress) -> Result<()> {
            self.record(ApiCall::SaveProgress(progress.clone()));
            self.check_write()?;
            self.set_progress(Some(progress.clone()));
            Ok(())
        }

        async fn update_book_title(&self, _book_id: i64, title: &str) -> Result<()> {
            self.record(ApiCall::UpdateTitle(title.to_string()));
            self.check_write()
        }

        async fn update_node(&self, book_id: i64, path: NodePath, update: &NodeUpdate) -> Result<()> {
            self.record(ApiCall::UpdateNode(node_path(book_id, path), update.clone()));
            self.check_write()?;
            if let (Some(order), None) = (update.order, path.section_id) {
                self.apply_chapter_order(path.chapter_id, order);
            }
            Ok(())
        }

        async fn create_node(
            &self,
            book_id: i64,
            parent: ParentScope,
            request: &CreateNodeRequest,
        ) -> Result<()> {
            self.record(ApiCall::CreateNode(
                collection_path(book_id, parent),
                request.clone(),
            ));
            self.check_write()?;
            if parent == ParentScope::Book {
                self.insert_chapter(request);
            }
            Ok(())
        }

        async fn upload_image(&self, file_name: &str, _bytes: Vec<u8>) -> Result<ImageEntry> {
            self.record(ApiCall::UploadImage(file_name.to_string()));
            self.check_write()?;
            Ok(ImageEntry {
                url: format!("/media/uploads/{}", file_name),
                caption: None,
            })
        }
    }
}
