use thiserror::Error;

/// 阅读视图的错误类型
///
/// 解析类问题在本地降级为空值，不会出现在这里；
/// 这里只承载需要上抛的网络、编辑和配置错误。
#[derive(Error, Debug)]
pub enum ViewerError {
    #[error("网络请求失败: {0}")]
    Http(#[from] reqwest::Error),
    #[error("JSON 解析失败: {0}")]
    Json(#[from] serde_json::Error),
    #[error("服务器返回 {status}: {message}")]
    Api { status: u16, message: String },
    #[error("找不到节点: {0}")]
    NotFound(String),
    #[error("草稿无效: {0}")]
    InvalidDraft(String),
    #[error("没有编辑权限: {0}")]
    Forbidden(String),
    #[error("节点不在编辑状态: {0}")]
    NotEditing(String),
    #[error("配置错误: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, ViewerError>;
