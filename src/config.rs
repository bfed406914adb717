use serde::Deserialize;
use std::path::Path;

use crate::error::{Result, ViewerError};

/// 阅读进度相关的调参
///
/// 所有时间单位均为毫秒
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// 阅读线距视口顶部的像素距离，节点顶边越过它才算"已读到"
    pub anchor_threshold_px: f64,
    /// 滚动停止多久后才认为位置稳定
    pub idle_ms: u64,
    /// 稳定性检查的周期
    pub check_interval_ms: u64,
    /// 估算阅读时间中需要停留的比例
    pub reading_ratio: f64,
    /// 阅读速度（字符/秒）
    pub chars_per_second: f64,
    pub min_read_ms: u64,
    pub max_read_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            anchor_threshold_px: 120.0,
            idle_ms: 1500,
            check_interval_ms: 400,
            reading_ratio: 0.4,
            chars_per_second: 20.0,
            min_read_ms: 2000,
            max_read_ms: 20000,
        }
    }
}

/// 阅读视图配置
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    /// 后端 API 根地址，例如 `http://localhost:8000/api`
    pub api_base: String,
    /// Bearer token，由外层登录流程提供
    pub auth_token: Option<String>,
    pub progress: ProgressConfig,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000/api".to_string(),
            auth_token: None,
            progress: ProgressConfig::default(),
        }
    }
}

impl ViewerConfig {
    /// 从 JSON 文本加载配置，缺失字段使用默认值
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// 从 JSON 文件加载配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ViewerError::Config(format!("读取配置文件失败 {:?}: {}", path.as_ref(), e))
        })?;
        Self::from_json_str(&text)
    }

    /// 默认配置叠加环境变量
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// 用给定的查找函数覆盖配置项
    ///
    /// # 参数
    /// - `lookup`: 变量名 -> 值，一般是环境变量
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(base) = lookup("BOOK_VIEWER_API_BASE") {
            if !base.is_empty() {
                self.api_base = base.trim_end_matches('/').to_string();
            }
        }
        if let Some(token) = lookup("BOOK_VIEWER_TOKEN") {
            self.auth_token = if token.is_empty() { None } else { Some(token) };
        }
        if let Some(value) = lookup("BOOK_VIEWER_IDLE_MS") {
            self.progress.idle_ms = parse_millis("BOOK_VIEWER_IDLE_MS", &value)?;
        }
        if let Some(value) = lookup("BOOK_VIEWER_CHECK_INTERVAL_MS") {
            self.progress.check_interval_ms =
                parse_millis("BOOK_VIEWER_CHECK_INTERVAL_MS", &value)?;
        }
        Ok(())
    }
}

fn parse_millis(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|e| ViewerError::Config(format!("{} 不是合法的毫秒数 ({}): {}", key, value, e)))
}
