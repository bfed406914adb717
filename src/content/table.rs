use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 图片条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
}

/// 表格 `content` 字段：单个字符串或按行的字符串数组
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TableContent {
    Text(String),
    Lines(Vec<String>),
}

impl TableContent {
    pub fn as_text(&self) -> String {
        match self {
            TableContent::Text(text) => text.clone(),
            TableContent::Lines(lines) => lines.join("\n"),
        }
    }
}

/// 表格的传输格式
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableWire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<TableContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub columns: Option<usize>,
    /// 声明的行数，末尾的空行在文本形式中无法区分
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_snapshot: Option<bool>,
}

/// 结构化表格
///
/// `grid` 在规范化之后恰好是 `rows` 行、每行 `columns` 个单元格
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableGrid {
    pub title: Option<String>,
    pub rows: usize,
    pub columns: usize,
    pub grid: Vec<Vec<String>>,
    /// 首行是否作为表头显示
    pub header: bool,
}

/// 首行作为表头的条件：多于一列且首行单元格数等于列数
pub fn header_row_applies(columns: usize, first_row_cells: usize) -> bool {
    columns > 1 && first_row_cells == columns
}

fn split_row(line: &str) -> Vec<String> {
    line.split('|').map(|cell| cell.trim().to_string()).collect()
}

impl TableGrid {
    /// 空表格，`rows` x `columns` 个空单元格
    pub fn blank(rows: usize, columns: usize) -> Self {
        let mut table = Self {
            title: None,
            rows,
            columns,
            grid: Vec::new(),
            header: false,
        };
        table.normalize();
        table.header = header_row_applies(table.columns, table.columns);
        table
    }

    /// 从管道符文本解析
    ///
    /// # 参数
    /// - `content`: 每行一条记录，单元格以 `|` 分隔
    /// - `columns`: 声明的列数，缺失或为 0 时取最宽一行
    pub fn from_content(title: Option<String>, content: &str, columns: Option<usize>) -> Self {
        let mut lines: Vec<&str> = content.split('\n').map(|l| l.trim_end_matches('\r')).collect();
        while lines.last().map_or(false, |l| l.trim().is_empty()) {
            lines.pop();
        }

        let grid: Vec<Vec<String>> = lines.iter().map(|line| split_row(line)).collect();
        let first_row_cells = grid.first().map_or(0, Vec::len);

        let mut table = Self {
            title,
            rows: grid.len(),
            columns: columns.unwrap_or(0),
            grid,
            header: false,
        };
        table.normalize();
        table.header = header_row_applies(table.columns, first_row_cells);
        table
    }

    /// 规范化行列
    ///
    /// 行数或列数为 0 时从 grid 重新推导；参差的行补空或截断到 `columns`
    pub fn normalize(&mut self) {
        if self.columns == 0 {
            self.columns = self.grid.iter().map(Vec::len).max().unwrap_or(0);
        }
        if self.rows == 0 {
            self.rows = self.grid.len();
        }

        self.grid.resize_with(self.rows, Vec::new);
        for row in &mut self.grid {
            row.resize(self.columns, String::new());
        }
    }

    /// 规范文本形式，即保存到服务器的 `content`
    pub fn to_content(&self) -> String {
        let mut table = self.clone();
        table.normalize();
        table
            .grid
            .iter()
            .map(|row| row.join(" | "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// 修改单元格，越界时先扩展表格
    pub fn set_cell(&mut self, row: usize, column: usize, value: String) {
        if row >= self.rows {
            self.rows = row + 1;
        }
        if column >= self.columns {
            self.columns = column + 1;
        }
        self.normalize();
        self.header = header_row_applies(self.columns, self.columns);
        self.grid[row][column] = value;
    }

    pub fn resize(&mut self, rows: usize, columns: usize) {
        self.rows = rows;
        self.columns = columns;
        self.normalize();
        self.header = header_row_applies(self.columns, self.columns);
    }

    /// 按声明的行数补齐或截断
    pub fn with_rows(mut self, rows: Option<usize>) -> Self {
        if let Some(rows) = rows.filter(|r| *r > 0) {
            self.rows = rows;
            self.normalize();
        }
        self
    }
}

/// 表格描述：截图或结构化表格
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableDescriptor {
    Snapshot { title: Option<String>, url: String },
    Grid(TableGrid),
}

impl TableDescriptor {
    /// 从传输格式转换，无法使用的条目返回 `None`
    pub fn from_wire(wire: TableWire) -> Option<Self> {
        let snapshot = wire.is_snapshot.unwrap_or(false)
            || (wire.content.is_none() && wire.url.is_some());

        if snapshot {
            return wire
                .url
                .filter(|u| !u.is_empty())
                .map(|url| TableDescriptor::Snapshot { title: wire.title, url });
        }

        let content = wire.content.map(|c| c.as_text()).unwrap_or_default();
        Some(TableDescriptor::Grid(
            TableGrid::from_content(wire.title, &content, wire.columns.filter(|c| *c > 0))
                .with_rows(wire.rows),
        ))
    }

    /// 转为保存用的传输格式，结构化表格序列化为管道符文本
    pub fn to_wire(&self) -> TableWire {
        match self {
            TableDescriptor::Snapshot { title, url } => TableWire {
                title: title.clone(),
                url: Some(url.clone()),
                is_snapshot: Some(true),
                ..TableWire::default()
            },
            TableDescriptor::Grid(table) => TableWire {
                title: table.title.clone(),
                content: Some(TableContent::Text(table.to_content())),
                columns: Some(table.columns),
                rows: Some(table.rows),
                ..TableWire::default()
            },
        }
    }

    pub fn title(&self) -> Option<&str> {
        match self {
            TableDescriptor::Snapshot { title, .. } => title.as_deref(),
            TableDescriptor::Grid(table) => table.title.as_deref(),
        }
    }
}

/// 宽松解析图片列表，非数组或缺少 url 的条目被忽略
pub fn images_from_value(value: &Value) -> Vec<ImageEntry> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<ImageEntry>(item.clone()).ok())
            .filter(|image| !image.url.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

/// 宽松解析表格列表
pub fn tables_from_value(value: &Value) -> Vec<TableDescriptor> {
    match value {
        Value::Array(items) => items
            .iter()
            .filter_map(|item| serde_json::from_value::<TableWire>(item.clone()).ok())
            .filter_map(TableDescriptor::from_wire)
            .collect(),
        _ => Vec::new(),
    }
}

/// 从用户粘贴的 JSON 文本解析图片列表，格式错误时返回空列表
pub fn images_from_json_str(json: &str) -> Vec<ImageEntry> {
    serde_json::from_str::<Value>(json)
        .map(|v| images_from_value(&v))
        .unwrap_or_default()
}

/// 从用户粘贴的 JSON 文本解析表格列表，格式错误时返回空列表
pub fn tables_from_json_str(json: &str) -> Vec<TableDescriptor> {
    serde_json::from_str::<Value>(json)
        .map(|v| tables_from_value(&v))
        .unwrap_or_default()
}
