/// 打印一本书的编号目录、主题分组和已保存的阅读进度
///
/// 用法: outline <book_id>
/// 后端地址和 token 从 BOOK_VIEWER_API_BASE / BOOK_VIEWER_TOKEN 读取

use std::sync::Arc;

use book_viewer_lib::tree::NodeRef;
use book_viewer_lib::{
    BookApi, BookViewer, Capability, DocumentTree, HttpBookApi, NodeKey, SystemClock, ViewerConfig,
};

#[tokio::main]
async fn main() {
    env_logger::init();

    let book_id = match std::env::args().nth(1).map(|arg| arg.parse::<i64>()) {
        Some(Ok(id)) => id,
        _ => {
            eprintln!("用法: outline <book_id>");
            std::process::exit(2);
        }
    };

    let config = match ViewerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("错误: {}", e);
            std::process::exit(1);
        }
    };

    let api: Arc<dyn BookApi> = match HttpBookApi::new(&config) {
        Ok(api) => Arc::new(api),
        Err(e) => {
            eprintln!("错误: {}", e);
            std::process::exit(1);
        }
    };

    println!("正在读取 {} 的书 {}\n", config.api_base, book_id);

    let viewer = match BookViewer::open(
        api,
        book_id,
        config,
        Capability::Reader,
        Arc::new(SystemClock),
    )
    .await
    {
        Ok(viewer) => viewer,
        Err(e) => {
            eprintln!("错误: 无法加载书 {}: {}", book_id, e);
            std::process::exit(1);
        }
    };

    let tree = viewer.tree();
    println!("《{}》 共 {} 章\n", tree.book().title, tree.chapters().len());

    println!("=== 目录 ===");
    for key in tree.document_order() {
        if let Some(node) = tree.node(key) {
            print_entry(tree, key, &node);
        }
    }

    println!("\n=== 主题 ===");
    for group in tree.group_by_thematique() {
        let name = group
            .thematique
            .map(|t| t.title.as_str())
            .unwrap_or("(无主题)");
        let ids: Vec<String> = group.chapters.iter().map(|c| c.id.to_string()).collect();
        println!("{}: 章节 {}", name, ids.join(", "));
    }

    println!("\n=== 阅读进度 ===");
    match viewer.restored() {
        Some(position) => {
            println!("完成度: {}%", position.progress.percentage);
            println!("位置: {}", position.progress.position_in_text);
            match position.anchor {
                Some(anchor) => println!(
                    "锚点: {} {}",
                    anchor,
                    tree.node(anchor).map(|n| n.title()).unwrap_or("")
                ),
                None => println!("锚点: 无"),
            }
        }
        None => println!("还没有阅读记录"),
    }
}

fn print_entry(tree: &DocumentTree, key: NodeKey, node: &NodeRef<'_>) {
    let depth = match node {
        NodeRef::Chapter(_) => 0,
        NodeRef::Section(_) => 1,
        NodeRef::Subsection(_) => 2,
    };
    let label = tree
        .display_label_of(key)
        .unwrap_or_else(|| "-".to_string());
    let chars = book_viewer_lib::content::visible_char_count(tree.effective_content(key));
    println!(
        "{}{} {} ({} 字)",
        "  ".repeat(depth),
        label,
        node.title(),
        chars
    );
}
