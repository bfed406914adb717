//! 整本书的 HTML 渲染
//!
//! 每个章、节、小节输出一个带稳定 id 的元素（`chapter-12`、`section-30`、
//! `subsection-51`），视口测量实现按这些 id 查询节点位置。

use html_escape::{encode_double_quoted_attribute, encode_text};
use std::fmt::Write;

use crate::content::{highlight_segments, parse_content, Block, ImageEntry, TableDescriptor, TableGrid};
use crate::tree::{DocumentTree, NodeKey, NodeKind, NodeRef};

/// 节点元素的 id
pub fn anchor_id(key: NodeKey) -> String {
    format!("{}-{}", key.kind.as_str(), key.id)
}

/// 标题前的编号文字，引言章节没有
pub fn heading_label(tree: &DocumentTree, key: NodeKey) -> Option<String> {
    let label = tree.display_label_of(key)?;
    match key.kind {
        NodeKind::Chapter => Some(format!("Chapitre {}", label)),
        _ => Some(label),
    }
}

/// 渲染整本书
pub fn render_book(tree: &DocumentTree) -> String {
    let mut html = String::new();
    let book = tree.book();

    let _ = writeln!(html, "<article class=\"book\" id=\"book-{}\">", book.id);
    let _ = writeln!(html, "<h1 class=\"book-title\">{}</h1>", encode_text(&book.title));
    if let Some(description) = book.description.as_deref().filter(|d| !d.trim().is_empty()) {
        let _ = writeln!(
            html,
            "<p class=\"book-description\">{}</p>",
            encode_text(description)
        );
    }

    for group in tree.group_by_thematique() {
        match group.thematique {
            Some(thematique) => {
                let _ = writeln!(
                    html,
                    "<div class=\"thematique\" data-thematique=\"{}\">",
                    thematique.id
                );
                let _ = writeln!(
                    html,
                    "<h2 class=\"thematique-title\">{}</h2>",
                    encode_text(&thematique.title)
                );
            }
            None => html.push_str("<div class=\"thematique\">\n"),
        }

        for chapter in group.chapters {
            render_node(tree, &mut html, NodeRef::Chapter(chapter));
        }
        html.push_str("</div>\n");
    }

    html.push_str("</article>\n");
    html
}

fn render_node(tree: &DocumentTree, html: &mut String, node: NodeRef<'_>) {
    let key = node.key();
    let level = match key.kind {
        NodeKind::Chapter => 2,
        NodeKind::Section => 3,
        NodeKind::Subsection => 4,
    };

    let _ = writeln!(
        html,
        "<section class=\"{}\" id=\"{}\">",
        key.kind.as_str(),
        anchor_id(key)
    );
    match heading_label(tree, key) {
        Some(label) => {
            let _ = writeln!(
                html,
                "<h{level}><span class=\"label\">{}</span> {}</h{level}>",
                encode_text(&label),
                encode_text(node.title()),
                level = level
            );
        }
        None => {
            let _ = writeln!(html, "<h{level}>{}</h{level}>", encode_text(node.title()), level = level);
        }
    }

    render_blocks(html, parse_content(tree.effective_content(key)).blocks());
    render_images(html, tree.effective_images(key));
    render_tables(html, tree.effective_tables(key));

    match node {
        NodeRef::Chapter(chapter) => {
            for section in &chapter.sections {
                render_node(tree, html, NodeRef::Section(section));
            }
        }
        NodeRef::Section(section) => {
            for sub in &section.subsections {
                render_node(tree, html, NodeRef::Subsection(sub));
            }
        }
        NodeRef::Subsection(_) => {}
    }

    html.push_str("</section>\n");
}

fn render_blocks(html: &mut String, blocks: &[Block]) {
    for block in blocks {
        match block {
            Block::Paragraph { text } => {
                html.push_str("<p>");
                for segment in highlight_segments(text) {
                    if segment.highlighted {
                        let _ = write!(html, "<strong class=\"keyword\">{}</strong>", encode_text(&segment.text));
                    } else {
                        html.push_str(&encode_text(&segment.text));
                    }
                }
                html.push_str("</p>\n");
            }
            Block::Callout { lines } => {
                html.push_str("<aside class=\"callout\">\n");
                for line in lines {
                    let _ = writeln!(html, "<p>{}</p>", encode_text(line));
                }
                html.push_str("</aside>\n");
            }
        }
    }
}

fn render_images(html: &mut String, images: &[ImageEntry]) {
    for (index, image) in images.iter().enumerate() {
        let caption = image
            .caption
            .clone()
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| format!("Image {}", index + 1));
        render_figure(html, "image", &image.url, &caption);
    }
}

fn render_tables(html: &mut String, tables: &[TableDescriptor]) {
    for (index, table) in tables.iter().enumerate() {
        let caption = table
            .title()
            .filter(|t| !t.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("Tableau {}", index + 1));

        match table {
            TableDescriptor::Snapshot { url, .. } => render_figure(html, "table snapshot", url, &caption),
            TableDescriptor::Grid(grid) => render_grid(html, grid, &caption),
        }
    }
}

fn render_figure(html: &mut String, class: &str, url: &str, caption: &str) {
    let _ = writeln!(
        html,
        "<figure class=\"{}\"><img src=\"{}\" alt=\"{}\"><figcaption>{}</figcaption></figure>",
        class,
        encode_double_quoted_attribute(url),
        encode_double_quoted_attribute(caption),
        encode_text(caption)
    );
}

fn render_grid(html: &mut String, grid: &TableGrid, caption: &str) {
    let mut grid = grid.clone();
    grid.normalize();

    html.push_str("<figure class=\"table\"><table>\n");
    let mut rows = grid.grid.iter();
    if grid.header {
        if let Some(first) = rows.next() {
            html.push_str("<thead><tr>");
            for cell in first {
                let _ = write!(html, "<th>{}</th>", encode_text(cell));
            }
            html.push_str("</tr></thead>\n");
        }
    }

    html.push_str("<tbody>\n");
    for row in rows {
        html.push_str("<tr>");
        for cell in row {
            let _ = write!(html, "<td>{}</td>", encode_text(cell));
        }
        html.push_str("</tr>\n");
    }
    html.push_str("</tbody>\n");
    let _ = writeln!(html, "</table><figcaption>{}</figcaption></figure>", encode_text(caption));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::tests::sample_tree;
    use crate::tree::NodeOverride;

    #[test]
    fn test_anchor_ids_and_labels() {
        let tree = sample_tree();
        let html = render_book(&tree);

        for key in tree.document_order() {
            assert!(html.contains(&format!("id=\"{}\"", anchor_id(key))), "{}", key);
        }
        assert_eq!(anchor_id(NodeKey::subsection(51)), "subsection-51");
        assert!(html.contains("<h2>Introduction</h2>"));
        assert!(html.contains("<span class=\"label\">Chapitre 2</span> Ondes"));
        assert!(html.contains("<span class=\"label\">2.2.1</span> Période"));
        assert!(html.contains("<h2 class=\"thematique-title\">Mécanique</h2>"));
    }

    #[test]
    fn test_document_order_is_preserved() {
        let html = render_book(&sample_tree());
        let intro = html.find("chapter-10").unwrap();
        let forces = html.find("chapter-11").unwrap();
        let waves = html.find("chapter-12").unwrap();
        let period = html.find("subsection-51").unwrap();
        let units = html.find("subsection-52").unwrap();
        assert!(intro < forces && forces < waves && waves < period && period < units);
    }

    #[test]
    fn test_content_blocks_use_overrides_and_escape() {
        let mut tree = sample_tree();
        tree.commit_override(
            NodeKey::section(30),
            NodeOverride {
                content: Some("Remarque : a < b\n\n<article>Attention & prudence</article>".into()),
                images: Some(vec![ImageEntry {
                    url: "/m/x.png".into(),
                    caption: None,
                }]),
                tables: Some(vec![TableDescriptor::Grid(TableGrid::from_content(
                    None,
                    "Grandeur | Unité\nf | Hz",
                    Some(2),
                ))]),
                is_intro: None,
            },
        )
        .unwrap();

        let html = render_book(&tree);
        assert!(html.contains("<p><strong class=\"keyword\">Remarque</strong> : a &lt; b</p>"));
        assert!(html.contains("<aside class=\"callout\">\n<p>Attention &amp; prudence</p>\n</aside>"));
        assert!(html.contains("<figcaption>Image 1</figcaption>"));
        assert!(html.contains("<thead><tr><th>Grandeur</th><th>Unité</th></tr></thead>"));
        assert!(html.contains("<tr><td>f</td><td>Hz</td></tr>"));
        assert!(html.contains("<figcaption>Tableau 1</figcaption>"));
        assert!(!html.contains("Une onde est..."));
    }

    #[test]
    fn test_single_column_table_has_no_header() {
        let mut html = String::new();
        let grid = TableGrid::from_content(Some("Liste".into()), "a\nb", None);
        render_grid(&mut html, &grid, "Liste");
        assert!(!html.contains("<th>"));
        assert!(html.contains("<tr><td>a</td></tr>"));
    }

    #[test]
    fn test_snapshot_table_renders_as_image() {
        let mut html = String::new();
        render_tables(
            &mut html,
            &[TableDescriptor::Snapshot {
                title: Some("Mesures".into()),
                url: "/m/t.png".into(),
            }],
        );
        assert!(html.contains("<img src=\"/m/t.png\" alt=\"Mesures\">"));
        assert!(html.contains("<figcaption>Mesures</figcaption>"));
    }
}
