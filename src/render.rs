use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::records::{ArticleDetail, Magazine};
use crate::sanitize::{extract_images, normalize};

/// A fully rendered Markdown document plus its filesystem-safe filename.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub content: String,
}

// Filename allow-list: alphanumerics, CJK ideographs and a fixed set of
// punctuation the archive uses in issue names. Everything else becomes `_`.
static UNSAFE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^0-9A-Za-z\x{4e00}-\x{9fff}\-（）()第期年月日]").unwrap()
});
static UNSAFE_NAME_KEEP_SPACE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^0-9A-Za-z\x{4e00}-\x{9fff}\-（）()第期年月日 ]").unwrap()
});
static UNSAFE_YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^0-9A-Za-z]").unwrap());

/// Renders one article as a Markdown block: zero-padded heading, metadata
/// bullets, inline image embeds, then the sanitized body. The body prefers
/// the `html` field and falls back to `text` when cleaning leaves nothing.
pub fn render_article(article: &ArticleDetail) -> String {
    let index_label = article.index_label();
    let title = normalize(
        article
            .title_html
            .as_deref()
            .or(article.title.as_deref()),
    );
    let author = normalize(
        article
            .author_html
            .as_deref()
            .or(article.author.as_deref()),
    );
    let column = normalize(article.column.as_deref());
    let mut body = normalize(article.html.as_deref());
    if body.is_empty() {
        body = normalize(article.text.as_deref());
    }

    let mut lines = vec![format!("## {index_label} {title}")];

    let mut meta = Vec::new();
    if !column.is_empty() {
        meta.push(format!("栏目：{column}"));
    }
    if !author.is_empty() {
        meta.push(format!("作者：{author}"));
    }
    if let Some(page_number) = article.page_number.as_deref()
        && !page_number.is_empty()
    {
        meta.push(format!("页码：{page_number}"));
    }
    if !meta.is_empty() {
        for item in meta {
            lines.push(format!("- {item}"));
        }
        lines.push(String::new());
    }

    let images = extract_images(article.html.as_deref());
    if !images.is_empty() {
        for (n, image) in images.iter().enumerate() {
            let caption = if image.alt.is_empty() {
                format!("图片{}", n + 1)
            } else {
                image.alt.clone()
            };
            lines.push(format!("![{caption}]({})", image.url));
        }
        lines.push(String::new());
    }

    lines.push(body);
    lines.join("\n").trim().to_owned()
}

/// One issue as a single document. Articles are sorted by index ascending
/// and separated by horizontal rules, with no rule after the last.
pub fn issue_document(prefix: &str, magazine: &Magazine, articles: &[ArticleDetail]) -> Document {
    let year = magazine.year.as_deref().unwrap_or_default();
    let page_name = magazine.page_name.as_deref().unwrap_or_default();
    let date = magazine.date.as_deref().unwrap_or_default();

    let full_title = normalize(magazine.title.as_deref());
    let header = if full_title.is_empty() {
        format!("{prefix}{year}{page_name}")
    } else {
        full_title
    };

    let mut lines = vec![format!("# {}", header.trim())];
    if !date.is_empty() {
        lines.push(String::new());
        lines.push(format!("- 出版日期：{date}"));
    }
    for article in sorted_by_index(articles) {
        lines.push(String::new());
        lines.push(render_article(article));
        lines.push(String::new());
        lines.push("---".to_owned());
    }
    if lines.last().is_some_and(|line| line == "---") {
        lines.pop();
    }

    let safe_page = UNSAFE_NAME.replace_all(page_name, "_").into_owned();
    let identifier = if safe_page.is_empty() {
        magazine.id.clone()
    } else {
        safe_page
    };

    Document {
        filename: format!("{year}_{identifier}.md"),
        content: finish(lines.join("\n")),
    }
}

/// One article as its own document, named after its issue and position.
pub fn article_document(prefix: &str, magazine: &Magazine, article: &ArticleDetail) -> Document {
    let year = magazine.year.as_deref().unwrap_or_default();
    let page_name = magazine.page_name.as_deref().unwrap_or_default();
    let title = normalize(article.title.as_deref());
    let raw_name = format!("{year}_{page_name}_{}_{title}", article.index_label());

    Document {
        filename: format!("{prefix}_{}.md", safe_name(&raw_name)),
        content: format!("{}\n", render_article(article)),
    }
}

/// Replaces characters outside the filename allow-list with underscores,
/// keeping spaces.
pub(crate) fn safe_name(value: &str) -> String {
    UNSAFE_NAME_KEEP_SPACE
        .replace_all(value.trim(), "_")
        .into_owned()
}

/// All of one year's issues in a single document, grouped by magazine.
/// `articles` pairs each fetched detail with its parent magazine id.
pub fn year_document(
    prefix: &str,
    year: &str,
    magazines: &[Magazine],
    articles: &[(String, ArticleDetail)],
) -> Document {
    let mut lines = vec![format!("# {prefix} {year} 全年文章")];
    lines.extend(magazine_sections(magazines, articles));

    let safe_year = UNSAFE_YEAR.replace_all(year, "_").into_owned();
    Document {
        filename: format!("{prefix}_{safe_year}_full.md"),
        content: finish(lines.join("\n")),
    }
}

/// The full corpus in a single document, grouped by year then magazine.
/// `year_magazines` preserves the discovery order of years; `articles` is
/// `(year, magazine id, detail)` for every fetched article.
pub fn all_document(
    prefix: &str,
    year_magazines: &[(String, Vec<Magazine>)],
    articles: &[(String, String, ArticleDetail)],
) -> Document {
    let mut lines = vec![format!("# {prefix} 全量文章")];
    for (year, magazines) in year_magazines {
        lines.push(format!("\n# {year} 年"));
        let year_articles: Vec<(String, ArticleDetail)> = articles
            .iter()
            .filter(|(article_year, _, _)| article_year == year)
            .map(|(_, magazine_id, detail)| (magazine_id.clone(), detail.clone()))
            .collect();
        lines.extend(magazine_sections(magazines, &year_articles));
    }

    Document {
        filename: format!("{prefix}_all_full.md"),
        content: finish(lines.join("\n")),
    }
}

fn magazine_sections(magazines: &[Magazine], articles: &[(String, ArticleDetail)]) -> Vec<String> {
    let mut by_magazine: HashMap<&str, Vec<&ArticleDetail>> = HashMap::new();
    for (magazine_id, detail) in articles {
        by_magazine.entry(magazine_id).or_default().push(detail);
    }

    let mut ordered: Vec<&Magazine> = magazines.iter().collect();
    ordered.sort_by_key(|m| m.date.clone().unwrap_or_default());

    let mut lines = Vec::new();
    for magazine in ordered {
        let title = normalize(magazine.title.as_deref());
        let date = magazine.date.as_deref().unwrap_or_default();
        lines.push(format!("\n## {title} ({date})"));

        let mut section: Vec<&ArticleDetail> = by_magazine
            .get(magazine.id.as_str())
            .cloned()
            .unwrap_or_default();
        section.sort_by_key(|article| article.index_sort_key());
        for article in section {
            lines.push(render_article(article));
            lines.push("---".to_owned());
        }
        if lines.last().is_some_and(|line| line == "---") {
            lines.pop();
        }
    }
    lines
}

fn sorted_by_index(articles: &[ArticleDetail]) -> Vec<&ArticleDetail> {
    let mut sorted: Vec<&ArticleDetail> = articles.iter().collect();
    sorted.sort_by_key(|article| article.index_sort_key());
    sorted
}

fn finish(content: String) -> String {
    format!("{}\n", content.trim())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detail(id: &str, index: &str, title: &str) -> ArticleDetail {
        ArticleDetail {
            id: id.to_owned(),
            index: Some(index.to_owned()),
            title: Some(title.to_owned()),
            title_html: None,
            author: None,
            author_html: None,
            column: None,
            page_number: None,
            cover_img_path: None,
            html: Some(format!("<p>{title}正文</p>")),
            text: None,
        }
    }

    fn magazine() -> Magazine {
        Magazine {
            id: "m1".to_owned(),
            year: Some("2023".to_owned()),
            page_name: Some("第5期".to_owned()),
            date: Some("2023-05-01".to_owned()),
            title: Some("中国土地 2023年第5期".to_owned()),
        }
    }

    #[test]
    fn article_heading_is_zero_padded() {
        let article = detail("a1", "7", "耕地保护");
        let rendered = render_article(&article);
        assert!(rendered.starts_with("## 007 耕地保护"));
    }

    #[test]
    fn article_metadata_and_images_are_listed() {
        let mut article = detail("a1", "1", "标题");
        article.column = Some("要闻".to_owned());
        article.author = Some("记者甲".to_owned());
        article.page_number = Some("12".to_owned());
        article.html = Some(
            "<p>正文</p><img src=\"<%basePath%>/batch/x.png\" alt=\"配图\">".to_owned(),
        );

        let rendered = render_article(&article);
        assert!(rendered.contains("- 栏目：要闻"));
        assert!(rendered.contains("- 作者：记者甲"));
        assert!(rendered.contains("- 页码：12"));
        assert!(rendered.contains("![配图](http://szb.iziran.net/dataFile/batch/x.png)"));
        assert!(rendered.contains("正文"));
    }

    #[test]
    fn article_body_falls_back_to_text_field() {
        let mut article = detail("a1", "1", "标题");
        article.html = Some("<script>x</script>".to_owned());
        article.text = Some("纯文本正文".to_owned());
        assert!(render_article(&article).contains("纯文本正文"));
    }

    #[test]
    fn issue_document_orders_articles_by_index() {
        let articles = vec![
            detail("a3", "3", "丙"),
            detail("a1", "1", "甲"),
            detail("a2", "2", "乙"),
        ];
        let doc = issue_document("中国土地", &magazine(), &articles);

        let first = doc.content.find("## 001").expect("first article");
        let second = doc.content.find("## 002").expect("second article");
        let third = doc.content.find("## 003").expect("third article");
        assert!(first < second && second < third);
    }

    #[test]
    fn issue_document_has_no_trailing_rule() {
        let articles = vec![detail("a1", "1", "甲"), detail("a2", "2", "乙")];
        let doc = issue_document("中国土地", &magazine(), &articles);
        assert_eq!(doc.content.matches("---").count(), 1);
        assert!(doc.content.ends_with("\n"));
        assert!(!doc.content.trim_end().ends_with("---"));
    }

    #[test]
    fn issue_filename_sanitizes_page_name() {
        let mut magazine = magazine();
        magazine.page_name = Some("第5期/特刊".to_owned());
        let doc = issue_document("中国土地", &magazine, &[]);
        assert_eq!(doc.filename, "2023_第5期_特刊.md");
    }

    #[test]
    fn issue_filename_falls_back_to_magazine_id() {
        let mut magazine = magazine();
        magazine.page_name = Some("@@".to_owned());
        let doc = issue_document("中国土地", &magazine, &[]);
        assert_eq!(doc.filename, "2023___.md");

        magazine.page_name = None;
        let doc = issue_document("中国土地", &magazine, &[]);
        assert_eq!(doc.filename, "2023_m1.md");
    }

    #[test]
    fn issue_header_falls_back_to_composed_title() {
        let mut magazine = magazine();
        magazine.title = None;
        let doc = issue_document("中国土地", &magazine, &[]);
        assert!(doc.content.starts_with("# 中国土地2023第5期"));
    }

    #[test]
    fn article_document_filename_includes_prefix_and_index() {
        let article = detail("a1", "7", "耕地保护");
        let doc = article_document("中国土地", &magazine(), &article);
        assert_eq!(doc.filename, "中国土地_2023_第5期_007_耕地保护.md");
    }

    #[test]
    fn year_document_sorts_magazines_by_date() {
        let mut early = magazine();
        let mut late = magazine();
        late.id = "m2".to_owned();
        late.date = Some("2023-09-01".to_owned());
        late.title = Some("九月刊".to_owned());
        early.date = Some("2023-01-01".to_owned());
        early.title = Some("一月刊".to_owned());

        let articles = vec![
            ("m2".to_owned(), detail("a2", "1", "乙")),
            ("m1".to_owned(), detail("a1", "1", "甲")),
        ];
        let doc = year_document("中国土地", "2023", &[late, early], &articles);

        let jan = doc.content.find("一月刊").expect("january section");
        let sep = doc.content.find("九月刊").expect("september section");
        assert!(jan < sep);
        assert_eq!(doc.filename, "中国土地_2023_full.md");
    }

    #[test]
    fn all_document_groups_by_year_then_magazine() {
        let mag_2022 = Magazine {
            id: "m22".to_owned(),
            year: Some("2022".to_owned()),
            page_name: Some("第1期".to_owned()),
            date: Some("2022-01-01".to_owned()),
            title: Some("二〇二二年第一期".to_owned()),
        };
        let year_magazines = vec![
            ("2023".to_owned(), vec![magazine()]),
            ("2022".to_owned(), vec![mag_2022]),
        ];
        let articles = vec![
            ("2023".to_owned(), "m1".to_owned(), detail("a1", "1", "甲")),
            ("2022".to_owned(), "m22".to_owned(), detail("a2", "1", "乙")),
        ];
        let doc = all_document("中国土地", &year_magazines, &articles);

        assert!(doc.content.starts_with("# 中国土地 全量文章"));
        let y2023 = doc.content.find("# 2023 年").expect("2023 section");
        let y2022 = doc.content.find("# 2022 年").expect("2022 section");
        assert!(y2023 < y2022);
        assert_eq!(doc.filename, "中国土地_all_full.md");
    }
}
