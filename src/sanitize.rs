use std::sync::LazyLock;

use regex::Regex;

/// Absolute base for asset URLs; the archive embeds a `<%basePath%>`
/// placeholder in `src` attributes that must be rewritten before use.
pub const DATA_FILE_BASE_URL: &str = "http://szb.iziran.net/dataFile";

const BASE_PATH_PLACEHOLDER: &str = "<%basePath%>";

static P_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p\s*>").unwrap());
static P_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<p\b[^>]*>").unwrap());
static LI_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<li\b[^>]*>").unwrap());
static LI_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</li\s*>").unwrap());
static SCRIPT_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<script\b[^>]*>.*?</script\s*>").unwrap());
static STYLE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<style\b[^>]*>.*?</style\s*>").unwrap());
static IMG_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<img\b[^>]*>").unwrap());
static ANY_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());
static BATCH_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/batch/[\w\-/\.%]+").unwrap());
static IMAGES_PATH: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"images/[\w\-/\.%]+").unwrap());
static IMG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*src=["']([^"']+)["'][^>]*>"#).unwrap()
});
static IMG_ALT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?i)alt=["']([^"']*)["']"#).unwrap());
static EXCESS_NEWLINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// An inline image reference pulled out of article markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub url: String,
    pub alt: String,
}

/// Converts a raw markup fragment into clean plain text. Idempotent: running
/// the result through again yields the same string.
pub fn clean(raw: Option<&str>) -> String {
    let Some(raw) = raw else {
        return String::new();
    };
    if raw.is_empty() {
        return String::new();
    }

    let mut value = raw
        .replace("<br>", "\n")
        .replace("<br/>", "\n")
        .replace("<br />", "\n");
    value = P_CLOSE.replace_all(&value, "\n\n").into_owned();
    value = P_OPEN.replace_all(&value, "").into_owned();
    value = LI_OPEN.replace_all(&value, "- ").into_owned();
    value = LI_CLOSE.replace_all(&value, "\n").into_owned();
    value = SCRIPT_BLOCK.replace_all(&value, "").into_owned();
    value = STYLE_BLOCK.replace_all(&value, "").into_owned();
    value = IMG_TAG.replace_all(&value, "").into_owned();
    value = ANY_TAG.replace_all(&value, "").into_owned();
    value = value.replace(BASE_PATH_PLACEHOLDER, "");
    value = BATCH_PATH.replace_all(&value, "").into_owned();
    value = IMAGES_PATH.replace_all(&value, "").into_owned();
    // Artifact of malformed source markup: a dangling attribute close.
    value = value.replace("\">", "");
    value = decode_entities(&value);

    collapse_blank_lines(&value)
}

/// `clean` plus a second pass collapsing 3+ newlines anywhere down to a
/// single blank line.
pub fn normalize(raw: Option<&str>) -> String {
    let text = clean(raw);
    EXCESS_NEWLINES.replace_all(&text, "\n\n").into_owned()
}

/// Scans markup for `<img ... src=...>` tags in document order. The basepath
/// placeholder in `src` is rewritten to the absolute data-file URL; `alt`
/// text is entity-decoded, defaulting to empty.
pub fn extract_images(raw: Option<&str>) -> Vec<ImageRef> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    if raw.is_empty() {
        return Vec::new();
    }

    let mut images = Vec::new();
    for captures in IMG_SRC.captures_iter(raw) {
        let tag = captures.get(0).map(|m| m.as_str()).unwrap_or_default();
        let src = captures
            .get(1)
            .map(|m| m.as_str())
            .unwrap_or_default()
            .replace(BASE_PATH_PLACEHOLDER, DATA_FILE_BASE_URL);
        let alt = IMG_ALT
            .captures(tag)
            .and_then(|alt| alt.get(1))
            .map(|m| decode_entities(m.as_str()))
            .unwrap_or_default();
        images.push(ImageRef {
            url: src.trim().to_owned(),
            alt: alt.trim().to_owned(),
        });
    }
    images
}

fn collapse_blank_lines(value: &str) -> String {
    let mut cleaned: Vec<&str> = Vec::new();
    for line in value.lines() {
        let line = line.trim_matches(|c| c == ' ' || c == '\t' || c == '\u{3000}');
        if line.is_empty() {
            if matches!(cleaned.last(), Some(last) if !last.is_empty()) {
                cleaned.push("");
            }
            continue;
        }
        cleaned.push(line);
    }
    cleaned.join("\n").trim().to_owned()
}

/// Decodes named and numeric HTML entities. Covers the named set the archive
/// actually emits; unknown sequences pass through untouched.
fn decode_entities(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];

        let end = match rest.find(';') {
            Some(end) if end <= 32 => end,
            _ => {
                out.push('&');
                rest = &rest[1..];
                continue;
            }
        };
        let entity = &rest[1..end];
        match decode_one_entity(entity) {
            Some(decoded) => {
                out.push_str(&decoded);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_one_entity(entity: &str) -> Option<String> {
    if let Some(number) = entity.strip_prefix('#') {
        let code = if let Some(hex) = number.strip_prefix('x').or_else(|| number.strip_prefix('X'))
        {
            u32::from_str_radix(hex, 16).ok()?
        } else {
            number.parse::<u32>().ok()?
        };
        return char::from_u32(code).map(String::from);
    }

    let decoded = match entity {
        "amp" => "&",
        "lt" => "<",
        "gt" => ">",
        "quot" => "\"",
        "apos" => "'",
        "nbsp" => "\u{a0}",
        "ensp" => "\u{2002}",
        "emsp" => "\u{2003}",
        "ldquo" => "\u{201c}",
        "rdquo" => "\u{201d}",
        "lsquo" => "\u{2018}",
        "rsquo" => "\u{2019}",
        "hellip" => "\u{2026}",
        "mdash" => "\u{2014}",
        "ndash" => "\u{2013}",
        "middot" => "\u{b7}",
        "times" => "\u{d7}",
        "copy" => "\u{a9}",
        _ => return None,
    };
    Some(decoded.to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_handles_empty_input() {
        assert_eq!(clean(None), "");
        assert_eq!(clean(Some("")), "");
    }

    #[test]
    fn clean_converts_structural_tags() {
        let raw = "<p class=\"x\">第一段<br/>续行</p><p>第二段</p>";
        assert_eq!(clean(Some(raw)), "第一段\n续行\n\n第二段");
    }

    #[test]
    fn clean_renders_list_items_as_bullets() {
        let raw = "<ul><li>甲</li><li>乙</li></ul>";
        assert_eq!(clean(Some(raw)), "- 甲\n- 乙");
    }

    #[test]
    fn clean_drops_script_and_style_blocks_entirely() {
        let raw = "before<SCRIPT type=\"text/javascript\">var x = '<p>';</script>\
                   <style>.a { color: red }</style>after";
        assert_eq!(clean(Some(raw)), "beforeafter");
    }

    #[test]
    fn clean_strips_placeholder_and_asset_paths() {
        let raw = "正文<%basePath%>/batch/2023/img01.png images/cover.jpg 结束";
        let cleaned = clean(Some(raw));
        assert!(!cleaned.contains("basePath"));
        assert!(!cleaned.contains("/batch/"));
        assert!(!cleaned.contains("images/"));
    }

    #[test]
    fn clean_output_has_no_angle_brackets() {
        let raw = "<div><p>a b c</p><img src=\"x.png\">\"></div>";
        let cleaned = clean(Some(raw));
        assert!(!cleaned.contains('<'));
        assert!(!cleaned.contains('>'));
    }

    #[test]
    fn clean_decodes_entities() {
        let raw = "A &amp; B &ldquo;quoted&rdquo; &#20013;&#x56fd;";
        assert_eq!(clean(Some(raw)), "A & B \u{201c}quoted\u{201d} 中国");
    }

    #[test]
    fn clean_collapses_blank_lines() {
        let raw = "a\n\n\n\nb\n\u{3000}\u{3000}\n\nc\n\n";
        assert_eq!(clean(Some(raw)), "a\n\nb\n\nc");
    }

    #[test]
    fn clean_is_idempotent() {
        let inputs = [
            "<p>第一段</p><p>第二段<br/>换行</p>",
            "<ul><li>a</li><li>b &amp; c</li></ul>",
            "text<%basePath%>/batch/a.png\n\n\n\nmore",
            "plain text with\nnewlines",
        ];
        for raw in inputs {
            let once = clean(Some(raw));
            assert_eq!(clean(Some(&once)), once, "not idempotent for {raw:?}");
        }
    }

    #[test]
    fn normalize_collapses_runs_of_newlines() {
        assert_eq!(normalize(Some("a<br><br><br><br>b")), "a\n\nb");
    }

    #[test]
    fn extract_images_preserves_document_order() {
        let raw = r#"<img src="/a.png" alt="first"><p>x</p><IMG alt='second' src='/b.png'>"#;
        let images = extract_images(Some(raw));
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].url, "/a.png");
        assert_eq!(images[0].alt, "first");
        assert_eq!(images[1].url, "/b.png");
        assert_eq!(images[1].alt, "second");
    }

    #[test]
    fn extract_images_rewrites_base_path_placeholder() {
        let raw = r#"<img src="<%basePath%>/batch/2023/cover.png">"#;
        let images = extract_images(Some(raw));
        assert_eq!(
            images[0].url,
            format!("{DATA_FILE_BASE_URL}/batch/2023/cover.png")
        );
        assert_eq!(images[0].alt, "");
    }

    #[test]
    fn extract_images_handles_empty_input() {
        assert!(extract_images(None).is_empty());
        assert!(extract_images(Some("")).is_empty());
    }
}
