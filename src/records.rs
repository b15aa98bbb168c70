use serde::{Deserialize, Deserializer, Serialize};

/// One published issue of the magazine. `id` is the join key between an
/// issue and its articles across every cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Magazine {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "option_string_or_number")]
    pub year: Option<String>,
    #[serde(default)]
    pub page_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
}

/// Lightweight article record from an issue's listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleSummary {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "option_string_or_number")]
    pub index: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_html: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_html: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default, deserialize_with = "option_string_or_number")]
    pub page_number: Option<String>,
    #[serde(default)]
    pub cover_img_path: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

/// Full article record from the detail endpoint. Superset of the listing
/// record; list-view fields may be absent and get filled by enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArticleDetail {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default, deserialize_with = "option_string_or_number")]
    pub index: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub title_html: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub author_html: Option<String>,
    #[serde(default)]
    pub column: Option<String>,
    #[serde(default, deserialize_with = "option_string_or_number")]
    pub page_number: Option<String>,
    #[serde(default)]
    pub cover_img_path: Option<String>,
    #[serde(default)]
    pub html: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl ArticleDetail {
    /// Fills gaps in this detail record from its list-view counterpart.
    /// Fields already present on the detail are never overwritten; the base
    /// only supplies what the detail payload lacks.
    pub fn enrich_from(&mut self, base: &ArticleSummary) {
        fill(&mut self.index, &base.index);
        fill(&mut self.title, &base.title);
        fill(&mut self.title_html, &base.title_html);
        fill(&mut self.author, &base.author);
        fill(&mut self.author_html, &base.author_html);
        fill(&mut self.column, &base.column);
        fill(&mut self.page_number, &base.page_number);
        fill(&mut self.cover_img_path, &base.cover_img_path);
        fill(&mut self.text, &base.text);
    }

    pub fn index_label(&self) -> String {
        index_label(self.index.as_deref())
    }

    pub fn index_sort_key(&self) -> i64 {
        index_sort_key(self.index.as_deref())
    }
}

impl ArticleSummary {
    pub fn index_label(&self) -> String {
        index_label(self.index.as_deref())
    }

    pub fn index_sort_key(&self) -> i64 {
        index_sort_key(self.index.as_deref())
    }
}

fn fill(dst: &mut Option<String>, src: &Option<String>) {
    if dst.is_none() && src.is_some() {
        dst.clone_from(src);
    }
}

/// Zero-padded ordinal for display (`7` -> `007`); non-numeric values pass
/// through as-is, missing values render empty.
pub fn index_label(index: Option<&str>) -> String {
    match index {
        Some(raw) => match raw.trim().parse::<i64>() {
            Ok(value) => format!("{value:03}"),
            Err(_) => raw.to_owned(),
        },
        None => String::new(),
    }
}

/// Sort key for ordering articles; missing or non-numeric indices sort as 0.
pub fn index_sort_key(index: Option<&str>) -> i64 {
    index
        .and_then(|raw| raw.trim().parse::<i64>().ok())
        .unwrap_or(0)
}

/// One line of the offline NDJSON ingest file.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRecord {
    pub magazine: IngestMagazine,
    pub article: ArticleDetail,
    #[serde(default, deserialize_with = "option_string_or_number")]
    pub year: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestMagazine {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(default)]
    pub page_name: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub subject: Option<String>,
}

impl IngestMagazine {
    /// Issue metadata for rendering; `subject` stands in when the record has
    /// no `title`.
    pub fn into_magazine(self, year: Option<String>) -> Magazine {
        Magazine {
            id: self.id,
            year,
            page_name: self.page_name,
            date: self.date,
            title: self.title.or(self.subject),
        }
    }
}

// The archive serves ids, indices and page numbers as either JSON strings or
// numbers depending on the endpoint.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

fn option_string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Null => Ok(None),
        serde_json::Value::String(s) => Ok(Some(s)),
        serde_json::Value::Number(n) => Ok(Some(n.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected string, number or null, got {other}"
        ))),
    }
}
