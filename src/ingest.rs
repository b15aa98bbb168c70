use std::collections::HashMap;
use std::path::Path;

use anyhow::Context as _;

use crate::cli::IngestArgs;
use crate::records::{ArticleDetail, IngestRecord, Magazine};
use crate::render;

/// Rebuilds issue documents from an NDJSON dump, one record per line, without
/// touching the network. Records sharing a magazine id are grouped into one
/// document; the first record seen for an id supplies the issue metadata.
pub fn run(args: IngestArgs) -> anyhow::Result<()> {
    let input = std::fs::read_to_string(&args.input)
        .with_context(|| format!("read ingest file: {}", args.input))?;

    let mut order: Vec<String> = Vec::new();
    let mut issues: HashMap<String, (Magazine, Vec<ArticleDetail>)> = HashMap::new();

    for (number, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: IngestRecord = serde_json::from_str(line)
            .with_context(|| format!("parse record at line {}", number + 1))?;

        let magazine_id = record.magazine.id.clone();
        let entry = issues.entry(magazine_id.clone()).or_insert_with(|| {
            order.push(magazine_id);
            (record.magazine.into_magazine(record.year), Vec::new())
        });
        entry.1.push(record.article);
    }

    if order.is_empty() {
        anyhow::bail!("ingest file has no records: {}", args.input);
    }

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("create output dir: {}", args.out))?;
    for magazine_id in &order {
        let (magazine, articles) = &issues[magazine_id];
        let document = render::issue_document(&args.prefix, magazine, articles);
        let path = Path::new(&args.out).join(&document.filename);
        std::fs::write(&path, document.content.as_bytes())
            .with_context(|| format!("write document: {}", path.display()))?;
        tracing::info!(
            articles = articles.len(),
            "wrote {}",
            path.display()
        );
    }
    tracing::info!(issues = order.len(), "ingest done");
    Ok(())
}
