use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::cli::{ArticlesArgs, IssuesArgs, YearsArgs};
use crate::client::HttpArchiveClient;
use crate::sanitize::normalize;
use crate::session::Session;

/// Lists the years the archive exposes, newest first as the site returns
/// them.
pub async fn years(args: YearsArgs) -> anyhow::Result<()> {
    let session = login(&args.base_url, args.delay_ms).await?;
    let years = session.years().await.context("list years")?;
    for year in years {
        println!("{year}");
    }
    Ok(())
}

/// Lists one year's issues: id, page name and publication date.
pub async fn issues(args: IssuesArgs) -> anyhow::Result<()> {
    let session = login(&args.base_url, args.delay_ms).await?;
    let magazines = session
        .magazines(&args.year)
        .await
        .with_context(|| format!("list magazines of {}", args.year))?;
    if magazines.is_empty() {
        tracing::warn!(year = %args.year, "no issues found");
        return Ok(());
    }
    for magazine in magazines {
        println!(
            "{}\t{}\t{}",
            magazine.id,
            magazine.page_name.as_deref().unwrap_or("-"),
            magazine.date.as_deref().unwrap_or("-"),
        );
    }
    Ok(())
}

/// Lists one issue's articles in reading order: index, id and title.
pub async fn articles(args: ArticlesArgs) -> anyhow::Result<()> {
    let session = login(&args.base_url, args.delay_ms).await?;
    let mut articles = session
        .articles(&args.magazine)
        .await
        .with_context(|| format!("list articles of {}", args.magazine))?;
    if articles.is_empty() {
        tracing::warn!(magazine = %args.magazine, "no articles found");
        return Ok(());
    }
    articles.sort_by_key(|article| article.index_sort_key());
    for article in articles {
        let title = normalize(
            article
                .title_html
                .as_deref()
                .or(article.title.as_deref()),
        );
        println!("{}\t{}\t{title}", article.index_label(), article.id);
    }
    Ok(())
}

async fn login(base_url: &str, delay_ms: u64) -> anyhow::Result<Arc<Session>> {
    let client = HttpArchiveClient::with_base_url(base_url, Duration::from_millis(delay_ms))
        .context("build archive client")?;
    let session = Arc::new(Session::new(Arc::new(client)));
    session.login().await.context("login")?;
    Ok(session)
}
