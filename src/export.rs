use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context as _;
use tokio::sync::{Semaphore, mpsc, watch};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::cli::{ExportArgs, ExportMode};
use crate::client::{ClientError, HttpArchiveClient};
use crate::records::{ArticleDetail, ArticleSummary, Magazine};
use crate::render::{self, Document};
use crate::session::Session;

/// Maximum concurrent detail fetches within one magazine's batch.
pub const DETAIL_FETCH_CONCURRENCY: usize = 3;

/// What one export run covers.
#[derive(Debug, Clone)]
pub enum ExportScope {
    Article { article_id: String },
    Issue { year: String, magazine_id: String },
    Year { year: String },
    All,
}

/// Terminal state of a run that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStatus {
    Completed,
    Cancelled,
}

/// Progress and log traffic from the orchestrator to whatever front end is
/// listening. The orchestrator never prints or touches UI state itself.
#[derive(Debug, Clone)]
pub enum ExportEvent {
    Started {
        label: String,
        total: usize,
    },
    Advanced {
        label: String,
        current: usize,
        total: usize,
    },
    Log {
        message: String,
    },
}

/// Shared pause/cancel signals for one export run. Cancellation is
/// cooperative: checked between units, never forced on in-flight requests.
/// The pause gate blocks workers until resumed; cancel wakes paused workers
/// so they can observe the flag.
#[derive(Clone)]
pub struct ExportControl {
    cancel: CancellationToken,
    // true = running, false = paused
    pause: Arc<watch::Sender<bool>>,
}

impl ExportControl {
    pub fn new() -> Self {
        let (pause, _) = watch::channel(true);
        Self {
            cancel: CancellationToken::new(),
            pause: Arc::new(pause),
        }
    }

    pub fn pause(&self) {
        self.pause.send_replace(false);
    }

    pub fn resume(&self) {
        self.pause.send_replace(true);
    }

    pub fn is_paused(&self) -> bool {
        !*self.pause.borrow()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Blocks until the gate is open. Returns immediately on cancellation so
    /// a paused run can still be cancelled.
    pub async fn wait_if_paused(&self) {
        let mut gate = self.pause.subscribe();
        loop {
            if self.cancel.is_cancelled() || *gate.borrow_and_update() {
                return;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                changed = gate.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

impl Default for ExportControl {
    fn default() -> Self {
        Self::new()
    }
}

struct Progress<'a> {
    events: &'a mpsc::UnboundedSender<ExportEvent>,
    label: String,
    current: usize,
    total: usize,
}

impl<'a> Progress<'a> {
    fn start(
        events: &'a mpsc::UnboundedSender<ExportEvent>,
        label: impl Into<String>,
        total: usize,
    ) -> Self {
        let label = label.into();
        let total = total.max(1);
        let _ = events.send(ExportEvent::Started {
            label: label.clone(),
            total,
        });
        Self {
            events,
            label,
            current: 0,
            total,
        }
    }

    fn advance(&mut self) {
        self.current = (self.current + 1).min(self.total);
        let _ = self.events.send(ExportEvent::Advanced {
            label: self.label.clone(),
            current: self.current,
            total: self.total,
        });
    }
}

/// Drives one of the four export granularities over a session, writing
/// rendered documents to the output directory. Only one run may be active at
/// a time.
pub struct Exporter {
    session: Arc<Session>,
    control: ExportControl,
    events: mpsc::UnboundedSender<ExportEvent>,
    out_dir: PathBuf,
    prefix: String,
    active: AtomicBool,
}

impl Exporter {
    pub fn new(
        session: Arc<Session>,
        control: ExportControl,
        events: mpsc::UnboundedSender<ExportEvent>,
        out_dir: PathBuf,
        prefix: String,
    ) -> Self {
        Self {
            session,
            control,
            events,
            out_dir,
            prefix,
            active: AtomicBool::new(false),
        }
    }

    pub fn control(&self) -> &ExportControl {
        &self.control
    }

    /// Runs one export to a terminal state. Listing and write failures abort
    /// the run; individual detail-fetch failures are logged and skipped.
    pub async fn run_export(
        &self,
        scope: ExportScope,
        mode: ExportMode,
    ) -> anyhow::Result<ExportStatus> {
        if self.active.swap(true, Ordering::SeqCst) {
            anyhow::bail!("an export is already running");
        }
        let result = self.dispatch(scope, mode).await;
        self.active.store(false, Ordering::SeqCst);

        match &result {
            Ok(ExportStatus::Completed) => self.log("export completed"),
            Ok(ExportStatus::Cancelled) => self.log("export cancelled"),
            Err(err) => self.log(format!("export failed: {err:#}")),
        }
        result
    }

    async fn dispatch(&self, scope: ExportScope, mode: ExportMode) -> anyhow::Result<ExportStatus> {
        match scope {
            ExportScope::Article { article_id } => self.export_article(&article_id).await,
            ExportScope::Issue { year, magazine_id } => {
                self.export_issue(&year, &magazine_id, mode).await
            }
            ExportScope::Year { year } => self.export_year(&year, mode).await,
            ExportScope::All => self.export_all(mode).await,
        }
    }

    async fn export_article(&self, article_id: &str) -> anyhow::Result<ExportStatus> {
        let mut progress = Progress::start(&self.events, "export article", 1);
        let detail = self
            .session
            .article_detail(article_id, None)
            .await
            .context("fetch article detail")?;

        let title = crate::sanitize::normalize(detail.title.as_deref());
        let stem = if title.is_empty() {
            detail.id.clone()
        } else {
            title
        };
        let document = Document {
            filename: format!("{}_{}.md", self.prefix, render::safe_name(&stem)),
            content: format!("{}\n", render::render_article(&detail)),
        };
        self.write_document(&document)?;
        progress.advance();
        Ok(ExportStatus::Completed)
    }

    async fn export_issue(
        &self,
        year: &str,
        magazine_id: &str,
        mode: ExportMode,
    ) -> anyhow::Result<ExportStatus> {
        let magazine = self.find_magazine(year, magazine_id).await?;
        let articles = self
            .session
            .articles(magazine_id)
            .await
            .context("list issue articles")?;
        if articles.is_empty() {
            anyhow::bail!("issue {magazine_id} has no articles");
        }
        let issue_name = magazine
            .page_name
            .clone()
            .unwrap_or_else(|| magazine.id.clone());

        match mode {
            ExportMode::Article => {
                let mut progress = Progress::start(
                    &self.events,
                    format!("export articles of {issue_name}"),
                    articles.len(),
                );
                if !self
                    .write_articles_individually(&magazine, &articles, &mut progress)
                    .await?
                {
                    return Ok(ExportStatus::Cancelled);
                }
            }
            // Issue scope folds the remaining granularities into one
            // issue document.
            _ => {
                let mut progress = Progress::start(
                    &self.events,
                    format!("export issue {issue_name}"),
                    articles.len(),
                );
                let Some(details) = self
                    .collect_details(&articles, Some(&mut progress))
                    .await?
                else {
                    return Ok(ExportStatus::Cancelled);
                };
                let document = render::issue_document(&self.prefix, &magazine, &details);
                self.write_document(&document)?;
            }
        }
        Ok(ExportStatus::Completed)
    }

    async fn export_year(&self, year: &str, mode: ExportMode) -> anyhow::Result<ExportStatus> {
        let magazines = self
            .session
            .magazines(year)
            .await
            .with_context(|| format!("list magazines of {year}"))?;
        if magazines.is_empty() {
            anyhow::bail!("year {year} has no magazines");
        }

        match mode {
            ExportMode::Article => {
                let total = self.count_articles(&magazines).await?;
                let mut progress =
                    Progress::start(&self.events, format!("export {year} articles"), total);
                for magazine in &magazines {
                    if self.control.is_cancelled() {
                        return Ok(ExportStatus::Cancelled);
                    }
                    self.control.wait_if_paused().await;
                    let articles = self.session.articles(&magazine.id).await?;
                    if !self
                        .write_articles_individually(magazine, &articles, &mut progress)
                        .await?
                    {
                        return Ok(ExportStatus::Cancelled);
                    }
                }
            }
            ExportMode::Year | ExportMode::AllInOne => {
                let total = self.count_articles(&magazines).await?;
                let mut progress =
                    Progress::start(&self.events, format!("export year {year}"), total);
                let mut collected: Vec<(String, ArticleDetail)> = Vec::new();
                for magazine in &magazines {
                    if self.control.is_cancelled() {
                        return Ok(ExportStatus::Cancelled);
                    }
                    self.control.wait_if_paused().await;
                    let articles = self.session.articles(&magazine.id).await?;
                    let Some(details) = self
                        .collect_details(&articles, Some(&mut progress))
                        .await?
                    else {
                        return Ok(ExportStatus::Cancelled);
                    };
                    collected
                        .extend(details.into_iter().map(|d| (magazine.id.clone(), d)));
                }
                let document =
                    render::year_document(&self.prefix, year, &magazines, &collected);
                self.write_document(&document)?;
            }
            ExportMode::Issue => {
                let mut progress = Progress::start(
                    &self.events,
                    format!("export year {year}"),
                    magazines.len(),
                );
                for magazine in &magazines {
                    if self.control.is_cancelled() {
                        return Ok(ExportStatus::Cancelled);
                    }
                    self.control.wait_if_paused().await;
                    let articles = self.session.articles(&magazine.id).await?;
                    let Some(details) = self.collect_details(&articles, None).await? else {
                        return Ok(ExportStatus::Cancelled);
                    };
                    let document = render::issue_document(&self.prefix, magazine, &details);
                    self.write_document(&document)?;
                    progress.advance();
                }
            }
        }
        Ok(ExportStatus::Completed)
    }

    async fn export_all(&self, mode: ExportMode) -> anyhow::Result<ExportStatus> {
        let years = self.session.years().await.context("list years")?;
        if years.is_empty() {
            anyhow::bail!("archive reported no years");
        }

        match mode {
            ExportMode::Article => {
                let mut total = 0;
                for year in &years {
                    let magazines = self.session.magazines(year).await?;
                    total += self.count_articles(&magazines).await?;
                }
                let mut progress = Progress::start(&self.events, "export all articles", total);
                for year in &years {
                    if self.control.is_cancelled() {
                        return Ok(ExportStatus::Cancelled);
                    }
                    self.control.wait_if_paused().await;
                    let magazines = self.session.magazines(year).await?;
                    for magazine in &magazines {
                        if self.control.is_cancelled() {
                            return Ok(ExportStatus::Cancelled);
                        }
                        self.control.wait_if_paused().await;
                        let articles = self.session.articles(&magazine.id).await?;
                        if !self
                            .write_articles_individually(magazine, &articles, &mut progress)
                            .await?
                        {
                            return Ok(ExportStatus::Cancelled);
                        }
                    }
                }
            }
            ExportMode::AllInOne => {
                let mut total = 0;
                for year in &years {
                    let magazines = self.session.magazines(year).await?;
                    total += self.count_articles(&magazines).await?;
                }
                let mut progress = Progress::start(&self.events, "export full archive", total);
                let mut year_magazines: Vec<(String, Vec<Magazine>)> = Vec::new();
                let mut collected: Vec<(String, String, ArticleDetail)> = Vec::new();
                for year in &years {
                    if self.control.is_cancelled() {
                        return Ok(ExportStatus::Cancelled);
                    }
                    self.control.wait_if_paused().await;
                    let magazines = self.session.magazines(year).await?;
                    year_magazines.push((year.clone(), magazines.clone()));
                    for magazine in &magazines {
                        if self.control.is_cancelled() {
                            return Ok(ExportStatus::Cancelled);
                        }
                        self.control.wait_if_paused().await;
                        let articles = self.session.articles(&magazine.id).await?;
                        let Some(details) = self
                            .collect_details(&articles, Some(&mut progress))
                            .await?
                        else {
                            return Ok(ExportStatus::Cancelled);
                        };
                        collected.extend(
                            details
                                .into_iter()
                                .map(|d| (year.clone(), magazine.id.clone(), d)),
                        );
                    }
                }
                let document = render::all_document(&self.prefix, &year_magazines, &collected);
                self.write_document(&document)?;
            }
            ExportMode::Year => {
                let mut progress =
                    Progress::start(&self.events, "export all years", years.len());
                for year in &years {
                    if self.control.is_cancelled() {
                        return Ok(ExportStatus::Cancelled);
                    }
                    self.control.wait_if_paused().await;
                    let magazines = self.session.magazines(year).await?;
                    let mut collected: Vec<(String, ArticleDetail)> = Vec::new();
                    for magazine in &magazines {
                        if self.control.is_cancelled() {
                            return Ok(ExportStatus::Cancelled);
                        }
                        self.control.wait_if_paused().await;
                        let articles = self.session.articles(&magazine.id).await?;
                        let Some(details) = self.collect_details(&articles, None).await? else {
                            return Ok(ExportStatus::Cancelled);
                        };
                        collected
                            .extend(details.into_iter().map(|d| (magazine.id.clone(), d)));
                    }
                    let document =
                        render::year_document(&self.prefix, year, &magazines, &collected);
                    self.write_document(&document)?;
                    progress.advance();
                }
            }
            ExportMode::Issue => {
                let mut total = 0;
                for year in &years {
                    total += self.session.magazines(year).await?.len();
                }
                let mut progress = Progress::start(&self.events, "export all issues", total);
                for year in &years {
                    if self.control.is_cancelled() {
                        return Ok(ExportStatus::Cancelled);
                    }
                    self.control.wait_if_paused().await;
                    let magazines = self.session.magazines(year).await?;
                    for magazine in &magazines {
                        if self.control.is_cancelled() {
                            return Ok(ExportStatus::Cancelled);
                        }
                        self.control.wait_if_paused().await;
                        let articles = self.session.articles(&magazine.id).await?;
                        let Some(details) = self.collect_details(&articles, None).await? else {
                            return Ok(ExportStatus::Cancelled);
                        };
                        let document =
                            render::issue_document(&self.prefix, magazine, &details);
                        self.write_document(&document)?;
                        progress.advance();
                    }
                    self.log(format!("year {year} done"));
                }
            }
        }
        Ok(ExportStatus::Completed)
    }

    /// Fetches details for one magazine's batch and writes each article as
    /// its own document as fetches complete. Returns false when cancelled.
    async fn write_articles_individually(
        &self,
        magazine: &Magazine,
        articles: &[ArticleSummary],
        progress: &mut Progress<'_>,
    ) -> anyhow::Result<bool> {
        let mut tasks = self.spawn_detail_fetches(articles);
        while let Some(joined) = tasks.join_next().await {
            if self.control.is_cancelled() {
                tasks.detach_all();
                return Ok(false);
            }
            self.control.wait_if_paused().await;
            if self.control.is_cancelled() {
                tasks.detach_all();
                return Ok(false);
            }

            let (summary, result) = joined.context("join detail fetch task")?;
            match result {
                Ok(detail) => {
                    let document = render::article_document(&self.prefix, magazine, &detail);
                    self.write_document(&document)?;
                }
                Err(err) => {
                    self.log(format!("article {} detail fetch failed: {err}", summary.id));
                }
            }
            progress.advance();
        }
        Ok(true)
    }

    /// Fetches details for one magazine's batch, tolerating individual
    /// failures. Returns `None` when cancelled mid-batch; in-flight fetches
    /// are left to finish on their own and their results are discarded.
    async fn collect_details(
        &self,
        articles: &[ArticleSummary],
        mut progress: Option<&mut Progress<'_>>,
    ) -> anyhow::Result<Option<Vec<ArticleDetail>>> {
        let mut tasks = self.spawn_detail_fetches(articles);
        let mut details = Vec::with_capacity(articles.len());
        while let Some(joined) = tasks.join_next().await {
            if self.control.is_cancelled() {
                tasks.detach_all();
                return Ok(None);
            }
            self.control.wait_if_paused().await;
            if self.control.is_cancelled() {
                tasks.detach_all();
                return Ok(None);
            }

            let (summary, result) = joined.context("join detail fetch task")?;
            match result {
                Ok(detail) => details.push(detail),
                Err(err) => {
                    self.log(format!("article {} detail fetch failed: {err}", summary.id));
                }
            }
            if let Some(progress) = progress.as_deref_mut() {
                progress.advance();
            }
        }
        Ok(Some(details))
    }

    fn spawn_detail_fetches(
        &self,
        articles: &[ArticleSummary],
    ) -> JoinSet<(ArticleSummary, Result<ArticleDetail, ClientError>)> {
        let semaphore = Arc::new(Semaphore::new(DETAIL_FETCH_CONCURRENCY));
        let mut tasks = JoinSet::new();
        for article in articles {
            if self.control.is_cancelled() {
                break;
            }
            let session = Arc::clone(&self.session);
            let semaphore = Arc::clone(&semaphore);
            let article = article.clone();
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("detail fetch semaphore is closed");
                let result = session.article_detail(&article.id, Some(&article)).await;
                (article, result)
            });
        }
        tasks
    }

    async fn count_articles(&self, magazines: &[Magazine]) -> anyhow::Result<usize> {
        let mut total = 0;
        for magazine in magazines {
            total += self
                .session
                .articles(&magazine.id)
                .await
                .with_context(|| format!("list articles of {}", magazine.id))?
                .len();
        }
        Ok(total)
    }

    async fn find_magazine(&self, year: &str, magazine_id: &str) -> anyhow::Result<Magazine> {
        let magazines = self
            .session
            .magazines(year)
            .await
            .with_context(|| format!("list magazines of {year}"))?;
        magazines
            .into_iter()
            .find(|m| m.id == magazine_id)
            .ok_or_else(|| anyhow::anyhow!("magazine {magazine_id} not found in year {year}"))
    }

    // Documents are composed fully in memory and written in one operation so
    // a failed run never leaves a half-written file.
    fn write_document(&self, document: &Document) -> anyhow::Result<PathBuf> {
        std::fs::create_dir_all(&self.out_dir)
            .with_context(|| format!("create output dir: {}", self.out_dir.display()))?;
        let path = self.out_dir.join(&document.filename);
        std::fs::write(&path, document.content.as_bytes())
            .with_context(|| format!("write document: {}", path.display()))?;
        self.log(format!("wrote {}", path.display()));
        Ok(path)
    }

    fn log(&self, message: impl Into<String>) {
        let _ = self.events.send(ExportEvent::Log {
            message: message.into(),
        });
    }
}

/// CLI entry: logs in, wires Ctrl-C to cooperative cancellation and drains
/// export events into the log.
pub async fn run(args: ExportArgs) -> anyhow::Result<()> {
    let client =
        HttpArchiveClient::with_base_url(&args.base_url, Duration::from_millis(args.delay_ms))
            .context("build archive client")?;
    let session = Arc::new(Session::new(Arc::new(client)));
    session.login().await.context("login")?;

    let (events, mut events_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            match event {
                ExportEvent::Started { label, total } => tracing::info!(total, "{label}"),
                ExportEvent::Advanced {
                    label,
                    current,
                    total,
                } => tracing::info!("{label} ({current}/{total})"),
                ExportEvent::Log { message } => tracing::info!("{message}"),
            }
        }
    });

    let control = ExportControl::new();
    let ctrl_c = control.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let scope = scope_from_args(&args)?;
    let exporter = Exporter::new(
        session,
        control,
        events,
        PathBuf::from(&args.out),
        args.prefix.clone(),
    );
    let status = exporter.run_export(scope, args.mode).await;
    drop(exporter);
    let _ = printer.await;

    status?;
    Ok(())
}

fn scope_from_args(args: &ExportArgs) -> anyhow::Result<ExportScope> {
    if let Some(article_id) = &args.article {
        return Ok(ExportScope::Article {
            article_id: article_id.clone(),
        });
    }
    match (&args.magazine, &args.year) {
        (Some(magazine_id), Some(year)) => Ok(ExportScope::Issue {
            year: year.clone(),
            magazine_id: magazine_id.clone(),
        }),
        (Some(_), None) => anyhow::bail!("--magazine requires --year"),
        (None, Some(year)) => Ok(ExportScope::Year { year: year.clone() }),
        (None, None) => Ok(ExportScope::All),
    }
}
