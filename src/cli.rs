use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::client;

#[derive(Debug, Parser)]
#[command(author, version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Log in and list the archive's available years.
    Years(YearsArgs),
    /// List one year's issues.
    Issues(IssuesArgs),
    /// List one issue's articles in reading order.
    Articles(ArticlesArgs),
    /// Fetch articles and write Markdown documents.
    Export(ExportArgs),
    /// Rebuild issue documents from an NDJSON dump, offline.
    Ingest(IngestArgs),
}

/// Output granularity of an export run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExportMode {
    /// Every article as its own document.
    Article,
    /// One document per issue.
    Issue,
    /// One document per year, grouped by issue.
    Year,
    /// The whole scope merged into a single document.
    AllInOne,
}

#[derive(Debug, Args)]
pub struct YearsArgs {
    /// Archive root URL.
    #[arg(long, default_value = client::BASE_URL)]
    pub base_url: String,

    /// Delay between requests, milliseconds.
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,
}

#[derive(Debug, Args)]
pub struct IssuesArgs {
    /// Archive root URL.
    #[arg(long, default_value = client::BASE_URL)]
    pub base_url: String,

    /// Year to list, e.g. 2023.
    #[arg(long)]
    pub year: String,

    /// Delay between requests, milliseconds.
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,
}

#[derive(Debug, Args)]
pub struct ArticlesArgs {
    /// Archive root URL.
    #[arg(long, default_value = client::BASE_URL)]
    pub base_url: String,

    /// Magazine (issue) id to list.
    #[arg(long)]
    pub magazine: String,

    /// Delay between requests, milliseconds.
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    /// Archive root URL.
    #[arg(long, default_value = client::BASE_URL)]
    pub base_url: String,

    /// Output directory for Markdown documents.
    #[arg(long)]
    pub out: String,

    /// Filename and heading prefix.
    #[arg(long, default_value = "中国土地")]
    pub prefix: String,

    /// Output granularity.
    #[arg(long, value_enum, default_value_t = ExportMode::Issue)]
    pub mode: ExportMode,

    /// Restrict the export to one year.
    #[arg(long)]
    pub year: Option<String>,

    /// Restrict the export to one magazine (issue) id; requires --year.
    #[arg(long, requires = "year")]
    pub magazine: Option<String>,

    /// Export a single article by id.
    #[arg(long, conflicts_with_all = ["magazine", "year"])]
    pub article: Option<String>,

    /// Delay between requests, milliseconds.
    #[arg(long, default_value_t = 1500)]
    pub delay_ms: u64,
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// Input NDJSON file, one `{magazine, article, year}` record per line.
    #[arg(long)]
    pub input: String,

    /// Output directory for Markdown documents.
    #[arg(long)]
    pub out: String,

    /// Filename and heading prefix.
    #[arg(long, default_value = "中国土地")]
    pub prefix: String,
}
