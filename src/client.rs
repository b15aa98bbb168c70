use std::time::Duration;

use async_trait::async_trait;
use rand::Rng as _;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ORIGIN, REFERER, USER_AGENT};
use serde::Deserialize;

use crate::records::{ArticleDetail, ArticleSummary, Magazine};

/// Root of the archive site; every endpoint path is relative to this.
pub const BASE_URL: &str = "http://szb.iziran.net";

/// Column id of the 中国土地 periodical within the archive.
const COLUMN_ID: &str = "2";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Jitter applied around the configured inter-request delay.
const DELAY_JITTER: Duration = Duration::from_millis(300);

/// Failure taxonomy of the remote archive boundary.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("login rejected: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("undecodable response: {0}")]
    ResponseFormat(String),
    #[error("unexpected payload shape: {0}")]
    DataFormat(String),
    #[error("archive reported failure: {0}")]
    Api(String),
}

/// Contract of the remote archive. Implemented over HTTP in production and
/// by in-memory fakes in tests.
#[async_trait]
pub trait ArchiveApi: Send + Sync {
    async fn login(&self) -> Result<(), ClientError>;
    async fn fetch_years(&self) -> Result<Vec<String>, ClientError>;
    async fn fetch_magazines(&self, year: &str) -> Result<Vec<Magazine>, ClientError>;
    async fn fetch_articles(&self, magazine_id: &str)
        -> Result<Vec<ArticleSummary>, ClientError>;
    async fn fetch_article_detail(&self, article_id: &str)
        -> Result<ArticleDetail, ClientError>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: serde_json::Value,
}

/// reqwest-backed archive client. Sends the browser-imitation header set the
/// site expects and sleeps a jittered delay after each call so the remote is
/// not hammered.
pub struct HttpArchiveClient {
    http: reqwest::Client,
    base_url: String,
    delay: Duration,
}

impl HttpArchiveClient {
    pub fn new(delay: Duration) -> Result<Self, ClientError> {
        Self::with_base_url(BASE_URL, delay)
    }

    pub fn with_base_url(base_url: &str, delay: Duration) -> Result<Self, ClientError> {
        let base_url = base_url.trim_end_matches('/').to_owned();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(common_headers(&base_url))
            .build()
            .map_err(|err| ClientError::Network(format!("build http client: {err}")))?;
        Ok(Self {
            http,
            base_url,
            delay,
        })
    }

    async fn request(
        &self,
        method: reqwest::Method,
        path: &str,
        form: &[(&str, &str)],
        query: &[(&str, String)],
    ) -> Result<serde_json::Value, ClientError> {
        let url = format!("{}{path}", self.base_url);
        let mut request = self.http.request(method, &url);
        if !query.is_empty() {
            request = request.query(query);
        }
        if !form.is_empty() {
            request = request.form(form);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                ClientError::Network(format!("request timed out: {url}"))
            } else {
                ClientError::Network(format!("{url}: {err}"))
            }
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Network(format!("{url}: http status {status}")));
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|err| ClientError::ResponseFormat(format!("{url}: {err}")))?;
        if !envelope.success {
            let message = envelope.message.unwrap_or_else(|| "unknown error".to_owned());
            return Err(ClientError::Api(format!("{url}: {message}")));
        }
        Ok(envelope.data)
    }

    async fn respect_delay(&self) {
        let jitter = DELAY_JITTER.as_secs_f64();
        let offset = rand::thread_rng().gen_range(-jitter..=jitter);
        let seconds = (self.delay.as_secs_f64() + offset).max(0.0);
        if seconds > 0.0 {
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
        }
    }
}

#[async_trait]
impl ArchiveApi for HttpArchiveClient {
    async fn login(&self) -> Result<(), ClientError> {
        let rd = chrono::Utc::now().timestamp_millis().to_string();
        let result = self
            .request(reqwest::Method::GET, "/user/ipLogin", &[], &[("rd", rd)])
            .await;
        match result {
            Ok(_) => {
                self.respect_delay().await;
                Ok(())
            }
            // The login endpoint signals rejection through the envelope.
            Err(ClientError::Api(message)) => Err(ClientError::Auth(message)),
            Err(err) => Err(err),
        }
    }

    async fn fetch_years(&self) -> Result<Vec<String>, ClientError> {
        let data = self
            .request(
                reqwest::Method::POST,
                "/magazine/queryYearByColumn",
                &[("columnId", COLUMN_ID)],
                &[],
            )
            .await?;
        let serde_json::Value::Array(raw) = data else {
            return Err(ClientError::DataFormat("years payload is not a list".to_owned()));
        };
        let years = raw
            .into_iter()
            .map(|value| match value {
                serde_json::Value::String(year) => Ok(year),
                serde_json::Value::Number(year) => Ok(year.to_string()),
                other => Err(ClientError::DataFormat(format!(
                    "year entry is not a string: {other}"
                ))),
            })
            .collect::<Result<Vec<String>, ClientError>>()?;
        self.respect_delay().await;
        Ok(years)
    }

    async fn fetch_magazines(&self, year: &str) -> Result<Vec<Magazine>, ClientError> {
        let data = self
            .request(
                reqwest::Method::POST,
                "/magazine/queryMagazineByColumn",
                &[("columnId", COLUMN_ID), ("year", year)],
                &[],
            )
            .await?;
        let magazines: Vec<Magazine> = serde_json::from_value(data)
            .map_err(|err| ClientError::DataFormat(format!("magazine list: {err}")))?;
        self.respect_delay().await;
        Ok(magazines)
    }

    async fn fetch_articles(
        &self,
        magazine_id: &str,
    ) -> Result<Vec<ArticleSummary>, ClientError> {
        let data = self
            .request(
                reqwest::Method::POST,
                "/magazine/getArticleByMagazineId",
                &[("magazineId", magazine_id)],
                &[],
            )
            .await?;
        let articles: Vec<ArticleSummary> = serde_json::from_value(data)
            .map_err(|err| ClientError::DataFormat(format!("article list: {err}")))?;
        self.respect_delay().await;
        Ok(articles)
    }

    async fn fetch_article_detail(
        &self,
        article_id: &str,
    ) -> Result<ArticleDetail, ClientError> {
        let data = self
            .request(
                reqwest::Method::POST,
                "/magazine/getArticleById",
                &[("articleId", article_id)],
                &[],
            )
            .await?;
        if !data.is_object() {
            return Err(ClientError::DataFormat(
                "article detail payload is not an object".to_owned(),
            ));
        }
        let detail: ArticleDetail = serde_json::from_value(data)
            .map_err(|err| ClientError::DataFormat(format!("article detail: {err}")))?;
        self.respect_delay().await;
        Ok(detail)
    }
}

fn common_headers(base_url: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_static(
            "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
             (KHTML, like Gecko) Chrome/127.0.0.0 Safari/537.36",
        ),
    );
    // Header names are sent lowercase; the site treats them
    // case-insensitively. `brower_language` is the site's own typo.
    headers.insert("site", HeaderValue::from_static("iziran"));
    headers.insert("brower_language", HeaderValue::from_static("zh-CN"));
    headers.insert("screen", HeaderValue::from_static("1080x1920"));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/javascript, */*; q=0.01"),
    );
    if let Ok(origin) = HeaderValue::from_str(base_url) {
        headers.insert(ORIGIN, origin);
    }
    if let Ok(referer) =
        HeaderValue::from_str(&format!("{base_url}/zazhi-pc/html/index.html?cid={COLUMN_ID}"))
    {
        headers.insert(REFERER, referer);
    }
    let identity = format!("crawler-{}", uuid::Uuid::new_v4());
    if let Ok(identity) = HeaderValue::from_str(&identity) {
        headers.insert("myidentity", identity);
    }
    headers
}
