use std::fs;
use std::io::Read as _;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use predicates::prelude::*;
use serde_json::json;

/// Fake archive speaking the site's JSON envelope protocol. Returns the
/// request log when shut down so tests can assert on traffic.
struct ArchiveServer {
    base_url: String,
    shutdown: mpsc::Sender<()>,
    handle: thread::JoinHandle<Vec<String>>,
}

impl ArchiveServer {
    fn spawn(failing_articles: &[&str]) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");
        let failing: Vec<String> = failing_articles.iter().map(|s| (*s).to_owned()).collect();

        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            let mut log = Vec::new();
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let url = request.url().to_string();
                let path = url.split('?').next().unwrap_or(&url).to_owned();
                let mut body = String::new();
                let _ = request.as_reader().read_to_string(&mut body);

                let payload = match path.as_str() {
                    "/user/ipLogin" => {
                        log.push(path.clone());
                        json!({"success": true, "data": {}})
                    }
                    "/magazine/queryYearByColumn" => {
                        log.push(path.clone());
                        json!({"success": true, "data": ["2023"]})
                    }
                    "/magazine/queryMagazineByColumn" => {
                        log.push(path.clone());
                        json!({"success": true, "data": [{
                            // year arrives as a number on this endpoint
                            "id": "m1",
                            "year": 2023,
                            "pageName": "第1期",
                            "date": "2023-01-01",
                            "title": "中国土地2023年第1期"
                        }]})
                    }
                    "/magazine/getArticleByMagazineId" => {
                        log.push(path.clone());
                        json!({"success": true, "data": [
                            {"id": "a1", "index": "2", "title": "乙文",
                             "author": "记者乙", "pageNumber": "9"},
                            {"id": "a2", "index": 1, "title": "甲文",
                             "author": "记者甲", "pageNumber": "4", "column": "要闻"}
                        ]})
                    }
                    "/magazine/getArticleById" => {
                        let article_id = form_value(&body, "articleId").unwrap_or_default();
                        log.push(format!("{path}:{article_id}"));
                        if failing.iter().any(|id| *id == article_id) {
                            json!({"success": false, "message": "文章不可用"})
                        } else {
                            // Details carry only the body; headings come from
                            // list-view enrichment.
                            let html = match article_id.as_str() {
                                "a1" => concat!(
                                    "<p>乙文正文</p>",
                                    "<img src=\"<%basePath%>/batch/p1.png\" alt=\"图一\">"
                                ),
                                _ => "<p>甲文正文</p><script>bad()</script>",
                            };
                            json!({"success": true, "data": {
                                "id": article_id,
                                "html": html
                            }})
                        }
                    }
                    _ => {
                        log.push(path.clone());
                        json!({"success": false, "message": "not found"})
                    }
                };

                let header = tiny_http::Header::from_bytes(
                    &b"Content-Type"[..],
                    &b"application/json; charset=utf-8"[..],
                )
                .expect("build header");
                let response =
                    tiny_http::Response::from_string(payload.to_string()).with_header(header);
                let _ = request.respond(response);
            }
            log
        });

        Self {
            base_url,
            shutdown: shutdown_tx,
            handle,
        }
    }

    fn finish(self) -> Vec<String> {
        let _ = self.shutdown.send(());
        self.handle.join().expect("join server thread")
    }
}

fn form_value(body: &str, key: &str) -> Option<String> {
    body.split('&').find_map(|pair| {
        let (name, value) = pair.split_once('=')?;
        (name == key).then(|| value.to_owned())
    })
}

#[test]
fn issue_export_writes_enriched_ordered_document() -> anyhow::Result<()> {
    let server = ArchiveServer::spawn(&[]);
    let temp = tempfile::TempDir::new()?;
    let out_dir = temp.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("magmd");
    cmd.args([
        "export",
        "--base-url",
        &server.base_url,
        "--out",
        out_dir.to_str().unwrap(),
        "--year",
        "2023",
        "--magazine",
        "m1",
        "--mode",
        "issue",
        "--delay-ms",
        "0",
    ])
    .assert()
    .success();

    let content = fs::read_to_string(out_dir.join("2023_第1期.md"))?;
    assert!(content.starts_with("# 中国土地2023年第1期"));
    assert!(content.contains("- 出版日期：2023-01-01"));

    // Headings come from the list view, body order from the index.
    let first = content.find("## 001 甲文").expect("first article");
    let second = content.find("## 002 乙文").expect("second article");
    assert!(first < second);
    assert!(content.contains("- 栏目：要闻"));
    assert!(content.contains("![图一](http://szb.iziran.net/dataFile/batch/p1.png)"));
    assert!(!content.contains("<%basePath%>"));
    assert!(!content.contains("<script>"));

    let log = server.finish();
    let detail_requests = log
        .iter()
        .filter(|entry| entry.starts_with("/magazine/getArticleById"))
        .count();
    assert_eq!(detail_requests, 2);
    Ok(())
}

#[test]
fn article_mode_writes_one_file_per_article() -> anyhow::Result<()> {
    let server = ArchiveServer::spawn(&[]);
    let temp = tempfile::TempDir::new()?;
    let out_dir = temp.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("magmd");
    cmd.args([
        "export",
        "--base-url",
        &server.base_url,
        "--out",
        out_dir.to_str().unwrap(),
        "--year",
        "2023",
        "--magazine",
        "m1",
        "--mode",
        "article",
        "--delay-ms",
        "0",
    ])
    .assert()
    .success();

    assert!(out_dir.join("中国土地_2023_第1期_001_甲文.md").is_file());
    assert!(out_dir.join("中国土地_2023_第1期_002_乙文.md").is_file());
    server.finish();
    Ok(())
}

#[test]
fn failed_detail_is_skipped_without_failing_the_export() -> anyhow::Result<()> {
    let server = ArchiveServer::spawn(&["a2"]);
    let temp = tempfile::TempDir::new()?;
    let out_dir = temp.path().join("out");

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("magmd");
    cmd.args([
        "export",
        "--base-url",
        &server.base_url,
        "--out",
        out_dir.to_str().unwrap(),
        "--year",
        "2023",
        "--magazine",
        "m1",
        "--mode",
        "issue",
        "--delay-ms",
        "0",
    ])
    .assert()
    .success()
    .stderr(predicate::str::contains("a2"));

    let content = fs::read_to_string(out_dir.join("2023_第1期.md"))?;
    assert!(content.contains("乙文正文"));
    assert!(!content.contains("甲文正文"));
    server.finish();
    Ok(())
}

#[test]
fn years_command_lists_archive_years() -> anyhow::Result<()> {
    let server = ArchiveServer::spawn(&[]);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("magmd");
    cmd.args(["years", "--base-url", &server.base_url, "--delay-ms", "0"])
        .assert()
        .success()
        .stdout("2023\n");
    server.finish();
    Ok(())
}

#[test]
fn articles_command_lists_in_reading_order() -> anyhow::Result<()> {
    let server = ArchiveServer::spawn(&[]);

    let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("magmd");
    cmd.args([
        "articles",
        "--base-url",
        &server.base_url,
        "--magazine",
        "m1",
        "--delay-ms",
        "0",
    ])
    .assert()
    .success()
    .stdout("001\ta2\t甲文\n002\ta1\t乙文\n");
    server.finish();
    Ok(())
}
