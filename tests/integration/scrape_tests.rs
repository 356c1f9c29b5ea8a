//! Integration tests for the harvester
//!
//! These tests use wiremock to stand in for the listing site, the public
//! proxy list and the proxies themselves, and run the harvest end-to-end.

use chintai_harvest::config::{parse_config, Config, FetchConfig};
use chintai_harvest::crawler::{crawl, Coordinator, FetchOptions, ResilientFetcher};
use chintai_harvest::output::{load_statistics, merge_pages, CsvPageWriter};
use chintai_harvest::{FetchError, PageState, ProxyEndpoint, ProxyPool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Unit<'a> {
    floor: &'a str,
    size: &'a str,
    href: &'a str,
}

/// Creates a test configuration pointing at the mock site
fn create_test_config(server: &MockServer, output: &Path) -> Config {
    parse_config(&format!(
        r#"
        [site]
        search-url = "{uri}/chintai/list?page={{page}}"
        origin = "{uri}"

        [fetch]
        connect-timeout-secs = 2
        read-timeout-secs = 5
        max-attempts = 2
        backoff-ms = 1
        proxy-fallback = false

        [crawl]
        failure-threshold = 1
        page-attempts = 1
        page-retry-delay-ms = 1
        detail-workers = 4

        [output]
        directory = "{dir}"
        merged-path = "{dir}/data.csv"
        dedupe-key = ["name", "url"]

        [[building-field]]
        name = "name"
        tag = "div"
        class = "cassetteitem_content-title"

        [[building-field]]
        name = "rent"
        tag = "li"
        class = "cassetteitem_detail-col1"
        "#,
        uri = server.uri(),
        dir = output.display()
    ))
    .expect("test config should be valid")
}

fn index_page(articles: &[(&str, &str, Vec<Unit>)]) -> String {
    let mut html = String::from("<html><body>");
    for (name, rent, units) in articles {
        html.push_str(&format!(
            r#"<div class="cassetteitem">
                <div class="cassetteitem_content-title">{name}</div>
                <ul class="cassetteitem_detail"><li class="cassetteitem_detail-col1">{rent}</li></ul>
                <table class="cassetteitem_other">
                    <thead><tr><th>floor</th><th>size</th><th></th></tr></thead>"#
        ));
        for unit in units {
            html.push_str(&format!(
                r#"<tbody><tr>
                    <td>{}</td><td>{}</td>
                    <td class="ui-text--midium ui-text--bold"><a href="{}">詳細を見る</a></td>
                </tr></tbody>"#,
                unit.floor, unit.size, unit.href
            ));
        }
        html.push_str("</table></div>");
    }
    html.push_str("</body></html>");
    html
}

fn detail_page(options: &str, attributes: &[(&str, &str)]) -> String {
    let rows: String = attributes
        .iter()
        .map(|(k, v)| format!("<tr><th>{}</th><td>{}</td></tr>", k, v))
        .collect();
    format!(
        r#"<html><body>
            <div id="bkdt-option"><ul><li>{}</li></ul></div>
            <table class="data_table table_gaiyou">{}</table>
        </body></html>"#,
        options, rows
    )
}

async fn mount_page(server: &MockServer, page: &str, body: String) {
    Mock::given(method("GET"))
        .and(path("/chintai/list"))
        .and(query_param("page", page))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

async fn mount_empty_pages(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/chintai/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(server)
        .await;
}

fn read_csv(path: &Path) -> Vec<HashMap<String, String>> {
    let mut reader = csv::Reader::from_path(path).expect("page file should exist");
    let headers = reader.headers().unwrap().clone();
    reader
        .records()
        .map(|record| {
            let record = record.unwrap();
            headers
                .iter()
                .zip(record.iter())
                .map(|(h, v)| (h.to_string(), v.to_string()))
                .collect()
        })
        .collect()
}

fn fetcher_with(config: &FetchConfig, proxies: Vec<ProxyEndpoint>) -> ResilientFetcher {
    let pool = Arc::new(ProxyPool::fixed(reqwest::Client::new(), proxies));
    ResilientFetcher::new(config, pool).expect("fetcher should build")
}

fn endpoint(server: &MockServer) -> ProxyEndpoint {
    let address = server.address();
    ProxyEndpoint::new(address.ip().to_string(), address.port())
}

/// A proxy answering every request with the given response
async fn proxy_responding(response: ResponseTemplate) -> MockServer {
    let proxy = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(response)
        .mount(&proxy)
        .await;
    proxy
}

#[tokio::test]
async fn test_scenario_row_end_to_end() {
    let server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    mount_page(
        &server,
        "1",
        index_page(&[(
            "A",
            "10",
            vec![Unit {
                floor: "2F",
                size: "20m2",
                href: "/chintai/jnc_000001/",
            }],
        )]),
    )
    .await;
    mount_empty_pages(&server).await;

    Mock::given(method("GET"))
        .and(path("/chintai/jnc_000001/"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(detail_page("wifi, parking", &[("layout", "1K")])),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&server, output.path());
    let summary = crawl(config, true, "test-hash").await.unwrap();

    assert_eq!(summary.pages_harvested, 1);
    assert_eq!(summary.rows, 1);
    assert_eq!(summary.degraded_rows, 0);
    assert_eq!(summary.config_hash, "test-hash");

    let page_file = output.path().join("1.csv");
    let headers: Vec<String> = csv::Reader::from_path(&page_file)
        .unwrap()
        .headers()
        .unwrap()
        .iter()
        .map(str::to_string)
        .collect();
    assert_eq!(
        headers,
        vec!["page", "name", "rent", "floor", "size", "options", "layout", "url"]
    );

    let rows = read_csv(&page_file);
    assert_eq!(rows.len(), 1);
    let row = &rows[0];
    assert_eq!(row["page"], "1");
    assert_eq!(row["name"], "A");
    assert_eq!(row["rent"], "10");
    assert_eq!(row["floor"], "2F");
    assert_eq!(row["size"], "20m2");
    assert_eq!(row["options"], r#"["wifi","parking"]"#);
    assert_eq!(row["layout"], "1K");
    assert_eq!(row["url"], format!("{}/chintai/jnc_000001/", server.uri()));

    let stats = load_statistics(output.path()).unwrap();
    assert_eq!(stats.page_files, 1);
    assert_eq!(stats.last_run.map(|run| run.rows), Some(1));
}

#[tokio::test]
async fn test_failed_detail_degrades_only_that_row() {
    let server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    let units = vec![
        Unit {
            floor: "1F",
            size: "20m2",
            href: "/detail/1/",
        },
        Unit {
            floor: "2F",
            size: "25m2",
            href: "/detail/2/",
        },
        Unit {
            floor: "3F",
            size: "30m2",
            href: "/detail/3/",
        },
    ];
    mount_page(&server, "1", index_page(&[("A", "10", units)])).await;
    mount_empty_pages(&server).await;

    for id in ["1", "3"] {
        Mock::given(method("GET"))
            .and(path(format!("/detail/{}/", id)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(detail_page("エアコン", &[("layout", "1K")])),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/detail/2/"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = create_test_config(&server, output.path());
    let summary = crawl(config, true, "").await.unwrap();
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.degraded_rows, 1);

    let rows = read_csv(&output.path().join("1.csv"));
    assert_eq!(rows.len(), 3);

    let floors: Vec<&str> = rows.iter().map(|r| r["floor"].as_str()).collect();
    assert_eq!(floors, vec!["1F", "2F", "3F"]);

    assert_eq!(rows[0]["layout"], "1K");
    assert_eq!(rows[1]["layout"], "");
    assert_eq!(rows[1]["options"], "");
    assert_eq!(rows[1]["name"], "A");
    assert_eq!(rows[1]["url"], format!("{}/detail/2/", server.uri()));
    assert_eq!(rows[2]["options"], r#"["エアコン"]"#);
}

#[tokio::test]
async fn test_terminates_after_exactly_threshold_empty_pages() {
    let server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    let listing = || {
        index_page(&[(
            "A",
            "10",
            vec![Unit {
                floor: "1F",
                size: "20m2",
                href: "",
            }],
        )])
    };

    mount_page(&server, "1", listing()).await;
    mount_page(&server, "3", listing()).await;
    for page in ["2", "4", "5", "6"] {
        Mock::given(method("GET"))
            .and(path("/chintai/list"))
            .and(query_param("page", page))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/chintai/list"))
        .and(query_param("page", "7"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing()))
        .expect(0)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, output.path());
    config.crawl.failure_threshold = 3;

    let writer = CsvPageWriter::new(output.path());
    writer.prepare(true).unwrap();
    let mut coordinator = Coordinator::new(config, Box::new(writer)).unwrap();
    let summary = coordinator.run().await.unwrap();

    assert_eq!(coordinator.state(), PageState::Terminated);
    assert_eq!(summary.pages_visited, 6);
    assert_eq!(summary.pages_harvested, 2);
    assert_eq!(summary.pages_empty, 4);
    assert_eq!(summary.last_page, Some(6));
    assert!(summary
        .termination
        .as_deref()
        .unwrap_or_default()
        .contains("3 consecutive"));
}

#[tokio::test]
async fn test_max_pages_bounds_the_run() {
    let server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    let listing = index_page(&[(
        "A",
        "10",
        vec![Unit {
            floor: "1F",
            size: "20m2",
            href: "",
        }],
    )]);
    Mock::given(method("GET"))
        .and(path("/chintai/list"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing))
        .expect(2)
        .mount(&server)
        .await;

    let mut config = create_test_config(&server, output.path());
    config.crawl.start_page = 5;
    config.crawl.max_pages = Some(2);

    let summary = crawl(config, true, "").await.unwrap();
    assert_eq!(summary.pages_harvested, 2);
    assert!(output.path().join("5.csv").exists());
    assert!(output.path().join("6.csv").exists());
    assert!(!output.path().join("7.csv").exists());
}

#[tokio::test]
async fn test_empty_content_without_redirects_falls_back_to_proxies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/detail/9/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let proxy = proxy_responding(ResponseTemplate::new(200).set_body_string("via proxy")).await;

    let config = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        ..FetchConfig::default()
    };
    let fetcher = fetcher_with(&config, vec![endpoint(&proxy)]);
    let url = format!("{}/detail/9/", server.uri());

    let without_fallback = FetchOptions {
        allow_redirects: false,
        allow_proxy_fallback: false,
        ..FetchOptions::default()
    };
    let result = fetcher.fetch(&url, &without_fallback).await;
    assert!(matches!(result, Err(FetchError::EmptyContent { .. })));

    let with_fallback = FetchOptions {
        allow_redirects: false,
        allow_proxy_fallback: true,
        ..FetchOptions::default()
    };
    let body = fetcher.fetch(&url, &with_fallback).await.unwrap();
    assert_eq!(body, "via proxy");
    assert_eq!(fetcher.stats().proxy_wins, 1);
}

#[tokio::test]
async fn test_only_succeeding_proxy_wins_regardless_of_position() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let winner = proxy_responding(ResponseTemplate::new(200).set_body_string("from E")).await;
    let losers = vec![
        proxy_responding(ResponseTemplate::new(502)).await,
        proxy_responding(ResponseTemplate::new(403)).await,
        proxy_responding(ResponseTemplate::new(200)).await,
        proxy_responding(ResponseTemplate::new(407)).await,
    ];

    let config = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        ..FetchConfig::default()
    };
    let url = format!("{}/chintai/list?page=1", server.uri());

    for position in 0..=losers.len() {
        let mut endpoints: Vec<ProxyEndpoint> = losers.iter().map(endpoint).collect();
        endpoints.insert(position, endpoint(&winner));

        let fetcher = fetcher_with(&config, endpoints);
        let body = fetcher.fetch(&url, &FetchOptions::page()).await.unwrap();
        assert_eq!(body, "from E", "winner at position {}", position);
    }
}

#[tokio::test]
async fn test_all_proxies_exhausted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let proxies = vec![
        proxy_responding(ResponseTemplate::new(502)).await,
        proxy_responding(ResponseTemplate::new(200)).await,
    ];

    let config = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        ..FetchConfig::default()
    };
    let fetcher = fetcher_with(&config, proxies.iter().map(endpoint).collect());
    let result = fetcher
        .fetch(&format!("{}/x", server.uri()), &FetchOptions::page())
        .await;
    assert!(matches!(
        result,
        Err(FetchError::AllProxiesExhausted { attempted: 2, .. })
    ));
}

#[tokio::test]
async fn test_proxy_pool_from_public_list_page() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/blocked"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let proxy = proxy_responding(ResponseTemplate::new(200).set_body_string("listed proxy")).await;
    let address = proxy.address();

    let list = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!(
            r#"<html><body><table class="table table-striped">
                <thead><tr><th>IP Address</th><th>Port</th><th>Code</th></tr></thead>
                <tbody><tr><td>{}</td><td>{}</td><td>JP</td></tr></tbody>
            </table></body></html>"#,
            address.ip(),
            address.port()
        )))
        .expect(1)
        .mount(&list)
        .await;

    let config = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        proxy_source: format!("{}/", list.uri()),
        ..FetchConfig::default()
    };
    let fetcher = ResilientFetcher::from_config(&config).unwrap();
    let url = format!("{}/blocked", server.uri());

    for _ in 0..2 {
        let body = fetcher.fetch(&url, &FetchOptions::page()).await.unwrap();
        assert_eq!(body, "listed proxy");
    }
    assert_eq!(fetcher.stats().proxy_races, 2);
}

#[tokio::test]
async fn test_proxy_source_failure_surfaces_direct_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let list = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&list)
        .await;

    let config = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        proxy_source: list.uri(),
        ..FetchConfig::default()
    };
    let fetcher = ResilientFetcher::from_config(&config).unwrap();
    let result = fetcher
        .fetch(&format!("{}/x", server.uri()), &FetchOptions::page())
        .await;
    assert!(matches!(
        result,
        Err(FetchError::DirectFetchFailed { ref reason, .. }) if reason == "HTTP 403"
    ));
}

#[tokio::test]
async fn test_merge_deduplicates_across_pages() {
    let server = MockServer::start().await;
    let output = TempDir::new().unwrap();

    let same = || Unit {
        floor: "1F",
        size: "20m2",
        href: "/detail/1/",
    };
    mount_page(&server, "1", index_page(&[("A", "10", vec![same()])])).await;
    mount_page(
        &server,
        "2",
        index_page(&[(
            "A",
            "10",
            vec![
                same(),
                Unit {
                    floor: "2F",
                    size: "25m2",
                    href: "/detail/2/",
                },
            ],
        )]),
    )
    .await;
    mount_empty_pages(&server).await;
    Mock::given(method("GET"))
        .and(path("/detail/1/"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/detail/2/"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(detail_page("wifi", &[("layout", "2K")])),
        )
        .mount(&server)
        .await;

    let config = create_test_config(&server, output.path());
    let dedupe_key = config.output.dedupe_key.clone();
    let merged_path = output.path().join("data.csv");

    let summary = crawl(config, true, "").await.unwrap();
    assert_eq!(summary.rows, 3);

    let report = merge_pages(output.path(), &merged_path, &dedupe_key).unwrap();
    assert_eq!(report.pages, 2);
    assert_eq!(report.rows_written, 2);
    assert_eq!(report.duplicates, 1);

    let rows = read_csv(&merged_path);
    assert_eq!(rows[0]["page"], "1");
    assert_eq!(rows[1]["floor"], "2F");
    assert_eq!(rows[1]["layout"], "2K");
}

#[tokio::test]
async fn test_fresh_run_clears_previous_pages() {
    let server = MockServer::start().await;
    let output = TempDir::new().unwrap();
    std::fs::write(output.path().join("42.csv"), "page\n42\n").unwrap();

    mount_empty_pages(&server).await;

    let config = create_test_config(&server, output.path());
    let summary = crawl(config, true, "").await.unwrap();

    assert_eq!(summary.pages_empty, 1);
    assert!(!output.path().join("42.csv").exists());

    let stats = load_statistics(output.path()).unwrap();
    assert_eq!(stats.page_files, 0);
    assert_eq!(stats.last_run.map(|run| run.pages_empty), Some(1));
}

#[tokio::test]
async fn test_first_completed_proxy_wins_and_slower_attempts_are_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let slow = proxy_responding(
        ResponseTemplate::new(200)
            .set_body_string("slow")
            .set_delay(Duration::from_secs(5)),
    )
    .await;
    let fast = proxy_responding(ResponseTemplate::new(200).set_body_string("fast")).await;

    let config = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        ..FetchConfig::default()
    };
    let fetcher = fetcher_with(&config, vec![endpoint(&slow), endpoint(&fast)]);

    let started = Instant::now();
    let body = fetcher
        .fetch(&format!("{}/x", server.uri()), &FetchOptions::page())
        .await
        .unwrap();

    assert_eq!(body, "fast");
    assert!(
        started.elapsed() < Duration::from_secs(3),
        "race waited for the slower proxy: {:?}",
        started.elapsed()
    );
}

#[tokio::test]
async fn test_proxy_concurrency_bounds_attempts_in_flight() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let delay = Duration::from_millis(400);
    let mut proxies = Vec::new();
    for _ in 0..3 {
        proxies.push(proxy_responding(ResponseTemplate::new(502).set_delay(delay)).await);
    }
    let endpoints: Vec<ProxyEndpoint> = proxies.iter().map(endpoint).collect();
    let url = format!("{}/x", server.uri());

    let serial = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        proxy_concurrency: 1,
        ..FetchConfig::default()
    };
    let started = Instant::now();
    let result = fetcher_with(&serial, endpoints.clone())
        .fetch(&url, &FetchOptions::page())
        .await;
    let serial_elapsed = started.elapsed();
    assert!(matches!(
        result,
        Err(FetchError::AllProxiesExhausted { attempted: 3, .. })
    ));
    assert!(
        serial_elapsed >= delay * 3,
        "attempts overlapped with a cap of 1: {:?}",
        serial_elapsed
    );

    let parallel = FetchConfig {
        proxy_concurrency: 3,
        ..serial
    };
    let started = Instant::now();
    let result = fetcher_with(&parallel, endpoints)
        .fetch(&url, &FetchOptions::page())
        .await;
    assert!(matches!(
        result,
        Err(FetchError::AllProxiesExhausted { attempted: 3, .. })
    ));
    assert!(started.elapsed() < delay * 3);
}

#[tokio::test]
async fn test_concurrent_fetches_share_one_proxy_list_download() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let proxy = proxy_responding(ResponseTemplate::new(200).set_body_string("listed")).await;
    let address = proxy.address();

    let list = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(format!(
                    "<table><tr><th>IP Address</th><th>Port</th></tr><tr><td>{}</td><td>{}</td></tr></table>",
                    address.ip(),
                    address.port()
                ))
                .set_delay(Duration::from_millis(300)),
        )
        .expect(1)
        .mount(&list)
        .await;

    let config = FetchConfig {
        max_attempts: 1,
        backoff_ms: 1,
        proxy_source: list.uri(),
        ..FetchConfig::default()
    };
    let fetcher = Arc::new(ResilientFetcher::from_config(&config).unwrap());

    let mut fetches = tokio::task::JoinSet::new();
    for n in 0..6 {
        let fetcher = Arc::clone(&fetcher);
        let url = format!("{}/page/{}", server.uri(), n);
        fetches.spawn(async move { fetcher.fetch(&url, &FetchOptions::page()).await });
    }
    while let Some(joined) = fetches.join_next().await {
        assert_eq!(joined.unwrap().unwrap(), "listed");
    }
    assert_eq!(fetcher.stats().proxy_wins, 6);
}
