#![allow(non_snake_case)]

use std::{net::SocketAddr, sync::Arc, time::Duration};

use chrono::NaiveDate;
use coverage_core::{AggregateRow, AggregateTable, Counter};
use coverage_dashboard::{
    refresh::{RefreshLoop, SharedCharts, TickOutcome},
    server::DashboardServer,
    store::{AggregateStore, ObjectStoreAggregateStore},
};
use hyper::{body, Body, Client, Method, Request, StatusCode};
use serde_json::Value;
use tokio::{sync::oneshot, task::JoinHandle, time::timeout};

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 5, day).expect("valid date")
}

fn history() -> AggregateTable {
    AggregateTable::new(vec![
        AggregateRow::new("azure-core", date(1), Counter::new(4, 16), Counter::new(2, 6)),
        AggregateRow::new("azure-identity", date(1), Counter::new(5, 5), Counter::new(0, 0)),
        AggregateRow::new("azure-core", date(2), Counter::new(0, 20), Counter::new(0, 8)),
        AggregateRow::new("azure-identity", date(2), Counter::new(2, 8), Counter::new(1, 1)),
    ])
}

struct RunningDashboard {
    address: SocketAddr,
    refresh: Arc<RefreshLoop>,
    store: Arc<ObjectStoreAggregateStore>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

impl RunningDashboard {
    async fn start(seed: Option<AggregateTable>) -> Self {
        let store = Arc::new(ObjectStoreAggregateStore::memory());
        if let Some(table) = seed {
            store.save(&table, date(2)).await.expect("seed aggregate");
        }
        let refresh = Arc::new(RefreshLoop::new(
            store.clone(),
            Arc::new(SharedCharts::new()),
            Duration::from_secs(3600),
        ));

        let listener = DashboardServer::bind("127.0.0.1:0".parse().expect("addr")).expect("bind");
        let address = listener.local_addr().expect("local addr");
        let server = DashboardServer::new(refresh.clone(), "Coverage", Duration::from_secs(5));
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve_with_shutdown(listener, async move {
                    let _ = stopped.await;
                })
                .await
                .expect("serve");
        });

        Self {
            address,
            refresh,
            store,
            stop,
            task,
        }
    }

    async fn request(&self, method: Method, path: &str) -> (StatusCode, Vec<u8>) {
        let request = Request::builder()
            .method(method)
            .uri(format!("http://{}{}", self.address, path))
            .body(Body::empty())
            .expect("request");
        let response = Client::new().request(request).await.expect("response");
        let status = response.status();
        let bytes = body::to_bytes(response.into_body()).await.expect("body");
        (status, bytes.to_vec())
    }

    async fn get_json(&self, path: &str) -> Value {
        let (status, bytes) = self.request(Method::GET, path).await;
        assert_eq!(status, StatusCode::OK, "GET {path}");
        serde_json::from_slice(&bytes).expect("json body")
    }

    async fn stop(self) {
        self.stop.send(()).expect("send stop");
        timeout(Duration::from_secs(5), self.task)
            .await
            .expect("server did not stop")
            .expect("server join");
    }
}

#[tokio::test]
async fn dashboard__before_first_refresh__then_empty_charts_and_starting_health() {
    let dashboard = RunningDashboard::start(None).await;

    let health = dashboard.get_json("/healthz").await;
    let charts = dashboard.get_json("/api/charts").await;

    assert_eq!(health["status"], "starting");
    assert_eq!(charts["generation"], 0);
    assert_eq!(charts["refreshedAt"], Value::Null);
    assert!(charts["instruction"]["data"]
        .as_array()
        .expect("traces")
        .is_empty());

    dashboard.stop().await;
}

#[tokio::test]
async fn dashboard__after_refresh__then_serves_published_figures() {
    let dashboard = RunningDashboard::start(Some(history())).await;
    let outcome = dashboard.refresh.tick().await;
    assert!(matches!(outcome, TickOutcome::Published { rows: 4, .. }));

    let charts = dashboard.get_json("/api/charts").await;

    assert_eq!(charts["generation"], 1);
    assert_eq!(charts["latestDate"], "2020-05-02");
    let instruction = charts["instruction"]["data"].as_array().expect("traces");
    assert_eq!(instruction.len(), 2);
    assert_eq!(instruction[0]["name"], "azure-core");
    assert_eq!(instruction[0]["visible"], true);
    assert_eq!(instruction[0]["x"], serde_json::json!(["2020-05-01", "2020-05-02"]));
    assert_eq!(instruction[0]["y"], serde_json::json!([80.0, 100.0]));
    assert_eq!(instruction[1]["visible"], "legendonly");
    assert_eq!(charts["branch"]["data"][1]["y"][0], Value::Null);

    let latest = dashboard.get_json("/api/charts/latest").await;
    assert_eq!(latest["layout"]["title"]["text"], "Latest Coverage (2020-05-02)");
    assert_eq!(
        latest["data"][0]["x"],
        serde_json::json!(["azure-core", "azure-identity"])
    );

    dashboard.stop().await;
}

#[tokio::test]
async fn dashboard__store_updated__then_next_tick_bumps_generation() {
    let dashboard = RunningDashboard::start(Some(history())).await;
    dashboard.refresh.tick().await;

    let mut grown = history().into_rows();
    grown.push(AggregateRow::new(
        "azure-core",
        date(3),
        Counter::new(1, 19),
        Counter::new(0, 8),
    ));
    dashboard
        .store
        .save(&AggregateTable::new(grown), date(3))
        .await
        .expect("save grown aggregate");
    dashboard.refresh.tick().await;

    let charts = dashboard.get_json("/api/charts").await;
    let health = dashboard.get_json("/healthz").await;

    assert_eq!(charts["generation"], 2);
    assert_eq!(charts["latestDate"], "2020-05-03");
    assert_eq!(health["status"], "ok");
    assert_eq!(health["refreshState"], "idle");

    dashboard.stop().await;
}

#[tokio::test]
async fn dashboard__page_and_unknown_routes__then_html_404_and_405() {
    let dashboard = RunningDashboard::start(None).await;

    let (status, page) = dashboard.request(Method::GET, "/").await;
    assert_eq!(status, StatusCode::OK);
    let page = String::from_utf8(page).expect("utf8 page");
    assert!(page.contains("<title>Coverage</title>"));
    assert!(page.contains("/api/charts"));

    let (status, _) = dashboard.request(Method::GET, "/missing").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = dashboard.request(Method::DELETE, "/api/charts").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);

    dashboard.stop().await;
}
