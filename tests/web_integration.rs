//! Integration tests for the HTTP surface.
//!
//! Each test spins up an Axum server on a random port over an in-memory
//! store and talks to it with reqwest.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::net::TcpListener;

use mailstash::ingest::NormalizedRecord;
use mailstash::store::{InsertOutcome, LibSqlBackend, RecordStore};
use mailstash::web::router;

fn record(id: &str, subject: &str, sender: &str, date: &str, body: &str) -> NormalizedRecord {
    NormalizedRecord {
        external_id: id.into(),
        subject: subject.into(),
        sender: sender.into(),
        date: date.into(),
        body: body.into(),
        content_type: "text/plain".into(),
    }
}

/// Start a server over a store seeded with `records`; returns (base url, store).
async fn start_server(records: &[NormalizedRecord]) -> (String, Arc<LibSqlBackend>) {
    let store = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    for r in records {
        store.insert_if_absent(r).await.unwrap();
    }

    let app = router(store.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    tokio::time::sleep(Duration::from_millis(50)).await;

    (format!("http://127.0.0.1:{port}"), store)
}

fn many(n: usize) -> Vec<NormalizedRecord> {
    (1..=n)
        .map(|i| {
            record(
                &i.to_string(),
                &format!("subject {i}"),
                "a@b.c",
                &format!("2024-01-{i:02} 10:00:00"),
                "body",
            )
        })
        .collect()
}

// ── Health & pages ──────────────────────────────────────────────────

#[tokio::test]
async fn health_reports_ok() {
    let (base, _) = start_server(&[]).await;
    let body: Value = reqwest::get(format!("{base}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn pages_escape_message_content() {
    let (base, _) = start_server(&[record(
        "1",
        "<script>alert(1)</script>",
        "Eve <eve@evil.com>",
        "2024-01-01 10:00:00",
        "<img src=x onerror=alert(1)>",
    )])
    .await;

    for path in ["/", "/emails"] {
        let resp = reqwest::get(format!("{base}{path}")).await.unwrap();
        assert_eq!(resp.status(), 200);
        let html = resp.text().await.unwrap();
        assert!(html.contains("&lt;script&gt;alert(1)&lt;/script&gt;"), "{path}");
        assert!(!html.contains("<script>alert(1)"), "{path}");
        assert!(!html.contains("<img src=x"), "{path}");
    }
}

#[tokio::test]
async fn email_page_for_unknown_id_is_404() {
    let (base, _) = start_server(&[]).await;
    let resp = reqwest::get(format!("{base}/emails/nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
    assert!(resp.text().await.unwrap().contains("<html>"));
}

#[tokio::test]
async fn email_list_searches_subject_and_sender() {
    let (base, _) = start_server(&[
        record("1", "Quarterly report", "boss@corp.com", "2024-01-01 10:00:00", "x"),
        record("2", "Lunch", "friend@home.org", "2024-01-02 10:00:00", "x"),
    ])
    .await;

    let html = reqwest::get(format!("{base}/emails?query=home.org"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains("Lunch"));
    assert!(!html.contains("Quarterly report"));
}

#[tokio::test]
async fn category_pages() {
    let (base, store) = start_server(&many(2)).await;
    let id = store.query(&Default::default(), 1).await.unwrap()[0].id.clone();
    store.tag(&id, "Work").await.unwrap();

    let html = reqwest::get(format!("{base}/categories/Work"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(html.contains("subject 2"));
    assert!(!html.contains("subject 1<"));

    let resp = reqwest::get(format!("{base}/categories/Nope")).await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn category_page_paginates_beyond_first_page() {
    let (base, store) = start_server(&many(12)).await;
    for r in store.query(&Default::default(), 100).await.unwrap() {
        store.tag(&r.id, "Work").await.unwrap();
    }

    let first = reqwest::get(format!("{base}/categories/Work"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(first.contains("subject 12<"));
    assert!(!first.contains("subject 2<"));
    assert!(first.contains("Page 1 of 2 (12 messages)"));
    assert!(first.contains("href=\"/categories/Work?page=2\""));

    let second = reqwest::get(format!("{base}/categories/Work?page=2"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(second.contains("subject 2<"));
    assert!(second.contains("subject 1<"));
    assert!(!second.contains("subject 3<"));
}

// ── JSON API ────────────────────────────────────────────────────────

#[tokio::test]
async fn api_unknown_email_is_404() {
    let (base, _) = start_server(&[]).await;
    let resp = reqwest::get(format!("{base}/api/emails/missing")).await.unwrap();
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn api_get_email_round_trips_text() {
    let (base, store) = start_server(&[record(
        "9",
        "привет",
        "Иван <ivan@example.ru>",
        "2024-03-01 08:00:00",
        "тело письма",
    )])
    .await;
    let id = store.query(&Default::default(), 1).await.unwrap()[0].id.clone();

    let body: Value = reqwest::get(format!("{base}/api/emails/{id}"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["subject"], "привет");
    assert_eq!(body["external_id"], "9");
    assert_eq!(body["is_processed"], false);
}

#[tokio::test]
async fn api_paging_clamps_parameters() {
    let (base, _) = start_server(&many(15)).await;

    let body: Value = reqwest::get(format!("{base}/api/emails?page=0&limit=1000"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["page"], 1);
    assert_eq!(body["page_size"], 100);
    assert_eq!(body["total"], 15);
    assert_eq!(body["items"].as_array().unwrap().len(), 15);

    let body: Value = reqwest::get(format!("{base}/api/emails?page=2"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["page_size"], 10);
    assert_eq!(body["total_pages"], 2);
    assert_eq!(body["items"].as_array().unwrap().len(), 5);
}

#[tokio::test]
async fn api_search_filters_and_validates() {
    let (base, _) = start_server(&[
        record("1", "invoice", "billing@shop.com", "2024-01-05 10:00:00", "pay now"),
        record("2", "hello", "friend@home.org", "2024-02-05 10:00:00", "about the invoice"),
        record("3", "invoice", "billing@shop.com", "unknown date", "late"),
    ])
    .await;

    let found: Vec<Value> = reqwest::get(format!("{base}/api/emails/search?text=invoice"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(found[2]["date"], "unknown date");

    let found: Vec<Value> = reqwest::get(format!(
        "{base}/api/emails/search?sender=shop.com&date_from=2024-01-01&date_to=2024-01-31"
    ))
    .await
    .unwrap()
    .json()
    .await
    .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0]["external_id"], "1");

    let resp = reqwest::get(format!("{base}/api/emails/search?date_from=yesterday"))
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn api_categories_and_stats() {
    let (base, store) = start_server(&many(3)).await;
    let id = store.query(&Default::default(), 1).await.unwrap()[0].id.clone();
    store.tag(&id, "News").await.unwrap();
    store.set_processed(&id, true).await.unwrap();
    assert!(matches!(
        store.insert_if_absent(&many(1)[0]).await.unwrap(),
        InsertOutcome::Skipped
    ));

    let categories: Vec<Value> = reqwest::get(format!("{base}/api/categories"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let news = categories.iter().find(|c| c["name"] == "News").unwrap();
    assert_eq!(news["count"], 1);

    let stats: Value = reqwest::get(format!("{base}/api/stats"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["total"], 3);
    assert_eq!(stats["processed"], 1);
    assert_eq!(stats["unprocessed"], 2);
}
