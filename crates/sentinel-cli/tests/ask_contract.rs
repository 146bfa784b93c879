use axum::{
    extract::{Path, Query},
    response::Html,
    routing::{get, post},
    Json, Router,
};
use std::collections::HashMap;
use std::net::SocketAddr;

const MODEL: &str = "fixture-model";

const ARTICLES: [(&str, &str); 2] = [
    (
        "Fed holds rates",
        "The Federal Reserve held its benchmark rate at 5.25 percent on Wednesday. \
         Officials signalled two cuts later in the year as inflation cools.",
    ),
    (
        "Markets react to Fed",
        "Stocks rallied after the announcement. Treasury yields fell sharply while \
         the dollar weakened against the euro and the yen.",
    ),
];

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Stateless fake model: answers by which prompt it is shown.
fn reply_for(body: &serde_json::Value) -> String {
    let system = body["messages"][0]["content"].as_str().unwrap_or("");
    if system.contains("optimize search queries") {
        "Rephrased Query: federal reserve rate decision".to_string()
    } else if system.contains("news analysis") {
        "Relevant: Yes\nSummary: The Fed held rates at 5.25 percent.".to_string()
    } else if system.contains("cite its source") {
        "The Fed held rates at 5.25 percent (Fed holds rates).".to_string()
    } else {
        "web_search".to_string()
    }
}

/// SearXNG search, article pages and an OpenAI-compatible model on one port.
async fn fixture() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route(
            "/search",
            get(move |Query(q): Query<HashMap<String, String>>| async move {
                let page = q.get("pageno").map(String::as_str).unwrap_or("1");
                let results: Vec<serde_json::Value> = if page == "1" {
                    ARTICLES
                        .iter()
                        .enumerate()
                        .map(|(i, (title, _))| {
                            serde_json::json!({
                                "title": title,
                                "url": format!("http://{addr}/article/{i}"),
                                "content": "snippet",
                            })
                        })
                        .collect()
                } else {
                    Vec::new()
                };
                Json(serde_json::json!({ "results": results }))
            }),
        )
        .route(
            "/article/:id",
            get(|Path(id): Path<usize>| async move {
                let (title, body) = ARTICLES[id % ARTICLES.len()];
                Html(format!(
                    "<html><head><title>{title}</title></head>\
                     <body><article><h1>{title}</h1><p>{body}</p></article></body></html>"
                ))
            }),
        )
        .route(
            "/v1/models",
            get(|| async { Json(serde_json::json!({ "data": [{ "id": MODEL }] })) }),
        )
        .route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                Json(serde_json::json!({
                    "choices": [{ "message": { "role": "assistant", "content": reply_for(&body) } }]
                }))
            }),
        );
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn sentinel(addr: Option<SocketAddr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin!("sentinel"));
    cmd.env("SENTINEL_DOTENV", "0").env("SENTINEL_LOG", "warn");
    for k in [
        "GROQ_API_KEY",
        "SENTINEL_GROQ_API_KEY",
        "MISTRAL_API_KEY",
        "HF_TOKEN",
        "SENTINEL_CUSTOM_LLM",
        "SENTINEL_CUSTOM_LLM_DEFAULT_MODEL",
        "SENTINEL_SEARXNG_ENDPOINTS",
        "SEARXNG_URL",
        "SENTINEL_EMBEDDINGS_BASE_URL",
        "SENTINEL_MODEL",
        "HTTP_PROXY",
        "http_proxy",
        "ALL_PROXY",
        "all_proxy",
    ] {
        cmd.env_remove(k);
    }
    match addr {
        Some(addr) => {
            cmd.env("SENTINEL_SEARXNG_ENDPOINT", format!("http://{addr}"))
                .env("CUSTOM_LLM", format!("http://{addr}"))
                .env("CUSTOM_LLM_DEFAULT_MODEL", MODEL);
        }
        None => {
            cmd.env_remove("SENTINEL_SEARXNG_ENDPOINT")
                .env_remove("CUSTOM_LLM")
                .env_remove("CUSTOM_LLM_DEFAULT_MODEL");
        }
    }
    cmd
}

async fn run(mut cmd: std::process::Command) -> std::process::Output {
    tokio::task::spawn_blocking(move || cmd.output().expect("run sentinel"))
        .await
        .unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn ask_answers_from_fixture_results() {
    let addr = fixture().await;
    let mut cmd = sentinel(Some(addr));
    cmd.args([
        "ask",
        "what did the fed do?",
        "--only-web-search",
        "--num-results",
        "2",
        "--max-attempts",
        "2",
    ]);
    let out = run(cmd).await;
    assert!(
        out.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&out.stderr)
    );
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse ask json");
    assert_eq!(v["kind"].as_str(), Some("ask"));
    assert_eq!(v["ok"].as_bool(), Some(true));
    assert_eq!(v["model"].as_str(), Some(MODEL));
    assert_eq!(v["route"].as_str(), Some("web_search"));
    assert_eq!(v["outcome"].as_str(), Some("answered"));
    assert!(v["answer"].as_str().unwrap_or("").contains("5.25 percent"));

    let docs = v["documents"].as_array().expect("documents");
    assert!(!docs.is_empty() && docs.len() <= 2, "got {docs:?}");
    for d in docs {
        assert!(d["url"].as_str().unwrap_or("").contains("/article/"));
        assert_eq!(d["source_kind"].as_str(), Some("article"));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn search_prints_extracted_candidates() {
    let addr = fixture().await;
    let mut cmd = sentinel(Some(addr));
    cmd.args(["search", "fed", "--limit", "2", "--site-filter", "example.org"]);
    let out = run(cmd).await;
    assert!(out.status.success());
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse search json");
    assert_eq!(v["query"].as_str(), Some("site:example.org fed"));
    let candidates = v["candidates"].as_array().expect("candidates");
    assert_eq!(candidates.len(), 2);
    assert!(candidates[0]["text"]
        .as_str()
        .unwrap_or("")
        .contains("benchmark rate"));
}

#[tokio::test(flavor = "multi_thread")]
async fn greeting_needs_no_search() {
    let llm = serve(
        Router::new()
            .route(
                "/v1/models",
                get(|| async { Json(serde_json::json!({ "data": [{ "id": MODEL }] })) }),
            )
            .route(
                "/v1/chat/completions",
                post(|| async {
                    Json(serde_json::json!({
                        "choices": [{ "message": { "role": "assistant", "content": "Hello! How can I help?" } }]
                    }))
                }),
            ),
    )
    .await;
    let mut cmd = sentinel(None);
    // The search endpoint is never contacted on the knowledge route.
    cmd.env("SENTINEL_SEARXNG_ENDPOINT", "http://127.0.0.1:9")
        .env("CUSTOM_LLM", format!("http://{llm}"))
        .env("CUSTOM_LLM_DEFAULT_MODEL", MODEL)
        .args(["ask", "hello", "--output", "text"]);
    let out = run(cmd).await;
    assert!(out.status.success());
    assert_eq!(
        String::from_utf8_lossy(&out.stdout).trim(),
        "Hello! How can I help?"
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn unknown_model_is_a_configuration_error() {
    let mut cmd = sentinel(None);
    cmd.args(["ask", "anything", "--model", "gpt-9"]);
    let out = run(cmd).await;
    assert_eq!(out.status.code(), Some(2));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse error json");
    assert_eq!(v["ok"].as_bool(), Some(false));
    assert_eq!(v["error"]["code"].as_str(), Some("configuration"));
    assert!(v["error"]["message"].as_str().unwrap_or("").contains("gpt-9"));
}

#[tokio::test(flavor = "multi_thread")]
async fn missing_search_endpoint_is_a_configuration_error() {
    let mut cmd = sentinel(None);
    cmd.env("GROQ_API_KEY", "k").args(["ask", "latest news?"]);
    let out = run(cmd).await;
    assert_eq!(out.status.code(), Some(2));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).expect("parse error json");
    assert_eq!(v["error"]["code"].as_str(), Some("configuration"));
}
