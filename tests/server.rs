//! End-to-end tests against a served instance.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use apiary::dispatch::handler::HandlerResult;
use apiary::{App, RequestContext, Value};

async fn start(app: App) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = app.serve(listener).await;
    });
    addr
}

fn demo() -> App {
    let app = App::new();
    app.set("CACHE", "memory").unwrap();
    app.route(
        "GET greet: /hello/@name",
        |ctx: &mut RequestContext, params: &BTreeMap<String, Value>| -> HandlerResult {
            let name = params
                .get("name")
                .map(Value::to_display)
                .unwrap_or_default();
            ctx.write(format!("Hello, {name}!"));
            Ok(Value::Bool(true))
        },
    )
    .unwrap();
    app.route(
        "POST /echo",
        |ctx: &mut RequestContext, _: &BTreeMap<String, Value>| -> HandlerResult {
            let body = ctx.hive().get_str("BODY");
            ctx.write(body);
            Ok(Value::Bool(true))
        },
    )
    .unwrap();
    app
}

#[tokio::test]
async fn routes_serve_with_captured_tokens() {
    let addr = start(demo()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .get(format!("http://{addr}/hello/world"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(
        res.headers().get("x-powered-by").unwrap().to_str().unwrap(),
        "apiary"
    );
    assert_eq!(res.text().await.unwrap(), "Hello, world!");
}

#[tokio::test]
async fn request_bodies_reach_the_hive() {
    let addr = start(demo()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .post(format!("http://{addr}/echo"))
        .body("payload bytes")
        .send()
        .await
        .unwrap();
    assert_eq!(res.text().await.unwrap(), "payload bytes");
}

#[tokio::test]
async fn missing_routes_render_html_or_json_by_context() {
    let addr = start(demo()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();

    let res = client
        .get(format!("http://{addr}/nope"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body = res.text().await.unwrap();
    assert!(body.contains("<h1>Not Found</h1>"));

    let res = client
        .get(format!("http://{addr}/nope"))
        .header("X-Requested-With", "XMLHttpRequest")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body = res.text().await.unwrap();
    assert!(body.contains("\"code\":404"));
}

#[tokio::test]
async fn wrong_verb_serves_405_with_allow() {
    let addr = start(demo()).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let res = client
        .put(format!("http://{addr}/echo"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 405);
    assert_eq!(
        res.headers().get("allow").unwrap().to_str().unwrap(),
        "POST"
    );
}

#[tokio::test]
async fn trailing_slash_redirects_permanently() {
    let addr = start(demo()).await;
    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .unwrap();
    let res = client
        .get(format!("http://{addr}/hello/world/"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 301);
    let location = res.headers().get("location").unwrap().to_str().unwrap();
    assert!(location.ends_with("/hello/world"), "{location}");
}

#[tokio::test]
async fn cached_routes_replay_identical_bodies() {
    let app = App::new();
    app.set("CACHE", "memory").unwrap();
    app.route_with(
        "GET /stamp",
        |ctx: &mut RequestContext, _: &BTreeMap<String, Value>| -> HandlerResult {
            let time = ctx.hive().get_float("TIME");
            ctx.write(format!("stamp:{time}"));
            Ok(Value::Bool(true))
        },
        60,
        0,
    )
    .unwrap();
    let addr = start(app).await;
    let client = reqwest::Client::builder().no_proxy().build().unwrap();
    let first = client
        .get(format!("http://{addr}/stamp"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let second = client
        .get(format!("http://{addr}/stamp"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(first, second, "second hit must come from the cache");
}

#[tokio::test]
async fn sessions_persist_across_requests() {
    let app = App::new();
    app.route(
        "GET /visits",
        |ctx: &mut RequestContext, _: &BTreeMap<String, Value>| -> HandlerResult {
            let count = ctx.hive().get_int("SESSION.visits") + 1;
            ctx.hive().set("SESSION.visits", count)?;
            ctx.write(count.to_string());
            Ok(Value::Bool(true))
        },
    )
    .unwrap();
    let addr = start(app).await;
    let client = reqwest::Client::builder()
        .cookie_store(true)
        .no_proxy()
        .build()
        .unwrap();
    let first = client
        .get(format!("http://{addr}/visits"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let second = client
        .get(format!("http://{addr}/visits"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(first, "1");
    assert_eq!(second, "2");
}
