mod common;

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use serde_json::{Value, json};
use storefront_api::routes::create_app;
use tower::ServiceExt;

use common::{PASSWORD, create_admin, create_product, setup_state};

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn json_request(method: &str, uri: &str, token: Option<&str>, body: Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn empty_request(method: &str, uri: &str, token: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, token);
    }
    builder.body(Body::empty()).unwrap()
}

async fn login(app: &Router, username: &str, password: &str) -> String {
    let (status, body) = send(
        app,
        json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({ "username": username, "password": password }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    body["data"]["token"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn health_and_unknown_routes() {
    let state = setup_state().await.unwrap();
    let app = create_app(state);

    let (status, body) = send(&app, empty_request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "ok");

    let (status, body) = send(&app, empty_request("GET", "/api/nope", None)).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["data"]["path"], "/api/nope");
}

#[tokio::test]
async fn protected_routes_require_a_valid_bearer_token() {
    let state = setup_state().await.unwrap();
    let app = create_app(state);

    let (status, _) = send(&app, empty_request("GET", "/api/carts", None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(
        &app,
        empty_request("GET", "/api/carts", Some("Bearer not-a-jwt")),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert!(body["message"].as_str().unwrap().starts_with("Unauthorized"));

    // Product listing is public.
    let (status, _) = send(&app, empty_request("GET", "/api/products", None)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn register_login_and_reject_bad_credentials() {
    let state = setup_state().await.unwrap();
    let app = create_app(state);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({ "username": "shopper", "email": "shopper@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert!(body["data"].get("password_hash").is_none());

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({ "username": "x", "email": "bad", "password": "1" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Validation Error");
    assert!(body["data"]["details"].is_object());

    let (status, _) = send(
        &app,
        json_request(
            "POST",
            "/api/auth/login",
            None,
            json!({ "username": "shopper", "password": "wrong-password" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let token = login(&app, "shopper", PASSWORD).await;
    assert!(token.starts_with("Bearer "));
}

#[tokio::test]
async fn full_checkout_over_http() {
    let state = setup_state().await.unwrap();
    create_admin(&state).await.unwrap();
    let product = create_product(&state, "Widget", 250, 5).await.unwrap();
    let app = create_app(state);

    send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({ "username": "shopper", "email": "shopper@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    let token = login(&app, "shopper", PASSWORD).await;

    let (status, body) = send(&app, empty_request("POST", "/api/carts", Some(&token))).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let cart_id = body["data"]["cart"]["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/carts/{cart_id}/items"),
            Some(&token),
            json!({ "product_id": product.id, "quantity": 2 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["cart"]["total_amount"], 500);

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            &format!("/api/carts/{cart_id}/items"),
            Some(&token),
            json!({ "product_id": product.id, "quantity": 10 }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = send(
        &app,
        json_request(
            "POST",
            "/api/transactions",
            Some(&token),
            json!({ "cart_id": cart_id }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["message"], "Checkout success");
    assert_eq!(body["data"]["transaction"]["total_price"], 500);
    assert_eq!(body["data"]["cart"]["status"], "checked_out");

    let (status, body) = send(
        &app,
        empty_request("POST", &format!("/api/carts/{cart_id}/checkout"), Some(&token)),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

    let (status, body) = send(
        &app,
        empty_request("GET", &format!("/api/products/{}", product.id), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["stock"], 3);

    let (status, body) = send(&app, empty_request("GET", "/api/transactions", Some(&token))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 1);
}

#[tokio::test]
async fn admin_only_routes_reject_customers() {
    let state = setup_state().await.unwrap();
    create_admin(&state).await.unwrap();
    let product = create_product(&state, "Widget", 250, 5).await.unwrap();
    let app = create_app(state);

    send(
        &app,
        json_request(
            "POST",
            "/api/auth/register",
            None,
            json!({ "username": "shopper", "email": "shopper@example.com", "password": PASSWORD }),
        ),
    )
    .await;
    let customer = login(&app, "shopper", PASSWORD).await;
    let admin = login(&app, "admin", PASSWORD).await;

    let stock = json!({ "items": [{ "product_id": product.id, "quantity": 2 }] });
    let (status, _) = send(
        &app,
        json_request("PATCH", "/api/products/stock", Some(&customer), stock.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(
        &app,
        json_request("PATCH", "/api/products/stock", Some(&admin), stock),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"][0]["stock"], 3);

    let (status, _) = send(&app, empty_request("GET", "/api/users", Some(&customer))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let (status, body) = send(&app, empty_request("GET", "/api/users", Some(&admin))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["meta"]["total"], 2);
}
