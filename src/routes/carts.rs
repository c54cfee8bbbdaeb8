use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post, put},
};
use uuid::Uuid;

use crate::{
    dto::{
        cart::{AddCartItemRequest, CartList, CartWithItems, UpdateCartItemRequest},
        transactions::CheckoutReceipt,
    },
    error::AppResult,
    middleware::auth::AuthUser,
    response::ApiResponse,
    services::{cart_service, checkout_service},
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_carts).post(create_cart))
        .route("/{id}", get(get_cart).delete(delete_cart))
        .route("/{id}/items", post(add_item))
        .route("/{id}/items/{item_id}", put(update_item).delete(remove_item))
        .route("/{id}/cancel", post(cancel_cart))
        .route("/{id}/checkout", post(checkout))
}

#[utoipa::path(
    get,
    path = "/api/carts",
    responses(
        (status = 200, description = "List carts with their items", body = ApiResponse<CartList>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn list_carts(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<Json<ApiResponse<CartList>>> {
    let resp = cart_service::list_carts(&state, &user).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/carts",
    responses(
        (status = 201, description = "Create an empty active cart", body = ApiResponse<CartWithItems>),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn create_cart(
    State(state): State<AppState>,
    user: AuthUser,
) -> AppResult<(StatusCode, Json<ApiResponse<CartWithItems>>)> {
    let resp = cart_service::create_cart(&state, &user).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}

#[utoipa::path(
    get,
    path = "/api/carts/{id}",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 200, description = "Get cart", body = ApiResponse<CartWithItems>),
        (status = 403, description = "Not the cart owner"),
        (status = 404, description = "Cart not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn get_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::get_cart(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/carts/{id}",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 200, description = "Delete cart and its items", body = ApiResponse<serde_json::Value>),
        (status = 404, description = "Cart not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn delete_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let resp = cart_service::delete_cart(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/carts/{id}/items",
    params(("id" = Uuid, Path, description = "Cart ID")),
    request_body = AddCartItemRequest,
    responses(
        (status = 200, description = "Add a product, merging with an existing line", body = ApiResponse<CartWithItems>),
        (status = 400, description = "Cart not active or insufficient stock"),
        (status = 404, description = "Cart or product not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn add_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
    Json(payload): Json<AddCartItemRequest>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::add_item(&state, &user, id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    put,
    path = "/api/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID")
    ),
    request_body = UpdateCartItemRequest,
    responses(
        (status = 200, description = "Set the quantity of a cart line", body = ApiResponse<CartWithItems>),
        (status = 400, description = "Cart not active or insufficient stock"),
        (status = 404, description = "Cart or item not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn update_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateCartItemRequest>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::update_item(&state, &user, id, item_id, payload).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    delete,
    path = "/api/carts/{id}/items/{item_id}",
    params(
        ("id" = Uuid, Path, description = "Cart ID"),
        ("item_id" = Uuid, Path, description = "Cart item ID")
    ),
    responses(
        (status = 200, description = "Remove a cart line", body = ApiResponse<CartWithItems>),
        (status = 404, description = "Cart or item not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn remove_item(
    State(state): State<AppState>,
    user: AuthUser,
    Path((id, item_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::remove_item(&state, &user, id, item_id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/carts/{id}/cancel",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 200, description = "Cancel an active cart", body = ApiResponse<CartWithItems>),
        (status = 400, description = "Cart is not active")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn cancel_cart(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<Json<ApiResponse<CartWithItems>>> {
    let resp = cart_service::cancel_cart(&state, &user, id).await?;
    Ok(Json(resp))
}

#[utoipa::path(
    post,
    path = "/api/carts/{id}/checkout",
    params(("id" = Uuid, Path, description = "Cart ID")),
    responses(
        (status = 201, description = "Check out the cart", body = ApiResponse<CheckoutReceipt>),
        (status = 400, description = "Cart empty, not active, or short on stock"),
        (status = 404, description = "Cart not found")
    ),
    security(("bearer_auth" = [])),
    tag = "Carts"
)]
pub async fn checkout(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<ApiResponse<CheckoutReceipt>>)> {
    let resp = checkout_service::checkout_cart(&state, &user, id).await?;
    Ok((StatusCode::CREATED, Json(resp)))
}
