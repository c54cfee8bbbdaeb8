use std::collections::BTreeMap;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    audit,
    dto::products::{
        BulkStockUpdateRequest, CreateProductRequest, ProductList, StockUpdate,
        UpdateProductRequest,
    },
    entity::{
        cart_items::{Column as CartItemCol, Entity as CartItems},
        products::{ActiveModel, Column, Entity as Products},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_admin},
    models::Product,
    response::{ApiResponse, Meta},
    state::AppState,
};

pub async fn list_products(state: &AppState) -> AppResult<ApiResponse<ProductList>> {
    let items: Vec<Product> = Products::find()
        .order_by_asc(Column::Name)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();

    let meta = Meta::total(items.len());
    Ok(ApiResponse::success("Products", ProductList { items }, Some(meta)))
}

pub async fn get_product(state: &AppState, id: Uuid) -> AppResult<ApiResponse<Product>> {
    let result = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .map(Product::from)
        .ok_or_else(|| AppError::not_found("product"))?;
    Ok(ApiResponse::success("Product", result, None))
}

pub async fn create_product(
    state: &AppState,
    user: &AuthUser,
    payload: CreateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    payload.validate()?;
    let now = Utc::now();
    let active = ActiveModel {
        id: Set(Uuid::new_v4()),
        name: Set(payload.name),
        description: Set(payload.description),
        price: Set(payload.price),
        stock: Set(payload.stock),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    };
    let product = active.insert(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_create",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Product created",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn update_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
    payload: UpdateProductRequest,
) -> AppResult<ApiResponse<Product>> {
    ensure_admin(user)?;
    payload.validate()?;
    let existing = Products::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("product"))?;

    let mut active: ActiveModel = existing.into();
    if let Some(name) = payload.name {
        active.name = Set(name);
    }
    if let Some(description) = payload.description {
        active.description = Set(Some(description));
    }
    if let Some(price) = payload.price {
        active.price = Set(price);
    }
    if let Some(stock) = payload.stock {
        active.stock = Set(stock);
    }
    active.updated_at = Set(Utc::now().into());

    let product = active.update(&state.orm).await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_update",
        "products",
        serde_json::json!({ "product_id": product.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Updated",
        Product::from(product),
        Some(Meta::empty()),
    ))
}

pub async fn delete_product(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    ensure_admin(user)?;

    let referenced = CartItems::find()
        .filter(CartItemCol::ProductId.eq(id))
        .count(&state.orm)
        .await?;
    if referenced > 0 {
        return Err(AppError::BadRequest(
            "product is referenced by cart items".to_string(),
        ));
    }

    let result = Products::delete_by_id(id).exec(&state.orm).await?;
    if result.rows_affected == 0 {
        return Err(AppError::not_found("product"));
    }

    audit::record(
        &state.orm,
        Some(user.user_id),
        "product_delete",
        "products",
        serde_json::json!({ "product_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

/// Admin entry point for the stock ledger. Runs the decrement on its own
/// database transaction.
pub async fn update_stock_bulk(
    state: &AppState,
    user: &AuthUser,
    payload: BulkStockUpdateRequest,
) -> AppResult<ApiResponse<ProductList>> {
    ensure_admin(user)?;
    payload.validate()?;

    let txn = state.orm.begin().await?;
    let updated = decrement_stock(&txn, &payload.items).await?;
    let ids: Vec<Uuid> = updated.keys().copied().collect();
    let items: Vec<Product> = Products::find()
        .filter(Column::Id.is_in(ids))
        .order_by_asc(Column::Id)
        .all(&txn)
        .await?
        .into_iter()
        .map(Product::from)
        .collect();
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "stock_update_bulk",
        "products",
        serde_json::to_value(&payload.items).unwrap_or_default(),
    )
    .await;

    let meta = Meta::total(items.len());
    Ok(ApiResponse::success("Stock updated", ProductList { items }, Some(meta)))
}

/// Sums quantities per product. Keyed by id so rows are always touched in
/// the same order.
pub fn merge_stock_updates(updates: &[StockUpdate]) -> AppResult<BTreeMap<Uuid, i32>> {
    let mut merged: BTreeMap<Uuid, i32> = BTreeMap::new();
    for update in updates {
        if update.quantity <= 0 {
            return Err(AppError::BadRequest(
                "quantity must be greater than 0".to_string(),
            ));
        }
        let entry = merged.entry(update.product_id).or_insert(0);
        *entry = entry
            .checked_add(update.quantity)
            .ok_or_else(|| AppError::BadRequest("quantity is too large".to_string()))?;
    }
    Ok(merged)
}

/// Decrements stock for every product in `updates`, all or nothing.
///
/// Must run on a transaction: on error the caller drops it and every
/// decrement already issued is rolled back. Availability is checked up front
/// so the error names the products that are short, and each UPDATE is
/// additionally guarded by `stock >= quantity` against concurrent writers.
pub async fn decrement_stock<C: ConnectionTrait>(
    conn: &C,
    updates: &[StockUpdate],
) -> AppResult<BTreeMap<Uuid, i32>> {
    let merged = merge_stock_updates(updates)?;
    if merged.is_empty() {
        return Ok(merged);
    }

    let ids: Vec<Uuid> = merged.keys().copied().collect();
    let products = Products::find()
        .filter(Column::Id.is_in(ids))
        .all(conn)
        .await?;

    let mut shortfalls = Vec::new();
    for (product_id, quantity) in &merged {
        match products.iter().find(|p| p.id == *product_id) {
            None => return Err(AppError::not_found(format!("product {product_id}"))),
            Some(product) if product.stock < *quantity => shortfalls.push(format!(
                "{} (requested {}, available {})",
                product.name, quantity, product.stock
            )),
            Some(_) => {}
        }
    }
    if !shortfalls.is_empty() {
        return Err(AppError::BadRequest(format!(
            "Insufficient stock for {}",
            shortfalls.join(", ")
        )));
    }

    let now: DateTimeWithTimeZone = Utc::now().into();
    for (product_id, quantity) in &merged {
        let result = Products::update_many()
            .col_expr(Column::Stock, Expr::col(Column::Stock).sub(*quantity))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::Id.eq(*product_id))
            .filter(Column::Stock.gte(*quantity))
            .exec(conn)
            .await?;

        if result.rows_affected == 0 {
            return Err(AppError::BadRequest(format!(
                "Insufficient stock for product {product_id}"
            )));
        }
    }

    tracing::debug!(products = merged.len(), "stock decremented");
    Ok(merged)
}
