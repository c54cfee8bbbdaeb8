use chrono::Utc;
use sea_orm::{ActiveModelTrait, Set, TransactionTrait};
use uuid::Uuid;

use crate::{
    audit,
    dto::{products::StockUpdate, transactions::CheckoutReceipt},
    entity::transactions::ActiveModel as TransactionActive,
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_owner},
    models::{Cart, CartStatus, Transaction},
    response::{ApiResponse, Meta},
    services::{cart_service, product_service},
    state::AppState,
};

/// Closes an active cart: reserves stock for every line, marks the cart
/// `checked_out` and appends a transaction carrying the cart total.
///
/// Everything happens on one database transaction. Any failure (cart state,
/// empty cart, a single short product) returns before commit, so stock, cart
/// and ledger are left exactly as they were.
pub async fn checkout_cart(
    state: &AppState,
    user: &AuthUser,
    cart_id: Uuid,
) -> AppResult<ApiResponse<CheckoutReceipt>> {
    let txn = state.orm.begin().await?;

    let cart = cart_service::load_cart(&txn, cart_id).await?;
    ensure_owner(user, cart.user_id)?;

    let status: CartStatus = cart.status.parse()?;
    if status != CartStatus::Active {
        return Err(AppError::BadRequest(format!(
            "cart is {status}, only active carts can be checked out"
        )));
    }

    let items = cart_service::load_items(&txn, cart.id).await?;
    if items.is_empty() {
        return Err(AppError::BadRequest("Cart is empty".into()));
    }

    let total_price = cart_service::cart_total(&items)?;
    if total_price != cart.total_amount {
        tracing::warn!(
            cart_id = %cart.id,
            stored = cart.total_amount,
            computed = total_price,
            "cart total out of sync with its lines, rewriting"
        );
        cart_service::write_total(&txn, cart.id, total_price).await?;
    }

    let reservations: Vec<StockUpdate> = items
        .iter()
        .map(|item| StockUpdate {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    product_service::decrement_stock(&txn, &reservations).await?;

    cart_service::transition_status(&txn, &cart, CartStatus::CheckedOut).await?;

    let now = Utc::now();
    let transaction = TransactionActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(cart.user_id),
        cart_id: Set(cart.id),
        total_price: Set(total_price),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&txn)
    .await?;

    let closed = cart_service::load_cart(&txn, cart.id).await?;
    txn.commit().await?;

    tracing::info!(
        cart_id = %cart.id,
        transaction_id = %transaction.id,
        lines = items.len(),
        total_price,
        "cart checked out"
    );

    audit::record(
        &state.orm,
        Some(user.user_id),
        "checkout",
        "transactions",
        serde_json::json!({ "cart_id": cart.id, "transaction_id": transaction.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Checkout success",
        CheckoutReceipt {
            transaction: Transaction::from(transaction),
            cart: Cart::try_from(closed)?,
        },
        Some(Meta::empty()),
    ))
}
