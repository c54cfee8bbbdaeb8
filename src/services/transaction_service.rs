use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use uuid::Uuid;

use crate::{
    dto::transactions::{CheckoutReceipt, CreateTransactionRequest, TransactionList},
    entity::transactions::{Column, Entity as Transactions},
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_owner},
    models::Transaction,
    response::{ApiResponse, Meta},
    services::checkout_service,
    state::AppState,
};

/// A transaction is only ever created by checking out its cart.
pub async fn create_transaction(
    state: &AppState,
    user: &AuthUser,
    payload: CreateTransactionRequest,
) -> AppResult<ApiResponse<CheckoutReceipt>> {
    checkout_service::checkout_cart(state, user, payload.cart_id).await
}

pub async fn list_transactions(
    state: &AppState,
    user: &AuthUser,
) -> AppResult<ApiResponse<TransactionList>> {
    let mut finder = Transactions::find();
    if !user.is_admin() {
        finder = finder.filter(Column::UserId.eq(user.user_id));
    }

    let items: Vec<Transaction> = finder
        .order_by_desc(Column::CreatedAt)
        .all(&state.orm)
        .await?
        .into_iter()
        .map(Transaction::from)
        .collect();

    let meta = Meta::total(items.len());
    Ok(ApiResponse::success("Ok", TransactionList { items }, Some(meta)))
}

pub async fn get_transaction(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<Transaction>> {
    let transaction = Transactions::find_by_id(id)
        .one(&state.orm)
        .await?
        .ok_or_else(|| AppError::not_found("transaction"))?;
    ensure_owner(user, transaction.user_id)?;

    Ok(ApiResponse::success(
        "OK",
        Transaction::from(transaction),
        Some(Meta::empty()),
    ))
}
