use std::collections::HashMap;

use chrono::Utc;
use sea_orm::prelude::DateTimeWithTimeZone;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait,
};
use uuid::Uuid;
use validator::Validate;

use crate::{
    audit,
    dto::cart::{AddCartItemRequest, CartList, CartWithItems, UpdateCartItemRequest},
    entity::{
        cart_items::{
            ActiveModel as CartItemActive, Column as CartItemCol, Entity as CartItems,
            Model as CartItemModel,
        },
        carts::{ActiveModel as CartActive, Column as CartCol, Entity as Carts, Model as CartModel},
        products::{Entity as Products, Model as ProductModel},
    },
    error::{AppError, AppResult},
    middleware::auth::{AuthUser, ensure_owner},
    models::{Cart, CartItem, CartStatus},
    response::{ApiResponse, Meta},
    state::AppState,
};

/// `quantity × unit_price`, rejecting overflow.
pub fn line_total(quantity: i32, unit_price: i64) -> AppResult<i64> {
    i64::from(quantity)
        .checked_mul(unit_price)
        .ok_or_else(|| AppError::BadRequest("line total is too large".to_string()))
}

pub fn cart_total(items: &[CartItemModel]) -> AppResult<i64> {
    items.iter().try_fold(0_i64, |acc, item| {
        acc.checked_add(item.total_price)
            .ok_or_else(|| AppError::BadRequest("cart total is too large".to_string()))
    })
}

fn ensure_in_stock(product: &ProductModel, quantity: i32) -> AppResult<()> {
    if product.stock < quantity {
        return Err(AppError::BadRequest(format!(
            "Insufficient stock for {}: requested {}, available {}",
            product.name, quantity, product.stock
        )));
    }
    Ok(())
}

fn ensure_active(cart: &CartModel) -> AppResult<()> {
    let status: CartStatus = cart.status.parse()?;
    if status.is_terminal() {
        return Err(AppError::BadRequest(format!(
            "cart is {status}, only active carts can be modified"
        )));
    }
    Ok(())
}

pub(crate) async fn load_cart<C: ConnectionTrait>(conn: &C, id: Uuid) -> AppResult<CartModel> {
    Carts::find_by_id(id)
        .one(conn)
        .await?
        .ok_or_else(|| AppError::not_found("cart"))
}

pub(crate) async fn load_items<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
) -> AppResult<Vec<CartItemModel>> {
    let items = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart_id))
        .order_by_asc(CartItemCol::CreatedAt)
        .order_by_asc(CartItemCol::Id)
        .all(conn)
        .await?;
    Ok(items)
}

/// Loads a line item and checks it belongs to `cart_id`.
async fn load_item<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    item_id: Uuid,
) -> AppResult<CartItemModel> {
    CartItems::find_by_id(item_id)
        .one(conn)
        .await?
        .filter(|item| item.cart_id == cart_id)
        .ok_or_else(|| AppError::not_found("cart item"))
}

fn cart_with_items(cart: CartModel, items: Vec<CartItemModel>) -> AppResult<CartWithItems> {
    Ok(CartWithItems {
        cart: Cart::try_from(cart)?,
        items: items.into_iter().map(CartItem::from).collect(),
    })
}

/// Line mutations are reserved to the cart's owner, admins included.
fn ensure_cart_owner(user: &AuthUser, cart: &CartModel) -> AppResult<()> {
    if user.user_id != cart.user_id {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

/// Writes `total` onto the cart, guarded on `status = 'active'` so a cart
/// closed by a concurrent checkout or cancel is never touched.
pub(crate) async fn write_total<C: ConnectionTrait>(
    conn: &C,
    cart_id: Uuid,
    total: i64,
) -> AppResult<()> {
    let now: DateTimeWithTimeZone = Utc::now().into();
    let result = Carts::update_many()
        .col_expr(CartCol::TotalAmount, Expr::value(total))
        .col_expr(CartCol::UpdatedAt, Expr::value(now))
        .filter(CartCol::Id.eq(cart_id))
        .filter(CartCol::Status.eq(CartStatus::Active.as_str()))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::BadRequest(format!(
            "cart {cart_id} is no longer active"
        )));
    }
    Ok(())
}

/// Recomputes the cart total from its current lines and persists it.
async fn refresh_total<C: ConnectionTrait>(conn: &C, cart_id: Uuid) -> AppResult<CartWithItems> {
    let items = load_items(conn, cart_id).await?;
    let total = cart_total(&items)?;
    write_total(conn, cart_id, total).await?;

    let cart = load_cart(conn, cart_id).await?;
    cart_with_items(cart, items)
}

/// Moves a cart along its lifecycle. The UPDATE is guarded on the status the
/// cart was read with, so two racing transitions cannot both succeed.
pub(crate) async fn transition_status<C: ConnectionTrait>(
    conn: &C,
    cart: &CartModel,
    next: CartStatus,
) -> AppResult<()> {
    let current: CartStatus = cart.status.parse()?;
    if !current.can_transition_to(next) {
        return Err(AppError::BadRequest(format!(
            "cart is {current} and cannot become {next}"
        )));
    }

    let now: DateTimeWithTimeZone = Utc::now().into();
    let result = Carts::update_many()
        .col_expr(CartCol::Status, Expr::value(next.as_str()))
        .col_expr(CartCol::UpdatedAt, Expr::value(now))
        .filter(CartCol::Id.eq(cart.id))
        .filter(CartCol::Status.eq(current.as_str()))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(AppError::BadRequest(format!(
            "cart {} is no longer {current}",
            cart.id
        )));
    }
    Ok(())
}

pub async fn create_cart(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartWithItems>> {
    let now = Utc::now();
    let cart = CartActive {
        id: Set(Uuid::new_v4()),
        user_id: Set(user.user_id),
        status: Set(CartStatus::Active.as_str().to_string()),
        total_amount: Set(0),
        created_at: Set(now.into()),
        updated_at: Set(now.into()),
    }
    .insert(&state.orm)
    .await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_create",
        "carts",
        serde_json::json!({ "cart_id": cart.id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart created",
        cart_with_items(cart, Vec::new())?,
        Some(Meta::empty()),
    ))
}

pub async fn list_carts(state: &AppState, user: &AuthUser) -> AppResult<ApiResponse<CartList>> {
    let mut finder = Carts::find();
    if !user.is_admin() {
        finder = finder.filter(CartCol::UserId.eq(user.user_id));
    }
    let carts = finder
        .order_by_desc(CartCol::CreatedAt)
        .all(&state.orm)
        .await?;

    let ids: Vec<Uuid> = carts.iter().map(|c| c.id).collect();
    let mut items_by_cart: HashMap<Uuid, Vec<CartItemModel>> = HashMap::new();
    if !ids.is_empty() {
        let items = CartItems::find()
            .filter(CartItemCol::CartId.is_in(ids))
            .order_by_asc(CartItemCol::CreatedAt)
            .order_by_asc(CartItemCol::Id)
            .all(&state.orm)
            .await?;
        for item in items {
            items_by_cart.entry(item.cart_id).or_default().push(item);
        }
    }

    let items = carts
        .into_iter()
        .map(|cart| {
            let lines = items_by_cart.remove(&cart.id).unwrap_or_default();
            cart_with_items(cart, lines)
        })
        .collect::<AppResult<Vec<_>>>()?;

    let meta = Meta::total(items.len());
    Ok(ApiResponse::success("Carts", CartList { items }, Some(meta)))
}

pub async fn get_cart(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<CartWithItems>> {
    let cart = load_cart(&state.orm, id).await?;
    ensure_owner(user, cart.user_id)?;
    let items = load_items(&state.orm, cart.id).await?;
    Ok(ApiResponse::success("Cart", cart_with_items(cart, items)?, None))
}

/// Adds `quantity` of a product, merging into an existing line for the same
/// product. The merged quantity must fit in the current stock.
pub async fn add_item(
    state: &AppState,
    user: &AuthUser,
    cart_id: Uuid,
    payload: AddCartItemRequest,
) -> AppResult<ApiResponse<CartWithItems>> {
    payload.validate()?;

    let txn = state.orm.begin().await?;
    let cart = load_cart(&txn, cart_id).await?;
    ensure_cart_owner(user, &cart)?;
    ensure_active(&cart)?;

    let product = Products::find_by_id(payload.product_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("product"))?;

    let existing = CartItems::find()
        .filter(CartItemCol::CartId.eq(cart.id))
        .filter(CartItemCol::ProductId.eq(product.id))
        .one(&txn)
        .await?;

    let quantity = match &existing {
        Some(item) => item
            .quantity
            .checked_add(payload.quantity)
            .ok_or_else(|| AppError::BadRequest("quantity is too large".to_string()))?,
        None => payload.quantity,
    };
    ensure_in_stock(&product, quantity)?;
    let total_price = line_total(quantity, product.price)?;
    let now: DateTimeWithTimeZone = Utc::now().into();

    match existing {
        Some(item) => {
            let mut active: CartItemActive = item.into();
            active.quantity = Set(quantity);
            active.unit_price = Set(product.price);
            active.total_price = Set(total_price);
            active.updated_at = Set(now);
            active.update(&txn).await?;
        }
        None => {
            CartItemActive {
                id: Set(Uuid::new_v4()),
                cart_id: Set(cart.id),
                product_id: Set(product.id),
                quantity: Set(quantity),
                unit_price: Set(product.price),
                total_price: Set(total_price),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }
    }

    let data = refresh_total(&txn, cart.id).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_add_item",
        "cart_items",
        serde_json::json!({ "cart_id": cart_id, "product_id": payload.product_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Item added to cart", data, Some(Meta::empty())))
}

pub async fn update_item(
    state: &AppState,
    user: &AuthUser,
    cart_id: Uuid,
    item_id: Uuid,
    payload: UpdateCartItemRequest,
) -> AppResult<ApiResponse<CartWithItems>> {
    payload.validate()?;

    let txn = state.orm.begin().await?;
    let cart = load_cart(&txn, cart_id).await?;
    ensure_cart_owner(user, &cart)?;
    ensure_active(&cart)?;
    let item = load_item(&txn, cart.id, item_id).await?;

    let product = Products::find_by_id(item.product_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::not_found("product"))?;
    ensure_in_stock(&product, payload.quantity)?;

    let mut active: CartItemActive = item.into();
    active.quantity = Set(payload.quantity);
    active.unit_price = Set(product.price);
    active.total_price = Set(line_total(payload.quantity, product.price)?);
    active.updated_at = Set(Utc::now().into());
    active.update(&txn).await?;

    let data = refresh_total(&txn, cart.id).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_update_item",
        "cart_items",
        serde_json::json!({ "cart_id": cart_id, "item_id": item_id, "quantity": payload.quantity }),
    )
    .await;

    Ok(ApiResponse::success("Cart item updated", data, Some(Meta::empty())))
}

pub async fn remove_item(
    state: &AppState,
    user: &AuthUser,
    cart_id: Uuid,
    item_id: Uuid,
) -> AppResult<ApiResponse<CartWithItems>> {
    let txn = state.orm.begin().await?;
    let cart = load_cart(&txn, cart_id).await?;
    ensure_cart_owner(user, &cart)?;
    ensure_active(&cart)?;
    let item = load_item(&txn, cart.id, item_id).await?;

    CartItems::delete_by_id(item.id).exec(&txn).await?;
    let data = refresh_total(&txn, cart.id).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_remove_item",
        "cart_items",
        serde_json::json!({ "cart_id": cart_id, "item_id": item_id }),
    )
    .await;

    Ok(ApiResponse::success("Removed from cart", data, Some(Meta::empty())))
}

/// Deletes the cart together with its lines. Transactions that reference the
/// cart are left alone.
pub async fn delete_cart(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let txn = state.orm.begin().await?;
    let cart = load_cart(&txn, id).await?;
    ensure_owner(user, cart.user_id)?;

    let removed = CartItems::delete_many()
        .filter(CartItemCol::CartId.eq(cart.id))
        .exec(&txn)
        .await?;
    Carts::delete_by_id(cart.id).exec(&txn).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_delete",
        "carts",
        serde_json::json!({ "cart_id": id, "items_removed": removed.rows_affected }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart deleted",
        serde_json::json!({}),
        Some(Meta::empty()),
    ))
}

pub async fn cancel_cart(
    state: &AppState,
    user: &AuthUser,
    id: Uuid,
) -> AppResult<ApiResponse<CartWithItems>> {
    let txn = state.orm.begin().await?;
    let cart = load_cart(&txn, id).await?;
    ensure_cart_owner(user, &cart)?;
    transition_status(&txn, &cart, CartStatus::Cancelled).await?;

    let cart = load_cart(&txn, id).await?;
    let items = load_items(&txn, id).await?;
    txn.commit().await?;

    audit::record(
        &state.orm,
        Some(user.user_id),
        "cart_cancel",
        "carts",
        serde_json::json!({ "cart_id": id }),
    )
    .await;

    Ok(ApiResponse::success(
        "Cart cancelled",
        cart_with_items(cart, items)?,
        Some(Meta::empty()),
    ))
}
