mod common;

use sea_orm::{ActiveModelTrait, EntityTrait, PaginatorTrait, Set, TransactionTrait};
use storefront_api::{
    dto::{
        cart::AddCartItemRequest,
        products::{BulkStockUpdateRequest, StockUpdate},
        transactions::CreateTransactionRequest,
    },
    entity::{
        carts::{ActiveModel as CartActive, Entity as Carts},
        transactions::Entity as Transactions,
    },
    error::AppError,
    models::CartStatus,
    services::{cart_service, checkout_service, product_service, transaction_service},
};
use uuid::Uuid;

use common::{create_admin, create_customer, create_product, setup_state, stock_of};

// Happy path: two lines, stock reserved exactly, ledger entry matches the cart total.
#[tokio::test]
async fn checkout_reserves_stock_and_records_transaction() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = create_customer(&state, "buyer").await?;
    let widget = create_product(&state, "Widget", 1500, 10).await?;
    let gadget = create_product(&state, "Gadget", 250, 4).await?;

    let cart = cart_service::create_cart(&state, &user).await?.data.unwrap().cart;
    for (product_id, quantity) in [(widget.id, 3), (gadget.id, 4)] {
        cart_service::add_item(
            &state,
            &user,
            cart.id,
            AddCartItemRequest { product_id, quantity },
        )
        .await?;
    }

    let receipt = checkout_service::checkout_cart(&state, &user, cart.id)
        .await?
        .data
        .unwrap();

    assert_eq!(receipt.transaction.total_price, 3 * 1500 + 4 * 250);
    assert_eq!(receipt.transaction.cart_id, cart.id);
    assert_eq!(receipt.transaction.user_id, user.user_id);
    assert_eq!(receipt.cart.status, CartStatus::CheckedOut);
    assert_eq!(receipt.cart.total_amount, receipt.transaction.total_price);

    assert_eq!(stock_of(&state, widget.id).await?, 7);
    assert_eq!(stock_of(&state, gadget.id).await?, 0);
    assert_eq!(Transactions::find().count(&state.orm).await?, 1);

    Ok(())
}

// One short product aborts the whole checkout: nothing moves.
#[tokio::test]
async fn checkout_with_insufficient_stock_changes_nothing() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = create_customer(&state, "buyer").await?;
    let admin = create_admin(&state).await?;
    let plenty = create_product(&state, "Plenty", 100, 50).await?;
    let scarce = create_product(&state, "Scarce", 100, 5).await?;

    let cart = cart_service::create_cart(&state, &user).await?.data.unwrap().cart;
    cart_service::add_item(
        &state,
        &user,
        cart.id,
        AddCartItemRequest { product_id: plenty.id, quantity: 10 },
    )
    .await?;
    cart_service::add_item(
        &state,
        &user,
        cart.id,
        AddCartItemRequest { product_id: scarce.id, quantity: 5 },
    )
    .await?;

    // Someone else buys the scarce product in the meantime.
    product_service::update_stock_bulk(
        &state,
        &admin,
        BulkStockUpdateRequest {
            items: vec![StockUpdate {
                product_id: scarce.id,
                quantity: 3,
            }],
        },
    )
    .await?;

    let err = checkout_service::checkout_cart(&state, &user, cart.id)
        .await
        .unwrap_err();
    match err {
        AppError::BadRequest(message) => assert!(message.contains("Scarce"), "{message}"),
        other => panic!("expected BadRequest, got {other:?}"),
    }

    assert_eq!(stock_of(&state, plenty.id).await?, 50);
    assert_eq!(stock_of(&state, scarce.id).await?, 2);
    assert_eq!(Transactions::find().count(&state.orm).await?, 0);

    let stored = Carts::find_by_id(cart.id).one(&state.orm).await?.unwrap();
    assert_eq!(stored.status, "active");
    assert_eq!(stored.total_amount, 10 * 100 + 5 * 100);

    Ok(())
}

#[tokio::test]
async fn empty_cart_cannot_be_checked_out() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = create_customer(&state, "buyer").await?;
    let cart = cart_service::create_cart(&state, &user).await?.data.unwrap().cart;

    let err = checkout_service::checkout_cart(&state, &user, cart.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::BadRequest(ref m) if m == "Cart is empty"));

    let stored = Carts::find_by_id(cart.id).one(&state.orm).await?.unwrap();
    assert_eq!(stored.status, "active");
    Ok(())
}

#[tokio::test]
async fn checked_out_cart_is_frozen() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = create_customer(&state, "buyer").await?;
    let product = create_product(&state, "Widget", 100, 10).await?;

    let cart = cart_service::create_cart(&state, &user).await?.data.unwrap().cart;
    let added = cart_service::add_item(
        &state,
        &user,
        cart.id,
        AddCartItemRequest { product_id: product.id, quantity: 2 },
    )
    .await?
    .data
    .unwrap();
    checkout_service::checkout_cart(&state, &user, cart.id).await?;

    // Second checkout, adding items and cancelling are all refused.
    let again = checkout_service::checkout_cart(&state, &user, cart.id).await;
    assert!(matches!(again, Err(AppError::BadRequest(_))));

    let add = cart_service::add_item(
        &state,
        &user,
        cart.id,
        AddCartItemRequest { product_id: product.id, quantity: 1 },
    )
    .await;
    assert!(matches!(add, Err(AppError::BadRequest(_))));

    let remove = cart_service::remove_item(&state, &user, cart.id, added.items[0].id).await;
    assert!(matches!(remove, Err(AppError::BadRequest(_))));

    let cancel = cart_service::cancel_cart(&state, &user, cart.id).await;
    assert!(matches!(cancel, Err(AppError::BadRequest(_))));

    assert_eq!(stock_of(&state, product.id).await?, 8);
    assert_eq!(Transactions::find().count(&state.orm).await?, 1);
    Ok(())
}

#[tokio::test]
async fn cancelled_cart_cannot_be_checked_out() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = create_customer(&state, "buyer").await?;
    let product = create_product(&state, "Widget", 100, 10).await?;

    let cart = cart_service::create_cart(&state, &user).await?.data.unwrap().cart;
    cart_service::add_item(
        &state,
        &user,
        cart.id,
        AddCartItemRequest { product_id: product.id, quantity: 1 },
    )
    .await?;
    let cancelled = cart_service::cancel_cart(&state, &user, cart.id).await?.data.unwrap();
    assert_eq!(cancelled.cart.status, CartStatus::Cancelled);

    let err = checkout_service::checkout_cart(&state, &user, cart.id).await;
    assert!(matches!(err, Err(AppError::BadRequest(_))));
    assert_eq!(stock_of(&state, product.id).await?, 10);
    Ok(())
}

#[tokio::test]
async fn checkout_is_limited_to_the_cart_owner() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let owner = create_customer(&state, "owner").await?;
    let stranger = create_customer(&state, "stranger").await?;
    let product = create_product(&state, "Widget", 100, 10).await?;

    let cart = cart_service::create_cart(&state, &owner).await?.data.unwrap().cart;
    cart_service::add_item(
        &state,
        &owner,
        cart.id,
        AddCartItemRequest { product_id: product.id, quantity: 1 },
    )
    .await?;

    let err = checkout_service::checkout_cart(&state, &stranger, cart.id).await;
    assert!(matches!(err, Err(AppError::Forbidden)));

    let missing = checkout_service::checkout_cart(&state, &owner, Uuid::new_v4()).await;
    assert!(matches!(missing, Err(AppError::NotFound(_))));
    Ok(())
}

#[tokio::test]
async fn transactions_are_scoped_to_their_owner() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let admin = create_admin(&state).await?;
    let alice = create_customer(&state, "alice").await?;
    let bob = create_customer(&state, "bob").await?;
    let product = create_product(&state, "Widget", 100, 10).await?;

    let mut receipts = Vec::new();
    for user in [&alice, &bob] {
        let cart = cart_service::create_cart(&state, user).await?.data.unwrap().cart;
        cart_service::add_item(
            &state,
            user,
            cart.id,
            AddCartItemRequest { product_id: product.id, quantity: 2 },
        )
        .await?;
        let receipt = transaction_service::create_transaction(
            &state,
            user,
            CreateTransactionRequest { cart_id: cart.id },
        )
        .await?
        .data
        .unwrap();
        receipts.push(receipt);
    }

    let own = transaction_service::list_transactions(&state, &alice)
        .await?
        .data
        .unwrap();
    assert_eq!(own.items.len(), 1);
    assert_eq!(own.items[0].user_id, alice.user_id);

    let all = transaction_service::list_transactions(&state, &admin)
        .await?
        .data
        .unwrap();
    assert_eq!(all.items.len(), 2);

    let bobs = receipts[1].transaction.id;
    let denied = transaction_service::get_transaction(&state, &alice, bobs).await;
    assert!(matches!(denied, Err(AppError::Forbidden)));
    let fetched = transaction_service::get_transaction(&state, &admin, bobs)
        .await?
        .data
        .unwrap();
    assert_eq!(fetched.total_price, 200);

    assert_eq!(stock_of(&state, product.id).await?, 6);
    Ok(())
}

// A decrement already written is undone when a later one fails on the same txn.
#[tokio::test]
async fn failed_decrement_rolls_back_earlier_ones() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let first = create_product(&state, "First", 100, 10).await?;
    let second = create_product(&state, "Second", 100, 1).await?;

    {
        let txn = state.orm.begin().await?;
        product_service::decrement_stock(
            &txn,
            &[StockUpdate { product_id: first.id, quantity: 4 }],
        )
        .await?;
        let failed = product_service::decrement_stock(
            &txn,
            &[StockUpdate { product_id: second.id, quantity: 2 }],
        )
        .await;
        assert!(matches!(failed, Err(AppError::BadRequest(_))));
        // Dropped without commit, like an early `?` return.
    }

    assert_eq!(stock_of(&state, first.id).await?, 10);
    assert_eq!(stock_of(&state, second.id).await?, 1);
    Ok(())
}

#[tokio::test]
async fn checkout_repairs_a_stale_cart_total() -> anyhow::Result<()> {
    let state = setup_state().await?;
    let user = create_customer(&state, "buyer").await?;
    let product = create_product(&state, "Widget", 120, 10).await?;

    let cart = cart_service::create_cart(&state, &user).await?.data.unwrap().cart;
    cart_service::add_item(
        &state,
        &user,
        cart.id,
        AddCartItemRequest { product_id: product.id, quantity: 3 },
    )
    .await?;

    let stored = Carts::find_by_id(cart.id).one(&state.orm).await?.unwrap();
    let mut active: CartActive = stored.into();
    active.total_amount = Set(1);
    active.update(&state.orm).await?;

    let receipt = checkout_service::checkout_cart(&state, &user, cart.id)
        .await?
        .data
        .unwrap();
    assert_eq!(receipt.transaction.total_price, 360);
    assert_eq!(receipt.cart.total_amount, 360);

    let closed = Carts::find_by_id(cart.id).one(&state.orm).await?.unwrap();
    assert_eq!(closed.total_amount, 360);
    assert_eq!(closed.status, "checked_out");
    Ok(())
}
