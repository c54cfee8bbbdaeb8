use utoipa::{
    Modify, OpenApi,
    openapi::{
        self,
        OpenApi as OpenApiSpec,
        security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
    },
};
use utoipa_scalar::{Scalar, Servable};

use crate::{
    dto::{
        auth::{LoginRequest, LoginResponse, RegisterRequest},
        cart::{AddCartItemRequest, CartList, CartWithItems, UpdateCartItemRequest},
        products::{
            BulkStockUpdateRequest, CreateProductRequest, ProductList, StockUpdate,
            UpdateProductRequest,
        },
        transactions::{CheckoutReceipt, CreateTransactionRequest, TransactionList},
        users::{CreateUserRequest, UpdateUserRequest, UserList},
    },
    models::{Cart, CartItem, CartStatus, Product, Transaction, User},
    response::{ApiResponse, Meta},
    routes::{auth, carts, health, products, transactions, users},
};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "bearer_auth",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health_check,
        auth::register,
        auth::login,
        users::list_users,
        users::create_user,
        users::get_user,
        users::update_user,
        users::delete_user,
        products::list_products,
        products::create_product,
        products::get_product,
        products::update_product,
        products::delete_product,
        products::update_stock_bulk,
        carts::list_carts,
        carts::create_cart,
        carts::get_cart,
        carts::delete_cart,
        carts::add_item,
        carts::update_item,
        carts::remove_item,
        carts::cancel_cart,
        carts::checkout,
        transactions::list_transactions,
        transactions::create_transaction,
        transactions::get_transaction
    ),
    components(
        schemas(
            User,
            Product,
            Cart,
            CartItem,
            CartStatus,
            Transaction,
            RegisterRequest,
            LoginRequest,
            LoginResponse,
            CreateUserRequest,
            UpdateUserRequest,
            UserList,
            CreateProductRequest,
            UpdateProductRequest,
            StockUpdate,
            BulkStockUpdateRequest,
            ProductList,
            AddCartItemRequest,
            UpdateCartItemRequest,
            CartWithItems,
            CartList,
            CreateTransactionRequest,
            CheckoutReceipt,
            TransactionList,
            Meta,
            ApiResponse<Product>,
            ApiResponse<ProductList>,
            ApiResponse<CartWithItems>,
            ApiResponse<CheckoutReceipt>
        )
    ),
    security(
        ("bearer_auth" = [])
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "Health", description = "Health check endpoint"),
        (name = "Auth", description = "Authentication endpoints"),
        (name = "Users", description = "User endpoints"),
        (name = "Products", description = "Product and stock endpoints"),
        (name = "Carts", description = "Cart and checkout endpoints"),
        (name = "Transactions", description = "Transaction ledger endpoints"),
    )
)]
pub struct ApiDoc;

pub fn scalar_docs() -> Scalar<OpenApiSpec> {
    Scalar::with_url("/docs", ApiDoc::openapi())
}
