use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Cart, Transaction};

#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateTransactionRequest {
    pub cart_id: Uuid,
}

/// Result of a successful checkout: the ledger entry and the closed cart.
#[derive(Debug, Serialize, ToSchema)]
pub struct CheckoutReceipt {
    pub transaction: Transaction,
    pub cart: Cart,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(transparent)]
pub struct TransactionList {
    #[schema(value_type = Vec<Transaction>)]
    pub items: Vec<Transaction>,
}
