pub mod auth;
pub mod cart;
pub mod products;
pub mod transactions;
pub mod users;
