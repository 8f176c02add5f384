//! Subscription-commerce backend: accounts, bearer sessions, one free trial
//! per phone number, password resets and Stripe-backed billing.

pub mod app;
pub mod auth;
pub mod billing;
pub mod config;
pub mod error;
pub mod profile;
pub mod state;
pub mod store;
