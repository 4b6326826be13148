// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@kernel.org>

//! ReelReview: account and session backend for a movie-review platform
//!
//! This crate provides the `/users` API: password and Google sign-in,
//! short-lived access tokens, rotating refresh tokens kept hashed in a
//! per-user ledger, and the role gate used by admin routes.

pub mod config;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use config::Config;
use db::UserStore;
use services::{IdTokenVerifier, IdentityBridge, RefreshTokenLedger, TokenIssuer};
use std::sync::Arc;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn UserStore>,
    pub tokens: TokenIssuer,
    pub ledger: RefreshTokenLedger,
    pub identity: IdentityBridge,
}

impl AppState {
    pub fn new(
        config: Config,
        store: Arc<dyn UserStore>,
        google_verifier: Arc<dyn IdTokenVerifier>,
    ) -> Self {
        Self {
            tokens: TokenIssuer::new(&config),
            ledger: RefreshTokenLedger::new(store.clone()),
            identity: IdentityBridge::new(store.clone(), google_verifier),
            store,
            config,
        }
    }
}
