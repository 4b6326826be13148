// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Services module - business logic layer.

pub mod google_oidc;
pub mod identity;
pub mod ledger;
pub mod password;
pub mod tokens;

pub use google_oidc::{GoogleIdentity, GoogleOidcVerifier, IdTokenVerifier, OidcError};
pub use identity::IdentityBridge;
pub use ledger::RefreshTokenLedger;
pub use tokens::{AccessClaims, TokenIssuer, TokenRejection};
