//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::services::{
    CallbackVerifier, DisabledPaymentGateway, EventBus, HttpPaymentGateway, PaymentGateway,
};

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    events: EventBus,
    gateway: Arc<dyn PaymentGateway>,
    verifier: Option<CallbackVerifier>,
}

impl AppState {
    /// Create a new application state.
    ///
    /// The payment gateway and callback verifier are derived from
    /// `config.payment`: without a gateway URL checkout issues no payment
    /// links, and without a callback secret every callback is refused.
    #[must_use]
    pub fn new(config: StorefrontConfig, pool: PgPool, events: EventBus) -> Self {
        let gateway: Arc<dyn PaymentGateway> = match &config.payment.gateway_url {
            Some(url) => Arc::new(HttpPaymentGateway::new(url.clone())),
            None => Arc::new(DisabledPaymentGateway),
        };
        Self::with_gateway(config, pool, events, gateway)
    }

    /// Create a state with an explicit payment gateway.
    #[must_use]
    pub fn with_gateway(
        config: StorefrontConfig,
        pool: PgPool,
        events: EventBus,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let verifier = config.payment.callback_secret.clone().map(|secret| {
            CallbackVerifier::new(secret, config.payment.callback_tolerance_secs)
        });

        Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                events,
                gateway,
                verifier,
            }),
        }
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get the post-commit event bus.
    #[must_use]
    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Get the payment gateway.
    #[must_use]
    pub fn gateway(&self) -> &dyn PaymentGateway {
        self.inner.gateway.as_ref()
    }

    /// Get the callback verifier, if a callback secret is configured.
    #[must_use]
    pub fn verifier(&self) -> Option<&CallbackVerifier> {
        self.inner.verifier.as_ref()
    }
}
