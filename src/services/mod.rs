//! Business logic services

pub mod auth;
pub mod catalog;
pub mod circulation;
pub mod email;
pub mod memberships;
pub mod redis;
pub mod tokens;

use std::sync::Arc;

use crate::{config::AppConfig, repository::Repository};

/// Container for all services
#[derive(Clone)]
pub struct Services {
    pub auth: auth::AuthService,
    pub catalog: catalog::CatalogService,
    pub circulation: circulation::CirculationService,
    pub memberships: memberships::MembershipService,
}

impl Services {
    /// Create all services over one repository and token store
    pub fn new(
        repository: Repository,
        tokens: Arc<dyn tokens::TokenStore>,
        notifier: Arc<dyn email::Notifier>,
        config: &AppConfig,
    ) -> Self {
        Self {
            auth: auth::AuthService::new(
                repository.clone(),
                config.auth.clone(),
                config.server.public_url.clone(),
                tokens,
                notifier,
            ),
            catalog: catalog::CatalogService::new(repository.clone()),
            circulation: circulation::CirculationService::new(repository.clone(), &config.circulation),
            memberships: memberships::MembershipService::new(repository),
        }
    }
}
