//! Authoritative recipient state: whitelist, admins and per-recipient
//! location lists.
//!
//! Every mutation is applied to a copy of the current snapshot, persisted
//! through the [`ConfigStore`], and only then swapped in. A failed save leaves
//! the in-memory state exactly as it was. The whole mutate-then-persist
//! sequence runs under one lock, so concurrent commands cannot lose updates.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::{
    config::{Config, ConfigStore, StoreError},
    model::RecipientId,
    provider::{ForecastQuery, ProviderError, WeatherProvider},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
    /// The location is empty or the provider does not recognise it.
    Rejected(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoveOutcome {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyPresent,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("change was not saved: {0}")]
    Persistence(#[from] StoreError),

    /// The provider could not be asked whether the location exists.
    #[error("could not check the location: {0}")]
    Provider(#[from] ProviderError),
}

/// Result of a mutation closure: whether the draft must be persisted.
enum Mutation<T> {
    Changed(T),
    Unchanged(T),
}

#[derive(Debug)]
pub struct LocationRegistry {
    state: Mutex<Config>,
    store: Arc<dyn ConfigStore>,
}

impl LocationRegistry {
    pub fn new(mut config: Config, store: Arc<dyn ConfigStore>) -> Self {
        config.ensure_admin_whitelisted();
        Self { state: Mutex::new(config), store }
    }

    /// Build the registry from the store's current snapshot.
    pub fn load(store: Arc<dyn ConfigStore>) -> Result<Self, StoreError> {
        let config = store.load()?;
        Ok(Self::new(config, store))
    }

    pub async fn is_authorized(&self, id: &RecipientId) -> bool {
        let state = self.state.lock().await;
        state.telegram.whitelisted_users.iter().any(|u| u == id.as_str())
    }

    pub async fn is_admin(&self, id: &RecipientId) -> bool {
        let state = self.state.lock().await;
        state.telegram.admins.iter().any(|u| u == id.as_str())
    }

    pub async fn list_locations(&self, id: &RecipientId) -> Vec<String> {
        let state = self.state.lock().await;
        state.locations.get(id.as_str()).cloned().unwrap_or_default()
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> Config {
        self.state.lock().await.clone()
    }

    /// Whitelisted recipients with their locations, in stable recipient order.
    pub async fn dispatch_targets(&self) -> Vec<(RecipientId, Vec<String>)> {
        let state = self.state.lock().await;
        state
            .locations
            .iter()
            .filter(|(id, locations)| {
                !locations.is_empty() && state.telegram.whitelisted_users.contains(*id)
            })
            .map(|(id, locations)| (RecipientId::new(id.clone()), locations.clone()))
            .collect()
    }

    /// Add a location after checking the provider recognises it.
    pub async fn add_location(
        &self,
        id: &RecipientId,
        location: &str,
        probe: &dyn WeatherProvider,
    ) -> Result<AddOutcome, RegistryError> {
        let location = location.trim();
        if location.is_empty() {
            return Ok(AddOutcome::Rejected("location must not be empty".to_string()));
        }

        if contains_ignore_case(&self.list_locations(id).await, location) {
            return Ok(AddOutcome::AlreadyPresent);
        }

        // The probe runs without holding the lock.
        match probe.fetch_forecast(location, ForecastQuery::probe()).await {
            Ok(_) => {}
            Err(e @ ProviderError::InvalidLocation(_)) => {
                info!(recipient = %id, location, "location rejected by provider");
                return Ok(AddOutcome::Rejected(e.to_string()));
            }
            Err(e) => {
                warn!(recipient = %id, location, error = %e, "could not check location");
                return Err(e.into());
            }
        }

        let outcome = self
            .mutate(|cfg| {
                let list = cfg.locations.entry(id.to_string()).or_default();
                if contains_ignore_case(list, location) {
                    return Mutation::Unchanged(AddOutcome::AlreadyPresent);
                }
                list.push(location.to_string());
                Mutation::Changed(AddOutcome::Added)
            })
            .await?;

        if outcome == AddOutcome::Added {
            info!(recipient = %id, location, "location added");
        }
        Ok(outcome)
    }

    pub async fn remove_location(
        &self,
        id: &RecipientId,
        location: &str,
    ) -> Result<RemoveOutcome, RegistryError> {
        let location = location.trim();

        let outcome = self
            .mutate(|cfg| {
                let Some(list) = cfg.locations.get_mut(id.as_str()) else {
                    return Mutation::Unchanged(RemoveOutcome::NotFound);
                };
                if !contains_ignore_case(list, location) {
                    return Mutation::Unchanged(RemoveOutcome::NotFound);
                }

                list.retain(|l| !eq_ignore_case(l, location));
                if list.is_empty() {
                    cfg.locations.remove(id.as_str());
                }
                Mutation::Changed(RemoveOutcome::Removed)
            })
            .await?;

        if outcome == RemoveOutcome::Removed {
            info!(recipient = %id, location, "location removed");
        }
        Ok(outcome)
    }

    /// Self-service onboarding. There is no way back out of the whitelist.
    pub async fn grant_whitelist(&self, id: &RecipientId) -> Result<GrantOutcome, RegistryError> {
        let outcome = self
            .mutate(|cfg| {
                let users = &mut cfg.telegram.whitelisted_users;
                if users.iter().any(|u| u == id.as_str()) {
                    return Mutation::Unchanged(GrantOutcome::AlreadyPresent);
                }
                users.push(id.to_string());
                Mutation::Changed(GrantOutcome::Granted)
            })
            .await?;

        if outcome == GrantOutcome::Granted {
            info!(recipient = %id, "recipient whitelisted");
        }
        Ok(outcome)
    }

    async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Config) -> Mutation<T>,
    ) -> Result<T, RegistryError> {
        let mut state = self.state.lock().await;
        let mut draft = state.clone();

        match apply(&mut draft) {
            Mutation::Unchanged(outcome) => Ok(outcome),
            Mutation::Changed(outcome) => {
                if let Err(e) = self.store.save(&draft) {
                    warn!(error = %e, "failed to persist registry change, discarding it");
                    return Err(e.into());
                }
                *state = draft;
                Ok(outcome)
            }
        }
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

fn contains_ignore_case(list: &[String], location: &str) -> bool {
    list.iter().any(|l| eq_ignore_case(l, location))
}
