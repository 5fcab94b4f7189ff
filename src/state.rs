// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::auth::{AdminCredential, AuthError};
use crate::config::Config;
use crate::envelope::{EnvelopeLifecycle, SigningServices};
use crate::events::{DomainEvent, EventDispatcher, DEFAULT_CAPACITY};
use crate::storage::{DbError, DocumentVault, EnvelopeDb, ObjectStore, ObjectStoreError};
use crate::verification::{VerificationClient, VerificationError};

/// Failure while assembling the application state at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("database: {0}")]
    Database(#[from] DbError),

    #[error("object store: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("admin credential: {0}")]
    Admin(#[from] AuthError),

    #[error("vision client: {0}")]
    Vision(#[from] VerificationError),
}

/// Request-independent settings handlers need.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub app_base_url: String,
    pub envelope_ttl: chrono::Duration,
    pub signing_link_ttl: chrono::Duration,
    pub max_upload_bytes: usize,
}

impl ServiceSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            app_base_url: config.app_base_url.clone(),
            envelope_ttl: config.envelope_ttl,
            signing_link_ttl: config.signing_link_ttl,
            max_upload_bytes: config.max_upload_bytes,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<EnvelopeDb>,
    pub vault: Arc<DocumentVault>,
    pub events: EventDispatcher,
    pub admin: Arc<AdminCredential>,
    pub settings: Arc<ServiceSettings>,
    /// `None` when no vision backend is configured.
    pub verifier: Option<Arc<VerificationClient>>,
}

impl AppState {
    pub fn new(
        db: EnvelopeDb,
        vault: DocumentVault,
        events: EventDispatcher,
        admin: AdminCredential,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            db: Arc::new(db),
            vault: Arc::new(vault),
            events,
            admin: Arc::new(admin),
            settings: Arc::new(settings),
            verifier: None,
        }
    }

    /// Attach a vision backend client.
    pub fn with_verifier(mut self, verifier: VerificationClient) -> Self {
        self.verifier = Some(Arc::new(verifier));
        self
    }

    /// Open storage and build every service from `config`.
    ///
    /// Returns the receiving end of the event channel for the notifier.
    pub fn from_config(
        config: &Config,
    ) -> Result<(Self, mpsc::Receiver<DomainEvent>), StartupError> {
        let paths = config.storage_paths();
        let db = EnvelopeDb::open(&paths.database_file())?;
        let vault = DocumentVault::new(ObjectStore::open(paths)?, &config.encryption_key);
        let (events, rx) = EventDispatcher::channel(DEFAULT_CAPACITY);
        let admin = AdminCredential::new(&config.admin_token)?;

        let mut state = Self::new(
            db,
            vault,
            events,
            admin,
            ServiceSettings::from_config(config),
        );
        if let Some(vision) = &config.vision {
            state = state.with_verifier(VerificationClient::new(vision)?);
        }
        Ok((state, rx))
    }

    pub fn lifecycle(&self) -> EnvelopeLifecycle<'_> {
        EnvelopeLifecycle::new(&self.db, &self.events)
    }

    pub fn signing_services(&self) -> SigningServices<'_> {
        SigningServices {
            db: &self.db,
            vault: &self.vault,
            events: &self.events,
        }
    }
}
