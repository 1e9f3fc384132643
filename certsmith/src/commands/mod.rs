pub mod certs;
pub mod renewal;

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::crypto::{CredentialProvider, KeyCredentialProvider, KeyStore};
use crate::manager::CertificateManager;
use crate::paths::certsmith_home_dir;
use crate::provision::Provisioner;
use crate::ssh::SshConnector;
use crate::store::SqliteStore;

/// Everything a command needs, built from the home directory and settings
pub(crate) struct Context {
    pub settings: Settings,
    pub credentials: Arc<dyn CredentialProvider>,
    pub manager: Arc<CertificateManager>,
}

impl Context {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let home = certsmith_home_dir()?;
        let settings = Settings::load()?;

        let database = settings.database_path(&home);
        tracing::debug!(path = %database.display(), "Opening certificate database");
        let store = SqliteStore::open(&database)?;

        let key_store = KeyStore::with_path(settings.key_file_path(&home));
        let credentials: Arc<dyn CredentialProvider> =
            Arc::new(KeyCredentialProvider::from_key_store(&key_store)?);

        let provisioner = Provisioner::new(Arc::new(SshConnector), credentials.clone())
            .with_timeouts(
                settings.ssh.connect_timeout(),
                settings.ssh.command_timeout(),
            );
        let manager = CertificateManager::new(Arc::new(store), Arc::new(provisioner));

        Ok(Self {
            settings,
            credentials,
            manager: Arc::new(manager),
        })
    }
}

/// Token cancelled on the first Ctrl-C
pub(crate) fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, cancelling");
            token.cancel();
        }
    });
    cancel
}
