//! The one persisted secret: the content store access token.

use folio_keyring_store::CredentialStore;
use folio_store_client::AccessToken;

use crate::error::Result;

/// Account under which the access token is stored.
pub const TOKEN_ACCOUNT: &str = "github_token";

/// Loads the saved token. A saved value that no longer passes format
/// validation is discarded.
pub fn load_token(store: &dyn CredentialStore, account: &str) -> Result<Option<AccessToken>> {
    let Some(raw) = store.load(account)? else {
        return Ok(None);
    };
    match AccessToken::parse(&raw) {
        Ok(token) => Ok(Some(token)),
        Err(err) => {
            tracing::warn!("discarding saved credential: {err}");
            store.delete(account)?;
            Ok(None)
        }
    }
}

pub fn save_token(store: &dyn CredentialStore, account: &str, token: &AccessToken) -> Result<()> {
    store.save(account, token.expose())?;
    tracing::info!("credential saved");
    Ok(())
}

/// Returns `true` when a saved token was removed.
pub fn forget_token(store: &dyn CredentialStore, account: &str) -> Result<bool> {
    let removed = store.delete(account)?;
    if removed {
        tracing::info!("saved credential forgotten");
    }
    Ok(removed)
}
