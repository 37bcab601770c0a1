use log::{error, info};

use crate::models::{IdentityId, NewIdentity};
use crate::store::Store;

/// Creates the temporary identity for a new connection.
///
/// Runs once per session with no retry. `None` leaves the session degraded:
/// everything that needs an identity becomes a no-op.
pub async fn provision(store: &dyn Store) -> Option<IdentityId> {
    match store.insert_identity(NewIdentity::standby()).await {
        Ok(identity) => {
            info!("Provisioned temporary identity {}", identity.id);
            Some(identity.id)
        }
        Err(e) => {
            error!("Error inserting user: {}", e);
            None
        }
    }
}
