//! Device directory port (driven/secondary port)

use async_trait::async_trait;

use crate::domain::ClientDevice;

/// Port trait for looking up the devices a sync round must address
///
/// Implementations typically query the discovery layer for every device
/// of the acting user plus, for shared paths, the collaborators' devices.
/// The caller filters out its own address.
#[async_trait]
pub trait ILocations: Send + Sync {
    /// All currently known devices relevant to this user's sync rounds
    async fn locations(&self) -> anyhow::Result<Vec<ClientDevice>>;
}
