//! Per-instance enrichment
//!
//! One image lookup, classification and jump-host resolution per instance,
//! then the result goes straight into the inventory.

use crate::bastion::BastionCache;
use crate::classify::classify;
use crate::client::CloudClient;
use crate::error::Result;
use crate::instance::{Image, Instance};
use crate::inventory::Inventory;
use tracing::{debug, warn};

/// What happened to one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnrichOutcome {
    /// Added to the inventory
    Added {
        /// Whether the image lookup succeeded
        image_resolved: bool,
    },
    /// Intentionally left out (Windows)
    Excluded,
}

/// Enriches the instances of one profile
///
/// Owns the profile's [`BastionCache`]: a new enricher starts with an empty
/// cache, and the cache is dropped with it.
pub struct InstanceEnricher<'a, C: CloudClient + ?Sized> {
    client: &'a C,
    profile: &'a str,
    bastions: BastionCache,
}

impl<'a, C: CloudClient + ?Sized> InstanceEnricher<'a, C> {
    /// Create an enricher for one profile's session
    pub fn new(client: &'a C, profile: &'a str) -> Self {
        Self {
            client,
            profile,
            bastions: BastionCache::new(),
        }
    }

    /// Bastions resolved so far
    pub fn bastions(&self) -> &BastionCache {
        &self.bastions
    }

    /// Enrich one instance and add it to `inventory`
    ///
    /// Image lookup failures only drop the OS group and login user. A bastion
    /// that cannot be resolved still leaves the instance in the inventory,
    /// without `ansible_ssh_extra_args`, and is returned as the error.
    pub async fn enrich(&mut self, instance: &Instance, inventory: &mut Inventory) -> Result<EnrichOutcome> {
        let image = self.image_of(instance).await;
        let image_resolved = image.is_some();

        let Some(mut classification) = classify(instance, image.as_ref(), self.profile) else {
            return Ok(EnrichOutcome::Excluded);
        };

        let jump = self.bastions.resolve(self.client, instance).await;
        let failure = match jump {
            Ok(args) => {
                classification.hostvars.ansible_ssh_extra_args = args;
                None
            }
            Err(e) => {
                warn!(
                    instance = %instance.name,
                    error = %e,
                    "Bastion not found, leaving out jump host"
                );
                Some(e)
            }
        };

        inventory.add_host(&instance.name, &classification.groups, classification.hostvars);

        match failure {
            Some(e) => Err(e),
            None => Ok(EnrichOutcome::Added { image_resolved }),
        }
    }

    async fn image_of(&self, instance: &Instance) -> Option<Image> {
        let id = instance.image.as_deref()?;
        match self.client.get_image(id).await {
            Ok(image) => Some(image),
            Err(e) => {
                debug!(instance = %instance.name, image = %id, error = %e, "Error getting image detail");
                None
            }
        }
    }
}
