//! Profile walking
//!
//! Profiles are walked one after another. Within a profile, instances are
//! enriched strictly in sequence: the next one starts only after the
//! previous one has been added to the inventory. The bastion cache and the
//! inventory therefore have a single writer and need no locking, and two
//! instances behind the same unresolved bastion cannot race to look it up.

use crate::client::{CloudClient, Connector};
use crate::config::Profile;
use crate::enrich::{EnrichOutcome, InstanceEnricher};
use crate::inventory::Inventory;
use tracing::{debug, error, info, warn};

/// Result of walking one profile
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileReport {
    /// Profile name
    pub profile: String,

    /// Skipped without opening a session (the `env` profile)
    pub skipped: bool,

    /// Instances returned by the listing
    pub listed: usize,

    /// Instances added to the inventory
    pub inventoried: usize,

    /// Instances intentionally left out (Windows)
    pub excluded: usize,

    /// Instances whose image lookup failed
    pub degraded: usize,

    /// Instances whose bastion could not be resolved
    pub failures: usize,

    /// Why the profile contributed nothing, if it failed as a whole
    pub error: Option<String>,
}

impl ProfileReport {
    fn new(profile: &str) -> Self {
        Self {
            profile: profile.to_string(),
            ..Default::default()
        }
    }

    fn failed(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Walks profiles through a [`Connector`]
pub struct ProfileWalker<'a, K: Connector> {
    connector: &'a K,
    key_id_override: Option<String>,
}

impl<'a, K: Connector> ProfileWalker<'a, K> {
    /// Create a walker
    pub fn new(connector: &'a K) -> Self {
        Self {
            connector,
            key_id_override: None,
        }
    }

    /// Use this key id for every profile
    pub fn with_key_id_override(mut self, key_id: Option<String>) -> Self {
        self.key_id_override = key_id;
        self
    }

    /// Walk one profile into `inventory`
    ///
    /// Never fails: a profile whose session cannot be opened, or whose
    /// instances cannot be listed, reports the error and contributes nothing.
    pub async fn walk(&self, profile: &Profile, inventory: &mut Inventory) -> ProfileReport {
        let report = ProfileReport::new(&profile.name);

        if profile.is_env() {
            debug!(profile = %profile.name, "Skipping profile env");
            return ProfileReport {
                skipped: true,
                ..report
            };
        }

        let profile = profile
            .clone()
            .with_key_id_override(self.key_id_override.as_deref());

        let client = match self.connector.connect(&profile).await {
            Ok(client) => client,
            Err(e) => {
                error!(profile = %profile.name, url = %profile.url, error = %e, "Error creating Triton client");
                return report.failed(e);
            }
        };

        let report = walk_session(&client, &profile, inventory, report).await;
        client.close().await;
        report
    }

    /// Walk every profile in order into a fresh inventory
    pub async fn walk_all(&self, profiles: &[Profile]) -> (Inventory, Vec<ProfileReport>) {
        let mut inventory = Inventory::new();
        let mut reports = Vec::with_capacity(profiles.len());

        for profile in profiles {
            let report = self.walk(profile, &mut inventory).await;
            if !report.skipped {
                info!(
                    profile = %report.profile,
                    listed = report.listed,
                    inventoried = report.inventoried,
                    excluded = report.excluded,
                    failures = report.failures,
                    "Profile done"
                );
            }
            reports.push(report);
        }

        (inventory, reports)
    }
}

async fn walk_session<C: CloudClient + ?Sized>(
    client: &C,
    profile: &Profile,
    inventory: &mut Inventory,
    mut report: ProfileReport,
) -> ProfileReport {
    let instances = match client.list_instances().await {
        Ok(instances) => instances,
        Err(e) => {
            error!(profile = %profile.name, url = %profile.url, error = %e, "Not able to list machines");
            return report.failed(e);
        }
    };
    report.listed = instances.len();
    debug!(profile = %profile.name, count = instances.len(), "Need to do instances");

    // Warms the client's image cache; per-instance lookups still work without it
    if let Err(e) = client.list_images().await {
        debug!(profile = %profile.name, error = %e, "Error retrieving image information");
    }

    let mut enricher = InstanceEnricher::new(client, &profile.name);
    for (n, instance) in instances.iter().enumerate() {
        debug!(instance = %instance.id, count = n + 1, "Enriching instance");
        match enricher.enrich(instance, inventory).await {
            Ok(EnrichOutcome::Added { image_resolved }) => {
                report.inventoried += 1;
                if !image_resolved {
                    report.degraded += 1;
                }
            }
            Ok(EnrichOutcome::Excluded) => report.excluded += 1,
            Err(e) => {
                warn!(profile = %profile.name, instance = %instance.name, error = %e, "Instance inventoried without jump host");
                report.inventoried += 1;
                report.failures += 1;
            }
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::fake::{FakeCloud, FakeConnector};
    use crate::config::ENV_PROFILE_NAME;
    use crate::instance::{Image, Instance, Tags};
    use serde_json::json;

    fn profile(name: &str) -> Profile {
        Profile::new(name, format!("https://{}.example.com", name), "ops", "SHA256:abc")
    }

    fn linux() -> Image {
        Image::new("img-linux", "linux")
    }

    /// web1 and web2, with web2 reached through bastion1
    fn prod() -> FakeCloud {
        FakeCloud::default()
            .with_image(linux())
            .with_instance(
                Instance::new("i-1", "web1")
                    .with_primary_ip("10.0.0.1")
                    .with_image("img-linux")
                    .with_tags(
                        Tags::new()
                            .with("role", true)
                            .with("triton.cns.services", "http:80"),
                    ),
            )
            .with_instance(
                Instance::new("i-2", "web2")
                    .with_primary_ip("10.0.0.2")
                    .with_image("img-linux")
                    .with_tags(Tags::new().with("tritoncli.ssh.proxy", "bastion1")),
            )
            .with_hidden_instance(Instance::new("i-9", "bastion1").with_primary_ip("10.0.0.9"))
    }

    #[tokio::test]
    async fn test_end_to_end_document() {
        let cloud = prod();
        let connector = FakeConnector::default().with_account("prod", cloud.clone());
        let walker = ProfileWalker::new(&connector);

        let (inventory, reports) = walker.walk_all(&[profile("prod")]).await;

        assert_eq!(inventory.children(), ["linux", "http", "role", "prod"]);
        assert_eq!(
            serde_json::to_value(&inventory).unwrap(),
            json!({
                "_meta": {"hostvars": {
                    "web1": {"ansible_host": "10.0.0.1"},
                    "web2": {
                        "ansible_host": "10.0.0.2",
                        "ansible_ssh_extra_args": "-J root@10.0.0.9"
                    }
                }},
                "all": {"children": ["linux", "http", "role", "prod"]},
                "linux": {"hosts": ["web1", "web2"]},
                "http": {"hosts": ["web1"]},
                "role": {"hosts": ["web1"]},
                "prod": {"hosts": ["web1", "web2"]}
            })
        );

        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].listed, 2);
        assert_eq!(reports[0].inventoried, 2);
        assert_eq!(reports[0].failures, 0);
        assert_eq!(cloud.close_count(), 1);
    }

    #[tokio::test]
    async fn test_run_is_idempotent() {
        let connector = FakeConnector::default().with_account("prod", prod());
        let walker = ProfileWalker::new(&connector);

        let (first, _) = walker.walk_all(&[profile("prod")]).await;
        let (second, _) = walker.walk_all(&[profile("prod")]).await;
        assert_eq!(first.to_json().unwrap(), second.to_json().unwrap());
    }

    #[tokio::test]
    async fn test_shared_bastion_looked_up_once() {
        let cloud = FakeCloud::default()
            .with_image(linux())
            .with_instance(Instance::new("b", "bastionA").with_primary_ip("192.0.2.7"))
            .with_instance(
                Instance::new("1", "app1")
                    .with_image("img-linux")
                    .with_tags(Tags::new().with("tritoncli.ssh.proxy", "bastionA")),
            )
            .with_instance(
                Instance::new("2", "app2")
                    .with_image("img-linux")
                    .with_tags(Tags::new().with("tritoncli.ssh.proxy", "bastionA")),
            );
        let connector = FakeConnector::default().with_account("prod", cloud.clone());

        let (inventory, _) = ProfileWalker::new(&connector)
            .walk_all(&[profile("prod")])
            .await;

        assert_eq!(cloud.lookups("bastionA"), 1);
        for host in ["app1", "app2"] {
            assert_eq!(
                inventory.hostvars(host).unwrap().ansible_ssh_extra_args.as_deref(),
                Some("-J root@192.0.2.7")
            );
        }
    }

    #[tokio::test]
    async fn test_bastion_cache_is_per_profile() {
        let bastion_at = |ip: &str| {
            FakeCloud::default()
                .with_instance(Instance::new("b", "bastion").with_primary_ip(ip))
                .with_instance(
                    Instance::new("1", "app")
                        .with_tags(Tags::new().with("tritoncli.ssh.proxy", "bastion")),
                )
        };
        let east = bastion_at("10.1.0.1");
        let west = bastion_at("10.2.0.1")
            .with_instance(
                Instance::new("2", "app-west")
                    .with_tags(Tags::new().with("tritoncli.ssh.proxy", "bastion")),
            );
        let connector = FakeConnector::default()
            .with_account("east", east.clone())
            .with_account("west", west.clone());

        let (inventory, _) = ProfileWalker::new(&connector)
            .walk_all(&[profile("east"), profile("west")])
            .await;

        assert_eq!(east.lookups("bastion"), 1);
        assert_eq!(west.lookups("bastion"), 1);
        assert_eq!(
            inventory.hostvars("app-west").unwrap().ansible_ssh_extra_args.as_deref(),
            Some("-J root@10.2.0.1")
        );
    }

    #[tokio::test]
    async fn test_bastion_failure_isolated() {
        let cloud = FakeCloud::default()
            .with_image(linux())
            .with_instance(
                Instance::new("1", "lost")
                    .with_primary_ip("10.0.0.1")
                    .with_image("img-linux")
                    .with_tags(Tags::new().with("tritoncli.ssh.proxy", "ghost")),
            )
            .with_instance(
                Instance::new("2", "fine")
                    .with_primary_ip("10.0.0.2")
                    .with_image("img-linux")
                    .with_tags(Tags::new().with("tritoncli.ssh.ip", "192.0.2.1")),
            );
        let connector = FakeConnector::default().with_account("prod", cloud);

        let (inventory, reports) = ProfileWalker::new(&connector)
            .walk_all(&[profile("prod")])
            .await;

        let lost = inventory.hostvars("lost").unwrap();
        assert_eq!(lost.ansible_ssh_extra_args, None);
        assert_eq!(inventory.groups_of("lost"), vec!["linux", "prod"]);
        assert_eq!(
            inventory.hostvars("fine").unwrap().ansible_ssh_extra_args.as_deref(),
            Some("-J root@192.0.2.1")
        );
        assert_eq!(reports[0].failures, 1);
        assert_eq!(reports[0].inventoried, 2);
    }

    #[tokio::test]
    async fn test_profile_named_all_still_groups_its_hosts() {
        let cloud = FakeCloud::default()
            .with_instance(Instance::new("1", "web1").with_primary_ip("10.0.0.1"));
        let connector = FakeConnector::default().with_account("all", cloud);

        let (inventory, _) = ProfileWalker::new(&connector)
            .walk_all(&[profile("all")])
            .await;

        assert_eq!(inventory.groups_of("web1"), vec!["_all"]);
        let value: serde_json::Value = serde_json::from_str(&inventory.to_json().unwrap()).unwrap();
        assert_eq!(value["all"]["children"], serde_json::json!(["_all"]));
        assert_eq!(value["_all"]["hosts"], serde_json::json!(["web1"]));
    }

    #[tokio::test]
    async fn test_windows_excluded_from_document() {
        let cloud = FakeCloud::default()
            .with_image(Image::new("img-win", "windows"))
            .with_image(linux())
            .with_instance(
                Instance::new("1", "win1")
                    .with_image("img-win")
                    .with_tags(Tags::new().with("role", true)),
            )
            .with_instance(Instance::new("2", "lin1").with_image("img-linux"));
        let connector = FakeConnector::default().with_account("prod", cloud);

        let (inventory, reports) = ProfileWalker::new(&connector)
            .walk_all(&[profile("prod")])
            .await;

        assert!(inventory.hostvars("win1").is_none());
        assert!(inventory.group("role").is_none());
        for group in inventory.children() {
            assert!(!inventory.group(group).unwrap().hosts.contains(&"win1".to_string()));
        }
        assert_eq!(reports[0].excluded, 1);
        assert_eq!(reports[0].inventoried, 1);
    }

    #[tokio::test]
    async fn test_failing_profiles_do_not_stop_the_run() {
        let broken_listing = FakeCloud {
            fail_list_instances: true,
            ..Default::default()
        };
        let no_images = FakeCloud {
            fail_list_images: true,
            ..Default::default()
        }
        .with_instance(Instance::new("1", "solo").with_primary_ip("10.9.0.1"));

        let connector = FakeConnector::default()
            .refusing("locked")
            .with_account("broken", broken_listing.clone())
            .with_account("ok", no_images);

        let (inventory, reports) = ProfileWalker::new(&connector)
            .walk_all(&[profile("locked"), profile("broken"), profile("ok")])
            .await;

        assert!(reports[0].error.is_some());
        assert_eq!(reports[0].inventoried, 0);
        assert!(reports[1].error.is_some());
        assert_eq!(broken_listing.close_count(), 1);
        assert_eq!(reports[2].error, None);
        assert_eq!(reports[2].degraded, 1);
        assert_eq!(inventory.groups_of("solo"), vec!["ok"]);
        assert_eq!(connector.connected(), vec!["locked", "broken", "ok"]);
    }

    #[tokio::test]
    async fn test_env_profile_skipped() {
        let connector = FakeConnector::default();
        let (inventory, reports) = ProfileWalker::new(&connector)
            .walk_all(&[profile(ENV_PROFILE_NAME)])
            .await;

        assert!(reports[0].skipped);
        assert!(inventory.is_empty());
        assert!(connector.connected().is_empty());
    }

    #[tokio::test]
    async fn test_key_id_override_applied() {
        let connector = FakeConnector::default();
        let walker = ProfileWalker::new(&connector).with_key_id_override(Some("SHA256:ci".into()));
        let mut inventory = Inventory::new();

        let report = walker.walk(&profile("prod"), &mut inventory).await;
        assert_eq!(report.error, None);
        assert_eq!(report.listed, 0);
        assert!(inventory.is_empty());
        assert_eq!(connector.key_ids(), vec!["SHA256:ci"]);
    }

    #[tokio::test]
    async fn test_every_failure_still_yields_a_document() {
        let connector = FakeConnector::default().refusing("a").refusing("b");
        let (inventory, _) = ProfileWalker::new(&connector)
            .walk_all(&[profile("a"), profile("b")])
            .await;
        assert_eq!(
            inventory.to_json().unwrap(),
            r#"{"_meta":{"hostvars":{}},"all":{"children":[]}}"#
        );
    }
}
