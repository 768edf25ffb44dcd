//! Cloud-compute client
//!
//! The inventory pipeline only talks to [`CloudClient`], one session per
//! profile, opened through a [`Connector`]. [`TritonClient`] is the CloudAPI
//! implementation; tests use an in-memory fake.

use crate::auth::{RequestSigner, http_date};
use crate::config::Profile;
use crate::error::{InventoryError, Result};
use crate::instance::{Image, Instance};
use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

/// CloudAPI versions this client speaks
pub const ACCEPT_VERSION: &str = "~9||~8";

/// Page size for instance listing (CloudAPI maximum)
pub const LIST_PAGE_LIMIT: usize = 1000;

/// Length of a short instance id, the first block of its UUID
pub const SHORT_ID_LEN: usize = 8;

/// Per-request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// One authenticated session against a cloud account
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// List every instance in the account
    async fn list_instances(&self) -> Result<Vec<Instance>>;

    /// List the image catalog, warming the client's image cache
    async fn list_images(&self) -> Result<Vec<Image>>;

    /// Look up one image by id
    async fn get_image(&self, id: &str) -> Result<Image>;

    /// Look up one instance by id or by name
    async fn get_instance(&self, name_or_id: &str) -> Result<Instance>;

    /// Release the session
    async fn close(&self) {}
}

/// Opens client sessions for profiles
#[async_trait]
pub trait Connector: Send + Sync {
    /// Session type produced by this connector
    type Client: CloudClient;

    /// Open a session for a profile
    async fn connect(&self, profile: &Profile) -> Result<Self::Client>;
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

/// CloudAPI client for one profile
#[derive(Debug)]
pub struct TritonClient {
    http: reqwest::Client,
    base_url: String,
    account: String,
    signer: RequestSigner,
    images: RwLock<HashMap<String, Image>>,
}

impl TritonClient {
    /// Create a client for a profile with a ready signer
    pub fn new(profile: &Profile, signer: RequestSigner) -> Result<Self> {
        if profile.url.is_empty() {
            return Err(InventoryError::config(format!(
                "profile {} has no url",
                profile.name
            )));
        }

        let http = reqwest::Client::builder()
            .user_agent(concat!("triton-ansible-inventory/", env!("CARGO_PKG_VERSION")))
            .timeout(DEFAULT_REQUEST_TIMEOUT)
            .danger_accept_invalid_certs(profile.insecure)
            .build()?;

        Ok(Self {
            http,
            base_url: profile.url.trim_end_matches('/').to_string(),
            account: profile.account.clone(),
            signer,
            images: RwLock::new(HashMap::new()),
        })
    }

    /// Signed GET against `/<account><path>`
    async fn get_json<T: DeserializeOwned>(&self, path: &str, query: &[(&str, String)]) -> Result<T> {
        let url = format!("{}/{}{}", self.base_url, self.account, path);
        let date = http_date(Utc::now());
        let authorization = self.signer.authorization(&date)?;

        debug!(url = %url, ?query, "CloudAPI request");

        let response = self
            .http
            .get(&url)
            .query(query)
            .header("accept", "application/json")
            .header("accept-version", ACCEPT_VERSION)
            .header("date", &date)
            .header("authorization", authorization)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let parsed: ApiErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(InventoryError::Api {
                status: status.as_u16(),
                code: parsed.code,
                message: if parsed.message.is_empty() { body } else { parsed.message },
            });
        }

        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl CloudClient for TritonClient {
    async fn list_instances(&self) -> Result<Vec<Instance>> {
        let mut instances = Vec::new();
        loop {
            let page: Vec<Instance> = self
                .get_json(
                    "/machines",
                    &[
                        ("limit", LIST_PAGE_LIMIT.to_string()),
                        ("offset", instances.len().to_string()),
                    ],
                )
                .await?;
            let short = page.len() < LIST_PAGE_LIMIT;
            instances.extend(page);
            if short {
                break;
            }
        }
        debug!(account = %self.account, count = instances.len(), "Listed instances");
        Ok(instances)
    }

    async fn list_images(&self) -> Result<Vec<Image>> {
        let images: Vec<Image> = self
            .get_json("/images", &[("state", "all".to_string())])
            .await?;

        let mut cache = self.images.write().await;
        for image in &images {
            cache.insert(image.id.clone(), image.clone());
        }
        debug!(count = images.len(), "Cached images");
        Ok(images)
    }

    async fn get_image(&self, id: &str) -> Result<Image> {
        if let Some(image) = self.images.read().await.get(id) {
            return Ok(image.clone());
        }

        let image: Image = self
            .get_json(&format!("/images/{}", id), &[])
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    InventoryError::ImageNotFound(id.to_string())
                } else {
                    e
                }
            })?;

        self.images
            .write()
            .await
            .insert(image.id.clone(), image.clone());
        Ok(image)
    }

    async fn get_instance(&self, name_or_id: &str) -> Result<Instance> {
        if uuid::Uuid::parse_str(name_or_id).is_ok() {
            return self
                .get_json(&format!("/machines/{}", name_or_id), &[])
                .await
                .map_err(|e| {
                    if e.is_not_found() {
                        InventoryError::InstanceNotFound(name_or_id.to_string())
                    } else {
                        e
                    }
                });
        }

        let found: Vec<Instance> = self
            .get_json("/machines", &[("name", name_or_id.to_string())])
            .await?;
        match single_by_name(found, name_or_id) {
            Err(InventoryError::InstanceNotFound(_)) if is_short_id(name_or_id) => {
                debug!(short_id = %name_or_id, "No instance by that name, trying short id");
                let all = self.list_instances().await?;
                single_by_short_id(all, name_or_id)
            }
            other => other,
        }
    }

    async fn close(&self) {
        self.images.write().await.clear();
        debug!(account = %self.account, "Closed CloudAPI session");
    }
}

/// Whether `s` looks like a short instance id (`b6979942`)
pub fn is_short_id(s: &str) -> bool {
    s.len() == SHORT_ID_LEN && s.chars().all(|c| c.is_ascii_hexdigit())
}

/// Exactly one instance carrying `name`
fn single_by_name(found: Vec<Instance>, name: &str) -> Result<Instance> {
    single_match(found, name, |i| i.name == name)
}

/// Exactly one instance whose UUID starts with `short_id`
fn single_by_short_id(found: Vec<Instance>, short_id: &str) -> Result<Instance> {
    let short_id = short_id.to_ascii_lowercase();
    single_match(found, &short_id, |i| i.id.starts_with(&short_id))
}

fn single_match<F>(found: Vec<Instance>, wanted: &str, matches: F) -> Result<Instance>
where
    F: Fn(&Instance) -> bool,
{
    let mut matching = found.into_iter().filter(|i| matches(i));
    match (matching.next(), matching.next()) {
        (Some(instance), None) => Ok(instance),
        (None, _) => Err(InventoryError::InstanceNotFound(wanted.to_string())),
        (Some(_), Some(_)) => Err(InventoryError::AmbiguousInstance(wanted.to_string())),
    }
}

/// Opens [`TritonClient`] sessions, loading signing keys from an SSH directory
#[derive(Debug, Clone)]
pub struct TritonConnector {
    ssh_dir: PathBuf,
}

impl TritonConnector {
    /// Create a connector looking for keys in `ssh_dir`
    pub fn new(ssh_dir: impl Into<PathBuf>) -> Self {
        Self {
            ssh_dir: ssh_dir.into(),
        }
    }
}

#[async_trait]
impl Connector for TritonConnector {
    type Client = TritonClient;

    async fn connect(&self, profile: &Profile) -> Result<TritonClient> {
        let signer = RequestSigner::load(profile, &self.ssh_dir)?;
        let client = TritonClient::new(profile, signer)?;
        debug!(profile = %profile.name, url = %profile.url, "Opened CloudAPI session");
        Ok(client)
    }
}
