//! Jump-host (bastion) resolution
//!
//! An instance reaches Ansible through a bastion when it carries either
//! `tritoncli.ssh.ip` (the jump address itself) or `tritoncli.ssh.proxy`
//! (the name of a bastion instance in the same account). The first one wins.
//!
//! Proxy names are resolved through the client and remembered in a
//! [`BastionCache`] that lives exactly as long as one profile's walk, so
//! every instance behind the same bastion gets the same address and the
//! bastion is looked up once.

use crate::classify::TagKey;
use crate::client::CloudClient;
use crate::error::{InventoryError, Result};
use crate::instance::{Instance, Tags};
use std::collections::HashMap;
use tracing::debug;

/// Jump user when `tritoncli.ssh.user` is absent
pub const DEFAULT_JUMP_USER: &str = "root";

/// How an instance names its jump host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpHost<'a> {
    /// Literal address from `tritoncli.ssh.ip`
    Address(&'a str),
    /// Bastion instance name from `tritoncli.ssh.proxy`
    Proxy(&'a str),
}

impl<'a> JumpHost<'a> {
    /// Read the jump host from an instance's tags, address first
    pub fn from_tags(tags: &'a Tags) -> Option<Self> {
        if let Some(ip) = tags.get_str(TagKey::SshIp.as_str()) {
            return Some(Self::Address(ip));
        }
        tags.get_str(TagKey::SshProxy.as_str()).map(Self::Proxy)
    }
}

/// Login user on the jump host
pub fn jump_user(tags: &Tags) -> &str {
    tags.get_str(TagKey::SshUser.as_str())
        .filter(|u| !u.is_empty())
        .unwrap_or(DEFAULT_JUMP_USER)
}

/// `ansible_ssh_extra_args` value for a jump host
pub fn jump_args(user: &str, address: &str) -> String {
    format!("-J {}@{}", user, address)
}

/// Bastion name to address, scoped to one profile
#[derive(Debug, Clone, Default)]
pub struct BastionCache {
    addresses: HashMap<String, String>,
}

impl BastionCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached address of a bastion
    pub fn get(&self, name: &str) -> Option<&str> {
        self.addresses.get(name).map(String::as_str)
    }

    /// Number of cached bastions
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether nothing has been resolved yet
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Address of a bastion, looked up through the client on a miss
    pub async fn address<C>(&mut self, client: &C, name: &str) -> Result<String>
    where
        C: CloudClient + ?Sized,
    {
        if let Some(ip) = self.get(name) {
            debug!(proxy = %name, ip = %ip, "Using cached bastion address");
            return Ok(ip.to_string());
        }

        debug!(proxy = %name, "Bastion not cached, looking it up");
        let bastion = client.get_instance(name).await?;
        let ip = bastion
            .primary_ip
            .ok_or_else(|| InventoryError::NoPrimaryIp(name.to_string()))?;

        debug!(proxy = %name, ip = %ip, "Found bastion");
        self.addresses.insert(name.to_string(), ip.clone());
        Ok(ip)
    }

    /// `ansible_ssh_extra_args` for an instance, if it has a jump host
    ///
    /// Fails only when a proxy bastion cannot be resolved; the caller keeps
    /// the instance without jump-host information.
    pub async fn resolve<C>(&mut self, client: &C, instance: &Instance) -> Result<Option<String>>
    where
        C: CloudClient + ?Sized,
    {
        let user = jump_user(&instance.tags);
        match JumpHost::from_tags(&instance.tags) {
            Some(JumpHost::Address(ip)) => Ok(Some(jump_args(user, ip))),
            Some(JumpHost::Proxy(name)) => {
                let ip = self.address(client, name).await?;
                Ok(Some(jump_args(user, &ip)))
            }
            None => {
                debug!(instance = %instance.name, "No proxy configured");
                Ok(None)
            }
        }
    }
}
