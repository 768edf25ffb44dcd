//! Group and host-variable derivation from tags and image metadata
//!
//! ## Tag conventions
//!
//! | Tag                   | Effect                                        |
//! |-----------------------|-----------------------------------------------|
//! | `triton.cns.services` | `svc[:port],...`, each service becomes a group |
//! | `tritoncli.ssh.ip`    | literal jump-host address                     |
//! | `tritoncli.ssh.user`  | jump-host login user (default `root`)         |
//! | `tritoncli.ssh.proxy` | name of the bastion instance to jump through  |
//! | any other, `= true`   | the tag key becomes a group                   |
//!
//! Jump-host tags are consumed by [`crate::bastion`]; this module only reads
//! the group-producing ones.

use crate::instance::{Image, Instance};
use crate::inventory::{HostVars, sanitize_group_name};
use tracing::debug;

/// Tag keys with a fixed meaning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagKey {
    /// Comma separated CNS services, optionally with `:port`
    CnsServices,
    /// Jump host given as an address
    SshIp,
    /// Jump host login user
    SshUser,
    /// Jump host given as an instance name
    SshProxy,
}

impl TagKey {
    /// Every recognized key
    pub const ALL: [TagKey; 4] = [
        TagKey::CnsServices,
        TagKey::SshIp,
        TagKey::SshUser,
        TagKey::SshProxy,
    ];

    /// The tag name on the instance
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CnsServices => "triton.cns.services",
            Self::SshIp => "tritoncli.ssh.ip",
            Self::SshUser => "tritoncli.ssh.user",
            Self::SshProxy => "tritoncli.ssh.proxy",
        }
    }

    /// Recognize a tag name
    pub fn recognize(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == key)
    }
}

/// What the inventory learns about one instance before jump-host resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Classification {
    /// Sanitized, de-duplicated group names in derivation order
    pub groups: Vec<String>,

    /// Host variables
    pub hostvars: HostVars,
}

impl Classification {
    fn push_group(&mut self, raw: &str) {
        let group = sanitize_group_name(raw);
        if !group.is_empty() && !self.groups.contains(&group) {
            self.groups.push(group);
        }
    }
}

/// Derive groups and host variables for an instance
///
/// `image` is `None` when the image lookup failed; OS group and login user
/// are then left out. Returns `None` for Windows instances, which are not
/// inventoried at all.
///
/// Group order: image OS, CNS services, flag tags in tag order, profile.
pub fn classify(instance: &Instance, image: Option<&Image>, profile: &str) -> Option<Classification> {
    let mut out = Classification {
        hostvars: HostVars {
            ansible_host: instance.primary_ip.clone(),
            ..Default::default()
        },
        ..Default::default()
    };

    if let Some(image) = image {
        if image.is_windows() {
            debug!(instance = %instance.name, "Skipping windows instance");
            return None;
        }
        out.push_group(&image.os);
        out.hostvars.ansible_user = image.default_user().map(str::to_string);
    }

    if let Some(services) = instance.tags.get_str(TagKey::CnsServices.as_str()) {
        for service in cns_service_names(services) {
            out.push_group(service);
        }
    }

    for (key, value) in instance.tags.iter() {
        if value.is_true() && TagKey::recognize(key).is_none() {
            out.push_group(key);
        }
    }

    out.push_group(profile);
    Some(out)
}

/// Service names from a `triton.cns.services` value, port annotations dropped
pub fn cns_service_names(value: &str) -> impl Iterator<Item = &str> {
    value
        .split(',')
        .map(|entry| entry.split(':').next().unwrap_or(entry))
        .filter(|name| !name.is_empty())
}
