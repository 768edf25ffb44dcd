//! Inventory document
//!
//! The JSON shape Ansible expects from a dynamic inventory script called
//! with `--list`:
//!
//! ```text
//! {
//!   "_meta": { "hostvars": { "<host>": { "ansible_host": "...", ... } } },
//!   "all":   { "children": ["<group>", ...] },
//!   "<group>": { "hosts": ["<host>", ...] },
//!   ...
//! }
//! ```
//!
//! The document only grows during a run. Hosts are added one at a time by a
//! single owner, so no locking is involved.

use serde::ser::{Serialize, SerializeMap, Serializer};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, warn};

/// Key holding per-host variables
pub const META_KEY: &str = "_meta";

/// Key holding the group index
pub const ALL_KEY: &str = "all";

/// Canonical form of a group name: `.` and `-` become `_`
///
/// Names differing only in those characters land in the same group.
pub fn sanitize_group_name(raw: &str) -> String {
    raw.replace(['.', '-'], "_")
}

/// Group key for a raw group name
///
/// The name is sanitized, and names that would collide with the document's
/// own keys (`all`, `_meta`) get a leading `_`, so `all` becomes `_all`.
/// Returns `None` for names that are empty.
pub fn group_key(raw: &str) -> Option<String> {
    let group = sanitize_group_name(raw);
    match group.as_str() {
        "" => None,
        META_KEY | ALL_KEY => Some(format!("_{}", group)),
        _ => Some(group),
    }
}

/// Connection variables for one host
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct HostVars {
    /// Address Ansible connects to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_host: Option<String>,

    /// Login user
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_user: Option<String>,

    /// Extra ssh arguments, used for `-J` jump hosts
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ansible_ssh_extra_args: Option<String>,
}

/// Members of one group
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct Group {
    /// Host names in insertion order
    pub hosts: Vec<String>,
}

/// The aggregated inventory across all profiles
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    hostvars: BTreeMap<String, HostVars>,
    children: Vec<String>,
    groups: HashMap<String, Group>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one host with its groups and variables
    ///
    /// Group names go through [`group_key`]. A group is created and appended
    /// to `all.children` the first time it is seen; a host is listed at most
    /// once per group.
    pub fn add_host<S: AsRef<str>>(&mut self, name: &str, groups: &[S], hostvars: HostVars) {
        if self.hostvars.insert(name.to_string(), hostvars).is_some() {
            warn!(host = %name, "Host seen twice, keeping the latest variables");
        }

        for raw in groups {
            let Some(group) = group_key(raw.as_ref()) else {
                debug!(host = %name, "Ignoring empty group name");
                continue;
            };

            let entry = self.groups.entry(group.clone()).or_insert_with(|| {
                self.children.push(group.clone());
                Group::default()
            });
            if !entry.hosts.iter().any(|h| h == name) {
                entry.hosts.push(name.to_string());
            }
        }
    }

    /// Variables of a host
    pub fn hostvars(&self, name: &str) -> Option<&HostVars> {
        self.hostvars.get(name)
    }

    /// A group by its key (see [`group_key`])
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Group names in first-seen order
    pub fn children(&self) -> &[String] {
        &self.children
    }

    /// Groups a host belongs to, in first-seen order
    pub fn groups_of(&self, host: &str) -> Vec<&str> {
        self.children
            .iter()
            .filter(|g| self.groups[g.as_str()].hosts.iter().any(|h| h == host))
            .map(String::as_str)
            .collect()
    }

    /// Number of hosts
    pub fn host_count(&self) -> usize {
        self.hostvars.len()
    }

    /// Whether no host has been added
    pub fn is_empty(&self) -> bool {
        self.hostvars.is_empty()
    }

    /// Serialize to the compact JSON Ansible reads
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(serde::Serialize)]
struct Meta<'a> {
    hostvars: &'a BTreeMap<String, HostVars>,
}

#[derive(serde::Serialize)]
struct All<'a> {
    children: &'a [String],
}

impl Serialize for Inventory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.children.len() + 2))?;
        map.serialize_entry(META_KEY, &Meta { hostvars: &self.hostvars })?;
        map.serialize_entry(ALL_KEY, &All { children: &self.children })?;
        for name in &self.children {
            map.serialize_entry(name, &self.groups[name.as_str()])?;
        }
        map.end()
    }
}
