//! # Triton Ansible Inventory
//!
//! Builds an Ansible dynamic inventory from the instances of every Triton
//! CloudAPI profile configured for the Triton CLI.
//!
//! ## Pipeline
//!
//! ```text
//! profiles ──► ProfileWalker ──► InstanceEnricher (one instance at a time)
//!                  │                 ├── image lookup
//!                  │                 ├── classify (groups, hostvars)
//!                  │                 └── BastionCache (jump host)
//!                  ▼
//!              Inventory ──► JSON on stdout
//! ```
//!
//! Every instance joins its profile's group, its image's OS group, one group
//! per CNS service and one group per tag set to `true`. Windows instances are
//! left out. Instances tagged with `tritoncli.ssh.ip` or `tritoncli.ssh.proxy`
//! get an `ansible_ssh_extra_args` of `-J <user>@<bastion-ip>`.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod auth;
pub mod bastion;
pub mod classify;
pub mod client;
pub mod config;
pub mod enrich;
pub mod error;
pub mod instance;
pub mod inventory;
pub mod walker;

// Error handling
pub use error::{InventoryError, Result};

// Profiles
pub use config::{
    ENV_PROFILE_NAME, KEY_ID_OVERRIDE_VAR, Profile, home_dir, load_all_profiles,
    resolve_config_dir,
};

// Cloud client
pub use client::{CloudClient, Connector, TritonClient, TritonConnector};
pub use instance::{Image, Instance, TagValue, Tags};

// Pipeline
pub use bastion::BastionCache;
pub use classify::{Classification, TagKey, classify};
pub use enrich::{EnrichOutcome, InstanceEnricher};
pub use inventory::{Group, HostVars, Inventory, group_key, sanitize_group_name};
pub use walker::{ProfileReport, ProfileWalker};
