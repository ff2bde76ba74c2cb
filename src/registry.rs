//! Users/groups registry, loaded from TOML at daemon start.
//!
//! ```toml
//! [[users]]
//! id = "alice"
//! apikey = "alice-key"
//!
//! [[groups]]
//! name = "team"
//! owner = "alice"
//! members = ["bob"]
//! ```

use crate::model::{GroupRec, UserRec};
use crate::store::MemStore;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub users: Vec<UserRec>,
    #[serde(default)]
    pub groups: Vec<GroupRec>,
}

impl Registry {
    pub fn load(path: &Path) -> Result<Registry> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read registry {}", path.display()))?;
        let reg: Registry = toml::from_str(&data)
            .with_context(|| format!("parse registry {}", path.display()))?;
        Ok(reg)
    }

    pub fn seed(&self, store: &MemStore) {
        for u in &self.users {
            store.add_user(u.clone());
        }
        for g in &self.groups {
            store.add_group(g.clone());
        }
    }
}
