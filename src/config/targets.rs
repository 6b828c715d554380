use serde::Deserialize;
use serde::Serialize;

use crate::TargetScope;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct TargetsConfig {
    /// Names of the CPCs to export; empty exports every managed CPC
    #[serde(default)]
    pub cpcs: Vec<String>,
}

impl TargetsConfig {
    pub fn scope(&self) -> TargetScope {
        TargetScope {
            cpcs: self.cpcs.clone(),
        }
    }
}
