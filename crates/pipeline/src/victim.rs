use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ProfileError;

/// Who is on the receiving end of the call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VictimProfile {
    pub name: String,
    pub age: String,
    pub tag: String,
    pub weakness: String,
}

impl Default for VictimProfile {
    /// Placeholder used when a role id is unknown.
    fn default() -> Self {
        Self {
            name: "用户".to_string(),
            age: "未知".to_string(),
            tag: "普通用户".to_string(),
            weakness: "无特殊信息".to_string(),
        }
    }
}

/// One row of `roles.csv`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    #[serde(flatten)]
    pub profile: VictimProfile,
}

#[derive(Debug, Deserialize)]
struct RoleRow {
    id: String,
    name: String,
    // Ages are stored as bare numbers but used as text.
    #[serde(default)]
    age: String,
    #[serde(default)]
    tag: String,
    #[serde(default)]
    weakness: String,
}

/// Resolves role ids to victim profiles.
pub trait ProfileStore: Send + Sync {
    fn lookup(&self, role_id: &str) -> Option<VictimProfile>;

    fn roles(&self) -> Vec<Role>;

    /// The profile for `role_id`, or the placeholder profile when unknown.
    fn resolve(&self, role_id: &str) -> VictimProfile {
        match self.lookup(role_id) {
            Some(profile) => profile,
            None => {
                tracing::warn!(role_id, "unknown role, using default victim profile");
                VictimProfile::default()
            }
        }
    }
}

/// Victim profiles loaded once from a `id,name,age,tag,weakness` table.
#[derive(Debug, Clone, Default)]
pub struct CsvProfileStore {
    roles: Vec<Role>,
}

impl CsvProfileStore {
    pub fn from_roles(roles: Vec<Role>) -> Self {
        Self { roles }
    }

    pub fn from_path(path: &Path) -> Result<Self, ProfileError> {
        let read = |source| ProfileError::Read {
            path: path.to_path_buf(),
            source,
        };
        let bytes = std::fs::read(path).map_err(|e| read(csv::Error::from(e)))?;
        let store = Self::from_bytes(&bytes).map_err(read)?;
        tracing::info!(path = %path.display(), roles = store.roles.len(), "loaded victim roles");
        Ok(store)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, csv::Error> {
        let bytes = bytes.strip_prefix("\u{feff}".as_bytes()).unwrap_or(bytes);
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes);
        Self::from_csv(reader)
    }

    fn from_csv<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<Self, csv::Error> {
        let mut roles = Vec::new();
        for row in reader.deserialize::<RoleRow>() {
            let row = row?;
            roles.push(Role {
                id: row.id,
                profile: VictimProfile {
                    name: row.name,
                    age: row.age,
                    tag: row.tag,
                    weakness: row.weakness,
                },
            });
        }
        Ok(Self { roles })
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

impl ProfileStore for CsvProfileStore {
    fn lookup(&self, role_id: &str) -> Option<VictimProfile> {
        self.roles
            .iter()
            .find(|role| role.id == role_id)
            .map(|role| role.profile.clone())
    }

    fn roles(&self) -> Vec<Role> {
        self.roles.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROLES: &str = "\u{feff}id,name,age,tag,weakness\nR01,李奶奶,72,独居老人,关心孙辈\nR02,王师傅,45,货车司机,常跑高速\n";

    #[test]
    fn loads_roles_and_keeps_age_as_text() {
        let store = CsvProfileStore::from_bytes(ROLES.as_bytes()).unwrap();
        assert_eq!(store.len(), 2);

        let grandma = store.lookup("R01").unwrap();
        assert_eq!(grandma.name, "李奶奶");
        assert_eq!(grandma.age, "72");
        assert_eq!(store.roles()[1].id, "R02");
    }

    #[test]
    fn unknown_role_resolves_to_placeholder() {
        let store = CsvProfileStore::from_bytes(ROLES.as_bytes()).unwrap();
        assert_eq!(store.lookup("R99"), None);
        assert_eq!(store.resolve("R99"), VictimProfile::default());
        assert_eq!(CsvProfileStore::default().resolve("R01").tag, "普通用户");
    }

    #[test]
    fn roles_serialize_flat() {
        let store = CsvProfileStore::from_bytes(ROLES.as_bytes()).unwrap();
        let value = serde_json::to_value(&store.roles()[0]).unwrap();
        assert_eq!(value["id"], "R01");
        assert_eq!(value["weakness"], "关心孙辈");
    }

    #[test]
    fn reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roles.csv");
        std::fs::write(&path, ROLES).unwrap();
        let store = CsvProfileStore::from_path(&path).unwrap();
        assert_eq!(store.lookup("R02").unwrap().tag, "货车司机");

        let missing = CsvProfileStore::from_path(&dir.path().join("absent.csv"));
        assert!(matches!(missing, Err(ProfileError::Read { .. })));
    }
}
