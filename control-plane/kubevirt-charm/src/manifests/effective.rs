use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::ConfigValue;

/// The sparse configuration a manifest bundle is rendered with.
///
/// Keys are kept in a `BTreeMap` so serialisation, and therefore
/// [`ConfigHash`], does not depend on the order values were layered in.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct EffectiveConfig(BTreeMap<String, ConfigValue>);

impl EffectiveConfig {
    /// Relation-derived values first, then operator overrides. Unset and
    /// empty values are dropped before the optional rename, which always
    /// removes its source key.
    pub fn layered(
        relation: impl IntoIterator<Item = (String, Option<ConfigValue>)>,
        user: BTreeMap<String, ConfigValue>,
        rename: Option<(&str, &str)>,
    ) -> Self {
        let mut map: BTreeMap<String, ConfigValue> = relation
            .into_iter()
            .filter_map(|(k, v)| v.map(|v| (k, v)))
            .collect();
        map.extend(user);
        map.retain(|_, v| !v.is_empty());
        if let Some((from, to)) = rename {
            match map.remove(from) {
                Some(v) => {
                    map.insert(to.to_string(), v);
                }
                None => {
                    map.remove(to);
                }
            }
        }
        Self(map)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.0.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn hash(&self) -> Result<ConfigHash, serde_json::Error> {
        let bytes = serde_json::to_vec(&self.0)?;
        Ok(ConfigHash::of_bytes(&bytes))
    }
}

/// Change-detection token over an [`EffectiveConfig`]; not a security
/// primitive. Controller hashes are combined with wrapping addition.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ConfigHash(pub u128);

impl ConfigHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut head = [0u8; 16];
        head.copy_from_slice(&digest[..16]);
        Self(u128::from_be_bytes(head))
    }
}

impl Add for ConfigHash {
    type Output = ConfigHash;

    fn add(self, rhs: Self) -> Self::Output {
        ConfigHash(self.0.wrapping_add(rhs.0))
    }
}

impl Sum for ConfigHash {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(ConfigHash::default(), Add::add)
    }
}

impl fmt::Display for ConfigHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}
