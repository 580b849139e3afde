//! Upstream resource addressing

use serde::{Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use url::Url;

/// The kinds of upstream documents the pipeline fetches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    Creature,
    Species,
    EvolutionChain,
    Type,
    Ability,
    Move,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 6] = [
        Self::Creature,
        Self::Species,
        Self::EvolutionChain,
        Self::Type,
        Self::Ability,
        Self::Move,
    ];

    /// Endpoint path segment under the API root.
    pub fn path(&self) -> &'static str {
        match self {
            Self::Creature => "pokemon",
            Self::Species => "pokemon-species",
            Self::EvolutionChain => "evolution-chain",
            Self::Type => "type",
            Self::Ability => "ability",
            Self::Move => "move",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pokemon" | "creature" => Ok(Self::Creature),
            "pokemon-species" | "species" => Ok(Self::Species),
            "evolution-chain" | "evolution" => Ok(Self::EvolutionChain),
            "type" | "types" => Ok(Self::Type),
            "ability" | "abilities" => Ok(Self::Ability),
            "move" | "moves" => Ok(Self::Move),
            other => Err(format!("unknown resource kind '{}'", other)),
        }
    }
}

/// Natural key of one upstream document: its kind plus the slug or numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn creature(id: i64) -> Self {
        Self::new(ResourceKind::Creature, id.to_string())
    }

    /// Build a key from a resource link such as
    /// `https://pokeapi.co/api/v2/evolution-chain/10/`.
    ///
    /// The last non-empty path segment becomes the id.
    pub fn from_url(kind: ResourceKind, url: &str) -> Option<Self> {
        let url = Url::parse(url).ok()?;
        let id = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
        Some(Self::new(kind, id))
    }

    /// Numeric id, when the key is numeric.
    pub fn numeric_id(&self) -> Option<i64> {
        self.id.parse().ok()
    }

    /// Path relative to the API root, with the trailing slash the API expects.
    pub fn path(&self) -> String {
        format!("{}/{}/", self.kind.path(), self.id)
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

impl Serialize for ResourceKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}
