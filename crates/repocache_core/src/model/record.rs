//! Read-only record values handed to and from the cache.
//!
//! # Responsibility
//! - Define the decoded `Owner`/`Repo` shapes consumed by the upsert engine.
//! - Define the read model emitted to live query subscribers.
//!
//! # Invariants
//! - Records are immutable values; equality is structural over every field.
//! - `owner_id` is externally assigned and stable across syncs.
//! - Attribute names exposed by `attribute()` match persisted column names.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Stable, externally assigned owner identity.
pub type OwnerId = i64;

/// Scalar attribute value shared by records, entities and predicates.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            Self::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Int(_) => None,
            Self::Text(value) => Some(value.as_str()),
        }
    }
}

impl Display for Scalar {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Int(value) => write!(f, "{value}"),
            Self::Text(value) => write!(f, "{value:?}"),
        }
    }
}

impl From<i64> for Scalar {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Scalar {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// Attribute name to value mapping for one persisted entity.
pub type AttributeMap = BTreeMap<&'static str, Scalar>;

/// Owner attribute names, in column order.
pub const OWNER_ATTRIBUTES: &[&str] = &[
    "account_name",
    "user_name",
    "avatar_url",
    "email",
    "bio",
    "location",
    "created_at",
    "followers_count",
    "following_count",
    "repos_count",
];

/// Repo attribute names, in column order.
pub const REPO_ATTRIBUTES: &[&str] = &[
    "repository_name",
    "repo_url",
    "stars_count",
    "forks_count",
    "owner_name",
];

/// Parent record: one account with its ordered repository list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub owner_id: OwnerId,
    pub account_name: String,
    pub user_name: String,
    pub avatar_url: String,
    pub email: String,
    pub bio: String,
    pub location: String,
    pub created_at: String,
    pub followers_count: i64,
    pub following_count: i64,
    pub repos_count: i64,
    /// Display order is meaningful and preserved by the store.
    #[serde(default)]
    pub repos: Vec<Repo>,
}

impl Owner {
    /// Creates an owner with only identity and login populated.
    ///
    /// Matches what a list/search response carries before detail enrichment.
    pub fn new(owner_id: OwnerId, account_name: impl Into<String>) -> Self {
        Self {
            owner_id,
            account_name: account_name.into(),
            ..Self::default()
        }
    }

    /// Reads one attribute by persisted name. `owner_id` is addressable too.
    pub fn attribute(&self, name: &str) -> Option<Scalar> {
        let value = match name {
            "owner_id" => Scalar::Int(self.owner_id),
            "account_name" => Scalar::Text(self.account_name.clone()),
            "user_name" => Scalar::Text(self.user_name.clone()),
            "avatar_url" => Scalar::Text(self.avatar_url.clone()),
            "email" => Scalar::Text(self.email.clone()),
            "bio" => Scalar::Text(self.bio.clone()),
            "location" => Scalar::Text(self.location.clone()),
            "created_at" => Scalar::Text(self.created_at.clone()),
            "followers_count" => Scalar::Int(self.followers_count),
            "following_count" => Scalar::Int(self.following_count),
            "repos_count" => Scalar::Int(self.repos_count),
            _ => return None,
        };
        Some(value)
    }

    /// Returns every scalar attribute except the identity key.
    pub fn attributes(&self) -> AttributeMap {
        OWNER_ATTRIBUTES
            .iter()
            .filter_map(|name| self.attribute(name).map(|value| (*name, value)))
            .collect()
    }

    /// Rebuilds a record from persisted attributes.
    ///
    /// Missing attributes fall back to empty/zero values.
    pub fn from_attributes(owner_id: OwnerId, attributes: &AttributeMap, repos: Vec<Repo>) -> Self {
        Self {
            owner_id,
            account_name: text_attr(attributes, "account_name"),
            user_name: text_attr(attributes, "user_name"),
            avatar_url: text_attr(attributes, "avatar_url"),
            email: text_attr(attributes, "email"),
            bio: text_attr(attributes, "bio"),
            location: text_attr(attributes, "location"),
            created_at: text_attr(attributes, "created_at"),
            followers_count: int_attr(attributes, "followers_count"),
            following_count: int_attr(attributes, "following_count"),
            repos_count: int_attr(attributes, "repos_count"),
            repos,
        }
    }
}

/// Child record: one repository owned by an `Owner`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repo {
    pub repository_name: String,
    pub repo_url: String,
    pub stars_count: i64,
    pub forks_count: i64,
    /// Owning key. On write the parent key of the collection wins.
    pub owner_id: OwnerId,
    pub owner_name: String,
}

impl Repo {
    pub fn new(owner_id: OwnerId, repository_name: impl Into<String>) -> Self {
        Self {
            owner_id,
            repository_name: repository_name.into(),
            ..Self::default()
        }
    }

    /// Reads one attribute by persisted name.
    pub fn attribute(&self, name: &str) -> Option<Scalar> {
        let value = match name {
            "repository_name" => Scalar::Text(self.repository_name.clone()),
            "repo_url" => Scalar::Text(self.repo_url.clone()),
            "stars_count" => Scalar::Int(self.stars_count),
            "forks_count" => Scalar::Int(self.forks_count),
            "owner_name" => Scalar::Text(self.owner_name.clone()),
            _ => return None,
        };
        Some(value)
    }

    pub fn attributes(&self) -> AttributeMap {
        REPO_ATTRIBUTES
            .iter()
            .filter_map(|name| self.attribute(name).map(|value| (*name, value)))
            .collect()
    }

    pub fn from_attributes(owner_id: OwnerId, attributes: &AttributeMap) -> Self {
        Self {
            repository_name: text_attr(attributes, "repository_name"),
            repo_url: text_attr(attributes, "repo_url"),
            stars_count: int_attr(attributes, "stars_count"),
            forks_count: int_attr(attributes, "forks_count"),
            owner_id,
            owner_name: text_attr(attributes, "owner_name"),
        }
    }
}

/// Detail-endpoint record for one account.
///
/// Optional profile fields are collapsed to empty strings by `into_owner`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDetails {
    pub owner_id: OwnerId,
    pub account_name: String,
    pub user_name: String,
    pub email: Option<String>,
    pub bio: Option<String>,
    pub created_at: String,
    pub location: Option<String>,
    pub followers_count: i64,
    pub following_count: i64,
    pub public_repos_count: i64,
    pub avatar_url: Option<String>,
}

impl UserDetails {
    /// Converts detail payload into an owner record with no repos.
    pub fn into_owner(self) -> Owner {
        Owner {
            owner_id: self.owner_id,
            account_name: self.account_name,
            user_name: self.user_name,
            avatar_url: self.avatar_url.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            bio: self.bio.unwrap_or_default(),
            location: self.location.unwrap_or_default(),
            created_at: self.created_at,
            followers_count: self.followers_count,
            following_count: self.following_count,
            repos_count: self.public_repos_count,
            repos: Vec::new(),
        }
    }
}

fn text_attr(attributes: &AttributeMap, name: &str) -> String {
    attributes
        .get(name)
        .and_then(Scalar::as_text)
        .map(str::to_string)
        .unwrap_or_default()
}

fn int_attr(attributes: &AttributeMap, name: &str) -> i64 {
    attributes.get(name).and_then(Scalar::as_int).unwrap_or(0)
}
