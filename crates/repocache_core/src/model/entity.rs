//! Persisted entity shapes and the static entity model.
//!
//! # Responsibility
//! - Describe the two stored entities (`Owner`, `Repo`) and their
//!   relationship pair, so predicates and key paths can be validated.
//! - Define the mutable entity values staged inside write contexts.
//!
//! # Invariants
//! - `Owner.repos` and `Repo.owner` are each other's inverse.
//! - Repo identity is not stable across syncs; persisted rows are replaced
//!   wholesale on every collection refresh.

use crate::model::record::{
    AttributeMap, Owner, OwnerId, Repo, Scalar, OWNER_ATTRIBUTES, REPO_ATTRIBUTES,
};

/// Relationship metadata for one entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelationshipDescription {
    pub name: &'static str,
    pub destination: &'static str,
    pub inverse: Option<&'static str>,
    pub to_many: bool,
}

/// Static description of one stored entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityDescription {
    pub name: &'static str,
    /// Identity attribute, when the entity has a stable one.
    pub identity: Option<&'static str>,
    pub attributes: &'static [&'static str],
    pub relationships: &'static [RelationshipDescription],
}

impl EntityDescription {
    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescription> {
        self.relationships
            .iter()
            .find(|relationship| relationship.name == name)
    }

    /// Whether `name` is a scalar attribute or the identity attribute.
    pub fn has_attribute(&self, name: &str) -> bool {
        self.identity == Some(name) || self.attributes.contains(&name)
    }
}

pub const OWNER_ENTITY: EntityDescription = EntityDescription {
    name: "Owner",
    identity: Some("owner_id"),
    attributes: OWNER_ATTRIBUTES,
    relationships: &[RelationshipDescription {
        name: "repos",
        destination: "Repo",
        inverse: Some("owner"),
        to_many: true,
    }],
};

pub const REPO_ENTITY: EntityDescription = EntityDescription {
    name: "Repo",
    identity: None,
    attributes: REPO_ATTRIBUTES,
    relationships: &[RelationshipDescription {
        name: "owner",
        destination: "Owner",
        inverse: Some("repos"),
        to_many: false,
    }],
};

/// Looks up an entity description by name.
pub fn entity_by_name(name: &str) -> Option<&'static EntityDescription> {
    match name {
        "Owner" => Some(&OWNER_ENTITY),
        "Repo" => Some(&REPO_ENTITY),
        _ => None,
    }
}

/// Identity of a repo object inside one write context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RepoObjectId {
    /// Row id of an already persisted repo.
    Persisted(i64),
    /// Context-local id of a repo inserted but not yet saved.
    Temporary(u64),
}

/// Identity of any stored object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ObjectId {
    Owner(OwnerId),
    Repo(RepoObjectId),
}

/// Mutable, persisted representation of an owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerEntity {
    pub owner_id: OwnerId,
    pub attributes: AttributeMap,
}

impl OwnerEntity {
    /// New entity with every attribute at its empty/zero default.
    pub fn new(owner_id: OwnerId) -> Self {
        Self {
            owner_id,
            attributes: Owner::new(owner_id, "").attributes(),
        }
    }

    /// Overwrites every scalar attribute from `record`. Repos are untouched.
    pub fn update_with(&mut self, record: &Owner) {
        self.attributes = record.attributes();
    }

    pub fn set(&mut self, name: &'static str, value: impl Into<Scalar>) {
        self.attributes.insert(name, value.into());
    }

    pub fn to_record(&self, repos: Vec<Repo>) -> Owner {
        Owner::from_attributes(self.owner_id, &self.attributes, repos)
    }
}

/// Mutable, persisted representation of a repo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoEntity {
    pub object_id: RepoObjectId,
    pub owner_id: OwnerId,
    pub attributes: AttributeMap,
}

impl RepoEntity {
    pub fn to_record(&self) -> Repo {
        Repo::from_attributes(self.owner_id, &self.attributes)
    }
}

#[cfg(test)]
mod tests {
    use super::{entity_by_name, OwnerEntity, OWNER_ENTITY, REPO_ENTITY};
    use crate::model::record::{Owner, Scalar};

    #[test]
    fn relationships_are_mutual_inverses() {
        let repos = OWNER_ENTITY.relationship("repos").unwrap();
        let destination = entity_by_name(repos.destination).unwrap();
        assert_eq!(destination, &REPO_ENTITY);

        let inverse = destination.relationship(repos.inverse.unwrap()).unwrap();
        assert_eq!(inverse.destination, OWNER_ENTITY.name);
        assert_eq!(inverse.inverse, Some("repos"));
    }

    #[test]
    fn update_with_overwrites_all_scalars() {
        let mut entity = OwnerEntity::new(9);
        entity.set("bio", "stale");

        let mut record = Owner::new(9, "login");
        record.followers_count = 3;
        entity.update_with(&record);

        assert_eq!(entity.attributes["bio"], Scalar::Text(String::new()));
        assert_eq!(entity.attributes["followers_count"], Scalar::Int(3));
        assert_eq!(entity.to_record(Vec::new()), record);
    }
}
