use std::{collections::BTreeMap, fmt, str::FromStr};

use super::geo::Loc;
use crate::errors::Error;

pub type OsmId = i64;

/// Unordered tag mapping. Keys are unique; decoding keeps the last value seen for a key.
pub type Tags = BTreeMap<String, String>;

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityType {
    Node,
    Way,
    Relation,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Node => "node",
            EntityType::Way => "way",
            EntityType::Relation => "relation",
        }
    }

    /// Collection name used by the bulk endpoints (`nodes`, `ways`, `relations`).
    pub fn plural(&self) -> &'static str {
        match self {
            EntityType::Node => "nodes",
            EntityType::Way => "ways",
            EntityType::Relation => "relations",
        }
    }

    pub fn letter(&self) -> char {
        match self {
            EntityType::Node => 'n',
            EntityType::Way => 'w',
            EntityType::Relation => 'r',
        }
    }

    pub fn from_letter(letter: char) -> Option<EntityType> {
        match letter {
            'n' => Some(EntityType::Node),
            'w' => Some(EntityType::Way),
            'r' => Some(EntityType::Relation),
            _ => None,
        }
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "node" => Ok(EntityType::Node),
            "way" => Ok(EntityType::Way),
            "relation" => Ok(EntityType::Relation),
            other => Err(Error::decode(format!("unknown entity type {other:?}"))),
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Type letter plus numeric id, rendered as `n123`, `w-4`, `r7`.
/// Negative ids belong to entities created locally and not uploaded yet.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId {
    pub kind: EntityType,
    pub osm_id: OsmId,
}

impl EntityId {
    pub fn new(kind: EntityType, osm_id: OsmId) -> Self {
        EntityId { kind, osm_id }
    }

    pub fn node(osm_id: OsmId) -> Self {
        EntityId::new(EntityType::Node, osm_id)
    }

    pub fn way(osm_id: OsmId) -> Self {
        EntityId::new(EntityType::Way, osm_id)
    }

    pub fn relation(osm_id: OsmId) -> Self {
        EntityId::new(EntityType::Relation, osm_id)
    }

    pub fn is_new(&self) -> bool {
        self.osm_id < 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.kind.letter(), self.osm_id)
    }
}

impl FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut chars = s.chars();
        let kind = chars
            .next()
            .and_then(EntityType::from_letter)
            .ok_or_else(|| Error::decode(format!("invalid entity id {s:?}")))?;
        let osm_id = chars.as_str().parse()?;
        Ok(EntityId { kind, osm_id })
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub struct Node {
    pub osm_id: OsmId,
    pub version: Option<u64>,
    pub user: Option<String>,
    pub visible: bool,
    pub tags: Tags,
    /// NaN components mean the wire document carried no usable coordinate.
    pub loc: Loc,
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub struct Way {
    pub osm_id: OsmId,
    pub version: Option<u64>,
    pub user: Option<String>,
    pub visible: bool,
    pub tags: Tags,
    /// Path order. Closed ways repeat the first node at the end. References may dangle.
    pub nodes: Vec<EntityId>,
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub struct Member {
    pub id: EntityId,
    pub role: String,
}

impl Member {
    pub fn member_type(&self) -> EntityType {
        self.id.kind
    }
}

#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub struct Relation {
    pub osm_id: OsmId,
    pub version: Option<u64>,
    pub user: Option<String>,
    pub visible: bool,
    pub tags: Tags,
    pub members: Vec<Member>,
}

impl Node {
    pub fn new(osm_id: OsmId, loc: Loc) -> Self {
        Node {
            osm_id,
            version: None,
            user: None,
            visible: true,
            tags: Tags::new(),
            loc,
        }
    }
}

impl Way {
    pub fn new(osm_id: OsmId, nodes: Vec<EntityId>) -> Self {
        Way {
            osm_id,
            version: None,
            user: None,
            visible: true,
            tags: Tags::new(),
            nodes,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.nodes.len() > 1 && self.nodes.first() == self.nodes.last()
    }
}

impl Relation {
    pub fn new(osm_id: OsmId, members: Vec<Member>) -> Self {
        Relation {
            osm_id,
            version: None,
            user: None,
            visible: true,
            tags: Tags::new(),
            members,
        }
    }
}

/// A node, way or relation. The id's type letter always follows the variant.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Clone, PartialEq)]
pub enum Entity {
    Node(Node),
    Way(Way),
    Relation(Relation),
}

impl Entity {
    pub fn kind(&self) -> EntityType {
        match self {
            Entity::Node(_) => EntityType::Node,
            Entity::Way(_) => EntityType::Way,
            Entity::Relation(_) => EntityType::Relation,
        }
    }

    pub fn osm_id(&self) -> OsmId {
        match self {
            Entity::Node(node) => node.osm_id,
            Entity::Way(way) => way.osm_id,
            Entity::Relation(relation) => relation.osm_id,
        }
    }

    pub fn id(&self) -> EntityId {
        EntityId::new(self.kind(), self.osm_id())
    }

    pub fn version(&self) -> Option<u64> {
        match self {
            Entity::Node(node) => node.version,
            Entity::Way(way) => way.version,
            Entity::Relation(relation) => relation.version,
        }
    }

    pub fn visible(&self) -> bool {
        match self {
            Entity::Node(node) => node.visible,
            Entity::Way(way) => way.visible,
            Entity::Relation(relation) => relation.visible,
        }
    }

    pub fn tags(&self) -> &Tags {
        match self {
            Entity::Node(node) => &node.tags,
            Entity::Way(way) => &way.tags,
            Entity::Relation(relation) => &relation.tags,
        }
    }

    pub fn tags_mut(&mut self) -> &mut Tags {
        match self {
            Entity::Node(node) => &mut node.tags,
            Entity::Way(way) => &mut way.tags,
            Entity::Relation(relation) => &mut relation.tags,
        }
    }
}

impl From<Node> for Entity {
    fn from(value: Node) -> Self {
        Entity::Node(value)
    }
}

impl From<Way> for Entity {
    fn from(value: Way) -> Self {
        Entity::Way(value)
    }
}

impl From<Relation> for Entity {
    fn from(value: Relation) -> Self {
        Entity::Relation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_display_and_parse() {
        let id: EntityId = "w-12".parse().unwrap();
        assert_eq!(id, EntityId::way(-12));
        assert!(id.is_new());
        assert_eq!(id.to_string(), "w-12");
        assert!("x12".parse::<EntityId>().is_err());
        assert!("n".parse::<EntityId>().is_err());
    }

    #[test]
    fn entity_id_follows_variant() {
        let entity: Entity = Way::new(5, vec![EntityId::node(1), EntityId::node(2)]).into();
        assert_eq!(entity.id(), EntityId::way(5));
        assert_eq!(entity.kind().letter(), 'w');
    }

    #[test]
    fn closed_way() {
        let way = Way::new(1, vec![EntityId::node(1), EntityId::node(2), EntityId::node(1)]);
        assert!(way.is_closed());
        assert!(!Way::new(2, vec![EntityId::node(1)]).is_closed());
    }
}
