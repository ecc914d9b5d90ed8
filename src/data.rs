use std::collections::HashMap;

use self::osm::{Entity, EntityId, EntityType, Node, OsmId, Relation, Way};

pub mod changeset;
pub mod geo;
pub mod osm;
pub mod user;

/// Map data as fetched from the API, keyed by numeric id per entity type.
/// Entities that were tombstoned remotely are dropped rather than stored.
#[derive(rkyv::Archive, rkyv::Deserialize, rkyv::Serialize, Debug, Default, Clone)]
pub struct OsmMapData {
    pub nodes: HashMap<OsmId, Node>,
    pub ways: HashMap<OsmId, Way>,
    pub relations: HashMap<OsmId, Relation>,
}

impl OsmMapData {
    pub fn len(&self) -> usize {
        self.nodes.len() + self.ways.len() + self.relations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Adds decoded entities. An entity replaces a stored one only when its
    /// version is at least as new; invisible entities remove the stored copy.
    pub fn merge(&mut self, entities: impl IntoIterator<Item = Entity>) {
        for entity in entities {
            if self.stored_version(entity.id()) > entity.version() {
                continue;
            }
            let (id, visible) = (entity.osm_id(), entity.visible());
            match entity {
                Entity::Node(node) => replace(&mut self.nodes, id, visible.then_some(node)),
                Entity::Way(way) => replace(&mut self.ways, id, visible.then_some(way)),
                Entity::Relation(relation) => replace(&mut self.relations, id, visible.then_some(relation)),
            }
        }
    }

    fn stored_version(&self, id: EntityId) -> Option<u64> {
        match id.kind {
            EntityType::Node => self.nodes.get(&id.osm_id).and_then(|n| n.version),
            EntityType::Way => self.ways.get(&id.osm_id).and_then(|w| w.version),
            EntityType::Relation => self.relations.get(&id.osm_id).and_then(|r| r.version),
        }
    }
}

fn replace<T>(store: &mut HashMap<OsmId, T>, id: OsmId, value: Option<T>) {
    match value {
        Some(value) => store.insert(id, value),
        None => store.remove(&id),
    };
}
