use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, Event};
use quick_xml::writer::Writer;

use super::{API_VERSION, GENERATOR};
use crate::data::changeset::{ChangesetId, EditDiff};
use crate::data::osm::{Entity, EntityType, Tags};
use crate::errors::{Error, Result};

const CREATE_MODIFY_ORDER: [EntityType; 3] = [EntityType::Node, EntityType::Way, EntityType::Relation];
const DELETE_ORDER: [EntityType; 3] = [EntityType::Relation, EntityType::Way, EntityType::Node];

type XmlWriter = Writer<Vec<u8>>;

fn new_writer() -> Result<XmlWriter> {
    let mut writer = Writer::new(Vec::new());
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    Ok(writer)
}

fn finish(writer: XmlWriter) -> Result<String> {
    String::from_utf8(writer.into_inner()).map_err(|err| Error::decode(err.to_string()))
}

fn write_tags(writer: &mut XmlWriter, tags: &Tags) -> Result<()> {
    for (k, v) in tags {
        let mut tag = BytesStart::new("tag");
        tag.push_attribute(("k", k.as_str()));
        tag.push_attribute(("v", v.as_str()));
        writer.write_event(Event::Empty(tag))?;
    }
    Ok(())
}

/// Writes one entity as it appears inside an osmChange group. New entities go
/// out with version 0.
fn write_entity(writer: &mut XmlWriter, entity: &Entity, changeset_id: Option<ChangesetId>) -> Result<()> {
    let name = entity.kind().as_str();
    let id = entity.osm_id().to_string();
    let version = entity.version().unwrap_or(0).to_string();
    let changeset = changeset_id.map(|id| id.to_string());

    let mut start = BytesStart::new(name);
    start.push_attribute(("id", id.as_str()));
    if let Entity::Node(node) = entity {
        start.push_attribute(("lon", node.loc.lon.to_string().as_str()));
        start.push_attribute(("lat", node.loc.lat.to_string().as_str()));
    }
    start.push_attribute(("version", version.as_str()));
    if let Some(changeset) = &changeset {
        start.push_attribute(("changeset", changeset.as_str()));
    }

    let has_children = !entity.tags().is_empty()
        || match entity {
            Entity::Node(_) => false,
            Entity::Way(way) => !way.nodes.is_empty(),
            Entity::Relation(relation) => !relation.members.is_empty(),
        };
    if !has_children {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    match entity {
        Entity::Node(_) => (),
        Entity::Way(way) => {
            for node_id in &way.nodes {
                let node_ref = node_id.osm_id.to_string();
                let mut nd = BytesStart::new("nd");
                nd.push_attribute(("ref", node_ref.as_str()));
                writer.write_event(Event::Empty(nd))?;
            }
        },
        Entity::Relation(relation) => {
            for member in &relation.members {
                let member_ref = member.id.osm_id.to_string();
                let mut el = BytesStart::new("member");
                el.push_attribute(("type", member.member_type().as_str()));
                el.push_attribute(("ref", member_ref.as_str()));
                el.push_attribute(("role", member.role.as_str()));
                writer.write_event(Event::Empty(el))?;
            }
        },
    }
    write_tags(writer, entity.tags())?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Writes a `<create>`, `<modify>` or `<delete>` group with its entities sorted
/// by type in `order`. Entities of the same type keep their relative order.
fn write_group(
    writer: &mut XmlWriter,
    group: &str,
    entities: &[Entity],
    order: &[EntityType; 3],
    changeset_id: Option<ChangesetId>,
) -> Result<()> {
    let mut start = BytesStart::new(group);
    if group == "delete" {
        start.push_attribute(("if-unused", "true"));
    }
    if entities.is_empty() {
        writer.write_event(Event::Empty(start))?;
        return Ok(());
    }

    writer.write_event(Event::Start(start))?;
    for kind in order {
        for entity in entities.iter().filter(|e| e.kind() == *kind) {
            write_entity(writer, entity, changeset_id)?;
        }
    }
    writer.write_event(Event::End(BytesEnd::new(group)))?;
    Ok(())
}

/// Encodes the edit diff as an osmChange document.
///
/// Creations and modifications are written node, way, relation so referenced
/// entities exist before their dependents; deletions are written relation, way,
/// node and flagged `if-unused`, letting the server skip an entity that is still
/// referenced instead of rejecting the whole upload.
pub fn encode_osm_change(changeset_id: Option<ChangesetId>, diff: &EditDiff) -> Result<String> {
    let mut writer = new_writer()?;
    let mut root = BytesStart::new("osmChange");
    root.push_attribute(("version", API_VERSION));
    root.push_attribute(("generator", GENERATOR));
    writer.write_event(Event::Start(root))?;

    write_group(&mut writer, "create", &diff.created, &CREATE_MODIFY_ORDER, changeset_id)?;
    write_group(&mut writer, "modify", &diff.modified, &CREATE_MODIFY_ORDER, changeset_id)?;
    write_group(&mut writer, "delete", &diff.deleted, &DELETE_ORDER, changeset_id)?;

    writer.write_event(Event::End(BytesEnd::new("osmChange")))?;
    finish(writer)
}

/// Encodes the body of a changeset create request: one `<changeset>` holding the tags.
pub fn encode_changeset(tags: &Tags) -> Result<String> {
    let mut writer = new_writer()?;
    writer.write_event(Event::Start(BytesStart::new("osm")))?;

    let mut changeset = BytesStart::new("changeset");
    changeset.push_attribute(("version", API_VERSION));
    changeset.push_attribute(("generator", GENERATOR));
    writer.write_event(Event::Start(changeset))?;
    write_tags(&mut writer, tags)?;
    writer.write_event(Event::End(BytesEnd::new("changeset")))?;

    writer.write_event(Event::End(BytesEnd::new("osm")))?;
    finish(writer)
}
