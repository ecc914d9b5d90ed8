use std::str;

use log::{debug, warn};
use quick_xml::events::attributes::Attribute;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::data::changeset::{ChangesetId, ChangesetSummary};
use crate::data::geo::Loc;
use crate::data::osm::{Entity, EntityId, EntityType, Member, Node, OsmId, Relation, Tags, Way};
use crate::data::user::UserDetails;
use crate::errors::{Error, Result};

enum ParserState {
    Top,
    Root,
    Record(PendingRecord),
    Done,
}

/// A node, way or relation record whose children are still being read.
struct PendingRecord {
    kind: EntityType,
    osm_id: OsmId,
    version: Option<u64>,
    user: Option<String>,
    visible: bool,
    loc: Loc,
    tags: Tags,
    nodes: Vec<EntityId>,
    members: Vec<Member>,
}

fn record_kind(name: &[u8]) -> Option<EntityType> {
    match name {
        b"node" => Some(EntityType::Node),
        b"way" => Some(EntityType::Way),
        b"relation" => Some(EntityType::Relation),
        _ => None,
    }
}

fn value(attribute: &Attribute) -> Result<String> {
    Ok(attribute.unescape_value()?.into_owned())
}

impl PendingRecord {
    fn start(kind: EntityType, el: &BytesStart) -> Result<PendingRecord> {
        let mut osm_id: Option<OsmId> = None;
        let mut version: Option<u64> = None;
        let mut user: Option<String> = None;
        let mut visible = true;
        let mut lon = f64::NAN;
        let mut lat = f64::NAN;

        for attribute_res in el.attributes() {
            let attribute = attribute_res?;
            match attribute.key.as_ref() {
                b"id" => osm_id = Some(value(&attribute)?.parse()?),
                b"version" => version = value(&attribute)?.parse().ok(),
                b"user" => user = Some(value(&attribute)?),
                b"visible" => visible = value(&attribute)? != "false",
                b"lon" => lon = value(&attribute)?.parse().unwrap_or(f64::NAN),
                b"lat" => lat = value(&attribute)?.parse().unwrap_or(f64::NAN),
                _ => (),
            }
        }

        Ok(PendingRecord {
            kind,
            osm_id: osm_id.ok_or("record has no id").map_err(Error::decode)?,
            version,
            user,
            visible,
            loc: Loc::new(lon, lat),
            tags: Tags::new(),
            nodes: Vec::new(),
            members: Vec::new(),
        })
    }

    fn child(&mut self, el: &BytesStart) {
        let result = match (el.name().as_ref(), self.kind) {
            (b"tag", _) => parse_tag(el).map(|tag| {
                if let Some((k, v)) = tag {
                    self.tags.insert(k, v);
                }
            }),
            (b"nd", EntityType::Way) => parse_node_ref(el).map(|id| self.nodes.push(id)),
            (b"member", EntityType::Relation) => parse_member(el).map(|member| self.members.push(member)),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(record = self.kind.as_str(), id = self.osm_id, err = err.message.as_str(); "Skipping malformed child element");
        }
    }

    fn finish(self) -> Entity {
        match self.kind {
            EntityType::Node => Entity::Node(Node {
                osm_id: self.osm_id,
                version: self.version,
                user: self.user,
                visible: self.visible,
                tags: self.tags,
                loc: self.loc,
            }),
            EntityType::Way => Entity::Way(Way {
                osm_id: self.osm_id,
                version: self.version,
                user: self.user,
                visible: self.visible,
                tags: self.tags,
                nodes: self.nodes,
            }),
            EntityType::Relation => Entity::Relation(Relation {
                osm_id: self.osm_id,
                version: self.version,
                user: self.user,
                visible: self.visible,
                tags: self.tags,
                members: self.members,
            }),
        }
    }
}

/// `<tag k=".." v=".."/>`. A tag without a key is ignored.
fn parse_tag(el: &BytesStart) -> Result<Option<(String, String)>> {
    let mut k: Option<String> = None;
    let mut v = String::new();
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        match attribute.key.as_ref() {
            b"k" => k = Some(value(&attribute)?),
            b"v" => v = value(&attribute)?,
            _ => (),
        }
    }
    Ok(k.map(|k| (k, v)))
}

fn parse_node_ref(el: &BytesStart) -> Result<EntityId> {
    match el.try_get_attribute("ref")? {
        Some(attribute) => Ok(EntityId::node(value(&attribute)?.parse()?)),
        None => Err(Error::decode("nd without ref")),
    }
}

fn parse_member(el: &BytesStart) -> Result<Member> {
    let mut kind: Option<EntityType> = None;
    let mut osm_id: Option<OsmId> = None;
    let mut role = String::new();
    for attribute_res in el.attributes() {
        let attribute = attribute_res?;
        match attribute.key.as_ref() {
            b"type" => kind = Some(value(&attribute)?.parse()?),
            b"ref" => osm_id = Some(value(&attribute)?.parse()?),
            b"role" => role = value(&attribute)?,
            _ => (),
        }
    }
    match (kind, osm_id) {
        (Some(kind), Some(osm_id)) => Ok(Member {
            id: EntityId::new(kind, osm_id),
            role,
        }),
        _ => Err(Error::decode("member without type or ref")),
    }
}

/// Decodes an `<osm>` document into entities, in document order.
///
/// Unknown top-level elements (`bounds`, `note`, ...) are skipped, as are
/// records that cannot be read, such as one without an id. References from ways
/// and relations are kept as-is even when the referenced entity is not part of
/// the document. A document without a root element is a decode error.
pub fn decode_entities(xml: &str) -> Result<Vec<Entity>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut state = ParserState::Top;
    let mut entities: Vec<Entity> = Vec::new();

    loop {
        let event = reader.read_event()?;
        state = match (state, event) {
            (state, Event::Eof) => {
                return match state {
                    ParserState::Top => Err(Error::decode("document has no root element")),
                    ParserState::Done => Ok(entities),
                    _ => Err(Error::decode("document ended inside an element")),
                };
            },
            (ParserState::Top, Event::Start(_)) => ParserState::Root,
            (ParserState::Top, Event::Empty(_)) => ParserState::Done,
            (ParserState::Root, Event::Start(e)) => match record_kind(e.name().as_ref()) {
                Some(kind) => match PendingRecord::start(kind, &e) {
                    Ok(record) => ParserState::Record(record),
                    Err(err) => {
                        warn!(record = kind.as_str(), err = err.message.as_str(); "Skipping malformed record");
                        reader.read_to_end(e.name())?;
                        ParserState::Root
                    },
                },
                None => {
                    reader.read_to_end(e.name())?;
                    ParserState::Root
                },
            },
            (ParserState::Root, Event::Empty(e)) => {
                if let Some(kind) = record_kind(e.name().as_ref()) {
                    match PendingRecord::start(kind, &e) {
                        Ok(record) => entities.push(record.finish()),
                        Err(err) => warn!(record = kind.as_str(), err = err.message.as_str(); "Skipping malformed record"),
                    }
                }
                ParserState::Root
            },
            (ParserState::Root, Event::End(_)) => ParserState::Done,
            (ParserState::Record(mut record), Event::Start(e)) => {
                record.child(&e);
                reader.read_to_end(e.name())?;
                ParserState::Record(record)
            },
            (ParserState::Record(mut record), Event::Empty(e)) => {
                record.child(&e);
                ParserState::Record(record)
            },
            (ParserState::Record(record), Event::End(_)) => {
                entities.push(record.finish());
                ParserState::Root
            },
            (state, _) => state,
        };
    }
}

/// Calls `visit` for every opening or self-closing element in document order.
fn visit_elements(xml: &str, mut visit: impl FnMut(&BytesStart) -> Result<()>) -> Result<()> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);
    let mut seen_root = false;

    loop {
        match reader.read_event()? {
            Event::Eof => break,
            Event::Start(e) | Event::Empty(e) => {
                seen_root = true;
                visit(&e)?;
            },
            _ => (),
        }
    }

    if seen_root {
        Ok(())
    } else {
        Err(Error::decode("document has no root element"))
    }
}

pub fn decode_user_details(xml: &str) -> Result<UserDetails> {
    let mut details: Option<UserDetails> = None;
    visit_elements(xml, |el| {
        match el.name().as_ref() {
            b"user" if details.is_none() => {
                let mut id: Option<u64> = None;
                let mut display_name = String::new();
                for attribute_res in el.attributes() {
                    let attribute = attribute_res?;
                    match attribute.key.as_ref() {
                        b"id" => id = Some(value(&attribute)?.parse()?),
                        b"display_name" => display_name = value(&attribute)?,
                        _ => (),
                    }
                }
                details = Some(UserDetails {
                    id: id.ok_or("user has no id").map_err(Error::decode)?,
                    display_name,
                    image_url: String::new(),
                });
            },
            b"img" => {
                if let (Some(user), Some(href)) = (details.as_mut(), el.try_get_attribute("href")?) {
                    if user.image_url.is_empty() {
                        user.image_url = value(&href)?;
                    }
                }
            },
            _ => (),
        }
        Ok(())
    })?;
    details.ok_or_else(|| Error::decode("document has no user element"))
}

/// Each `<changeset>` element becomes one summary holding its tags.
pub fn decode_changesets(xml: &str) -> Result<Vec<ChangesetSummary>> {
    let mut changesets: Vec<ChangesetSummary> = Vec::new();
    visit_elements(xml, |el| {
        match el.name().as_ref() {
            b"changeset" => changesets.push(ChangesetSummary::default()),
            b"tag" => {
                if let (Some(changeset), Some((k, v))) = (changesets.last_mut(), parse_tag(el)?) {
                    changeset.tags.insert(k, v);
                }
            },
            _ => (),
        }
        Ok(())
    })?;
    Ok(changesets)
}

/// The `api` attribute of the capabilities document's `<status>` element.
pub fn decode_api_status(xml: &str) -> Result<String> {
    let mut status: Option<String> = None;
    visit_elements(xml, |el| {
        if el.name().as_ref() == b"status" && status.is_none() {
            if let Some(api) = el.try_get_attribute("api")? {
                status = Some(value(&api)?);
            }
        }
        Ok(())
    })?;
    status.ok_or_else(|| Error::decode("capabilities have no api status"))
}

/// The create endpoint answers with the bare numeric id.
pub fn decode_changeset_id(body: &str) -> Result<ChangesetId> {
    let trimmed = body.trim();
    debug!(body = trimmed; "Parsing changeset id");
    trimmed
        .parse()
        .map_err(|_| Error::decode(format!("invalid changeset id {trimmed:?}")))
}
