use super::{Member, MemberKind, NodeRef, OsmNode, OsmRelation, OsmWay, Tag};
use crate::model::BuildError;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::cell::Cell;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::rc::Rc;
use std::str::FromStr;

const READ_BUFFER_BYTES: usize = 8 * 1024;
const PROLOG_SCAN_BYTES: usize = 512;

/// which top-level entity kinds a streaming pass materializes. the network
/// pipeline re-opens the source once per pass and only ever needs one kind
/// at a time.
#[derive(Debug, Clone, Copy)]
pub struct EntityFilter {
    pub nodes: bool,
    pub ways: bool,
    pub relations: bool,
}

impl EntityFilter {
    pub fn all() -> EntityFilter {
        EntityFilter {
            nodes: true,
            ways: true,
            relations: true,
        }
    }

    pub fn nodes_only() -> EntityFilter {
        EntityFilter {
            nodes: true,
            ways: false,
            relations: false,
        }
    }

    pub fn ways_only() -> EntityFilter {
        EntityFilter {
            nodes: false,
            ways: true,
            relations: false,
        }
    }
}

/// a finalized top-level OSM entity, yielded in file order.
#[derive(Debug)]
pub enum OsmEntity {
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Node,
    Way,
    Relation,
}

/// single-slot scratch holding the currently open entity; doubles as the
/// parser state machine (only one entity can be open at a time).
enum OpenEntity {
    Empty,
    Node(OsmNode),
    Way(OsmWay),
    Relation(OsmRelation),
    Skipped(EntityKind),
}

struct LineCounter<R> {
    inner: R,
    lines: Rc<Cell<u64>>,
}

impl<R: Read> Read for LineCounter<R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        let newlines = buf[..n].iter().filter(|b| **b == b'\n').count() as u64;
        self.lines.set(self.lines.get() + newlines);
        Ok(n)
    }
}

/// streaming OSM XML decoder. consumes the input in fixed-size chunks and
/// yields one entity at a time, so memory stays bounded by the largest
/// single entity regardless of file size.
pub struct OsmDecoder<R: Read> {
    reader: Reader<BufReader<LineCounter<R>>>,
    buf: Vec<u8>,
    open: OpenEntity,
    filter: EntityFilter,
    lines: Rc<Cell<u64>>,
}

impl OsmDecoder<File> {
    pub fn open<P: AsRef<Path>>(path: P, filter: EntityFilter) -> Result<OsmDecoder<File>, BuildError> {
        let file = File::open(path.as_ref())
            .map_err(|e| BuildError::Setup(format!("cannot open {}: {e}", path.as_ref().display())))?;
        Ok(OsmDecoder::new(file, filter))
    }
}

impl<R: Read> OsmDecoder<R> {
    pub fn new(input: R, filter: EntityFilter) -> OsmDecoder<R> {
        let lines = Rc::new(Cell::new(1u64));
        let counter = LineCounter {
            inner: input,
            lines: Rc::clone(&lines),
        };
        let reader = Reader::from_reader(BufReader::with_capacity(READ_BUFFER_BYTES, counter));
        OsmDecoder {
            reader,
            buf: Vec::new(),
            open: OpenEntity::Empty,
            filter,
            lines,
        }
    }

    /// current 1-based source line, for progress reporting.
    pub fn line_number(&self) -> u64 {
        self.lines.get()
    }

    /// next finalized entity, or None at end of input.
    pub fn next_entity(&mut self) -> Result<Option<OsmEntity>, BuildError> {
        loop {
            self.buf.clear();
            let event = self.reader.read_event_into(&mut self.buf).map_err(|e| {
                BuildError::Parse(format!("line {}: {e}", self.lines.get()))
            })?;
            match event {
                Event::Eof => {
                    if !matches!(self.open, OpenEntity::Empty) {
                        return Err(BuildError::Parse(String::from(
                            "input truncated inside an open element",
                        )));
                    }
                    return Ok(None);
                }
                Event::Start(e) => {
                    let e = e.into_owned();
                    let name = e.local_name().as_ref().to_vec();
                    if let Some(entity) = self.handle_element(&name, &e, false)? {
                        return Ok(Some(entity));
                    }
                }
                Event::Empty(e) => {
                    let e = e.into_owned();
                    let name = e.local_name().as_ref().to_vec();
                    if let Some(entity) = self.handle_element(&name, &e, true)? {
                        return Ok(Some(entity));
                    }
                }
                Event::End(e) => {
                    let name = e.local_name().as_ref().to_vec();
                    if let Some(entity) = self.handle_close(&name) {
                        return Ok(Some(entity));
                    }
                }
                _ => {}
            }
        }
    }

    fn handle_element(
        &mut self,
        name: &[u8],
        e: &BytesStart,
        self_closing: bool,
    ) -> Result<Option<OsmEntity>, BuildError> {
        match name {
            b"node" => {
                if !self.filter.nodes {
                    return Ok(self.open_skipped(EntityKind::Node, self_closing));
                }
                let node = OsmNode {
                    id: self.required_parsed(e, b"id", "node")?,
                    lat: self.required_parsed(e, b"lat", "node")?,
                    lon: self.required_parsed(e, b"lon", "node")?,
                    tags: Vec::new(),
                };
                if self_closing {
                    return Ok(Some(OsmEntity::Node(node)));
                }
                self.open = OpenEntity::Node(node);
            }
            b"way" => {
                if !self.filter.ways {
                    return Ok(self.open_skipped(EntityKind::Way, self_closing));
                }
                let way = OsmWay {
                    id: self.required_parsed(e, b"id", "way")?,
                    refs: Vec::new(),
                    tags: Vec::new(),
                };
                if self_closing {
                    return Ok(Some(OsmEntity::Way(way)));
                }
                self.open = OpenEntity::Way(way);
            }
            b"relation" => {
                if !self.filter.relations {
                    return Ok(self.open_skipped(EntityKind::Relation, self_closing));
                }
                let relation = OsmRelation {
                    id: self.required_parsed(e, b"id", "relation")?,
                    members: Vec::new(),
                    tags: Vec::new(),
                };
                if self_closing {
                    return Ok(Some(OsmEntity::Relation(relation)));
                }
                self.open = OpenEntity::Relation(relation);
            }
            b"tag" => {
                let key = self.required_attr(e, b"k", "tag")?;
                let value = self.required_attr(e, b"v", "tag")?;
                let tag = Tag { key, value };
                match &mut self.open {
                    OpenEntity::Node(n) => n.tags.push(tag),
                    OpenEntity::Way(w) => w.tags.push(tag),
                    OpenEntity::Relation(r) => r.tags.push(tag),
                    OpenEntity::Empty | OpenEntity::Skipped(_) => {}
                }
            }
            b"nd" => {
                let node_id = self.required_parsed(e, b"ref", "nd")?;
                if let OpenEntity::Way(w) = &mut self.open {
                    w.refs.push(NodeRef::new(node_id));
                }
            }
            b"member" => {
                let kind = self
                    .attr_value(e, b"type")?
                    .map(|v| MemberKind::from_type_attr(&v))
                    .unwrap_or(MemberKind::Other);
                let ref_id = self.required_parsed(e, b"ref", "member")?;
                let role = self.attr_value(e, b"role")?.unwrap_or_default();
                if let OpenEntity::Relation(r) = &mut self.open {
                    r.members.push(Member::new(kind, ref_id, role));
                }
            }
            _ => {}
        }
        Ok(None)
    }

    fn open_skipped(&mut self, kind: EntityKind, self_closing: bool) -> Option<OsmEntity> {
        if !self_closing {
            self.open = OpenEntity::Skipped(kind);
        }
        None
    }

    fn handle_close(&mut self, name: &[u8]) -> Option<OsmEntity> {
        let kind = match name {
            b"node" => EntityKind::Node,
            b"way" => EntityKind::Way,
            b"relation" => EntityKind::Relation,
            _ => return None,
        };
        match std::mem::replace(&mut self.open, OpenEntity::Empty) {
            OpenEntity::Node(n) if kind == EntityKind::Node => Some(OsmEntity::Node(n)),
            OpenEntity::Way(w) if kind == EntityKind::Way => Some(OsmEntity::Way(w)),
            OpenEntity::Relation(r) if kind == EntityKind::Relation => {
                Some(OsmEntity::Relation(r))
            }
            _ => None,
        }
    }

    fn attr_value(&self, e: &BytesStart, name: &[u8]) -> Result<Option<String>, BuildError> {
        for attr in e.attributes() {
            let attr = attr.map_err(|err| {
                BuildError::Parse(format!("line {}: bad attribute: {err}", self.lines.get()))
            })?;
            if attr.key.local_name().as_ref() == name {
                let value = match attr.decode_and_unescape_value(self.reader.decoder()) {
                    Ok(value) => value.into_owned(),
                    // a value carrying an entity outside the predefined
                    // set is kept verbatim instead of failing the element
                    Err(_) => String::from_utf8_lossy(attr.value.as_ref()).into_owned(),
                };
                return Ok(Some(value));
            }
        }
        Ok(None)
    }

    fn required_attr(
        &self,
        e: &BytesStart,
        name: &[u8],
        element: &str,
    ) -> Result<String, BuildError> {
        self.attr_value(e, name)?.ok_or_else(|| {
            BuildError::Parse(format!(
                "invalid <{element}>: missing attribute '{}'",
                String::from_utf8_lossy(name)
            ))
        })
    }

    fn required_parsed<T>(
        &self,
        e: &BytesStart,
        name: &[u8],
        element: &str,
    ) -> Result<T, BuildError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let raw = self.required_attr(e, name, element)?;
        raw.parse::<T>().map_err(|err| {
            BuildError::Parse(format!(
                "invalid <{element}>: attribute '{}' = '{raw}': {err}",
                String::from_utf8_lossy(name)
            ))
        })
    }
}

/// checks, within the first 512 bytes, that the input carries an XML prolog
/// and that the first element is `<osm`. the network pipeline refuses to
/// run its passes over anything else.
pub fn validate_osm_prolog<P: AsRef<Path>>(path: P) -> Result<(), BuildError> {
    let mut file = File::open(path.as_ref())
        .map_err(|e| BuildError::Setup(format!("cannot open {}: {e}", path.as_ref().display())))?;
    let mut buf = [0u8; PROLOG_SCAN_BYTES];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    let head = String::from_utf8_lossy(&buf[..filled]);
    let trimmed = head.trim_start();
    let mut ok_xml = false;
    let mut ok_osm = false;
    if trimmed.starts_with("<?xml") {
        ok_xml = true;
    }
    // first element after the prolog and any comments/doctype
    let bytes = trimmed.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            match bytes.get(i + 1) {
                Some(b'?') | Some(b'!') => {}
                _ => {
                    ok_osm = bytes[i + 1..].starts_with(b"osm");
                    break;
                }
            }
        }
        i += 1;
    }
    if ok_xml && ok_osm {
        Ok(())
    } else {
        Err(BuildError::Setup(format!(
            "'{}' doesn't seem to contain OSM XML",
            path.as_ref().display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::{validate_osm_prolog, EntityFilter, OsmDecoder, OsmEntity};
    use crate::model::osm::MemberKind;
    use crate::model::BuildError;
    use std::io::Cursor;
    use std::io::Write;

    fn decode_all(xml: &str, filter: EntityFilter) -> Vec<OsmEntity> {
        let mut decoder = OsmDecoder::new(Cursor::new(xml.as_bytes().to_vec()), filter);
        let mut out = Vec::new();
        while let Some(e) = decoder.next_entity().unwrap() {
            out.push(e);
        }
        out
    }

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<osm version="0.6" generator="test">
  <node id="1" lat="10.0" lon="20.0">
    <tag k="name" v="Foo"/>
  </node>
  <node id="2" lat="10.5" lon="20.5"/>
  <way id="100">
    <nd ref="1"/>
    <nd ref="2"/>
    <tag k="highway" v="primary"/>
  </way>
  <relation id="1000">
    <member type="way" ref="100" role="outer"/>
    <member type="node" ref="1" role=""/>
    <member type="boundary" ref="5" role="odd"/>
    <tag k="type" v="multipolygon"/>
  </relation>
</osm>
"#;

    #[test]
    fn test_decodes_entities_in_file_order() {
        let entities = decode_all(SAMPLE, EntityFilter::all());
        assert_eq!(entities.len(), 4);
        match &entities[0] {
            OsmEntity::Node(n) => {
                assert_eq!(n.id, 1);
                assert_eq!(n.lat, 10.0);
                assert_eq!(n.lon, 20.0);
                assert_eq!(n.tags.len(), 1);
                assert_eq!(n.tags[0].key, "name");
                assert_eq!(n.tags[0].value, "Foo");
            }
            other => panic!("expected node, got {other:?}"),
        }
        match &entities[1] {
            OsmEntity::Node(n) => assert!(n.tags.is_empty()),
            other => panic!("expected node, got {other:?}"),
        }
        match &entities[2] {
            OsmEntity::Way(w) => {
                assert_eq!(w.id, 100);
                let ids: Vec<i64> = w.refs.iter().map(|r| r.node_id).collect();
                assert_eq!(ids, vec![1, 2]);
                assert_eq!(w.tags[0].key, "highway");
            }
            other => panic!("expected way, got {other:?}"),
        }
        match &entities[3] {
            OsmEntity::Relation(r) => {
                assert_eq!(r.id, 1000);
                assert_eq!(r.members.len(), 3);
                assert_eq!(r.members[0].kind, MemberKind::Way);
                assert_eq!(r.members[0].role, "outer");
                assert_eq!(r.members[1].kind, MemberKind::Node);
                assert_eq!(r.members[2].kind, MemberKind::Other);
                assert_eq!(r.tags[0].value, "multipolygon");
            }
            other => panic!("expected relation, got {other:?}"),
        }
    }

    #[test]
    fn test_entity_filter_skips_kinds() {
        let entities = decode_all(SAMPLE, EntityFilter::nodes_only());
        assert_eq!(entities.len(), 2);
        assert!(entities.iter().all(|e| matches!(e, OsmEntity::Node(_))));

        let entities = decode_all(SAMPLE, EntityFilter::ways_only());
        assert_eq!(entities.len(), 1);
        assert!(matches!(entities[0], OsmEntity::Way(_)));
    }

    #[test]
    fn test_attribute_unescaping() {
        let xml = r#"<osm><node id="7" lat="1.0" lon="2.0">
            <tag k="name" v="Fish &amp; Chips &lt;&gt; &quot;x&quot; &apos;y&apos; &#38;"/>
        </node></osm>"#;
        let entities = decode_all(xml, EntityFilter::all());
        match &entities[0] {
            OsmEntity::Node(n) => {
                assert_eq!(n.tags[0].value, "Fish & Chips <> \"x\" 'y' &");
            }
            other => panic!("expected node, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_entity_keeps_the_raw_value() {
        let xml = r#"<osm><node id="7" lat="1.0" lon="2.0">
            <tag k="name" v="caf&eacute;"/>
        </node></osm>"#;
        let entities = decode_all(xml, EntityFilter::all());
        match &entities[0] {
            OsmEntity::Node(n) => assert_eq!(n.tags[0].value, "caf&eacute;"),
            other => panic!("expected node, got {other:?}"),
        }
    }

    #[test]
    fn test_malformed_node_attributes_fail() {
        let mut decoder = OsmDecoder::new(
            Cursor::new(br#"<osm><node id="1" lon="2.0"/></osm>"#.to_vec()),
            EntityFilter::all(),
        );
        match decoder.next_entity() {
            Err(BuildError::Parse(msg)) => assert!(msg.contains("lat"), "{msg}"),
            other => panic!("expected parse error, got {other:?}"),
        }

        let mut decoder = OsmDecoder::new(
            Cursor::new(br#"<osm><node id="x" lat="1" lon="2"/></osm>"#.to_vec()),
            EntityFilter::all(),
        );
        assert!(matches!(decoder.next_entity(), Err(BuildError::Parse(_))));
    }

    #[test]
    fn test_line_counting() {
        let mut decoder = OsmDecoder::new(Cursor::new(SAMPLE.as_bytes().to_vec()), EntityFilter::all());
        while decoder.next_entity().unwrap().is_some() {}
        // the whole sample is buffered in one read
        assert!(decoder.line_number() >= SAMPLE.lines().count() as u64);
    }

    #[test]
    fn test_prolog_validation() {
        let mut ok = tempfile::NamedTempFile::new().unwrap();
        write!(ok, "{SAMPLE}").unwrap();
        assert!(validate_osm_prolog(ok.path()).is_ok());

        let mut no_prolog = tempfile::NamedTempFile::new().unwrap();
        write!(no_prolog, "<osm></osm>").unwrap();
        assert!(validate_osm_prolog(no_prolog.path()).is_err());

        let mut not_osm = tempfile::NamedTempFile::new().unwrap();
        write!(not_osm, "<?xml version=\"1.0\"?><gpx></gpx>").unwrap();
        assert!(validate_osm_prolog(not_osm.path()).is_err());
    }
}
