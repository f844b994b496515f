//! The zip package behind a workbook.
//!
//! Saving never re-serializes the document. Edited worksheet parts are
//! rewritten cell by cell and every other entry is copied through raw, so
//! chart sheets, drawings, media and anything else we don't model come out
//! byte for byte.

use anyhow::{anyhow, bail, Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Read, Seek, Write};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const ROOT_RELS_PART: &str = "_rels/.rels";
const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// Replacement text per cell, keyed by 1-based `(column, row)`
pub type CellEdits = BTreeMap<(u32, u32), String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    Worksheet,
    Chartsheet,
    /// Dialog and macro sheets
    Other,
}

impl SheetKind {
    fn from_relationship(kind: &str) -> Self {
        if kind.ends_with("/worksheet") {
            SheetKind::Worksheet
        } else if kind.ends_with("/chartsheet") {
            SheetKind::Chartsheet
        } else {
            SheetKind::Other
        }
    }
}

/// A sheet as listed in the workbook part, in workbook order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetPart {
    pub name: String,
    pub kind: SheetKind,
    /// Zip entry name, e.g. `xl/worksheets/sheet1.xml`
    pub path: String,
}

#[derive(Debug)]
struct Relationship {
    id: String,
    kind: String,
    target: String,
}

pub struct Package {
    source: Vec<u8>,
    sheets: Vec<SheetPart>,
}

impl Package {
    pub fn read(source: Vec<u8>) -> Result<Self> {
        let sheets = {
            let mut archive = ZipArchive::new(Cursor::new(source.as_slice()))
                .context("Not a zip package")?;
            sheet_parts(&mut archive)?
        };
        Ok(Self { source, sheets })
    }

    pub fn source(&self) -> &[u8] {
        &self.source
    }

    pub fn sheets(&self) -> &[SheetPart] {
        &self.sheets
    }

    pub fn worksheet(&self, name: &str) -> Option<&SheetPart> {
        self.sheets
            .iter()
            .find(|sheet| sheet.kind == SheetKind::Worksheet && sheet.name == name)
    }

    /// Write the package back with `edits` (sheet name → cells) applied.
    ///
    /// Without edits the original bytes are returned as they came in.
    pub fn save(self, edits: &BTreeMap<String, CellEdits>) -> Result<Vec<u8>> {
        if edits.values().all(|cells| cells.is_empty()) {
            return Ok(self.source);
        }

        let mut archive = ZipArchive::new(Cursor::new(self.source.as_slice()))?;

        let mut patched: HashMap<String, Vec<u8>> = HashMap::new();
        for (sheet, cells) in edits.iter().filter(|(_, cells)| !cells.is_empty()) {
            let part = self
                .worksheet(sheet)
                .ok_or_else(|| anyhow!("No worksheet named '{}'", sheet))?;
            let xml = read_part(&mut archive, &part.path)?;
            let updated = patch_cells(&xml, cells)
                .with_context(|| format!("Failed to update {}", part.path))?;
            patched.insert(part.path.clone(), updated);
        }

        let mut writer = ZipWriter::new(Cursor::new(Vec::with_capacity(self.source.len())));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        for i in 0..archive.len() {
            let entry = archive.by_index_raw(i)?;
            match patched.get(entry.name()) {
                Some(bytes) => {
                    writer.start_file(entry.name(), options)?;
                    writer.write_all(bytes)?;
                }
                None => writer.raw_copy_file(entry)?,
            }
        }

        Ok(writer.finish()?.into_inner())
    }
}

fn sheet_parts<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<Vec<SheetPart>> {
    let workbook_path = match read_optional_part(archive, ROOT_RELS_PART)? {
        Some(xml) => relationships(&xml)?
            .into_iter()
            .find(|rel| rel.kind.ends_with("/officeDocument"))
            .map(|rel| resolve_target("", &rel.target))
            .unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string()),
        None => DEFAULT_WORKBOOK_PART.to_string(),
    };

    let workbook_xml = read_part(archive, &workbook_path)?;
    let rels_xml = read_part(archive, &rels_path_for(&workbook_path))?;
    let rels: HashMap<String, Relationship> = relationships(&rels_xml)?
        .into_iter()
        .map(|rel| (rel.id.clone(), rel))
        .collect();
    let base = parent_dir(&workbook_path);

    let mut sheets = Vec::new();
    for (name, id) in sheet_entries(&workbook_xml)? {
        let Some(rel) = rels.get(&id) else {
            bail!("Sheet '{}' points at missing relationship {}", name, id);
        };
        sheets.push(SheetPart {
            name,
            kind: SheetKind::from_relationship(&rel.kind),
            path: resolve_target(base, &rel.target),
        });
    }

    Ok(sheets)
}

fn read_part<R: Read + Seek>(archive: &mut ZipArchive<R>, name: &str) -> Result<Vec<u8>> {
    read_optional_part(archive, name)?.ok_or_else(|| anyhow!("Missing package part {}", name))
}

fn read_optional_part<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    name: &str,
) -> Result<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        Err(zip::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn relationships(xml: &[u8]) -> Result<Vec<Relationship>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"Relationship" => {
                // External targets are URLs, not parts
                if attr_value(&reader, &e, b"TargetMode")?.as_deref() == Some("External") {
                    continue;
                }
                let id = attr_value(&reader, &e, b"Id")?;
                let kind = attr_value(&reader, &e, b"Type")?;
                let target = attr_value(&reader, &e, b"Target")?;
                if let (Some(id), Some(kind), Some(target)) = (id, kind, target) {
                    out.push(Relationship { id, kind, target });
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

/// `(name, relationship id)` for every `<sheet>` in the workbook part
fn sheet_entries(xml: &[u8]) -> Result<Vec<(String, String)>> {
    let mut reader = Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut out = Vec::new();

    loop {
        buf.clear();
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) if e.local_name().as_ref() == b"sheet" => {
                let name = attr_value(&reader, &e, b"name")?;
                let mut id = None;
                for attr in e.attributes() {
                    let attr = attr?;
                    if attr.key.local_name().as_ref() == b"id" && attr.key.prefix().is_some() {
                        id = Some(attr.decode_and_unescape_value(&reader)?.into_owned());
                    }
                }
                if let (Some(name), Some(id)) = (name, id) {
                    out.push((name, id));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(out)
}

fn attr_value<R>(
    reader: &Reader<R>,
    element: &BytesStart,
    key: &[u8],
) -> Result<Option<String>> {
    for attr in element.attributes() {
        let attr = attr?;
        if attr.key.as_ref() == key {
            return Ok(Some(attr.decode_and_unescape_value(reader)?.into_owned()));
        }
    }
    Ok(None)
}

/// Rewrite the listed cells of a worksheet part as inline strings.
///
/// Cell attributes other than `t` (style, metadata) are kept; the old value,
/// whether shared string, inline or rich text, is replaced. Everything else in
/// the part is passed through unchanged.
fn patch_cells(xml: &[u8], edits: &CellEdits) -> Result<Vec<u8>> {
    let mut reader = Reader::from_reader(xml);
    let mut writer = Writer::new(Vec::with_capacity(xml.len() + edits.len() * 64));
    let mut buf = Vec::new();

    let mut row = 0u32;
    let mut column = 0u32;
    let mut skip_depth = 0usize;
    let mut applied = 0usize;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf)?;

        if skip_depth > 0 {
            match event {
                Event::Start(_) => skip_depth += 1,
                Event::End(_) => skip_depth -= 1,
                Event::Eof => bail!("Worksheet ended inside a cell"),
                _ => {}
            }
            continue;
        }

        let (element, empty) = match event {
            Event::Eof => break,
            Event::Start(e) => (e, false),
            Event::Empty(e) => (e, true),
            other => {
                writer.write_event(other)?;
                continue;
            }
        };

        match element.local_name().as_ref() {
            b"row" => {
                row = match attr_value(&reader, &element, b"r")? {
                    Some(r) => r
                        .parse()
                        .with_context(|| format!("Invalid row number '{}'", r))?,
                    None => row + 1,
                };
                column = 0;
            }
            b"c" => {
                (column, row) = match attr_value(&reader, &element, b"r")? {
                    Some(r) => parse_coordinate(&r)
                        .ok_or_else(|| anyhow!("Invalid cell reference '{}'", r))?,
                    None => (column + 1, row),
                };
                if let Some(text) = edits.get(&(column, row)) {
                    write_inline_string(&mut writer, &element, text)?;
                    applied += 1;
                    if !empty {
                        skip_depth = 1;
                    }
                    continue;
                }
            }
            _ => {}
        }

        writer.write_event(if empty {
            Event::Empty(element)
        } else {
            Event::Start(element)
        })?;
    }

    if applied < edits.len() {
        bail!(
            "{} of {} edited cells are missing from the worksheet",
            edits.len() - applied,
            edits.len()
        );
    }

    Ok(writer.into_inner())
}

fn write_inline_string(
    writer: &mut Writer<Vec<u8>>,
    cell: &BytesStart,
    text: &str,
) -> Result<()> {
    let qualified = std::str::from_utf8(cell.name().as_ref())?.to_string();
    // Keep whatever prefix the part uses for the main namespace
    let prefix = qualified.strip_suffix('c').unwrap_or("");
    let inline = format!("{}is", prefix);
    let text_tag = format!("{}t", prefix);

    let mut start = BytesStart::new(qualified.as_str());
    for attr in cell.attributes() {
        let attr = attr?;
        if attr.key.as_ref() != b"t" {
            start.push_attribute(attr);
        }
    }
    start.push_attribute(("t", "inlineStr"));

    let mut text_start = BytesStart::new(text_tag.as_str());
    text_start.push_attribute(("xml:space", "preserve"));

    writer.write_event(Event::Start(start))?;
    writer.write_event(Event::Start(BytesStart::new(inline.as_str())))?;
    writer.write_event(Event::Start(text_start))?;
    writer.write_event(Event::Text(BytesText::new(text)))?;
    writer.write_event(Event::End(BytesEnd::new(text_tag.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(inline.as_str())))?;
    writer.write_event(Event::End(BytesEnd::new(qualified.as_str())))?;
    Ok(())
}

/// `B7` → `(2, 7)`
pub fn parse_coordinate(reference: &str) -> Option<(u32, u32)> {
    let split = reference.find(|c: char| c.is_ascii_digit())?;
    let (letters, digits) = reference.split_at(split);
    if letters.is_empty() {
        return None;
    }

    let mut column = 0u32;
    for ch in letters.chars() {
        if !ch.is_ascii_alphabetic() {
            return None;
        }
        let value = ch.to_ascii_uppercase() as u32 - 'A' as u32 + 1;
        column = column.checked_mul(26)?.checked_add(value)?;
    }

    let row = digits.parse().ok()?;
    Some((column, row))
}

/// Resolve a relationship target against the directory of its source part
fn resolve_target(base: &str, target: &str) -> String {
    let joined = match target.strip_prefix('/') {
        Some(absolute) => absolute.to_string(),
        None if base.is_empty() => target.to_string(),
        None => format!("{}/{}", base, target),
    };

    let mut segments: Vec<&str> = Vec::new();
    for segment in joined.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}

fn parent_dir(path: &str) -> &str {
    path.rsplit_once('/').map(|(dir, _)| dir).unwrap_or("")
}

/// `xl/workbook.xml` → `xl/_rels/workbook.xml.rels`
fn rels_path_for(path: &str) -> String {
    match path.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", path),
    }
}
