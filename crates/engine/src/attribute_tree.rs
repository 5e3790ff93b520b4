//! Attribute tree: hierarchical names to quarks
//!
//! Paths such as `["CPUs", "0", "Current_thread"]` are interned one segment
//! at a time. Each entry records its name, its parent and a map of its
//! children, and the entry's position in the arena is its quark. Entries
//! are never removed, so a quark keeps its path for the tree's lifetime.
//!
//! Wire format (little-endian):
//! `[magic: u32][count: u32]([parent: u32][len: u32][utf8 bytes])*[crc32: u32]`
//! where `parent` is `u32::MAX` for top-level attributes.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rustc_hash::{FxHashMap, FxHashSet};
use statehist_core::{Error, Quark, Result};
use std::io::{Cursor, Read};

const ATTRIBUTE_MAGIC: u32 = 0x4154_5452;
const NO_PARENT: u32 = u32::MAX;

/// Path segment matching every child in [`AttributeTree::find_quarks`].
pub const WILDCARD: &str = "*";

/// Path segment moving up to the parent in [`AttributeTree::find_quarks`].
pub const PARENT: &str = "..";

#[derive(Debug, Clone)]
struct AttributeEntry {
    name: String,
    parent: Option<Quark>,
    children: FxHashMap<String, Quark>,
    /// Children in creation order
    child_order: Vec<Quark>,
}

/// Interned attribute paths.
#[derive(Debug, Clone, Default)]
pub struct AttributeTree {
    entries: Vec<AttributeEntry>,
    roots: FxHashMap<String, Quark>,
    root_order: Vec<Quark>,
}

impl AttributeTree {
    /// Create an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of attributes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no attribute exists.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry(&self, quark: Quark) -> Result<&AttributeEntry> {
        self.entries
            .get(quark.index())
            .ok_or_else(|| Error::AttributeNotFound(format!("quark {}", quark)))
    }

    fn child(&self, parent: Option<Quark>, name: &str) -> Option<Quark> {
        match parent {
            None => self.roots.get(name).copied(),
            Some(p) => self.entries.get(p.index())?.children.get(name).copied(),
        }
    }

    /// Quark of `path` below `parent` (or below the root), if it exists.
    ///
    /// An empty path names `parent` itself.
    pub fn get_quark(&self, parent: Option<Quark>, path: &[&str]) -> Option<Quark> {
        if let Some(p) = parent {
            if p.index() >= self.entries.len() {
                return None;
            }
        }
        let mut current = parent;
        for segment in path {
            current = Some(self.child(current, segment)?);
        }
        current
    }

    /// Quark of `path` below `parent`, creating every missing segment.
    pub fn get_or_create_quark(&mut self, parent: Option<Quark>, path: &[&str]) -> Result<Quark> {
        if let Some(p) = parent {
            self.entry(p)?;
        }
        let mut current = parent;
        for segment in path {
            let next = match self.child(current, segment) {
                Some(q) => q,
                None => self.add_entry(current, segment)?,
            };
            current = Some(next);
        }
        current.ok_or_else(|| Error::AttributeNotFound("empty attribute path".into()))
    }

    fn add_entry(&mut self, parent: Option<Quark>, name: &str) -> Result<Quark> {
        let raw = u32::try_from(self.entries.len())
            .ok()
            .filter(|raw| *raw != NO_PARENT)
            .ok_or_else(|| Error::Internal("quark space exhausted".into()))?;
        let quark = Quark::new(raw);
        self.entries.push(AttributeEntry {
            name: name.to_owned(),
            parent,
            children: FxHashMap::default(),
            child_order: Vec::new(),
        });
        match parent {
            None => {
                self.roots.insert(name.to_owned(), quark);
                self.root_order.push(quark);
            }
            Some(p) => {
                let entry = &mut self.entries[p.index()];
                entry.children.insert(name.to_owned(), quark);
                entry.child_order.push(quark);
            }
        }
        Ok(quark)
    }

    /// Last path segment of `quark`.
    pub fn name(&self, quark: Quark) -> Result<&str> {
        Ok(&self.entry(quark)?.name)
    }

    /// Parent of `quark`, `None` for top-level attributes.
    pub fn parent(&self, quark: Quark) -> Result<Option<Quark>> {
        Ok(self.entry(quark)?.parent)
    }

    /// Segments from the top level down to `quark`.
    pub fn path_of(&self, quark: Quark) -> Result<Vec<String>> {
        let mut path = Vec::new();
        let mut current = Some(quark);
        while let Some(q) = current {
            let entry = self.entry(q)?;
            path.push(entry.name.clone());
            current = entry.parent;
        }
        path.reverse();
        Ok(path)
    }

    /// Path of `quark` joined with `/`.
    pub fn full_path(&self, quark: Quark) -> Result<String> {
        Ok(self.path_of(quark)?.join("/"))
    }

    /// Children of `quark` (top-level attributes for `None`), in creation
    /// order. With `recursive`, every descendant in depth-first order.
    pub fn sub_attributes(&self, quark: Option<Quark>, recursive: bool) -> Result<Vec<Quark>> {
        let direct = match quark {
            None => &self.root_order,
            Some(q) => &self.entry(q)?.child_order,
        };
        if !recursive {
            return Ok(direct.clone());
        }
        let mut out = Vec::new();
        let mut stack: Vec<Quark> = direct.iter().rev().copied().collect();
        while let Some(q) = stack.pop() {
            out.push(q);
            stack.extend(self.entries[q.index()].child_order.iter().rev().copied());
        }
        Ok(out)
    }

    /// [`AttributeTree::sub_attributes`] keeping only names accepted by
    /// `matches`.
    pub fn sub_attributes_matching(
        &self,
        quark: Option<Quark>,
        recursive: bool,
        matches: impl Fn(&str) -> bool,
    ) -> Result<Vec<Quark>> {
        let mut found = self.sub_attributes(quark, recursive)?;
        found.retain(|q| matches(&self.entries[q.index()].name));
        Ok(found)
    }

    /// Quarks whose path matches `pattern`. [`WILDCARD`] segments match any
    /// child and [`PARENT`] segments move up one level. Results follow
    /// creation order level by level, without duplicates; a pattern that
    /// climbs back to the top of the tree contributes nothing.
    pub fn find_quarks(&self, parent: Option<Quark>, pattern: &[&str]) -> Vec<Quark> {
        if pattern.is_empty() {
            return Vec::new();
        }
        let mut frontier: Vec<Option<Quark>> = vec![parent];
        for segment in pattern {
            let mut next = Vec::new();
            let mut seen = FxHashSet::default();
            for candidate in frontier {
                let mut push = |q: Option<Quark>| {
                    if seen.insert(q) {
                        next.push(q);
                    }
                };
                match *segment {
                    WILDCARD => {
                        let children = match candidate {
                            None => &self.root_order,
                            Some(q) => match self.entries.get(q.index()) {
                                Some(entry) => &entry.child_order,
                                None => continue,
                            },
                        };
                        children.iter().copied().for_each(|c| push(Some(c)));
                    }
                    PARENT => match candidate {
                        None => push(None),
                        Some(q) => {
                            if let Some(entry) = self.entries.get(q.index()) {
                                push(entry.parent);
                            }
                        }
                    },
                    name => {
                        if let Some(q) = self.child(candidate, name) {
                            push(Some(q));
                        }
                    }
                }
            }
            frontier = next;
        }
        frontier.into_iter().flatten().collect()
    }

    // ========================================================================
    // Persistence
    // ========================================================================

    /// Encode every entry, parents before children.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.write_entries(&mut buf)?;
        let crc = crc32fast::hash(&buf);
        buf.write_u32::<LittleEndian>(crc)?;
        Ok(buf)
    }

    fn write_entries(&self, buf: &mut Vec<u8>) -> std::io::Result<()> {
        buf.write_u32::<LittleEndian>(ATTRIBUTE_MAGIC)?;
        buf.write_u32::<LittleEndian>(self.entries.len() as u32)?;
        for entry in &self.entries {
            buf.write_u32::<LittleEndian>(entry.parent.map_or(NO_PARENT, Quark::as_u32))?;
            buf.write_u32::<LittleEndian>(entry.name.len() as u32)?;
            buf.extend_from_slice(entry.name.as_bytes());
        }
        Ok(())
    }

    /// Rebuild a tree from [`AttributeTree::serialize`] output.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let corrupt = |what: &str| Error::Corruption(format!("attribute tree: {}", what));
        if bytes.len() < 12 {
            return Err(corrupt("truncated"));
        }
        let (body, tail) = bytes.split_at(bytes.len() - 4);
        let stored = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        let computed = crc32fast::hash(body);
        if stored != computed {
            return Err(corrupt("checksum mismatch"));
        }

        let mut cur = Cursor::new(body);
        let eof = |_| corrupt("truncated");
        if cur.read_u32::<LittleEndian>().map_err(eof)? != ATTRIBUTE_MAGIC {
            return Err(corrupt("bad magic"));
        }
        let count = cur.read_u32::<LittleEndian>().map_err(eof)?;
        let mut tree = Self::new();
        for index in 0..count {
            let parent = match cur.read_u32::<LittleEndian>().map_err(eof)? {
                NO_PARENT => None,
                p if p < index => Some(Quark::new(p)),
                p => return Err(corrupt(&format!("entry {} has parent {}", index, p))),
            };
            let len = cur.read_u32::<LittleEndian>().map_err(eof)? as usize;
            if len > body.len() {
                return Err(corrupt("name length past end"));
            }
            let mut name = vec![0u8; len];
            cur.read_exact(&mut name).map_err(eof)?;
            let name = String::from_utf8(name).map_err(|_| corrupt("name is not UTF-8"))?;
            if tree.child(parent, &name).is_some() {
                return Err(corrupt(&format!("duplicate attribute {:?}", name)));
            }
            tree.add_entry(parent, &name)?;
        }
        Ok(tree)
    }
}
