//! Bounded, lazily-loaded shared-string table

use crate::error::{EngineError, Result};
use quick_xml::events::Event;
use std::collections::BTreeMap;
use std::io::BufRead;

#[derive(Debug)]
struct Entry {
    text: String,
    last_access: u64,
}

/// Pull-on-demand cache over `xl/sharedStrings.xml`.
///
/// The loader is a single-pass event reader: asking for index *i* advances it
/// until entry *i* has been decoded, caching entries along the way. The cache
/// retains at most `capacity` entries; once full it evicts the least-recently
/// accessed entry that the loader has already passed, so anything the current
/// row references stays resolvable. Indices must therefore be consumed in
/// non-decreasing order for guaranteed hits; rewinding is best-effort.
pub struct SharedStringCache<R: BufRead> {
    reader: Option<quick_xml::Reader<R>>,
    declared_count: usize,
    capacity: usize,
    /// Next entry index the loader will decode
    loader_pos: usize,
    resident: BTreeMap<usize, Entry>,
    tick: u64,
    buf: Vec<u8>,
}

impl<R: BufRead> SharedStringCache<R> {
    /// Wrap a reader positioned at the start of the shared-strings part.
    ///
    /// Consumes events up to the `<sst>` root to learn the declared entry
    /// count (`uniqueCount`, falling back to `count`).
    pub fn new(source: R, capacity: usize) -> Result<Self> {
        let mut reader = quick_xml::Reader::from_reader(source);
        reader.config_mut().trim_text(false);

        let mut declared_count = 0usize;
        let mut buf = Vec::with_capacity(1024);
        loop {
            match reader
                .read_event_into(&mut buf)
                .map_err(|e| EngineError::XmlMalformed(format!("sharedStrings: {}", e)))?
            {
                Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == b"sst" => {
                    let mut count_attr = None;
                    let mut unique_attr = None;
                    for attr in e.attributes() {
                        let attr = attr.map_err(|e| {
                            EngineError::XmlMalformed(format!("sharedStrings: {}", e))
                        })?;
                        let value = attr
                            .unescape_value()
                            .map_err(|e| {
                                EngineError::XmlMalformed(format!("sharedStrings: {}", e))
                            })?
                            .into_owned();
                        match attr.key.as_ref() {
                            b"count" => count_attr = value.parse().ok(),
                            b"uniqueCount" => unique_attr = value.parse().ok(),
                            _ => {}
                        }
                    }
                    declared_count = unique_attr.or(count_attr).unwrap_or(0);
                    break;
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        Ok(SharedStringCache {
            reader: Some(reader),
            declared_count,
            capacity: capacity.max(1),
            loader_pos: 0,
            resident: BTreeMap::new(),
            tick: 0,
            buf,
        })
    }

    /// Declared number of entries (0 when the part omitted its counts)
    pub fn declared_count(&self) -> usize {
        self.declared_count
    }

    /// Entries currently resident in the cache
    pub fn resident_len(&self) -> usize {
        self.resident.len()
    }

    /// Resolve entry *i*.
    ///
    /// `Ok(Some(text))` on a hit (possibly after advancing the loader),
    /// `Ok(None)` when the entry was evicted and cannot be re-read (the
    /// single-pass loader cannot rewind), and an error when *i* is outside
    /// the declared count or the part is malformed. May block on I/O.
    pub fn get(&mut self, index: usize) -> Result<Option<String>> {
        if self.declared_count > 0 && index >= self.declared_count {
            return Err(EngineError::SharedStringMissing {
                index,
                count: self.declared_count,
            });
        }

        if let Some(entry) = self.resident.get_mut(&index) {
            self.tick += 1;
            entry.last_access = self.tick;
            return Ok(Some(entry.text.clone()));
        }

        if index < self.loader_pos {
            // Already decoded and since evicted
            return Ok(None);
        }

        while self.loader_pos <= index {
            match self.decode_next_entry()? {
                Some(text) => {
                    let decoded_index = self.loader_pos;
                    self.loader_pos += 1;
                    self.tick += 1;
                    self.resident.insert(
                        decoded_index,
                        Entry {
                            text,
                            last_access: self.tick,
                        },
                    );
                    self.evict_over_capacity();
                }
                None => {
                    // Stream ended before the requested entry
                    return Err(EngineError::SharedStringMissing {
                        index,
                        count: self.loader_pos,
                    });
                }
            }
        }

        Ok(self.resident.get(&index).map(|e| e.text.clone()))
    }

    /// Evict half of the resident entries, oldest-access first. Used by the
    /// governor's reclamation pass.
    pub fn evict_half(&mut self) {
        let target = self.resident.len() / 2;
        while self.resident.len() > target {
            if !self.evict_one() {
                break;
            }
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.resident.len() > self.capacity {
            if !self.evict_one() {
                break;
            }
        }
    }

    /// Drop the least-recently-accessed entry strictly below the loader
    /// position; entries at the frontier may still be referenced
    fn evict_one(&mut self) -> bool {
        let victim = self
            .resident
            .iter()
            .filter(|(&idx, _)| idx + 1 < self.loader_pos)
            .min_by_key(|(_, entry)| entry.last_access)
            .map(|(&idx, _)| idx);
        match victim {
            Some(idx) => {
                self.resident.remove(&idx);
                true
            }
            None => false,
        }
    }

    /// Decode the next `<si>` entry: plain `<t>` plus rich-text `<r><t>` runs
    /// concatenate; phonetic runs are skipped
    fn decode_next_entry(&mut self) -> Result<Option<String>> {
        let Some(reader) = self.reader.as_mut() else {
            return Ok(None);
        };

        let mut text: Option<String> = None;
        let mut in_si = false;
        let mut in_t = false;
        let mut phonetic_depth = 0usize;

        loop {
            self.buf.clear();
            match reader
                .read_event_into(&mut self.buf)
                .map_err(|e| EngineError::XmlMalformed(format!("sharedStrings: {}", e)))?
            {
                Event::Start(ref e) => {
                    if phonetic_depth > 0 {
                        phonetic_depth += 1;
                    } else {
                        match e.local_name().as_ref() {
                            b"si" => {
                                in_si = true;
                                text = Some(String::new());
                            }
                            b"t" if in_si => in_t = true,
                            b"rPh" | b"phoneticPr" if in_si => phonetic_depth = 1,
                            _ => {}
                        }
                    }
                }
                Event::Empty(ref e) => {
                    if phonetic_depth == 0 && e.local_name().as_ref() == b"si" {
                        return Ok(Some(String::new()));
                    }
                }
                Event::Text(t) if in_t && phonetic_depth == 0 => {
                    let piece = t
                        .unescape()
                        .map_err(|e| EngineError::XmlMalformed(format!("sharedStrings: {}", e)))?;
                    if let Some(acc) = text.as_mut() {
                        acc.push_str(&piece);
                    }
                }
                Event::End(ref e) => {
                    if phonetic_depth > 0 {
                        phonetic_depth -= 1;
                    } else {
                        match e.local_name().as_ref() {
                            b"t" => in_t = false,
                            b"si" => return Ok(text),
                            b"sst" => {
                                self.reader = None;
                                return Ok(None);
                            }
                            _ => {}
                        }
                    }
                }
                Event::Eof => {
                    self.reader = None;
                    return Ok(None);
                }
                _ => {}
            }
        }
    }
}
