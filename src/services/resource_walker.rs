//! Finds every image XObject a document can draw.
//!
//! Pages are visited in page order. For each page the (possibly inherited)
//! resource dictionary is walked, descending into form XObjects, tiling
//! patterns and annotation appearance streams, which all carry resources of
//! their own. An image object referenced from several places is reported
//! once, at the point it was first reached.

use std::collections::HashSet;

use lopdf::{Dictionary, Document, Object, ObjectId};
use tracing::{debug, warn};

/// Inherited `/Resources` are looked up at most this many levels up the
/// page tree.
const MAX_PARENT_DEPTH: usize = 64;

/// An image object found during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredImage {
    /// Zero-based position in discovery order.
    pub index: usize,
    pub id: ObjectId,
    /// One-based number of the page it was first reached from.
    pub page: u32,
    /// Resource name it was registered under, e.g. `Im0`.
    pub name: String,
}

/// Follows one level of indirection.
pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

fn resolve_dict<'a>(doc: &'a Document, obj: &'a Object) -> Option<&'a Dictionary> {
    match resolve(doc, obj) {
        Object::Dictionary(dict) => Some(dict),
        Object::Stream(stream) => Some(&stream.dict),
        _ => None,
    }
}

struct Walker<'a> {
    doc: &'a Document,
    seen_images: HashSet<ObjectId>,
    seen_containers: HashSet<ObjectId>,
    found: Vec<DiscoveredImage>,
}

pub fn discover_images(doc: &Document) -> Vec<DiscoveredImage> {
    let mut walker = Walker {
        doc,
        seen_images: HashSet::new(),
        seen_containers: HashSet::new(),
        found: Vec::new(),
    };

    for (page_number, page_id) in doc.get_pages() {
        let page = match doc.get_dictionary(page_id) {
            Ok(page) => page,
            Err(e) => {
                warn!(page = page_number, error = %e, "Skipping unreadable page object");
                continue;
            }
        };

        if let Some(resources) = walker.page_resources(page) {
            walker.walk_resources(resources, page_number);
        }
        walker.walk_annotations(page, page_number);
    }

    debug!(images = walker.found.len(), "Image discovery finished");
    walker.found
}

impl<'a> Walker<'a> {
    /// `/Resources` of the page, or of the nearest ancestor that has one.
    fn page_resources(&self, page: &'a Dictionary) -> Option<&'a Dictionary> {
        let mut node = page;
        for _ in 0..MAX_PARENT_DEPTH {
            if let Ok(resources) = node.get(b"Resources") {
                return resolve_dict(self.doc, resources);
            }
            node = node
                .get(b"Parent")
                .ok()
                .and_then(|parent| resolve_dict(self.doc, parent))?;
        }
        None
    }

    fn walk_resources(&mut self, resources: &'a Dictionary, page: u32) {
        if let Some(xobjects) = resources.get(b"XObject").ok().and_then(|x| resolve_dict(self.doc, x)) {
            for (name, entry) in xobjects.iter() {
                self.visit_xobject(name, entry, page);
            }
        }

        if let Some(patterns) = resources.get(b"Pattern").ok().and_then(|p| resolve_dict(self.doc, p)) {
            for (_, entry) in patterns.iter() {
                if let Object::Reference(id) = entry {
                    self.walk_container(*id, page);
                }
            }
        }
    }

    fn visit_xobject(&mut self, name: &[u8], entry: &Object, page: u32) {
        let id = match entry {
            Object::Reference(id) => *id,
            _ => {
                // streams are always indirect; anything else is malformed
                debug!(page, name = %String::from_utf8_lossy(name), "Ignoring direct XObject entry");
                return;
            }
        };

        let stream = match self.doc.get_object(id).and_then(Object::as_stream) {
            Ok(stream) => stream,
            Err(e) => {
                warn!(page, object_id = ?id, error = %e, "Skipping unreadable XObject");
                return;
            }
        };

        match stream.dict.get(b"Subtype").and_then(Object::as_name) {
            Ok(b"Image") => {
                if self.seen_images.insert(id) {
                    let index = self.found.len();
                    self.found.push(DiscoveredImage {
                        index,
                        id,
                        page,
                        name: String::from_utf8_lossy(name).into_owned(),
                    });
                }
            }
            Ok(b"Form") => self.walk_container(id, page),
            _ => {}
        }
    }

    /// Descends into a stream that carries its own `/Resources` (form
    /// XObject, tiling pattern, appearance stream). Each is walked once.
    fn walk_container(&mut self, id: ObjectId, page: u32) {
        if !self.seen_containers.insert(id) {
            return;
        }
        let doc = self.doc;
        let resources = doc
            .get_object(id)
            .ok()
            .and_then(|obj| resolve_dict(doc, obj))
            .and_then(|dict| dict.get(b"Resources").ok())
            .and_then(|res| resolve_dict(doc, res));
        if let Some(resources) = resources {
            self.walk_resources(resources, page);
        }
    }

    fn walk_annotations(&mut self, page: &'a Dictionary, page_number: u32) {
        let doc = self.doc;
        let annotations = match page.get(b"Annots").map(|a| resolve(doc, a)) {
            Ok(Object::Array(items)) => items,
            _ => return,
        };

        for annotation in annotations {
            let normal = resolve_dict(doc, annotation)
                .and_then(|annot| annot.get(b"AP").ok())
                .and_then(|ap| resolve_dict(doc, ap))
                .and_then(|ap| ap.get(b"N").ok());

            match normal {
                Some(Object::Reference(id)) => {
                    // Either an appearance stream or a dictionary of
                    // appearance states, each pointing at a stream.
                    match doc.get_object(*id) {
                        Ok(Object::Stream(_)) => self.walk_container(*id, page_number),
                        Ok(Object::Dictionary(states)) => {
                            for (_, state) in states.iter() {
                                if let Object::Reference(state_id) = state {
                                    self.walk_container(*state_id, page_number);
                                }
                            }
                        }
                        _ => {}
                    }
                }
                Some(Object::Dictionary(states)) => {
                    for (_, state) in states.iter() {
                        if let Object::Reference(state_id) = state {
                            self.walk_container(*state_id, page_number);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}
