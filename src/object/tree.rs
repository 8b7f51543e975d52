//! Path registry: exact exports, fallback exports and the child listing used
//! by introspection.

use std::collections::BTreeMap;

use tracing::debug;

use crate::protocol::{Error, ObjectPath, Result};

use super::exported::ExportedObject;

/// Where a lookup found its object.
pub(crate) struct Resolved {
    pub(crate) object: ExportedObject,
    pub(crate) fallback: bool,
}

/// Exported objects keyed by path.
#[derive(Default)]
pub(crate) struct ObjectTree {
    objects: BTreeMap<String, ExportedObject>,
    fallbacks: BTreeMap<String, ExportedObject>,
}

impl ObjectTree {
    pub(crate) fn insert(&mut self, path: &ObjectPath, object: ExportedObject) -> Result<()> {
        Self::insert_into(&mut self.objects, path, object)
    }

    pub(crate) fn insert_fallback(&mut self, path: &ObjectPath, object: ExportedObject) -> Result<()> {
        Self::insert_into(&mut self.fallbacks, path, object)
    }

    fn insert_into(map: &mut BTreeMap<String, ExportedObject>, path: &ObjectPath, object: ExportedObject) -> Result<()> {
        match map.get(path.as_str()) {
            Some(existing) if existing.is_alive() => {
                return Err(Error::Other(format!("an object is already exported at {path}")));
            }
            _ => {}
        }
        map.insert(path.as_str().to_owned(), object);
        Ok(())
    }

    /// Remove an exact export; `false` if none existed.
    pub(crate) fn remove(&mut self, path: &ObjectPath) -> bool {
        self.objects.remove(path.as_str()).is_some()
    }

    pub(crate) fn remove_fallback(&mut self, path: &ObjectPath) -> bool {
        self.fallbacks.remove(path.as_str()).is_some()
    }

    /// Exact match first, then the longest fallback prefix. Dead weak exports
    /// met on the way are evicted.
    pub(crate) fn lookup(&mut self, path: &ObjectPath) -> Option<Resolved> {
        if let Some(object) = Self::live(&mut self.objects, path.as_str()) {
            return Some(Resolved {
                object,
                fallback: false,
            });
        }
        let mut candidate = Some(path.clone());
        while let Some(current) = candidate {
            if let Some(object) = Self::live(&mut self.fallbacks, current.as_str()) {
                return Some(Resolved {
                    object,
                    fallback: true,
                });
            }
            candidate = current.parent();
        }
        None
    }

    fn live(map: &mut BTreeMap<String, ExportedObject>, key: &str) -> Option<ExportedObject> {
        let object = map.get(key)?;
        if object.is_alive() {
            return Some(ExportedObject::clone(object));
        }
        debug!(path = key, "evicting dropped weak export");
        map.remove(key);
        None
    }

    /// Names of the direct children of `path` that lead to some export.
    pub(crate) fn children(&self, path: &ObjectPath) -> Vec<String> {
        let prefix = if path.is_root() {
            "/".to_owned()
        } else {
            format!("{path}/")
        };
        let mut names: Vec<String> = self
            .objects
            .range(prefix.clone()..)
            .chain(self.fallbacks.range(prefix.clone()..))
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(&prefix))
            .filter_map(|key| key[prefix.len()..].split('/').next())
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .collect();
        names.sort();
        names.dedup();
        names
    }

    /// Whether `path` is exported or has exported descendants.
    pub(crate) fn is_known(&mut self, path: &ObjectPath) -> bool {
        self.lookup(path).is_some() || !self.children(path).is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.objects.clear();
        self.fallbacks.clear();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::object::exported::erase;
    use crate::object::Interface;

    struct Leaf;

    fn object(weak_anchor: &Arc<Leaf>, weak: bool) -> ExportedObject {
        let iface = Interface::<Leaf>::new("org.example.Leaf").unwrap();
        erase(weak_anchor, vec![iface], weak).unwrap()
    }

    fn path(p: &str) -> ObjectPath {
        ObjectPath::new(p).unwrap()
    }

    #[test]
    fn duplicate_export_fails_until_removed() {
        let leaf = Arc::new(Leaf);
        let mut tree = ObjectTree::default();
        tree.insert(&path("/a"), object(&leaf, false)).unwrap();
        assert!(tree.insert(&path("/a"), object(&leaf, false)).is_err());
        assert!(tree.remove(&path("/a")));
        assert!(!tree.remove(&path("/a")));
        tree.insert(&path("/a"), object(&leaf, false)).unwrap();
    }

    #[test]
    fn fallback_uses_longest_prefix() {
        let leaf = Arc::new(Leaf);
        let mut tree = ObjectTree::default();
        tree.insert_fallback(&path("/a"), object(&leaf, false)).unwrap();
        tree.insert_fallback(&path("/a/b"), object(&leaf, false)).unwrap();
        tree.insert(&path("/a/b/c"), object(&leaf, false)).unwrap();

        assert!(!tree.lookup(&path("/a/b/c")).unwrap().fallback);
        assert!(tree.lookup(&path("/a/b/x/y")).unwrap().fallback);
        assert!(tree.lookup(&path("/a/z")).is_some());
        assert!(tree.lookup(&path("/q")).is_none());
    }

    #[test]
    fn children_list_direct_segments() {
        let leaf = Arc::new(Leaf);
        let mut tree = ObjectTree::default();
        for p in ["/org/example/One", "/org/example/Two/deep", "/org/other", "/orgx"] {
            tree.insert(&path(p), object(&leaf, false)).unwrap();
        }
        assert_eq!(tree.children(&path("/")), ["org", "orgx"]);
        assert_eq!(tree.children(&path("/org")), ["example", "other"]);
        assert_eq!(tree.children(&path("/org/example")), ["One", "Two"]);
        assert!(tree.is_known(&path("/org/example/Two")));
        assert!(!tree.is_known(&path("/nothing")));
    }

    #[test]
    fn dead_weak_exports_are_evicted() {
        let leaf = Arc::new(Leaf);
        let mut tree = ObjectTree::default();
        tree.insert(&path("/w"), object(&leaf, true)).unwrap();
        assert!(tree.lookup(&path("/w")).is_some());
        drop(leaf);
        assert!(tree.lookup(&path("/w")).is_none());
        let other = Arc::new(Leaf);
        tree.insert(&path("/w"), object(&other, true)).unwrap();
    }
}
