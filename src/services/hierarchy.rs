//! Projection of a flat listing onto one folder level.

use crate::models::{
    entry::{EMPTY_SEGMENT_NAME, EntryKind, ObjectEntry, Prefix, SortKey, SortOrder},
    object::StoreObject,
};
use std::{cmp::Ordering, collections::HashSet};

/// Immediate children of `prefix`: one entry per direct sub-folder and
/// one per direct file, folders first, sorted by name.
///
/// Keys outside `prefix` and the marker of `prefix` itself are ignored.
pub fn project(objects: &[StoreObject], prefix: &Prefix) -> Vec<ObjectEntry> {
    let mut seen_folders = HashSet::new();
    let mut entries = Vec::new();

    for object in objects {
        let Some(remainder) = object.key.strip_prefix(prefix.as_str()) else {
            continue;
        };
        if remainder.is_empty() {
            continue;
        }

        match remainder.split_once('/') {
            Some((segment, _)) => {
                let key = format!("{}{segment}/", prefix.as_str());
                if seen_folders.insert(key.clone()) {
                    let name = if segment.is_empty() {
                        EMPTY_SEGMENT_NAME.to_string()
                    } else {
                        segment.to_string()
                    };
                    entries.push(ObjectEntry::folder(key, name));
                }
            }
            None => entries.push(ObjectEntry::file(
                object.key.clone(),
                remainder.to_string(),
                object.size,
                object.last_modified,
            )),
        }
    }

    sort_entries(&mut entries, SortKey::Name, SortOrder::Asc);
    entries
}

/// Stable re-ordering of projected entries. Folders always precede files;
/// `order` only reverses the order within each kind.
pub fn sort_entries(entries: &mut [ObjectEntry], key: SortKey, order: SortOrder) {
    entries.sort_by(|a, b| {
        kind_rank(a.kind).cmp(&kind_rank(b.kind)).then_with(|| {
            let ordering = compare_by(a, b, key);
            match order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        })
    });
}

/// Every entry whose full key contains `query`, ignoring case.
///
/// Matches are returned as flat entries named by their full key.
pub fn search(objects: &[StoreObject], query: &str) -> Vec<ObjectEntry> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        return Vec::new();
    }

    let mut entries: Vec<ObjectEntry> = objects
        .iter()
        .filter(|object| object.key.to_lowercase().contains(&needle))
        .map(|object| match EntryKind::of_key(&object.key) {
            EntryKind::Folder => ObjectEntry::folder(object.key.clone(), object.key.clone()),
            EntryKind::File => ObjectEntry::file(
                object.key.clone(),
                object.key.clone(),
                object.size,
                object.last_modified,
            ),
        })
        .collect();
    sort_entries(&mut entries, SortKey::Name, SortOrder::Asc);
    entries
}

fn kind_rank(kind: EntryKind) -> u8 {
    match kind {
        EntryKind::Folder => 0,
        EntryKind::File => 1,
    }
}

fn compare_names(a: &ObjectEntry, b: &ObjectEntry) -> Ordering {
    a.name.to_lowercase().cmp(&b.name.to_lowercase())
}

fn compare_by(a: &ObjectEntry, b: &ObjectEntry, key: SortKey) -> Ordering {
    let primary = match key {
        SortKey::Name => Ordering::Equal,
        SortKey::Modified => a.last_modified.cmp(&b.last_modified),
        SortKey::Size => a.size.cmp(&b.size),
        SortKey::Extension => a.extension().cmp(&b.extension()),
    };
    primary.then_with(|| compare_names(a, b))
}
