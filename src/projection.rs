//! In-memory working set that every read path uses.
//!
//! Records keep load/insertion order. All addressing is by [`RecordId`];
//! positions are never handed out.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::species_record::{RecordId, SpeciesRecord};

/// Text term plus the optional photo/GPS predicates, all ANDed together.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SearchQuery {
    pub text: String,
    pub require_photo: bool,
    #[serde(alias = "requireGPS")]
    pub require_gps: bool,
}

impl SearchQuery {
    pub fn text(text: &str) -> Self {
        Self {
            text: text.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordStats {
    pub total_records: usize,
    pub family_count: usize,
    pub with_photos: usize,
    pub with_gps: usize,
    /// `(family, count)` of the largest family; ties go to the first name in order.
    pub most_common_family: Option<(String, usize)>,
    pub total_photos: usize,
}

#[derive(Debug, Clone, Default)]
pub struct Projection {
    records: Vec<SpeciesRecord>,
}

impl Projection {
    pub fn new(records: Vec<SpeciesRecord>) -> Self {
        Self { records }
    }

    pub fn all(&self) -> &[SpeciesRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, id: RecordId) -> Option<&SpeciesRecord> {
        self.records.iter().find(|r| r.id == Some(id))
    }

    /// Exact family match, using the sentinel for unclassified records.
    pub fn by_family(&self, family: &str) -> Vec<SpeciesRecord> {
        let family = family.trim();
        self.records
            .iter()
            .filter(|r| r.effective_family() == family)
            .cloned()
            .collect()
    }

    pub fn search(&self, query: &SearchQuery) -> Vec<SpeciesRecord> {
        let term = query.text.trim().to_lowercase();
        self.records
            .iter()
            .filter(|r| r.matches_text(&term))
            .filter(|r| !query.require_photo || r.has_photos())
            .filter(|r| !query.require_gps || r.has_coordinates())
            .cloned()
            .collect()
    }

    pub fn group_by_family(&self) -> BTreeMap<String, Vec<SpeciesRecord>> {
        let mut groups: BTreeMap<String, Vec<SpeciesRecord>> = BTreeMap::new();
        for record in &self.records {
            groups
                .entry(record.effective_family().to_string())
                .or_default()
                .push(record.clone());
        }
        groups
    }

    /// Sorted family names containing `filter`, ignoring case.
    pub fn family_names(&self, filter: &str) -> Vec<String> {
        let filter = filter.trim().to_lowercase();
        self.group_by_family()
            .into_keys()
            .filter(|family| family.to_lowercase().contains(&filter))
            .collect()
    }

    pub fn stats(&self) -> RecordStats {
        let groups = self.group_by_family();
        let mut most_common: Option<(String, usize)> = None;
        for (family, members) in &groups {
            let larger = most_common.as_ref().map_or(true, |(_, count)| members.len() > *count);
            if larger {
                most_common = Some((family.clone(), members.len()));
            }
        }

        RecordStats {
            total_records: self.records.len(),
            family_count: groups.len(),
            with_photos: self.records.iter().filter(|r| r.has_photos()).count(),
            with_gps: self.records.iter().filter(|r| r.has_coordinates()).count(),
            most_common_family: most_common,
            total_photos: self.records.iter().map(|r| r.photos.len()).sum(),
        }
    }

    /// Replaces the record with the same id in place, or appends it.
    pub fn upsert(&mut self, record: SpeciesRecord) {
        let existing = record
            .id
            .and_then(|id| self.records.iter().position(|r| r.id == Some(id)));
        match existing {
            Some(at) => self.records[at] = record,
            None => self.records.push(record),
        }
    }

    pub fn remove(&mut self, id: RecordId) -> Option<SpeciesRecord> {
        let at = self.records.iter().position(|r| r.id == Some(id))?;
        Some(self.records.remove(at))
    }

    pub fn replace_all(&mut self, records: Vec<SpeciesRecord>) {
        self.records = records;
    }

    pub fn set_synced(&mut self, ids: &[RecordId]) {
        for record in self.records.iter_mut() {
            if record.id.is_some_and(|id| ids.contains(&id)) {
                record.synced = true;
            }
        }
    }
}
