//! Data model definitions for species records.
//!
//! This module defines [`SpeciesRecord`], the unit stored by both backends,
//! and [`Coordinates`], the GPS fix attached by the geolocation collaborator.
//! Records travel as camelCase JSON so the UI layer can hand them over
//! unchanged through the FFI surface.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Label used for records saved without a family.
pub const UNCLASSIFIED_FAMILY: &str = "Unclassified";

/// Maximum number of photo payloads attached to a single record.
pub const MAX_PHOTOS: usize = 5;

/// Identity assigned by a backend on first persist.
pub type RecordId = u64;

/// A GPS fix. Either the whole struct is present on a record or none of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(alias = "accuracy")]
    pub accuracy_meters: f64,
    #[serde(alias = "timestamp")]
    pub captured_at: DateTime<Utc>,
}

/// One observed species entry.
///
/// # Identity
///
/// `id` is `None` until a backend persists the record for the first time.
/// The core decides between insert and replace purely on that field, so
/// callers editing an existing record must keep the `id` they were given.
///
/// # Examples
///
/// ```rust
/// use leaftag_core::species_record::{SpeciesRecord, UNCLASSIFIED_FAMILY};
///
/// let record = SpeciesRecord::new("Ipê", "Handroanthus albus", "  ");
/// assert!(record.id.is_none());
/// assert_eq!(record.family, UNCLASSIFIED_FAMILY);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpeciesRecord {
    #[serde(default)]
    pub id: Option<RecordId>,
    #[serde(default, alias = "nomePopular")]
    pub popular_name: String,
    #[serde(default, alias = "nomeCientifico")]
    pub scientific_name: String,
    #[serde(default, alias = "familia")]
    pub family: String,
    #[serde(default, alias = "local")]
    pub site: String,
    #[serde(default, alias = "notas")]
    pub notes: String,
    /// Human-readable `dd/mm/yyyy` registration date. Set once at creation.
    #[serde(default, alias = "dataRegistro")]
    pub registered_on: String,
    #[serde(default, alias = "fotos")]
    pub photos: Vec<String>,
    #[serde(default, alias = "coordenadas")]
    pub coordinates: Option<Coordinates>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub synced: bool,
}

impl SpeciesRecord {
    /// Builds an unsaved record stamped with today's registration date.
    pub fn new(popular_name: &str, scientific_name: &str, family: &str) -> Self {
        let now = Utc::now();
        Self {
            id: None,
            popular_name: popular_name.trim().to_string(),
            scientific_name: scientific_name.trim().to_string(),
            family: normalize_family(family),
            site: String::new(),
            notes: String::new(),
            registered_on: registration_date(now),
            photos: Vec::new(),
            coordinates: None,
            created_at: None,
            updated_at: None,
            synced: false,
        }
    }

    pub fn with_site(mut self, site: &str) -> Self {
        self.site = site.trim().to_string();
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = notes.trim().to_string();
        self
    }

    pub fn with_photos(mut self, photos: Vec<String>) -> Self {
        self.photos = photos;
        self
    }

    pub fn with_coordinates(mut self, coordinates: Coordinates) -> Self {
        self.coordinates = Some(coordinates);
        self
    }

    /// Family used for grouping; legacy data may still carry an empty one.
    pub fn effective_family(&self) -> &str {
        let family = self.family.trim();
        if family.is_empty() {
            UNCLASSIFIED_FAMILY
        } else {
            family
        }
    }

    pub fn has_photos(&self) -> bool {
        !self.photos.is_empty()
    }

    pub fn has_coordinates(&self) -> bool {
        self.coordinates.is_some()
    }

    /// Applies the bookkeeping every persist performs.
    ///
    /// `created_at` and `registered_on` are only filled when missing;
    /// `updated_at` is always refreshed and `synced` always reset.
    pub fn stamp_for_persist(&mut self, now: DateTime<Utc>) {
        self.family = normalize_family(&self.family);
        if self.created_at.is_none() {
            self.created_at = Some(now);
        }
        if self.registered_on.is_empty() {
            self.registered_on = registration_date(now);
        }
        self.updated_at = Some(now);
        self.synced = false;
    }

    /// Rejects records that break the photo cap.
    pub fn validate(&self) -> Result<(), String> {
        if self.photos.len() > MAX_PHOTOS {
            return Err(format!(
                "A record holds at most {MAX_PHOTOS} photos, got {}",
                self.photos.len()
            ));
        }
        Ok(())
    }

    /// Case-insensitive containment over every searchable text field.
    pub fn matches_text(&self, lowered_term: &str) -> bool {
        if lowered_term.is_empty() {
            return true;
        }
        [
            self.popular_name.as_str(),
            self.scientific_name.as_str(),
            self.effective_family(),
            self.site.as_str(),
            self.notes.as_str(),
        ]
        .iter()
        .any(|field| field.to_lowercase().contains(lowered_term))
    }
}

/// Trims the family and substitutes [`UNCLASSIFIED_FAMILY`] when empty.
pub fn normalize_family(family: &str) -> String {
    let trimmed = family.trim();
    if trimmed.is_empty() {
        UNCLASSIFIED_FAMILY.to_string()
    } else {
        trimmed.to_string()
    }
}

pub fn registration_date(now: DateTime<Utc>) -> String {
    now.format("%d/%m/%Y").to_string()
}
