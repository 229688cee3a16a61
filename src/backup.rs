//! JSON backup/restore documents and the CSV export.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use csv::Writer;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::app_response::AppResponse;
use crate::species_record::{normalize_family, SpeciesRecord};

pub const BACKUP_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupDocument {
    pub version: String,
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "especies")]
    pub species: Vec<SpeciesRecord>,
    #[serde(alias = "totalRegistros")]
    pub total_records: usize,
}

impl BackupDocument {
    pub fn from_records(records: &[SpeciesRecord]) -> Self {
        Self {
            version: BACKUP_FORMAT_VERSION.to_string(),
            timestamp: Utc::now(),
            species: records.to_vec(),
            total_records: records.len(),
        }
    }
}

pub fn create_backup(records: &[SpeciesRecord]) -> Result<String, AppResponse> {
    Ok(serde_json::to_string_pretty(&BackupDocument::from_records(records))?)
}

/// Extracts the record sequence from a backup document.
///
/// Only the top-level `species` array is required (`especies` in backups
/// from the earlier web app); `version`, `timestamp` and `totalRecords` are
/// informational. Families are normalized, and a document that repeats an id
/// is rejected whole.
pub fn parse_backup(json: &str) -> Result<Vec<SpeciesRecord>, AppResponse> {
    let document: JsonValue = serde_json::from_str(json)
        .map_err(|e| AppResponse::RestoreFormatError(format!("not valid JSON: {e}")))?;

    let species = ["species", "especies"]
        .iter()
        .find_map(|key| document.get(*key).filter(|value| value.is_array()));
    let Some(species) = species else {
        return Err(AppResponse::RestoreFormatError(
            "missing top-level `species` array".to_string(),
        ));
    };

    let mut records: Vec<SpeciesRecord> = serde_json::from_value(species.clone())
        .map_err(|e| AppResponse::RestoreFormatError(format!("malformed species entry: {e}")))?;

    let mut seen = HashSet::new();
    for record in records.iter_mut() {
        if let Some(id) = record.id {
            if !seen.insert(id) {
                return Err(AppResponse::RestoreFormatError(format!("id {id} appears more than once")));
            }
        }
        record.family = normalize_family(&record.family);
    }
    Ok(records)
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    popular_name: &'a str,
    scientific_name: &'a str,
    family: &'a str,
    site: &'a str,
    registered_on: &'a str,
    coordinates: String,
    notes: &'a str,
    photo_count: usize,
}

/// One row per record; photo payloads are replaced by their count.
pub fn export_csv(records: &[SpeciesRecord]) -> Result<String, AppResponse> {
    let mut writer = Writer::from_writer(Vec::new());

    for record in records {
        let coordinates = match &record.coordinates {
            Some(fix) => serde_json::to_string(fix)?,
            None => String::new(),
        };
        writer.serialize(CsvRow {
            popular_name: &record.popular_name,
            scientific_name: &record.scientific_name,
            family: record.effective_family(),
            site: &record.site,
            registered_on: &record.registered_on,
            coordinates,
            notes: &record.notes,
            photo_count: record.photos.len(),
        })?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| AppResponse::SerializationError(format!("CSV flush failed: {e}")))?;
    String::from_utf8(bytes).map_err(|e| AppResponse::SerializationError(format!("CSV is not UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::species_record::{Coordinates, UNCLASSIFIED_FAMILY};

    #[test]
    fn backup_round_trip_keeps_ids() {
        let mut ipe = SpeciesRecord::new("Ipê", "Handroanthus albus", "Bignoniaceae");
        ipe.id = Some(4);
        let mut jatoba = SpeciesRecord::new("Jatobá", "Hymenaea courbaril", "Fabaceae");
        jatoba.id = Some(9);
        let records = vec![ipe, jatoba];

        let json = create_backup(&records).unwrap();
        assert_eq!(parse_backup(&json).unwrap(), records);

        let document: JsonValue = serde_json::from_str(&json).unwrap();
        assert_eq!(document["version"], BACKUP_FORMAT_VERSION);
        assert_eq!(document["totalRecords"], 2);
    }

    #[test]
    fn rejects_documents_without_species_array() {
        for input in [r#"{"records":[]}"#, r#"{"species":{}}"#, "[1,2]", "not json"] {
            assert!(
                matches!(parse_backup(input), Err(AppResponse::RestoreFormatError(_))),
                "accepted {input}"
            );
        }
    }

    #[test]
    fn rejects_repeated_ids() {
        let json = r#"{"species":[{"id":1,"popularName":"Ipê"},{"id":1,"popularName":"Jatobá"}]}"#;
        let Err(AppResponse::RestoreFormatError(message)) = parse_backup(json) else {
            panic!("repeated id accepted");
        };
        assert!(message.contains("id 1"));
    }

    #[test]
    fn normalizes_families_and_reads_legacy_key() {
        let json = r#"{"version":"1.0","especies":[{"id":7,"nomePopular":"Aroeira","familia":""},{"popularName":"Pequi"}],"totalRegistros":2}"#;
        let records = parse_backup(json).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].popular_name, "Aroeira");
        assert!(records.iter().all(|r| r.family == UNCLASSIFIED_FAMILY));
    }

    #[test]
    fn csv_omits_photo_payloads() {
        let record = SpeciesRecord::new("Pitanga", "Eugenia uniflora", "Myrtaceae")
            .with_notes("fruto \"vermelho\", doce")
            .with_photos(vec!["data:image/jpeg;base64,SECRET".to_string()])
            .with_coordinates(Coordinates {
                latitude: -23.5,
                longitude: -46.6,
                accuracy_meters: 8.0,
                captured_at: Utc::now(),
            });

        let csv = export_csv(&[record]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(
            lines.next(),
            Some("popular_name,scientific_name,family,site,registered_on,coordinates,notes,photo_count")
        );
        assert!(!csv.contains("SECRET"));
        assert!(csv.contains("\"fruto \"\"vermelho\"\", doce\""));
        assert!(csv.trim_end().ends_with(",1"));
    }
}
