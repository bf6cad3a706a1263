use super::{ensure_owned, Detector};
use crate::context::RunContext;
use crate::cv::SourceProfile;
use crate::error::DetectorError;
use crate::model::{DetectorId, FileStatus, Incident, ObservedFile, Severity};
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet};

/// Repeated delivery for one entity (or one file name) with failed or duplicate copies
pub struct DuplicatedFailedFileDetector;

enum GroupKey<'a> {
    Entity(&'a str),
    FileName(&'a str),
}

impl Detector for DuplicatedFailedFileDetector {
    fn id(&self) -> DetectorId {
        DetectorId::DuplicatedFailedFile
    }

    fn detect(
        &self,
        _ctx: &RunContext,
        profile: &SourceProfile,
        files: &[ObservedFile],
    ) -> Result<Vec<Incident>, DetectorError> {
        ensure_owned(profile, files)?;

        // Files with an entity group by entity; the rest group by name
        let mut groups: BTreeMap<String, (GroupKey<'_>, Vec<&ObservedFile>)> = BTreeMap::new();
        for f in files {
            let (label, key) = match &f.entity_id {
                Some(entity) => (format!("entity:{}", entity), GroupKey::Entity(entity)),
                None => (format!("file:{}", f.file_name), GroupKey::FileName(&f.file_name)),
            };
            groups.entry(label).or_insert_with(|| (key, Vec::new())).1.push(f);
        }

        let mut incidents = Vec::new();
        for (key, group) in groups.values() {
            if group.len() < 2 {
                continue;
            }
            let failed = group.iter().filter(|f| f.status == FileStatus::Failed).count();
            let duplicates = group.iter().filter(|f| f.status == FileStatus::Duplicate).count();
            let names: BTreeSet<&str> = group.iter().map(|f| f.file_name.as_str()).collect();
            let repeated_name = names.len() < group.len();
            if !group.iter().any(|f| f.status.is_flagged()) && !repeated_name {
                continue;
            }

            let subject = match key {
                GroupKey::Entity(entity) => format!("entity '{}'", entity),
                GroupKey::FileName(name) => format!("file '{}'", name),
            };
            let incident = Incident::new(
                DetectorId::DuplicatedFailedFile,
                &profile.source_id,
                Severity::NeedsAttention,
                format!(
                    "{} files received for {} ({} failed, {} marked duplicate).",
                    group.len(),
                    subject,
                    failed,
                    duplicates
                ),
                json!({
                    "files": names.iter().collect::<Vec<_>>(),
                    "count": group.len(),
                    "failed": failed,
                    "duplicates": duplicates,
                }),
                "Identify which copy is authoritative and re-process or discard the others.",
            );
            incidents.push(match key {
                GroupKey::Entity(entity) => incident.with_entity(entity),
                GroupKey::FileName(name) => incident.with_file(name),
            });
        }
        Ok(incidents)
    }
}
