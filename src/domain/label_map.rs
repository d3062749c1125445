// ============================================================
// Layer 3 — Label Map
// ============================================================
// Maps a lowercase filename substring to an integer class id.
//
// Built once from a string like:
//   "left=0,right=1,attack=2"
//
// Entry ORDER matters: when a filename contains several keys,
// the first entry in insertion order wins. That is why this is
// a Vec of pairs and not a HashMap.
//
//   {"left":0, "leftright":1} + "leftright_session.csv" → 0

use std::path::Path;

use crate::domain::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMap {
    entries: Vec<(String, usize)>,
}

impl LabelMap {
    /// Parse `name=class,name=class,...`.
    ///
    /// Blank entries are skipped, keys are trimmed and lowercased.
    /// A key repeated later keeps its first position but takes the
    /// later class id.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut entries: Vec<(String, usize)> = Vec::new();

        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }

            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| ConfigError::MalformedLabelEntry { entry: part.to_string() })?;

            let key = key.trim().to_lowercase();
            let class = value
                .trim()
                .parse::<usize>()
                .map_err(|e| ConfigError::InvalidClassId {
                    entry:  part.to_string(),
                    reason: e.to_string(),
                })?;

            match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = class,
                None           => entries.push((key, class)),
            }
        }

        if entries.is_empty() {
            return Err(ConfigError::EmptyLabelMap);
        }
        Ok(Self { entries })
    }

    /// Class of the first key contained in the file's lowercased base name.
    /// `None` means the file should be skipped.
    pub fn infer(&self, path: &Path) -> Option<usize> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();

        self.entries
            .iter()
            .find(|(key, _)| name.contains(key.as_str()))
            .map(|(_, class)| *class)
    }

    pub fn entries(&self) -> &[(String, usize)] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
