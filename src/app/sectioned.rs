// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

//! Container for backup payloads: named byte-blob sections plus a `meta`
//! descriptor, written last. On disk this is a zstd-compressed tar archive;
//! section payloads are serde documents keyed by their JSON field names.

use std::io::Read;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::app::errors::{JobError, JobResult};

pub const FORMAT_NAME: &str = "backup";
pub const FORMAT_TYPE: &str = "server";
pub const FORMAT_VERSION: &str = "a1";
pub const PROTOCOL: &str = "sectioned/1";

pub const META_SECTION: &str = "meta";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Meta {
    pub name: String,
    pub format: String,
    pub version: String,
    pub protocol: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub operation_mode: String,
}

impl Meta {
    pub fn server_backup(created_at: OffsetDateTime, operation_mode: &str) -> Self {
        Meta {
            name: FORMAT_NAME.to_string(),
            format: FORMAT_TYPE.to_string(),
            version: FORMAT_VERSION.to_string(),
            protocol: PROTOCOL.to_string(),
            created_at,
            operation_mode: operation_mode.to_string(),
        }
    }
}

pub struct SectionedFileWriter {
    builder: tar::Builder<zstd::stream::write::Encoder<'static, Vec<u8>>>,
}

impl SectionedFileWriter {
    pub fn new() -> JobResult<Self> {
        let encoder = zstd::stream::write::Encoder::new(Vec::new(), 0)
            .map_err(|err| JobError::internal(format!("failed to create encoder: {err}")))?;
        Ok(SectionedFileWriter {
            builder: tar::Builder::new(encoder),
        })
    }

    pub fn write_section(&mut self, name: &str, data: &[u8]) -> JobResult<()> {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        self.builder
            .append_data(&mut header, name, data)
            .map_err(|err| JobError::internal(format!("failed to write section {name}: {err}")))
    }

    pub fn write_json_section<T: Serialize>(&mut self, name: &str, value: &T) -> JobResult<()> {
        let encoded = serde_json::to_vec(value)
            .map_err(|err| JobError::internal(format!("failed to encode section {name}: {err}")))?;
        self.write_section(name, &encoded)
    }

    /// Writes `meta` as the final section and returns the finished container.
    pub fn finish(mut self, meta: &Meta) -> JobResult<Vec<u8>> {
        self.write_json_section(META_SECTION, meta)?;
        let encoder = self
            .builder
            .into_inner()
            .map_err(|err| JobError::internal(format!("failed to finish archive: {err}")))?;
        encoder
            .finish()
            .map_err(|err| JobError::internal(format!("failed to finish compression: {err}")))
    }
}

pub struct SectionedFile {
    sections: Vec<(String, Vec<u8>)>,
}

impl SectionedFile {
    pub fn open(data: &[u8]) -> JobResult<Self> {
        let decoder = zstd::stream::read::Decoder::new(data)
            .map_err(|err| JobError::format(format!("not a valid container: {err}")))?;
        let mut archive = tar::Archive::new(decoder);
        let mut sections = Vec::new();

        let entries = archive
            .entries()
            .map_err(|err| JobError::format(format!("unreadable container: {err}")))?;
        for entry in entries {
            let mut entry =
                entry.map_err(|err| JobError::format(format!("unreadable section: {err}")))?;
            let name = entry
                .path()
                .map_err(|err| JobError::format(format!("bad section name: {err}")))?
                .to_string_lossy()
                .into_owned();
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut buf)
                .map_err(|err| JobError::format(format!("truncated section {name}: {err}")))?;
            sections.push((name, buf));
        }

        if sections.is_empty() {
            return Err(JobError::format("container has no sections"));
        }

        Ok(SectionedFile { sections })
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, data)| data.as_slice())
    }

    pub fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn section_names(&self) -> impl Iterator<Item = &str> {
        self.sections.iter().map(|(name, _)| name.as_str())
    }

    pub fn read_json_section<T: DeserializeOwned>(&self, name: &str) -> JobResult<T> {
        let data = self
            .get(name)
            .ok_or_else(|| JobError::format(format!("missing section {name}")))?;
        serde_json::from_slice(data)
            .map_err(|err| JobError::format(format!("failed to decode section {name}: {err}")))
    }

    pub fn meta(&self) -> JobResult<Meta> {
        self.read_json_section(META_SECTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn meta() -> Meta {
        Meta::server_backup(datetime!(2026-01-02 03:04:05 UTC), "jobs")
    }

    #[test]
    fn sections_round_trip_in_order() {
        let mut writer = SectionedFileWriter::new().unwrap();
        writer.write_section("backup_opts", b"{}").unwrap();
        writer.write_section("core/guild", b"guild-bytes").unwrap();
        writer.write_section("messages/123", b"msgs").unwrap();
        let data = writer.finish(&meta()).unwrap();

        let file = SectionedFile::open(&data).unwrap();
        let names: Vec<&str> = file.section_names().collect();
        assert_eq!(
            names,
            vec!["backup_opts", "core/guild", "messages/123", "meta"]
        );
        assert_eq!(file.get("core/guild"), Some(&b"guild-bytes"[..]));
        assert!(file.has("messages/123"));
        assert!(!file.has("messages/456"));
    }

    #[test]
    fn meta_is_written_last_and_decodes() {
        let mut writer = SectionedFileWriter::new().unwrap();
        writer.write_section("core/guild", b"x").unwrap();
        let data = writer.finish(&meta()).unwrap();

        let file = SectionedFile::open(&data).unwrap();
        assert_eq!(file.section_names().last(), Some(META_SECTION));
        let decoded = file.meta().unwrap();
        assert_eq!(decoded, meta());
        assert_eq!(decoded.name, FORMAT_NAME);
        assert_eq!(decoded.version, FORMAT_VERSION);
    }

    #[test]
    fn json_sections_round_trip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Probe {
            label: String,
            count: u32,
        }

        let probe = Probe {
            label: "hello".into(),
            count: 7,
        };
        let mut writer = SectionedFileWriter::new().unwrap();
        writer.write_json_section("probe", &probe).unwrap();
        let data = writer.finish(&meta()).unwrap();

        let file = SectionedFile::open(&data).unwrap();
        assert_eq!(file.read_json_section::<Probe>("probe").unwrap(), probe);
    }

    #[test]
    fn garbage_input_is_a_format_error() {
        let err = SectionedFile::open(b"not a container").unwrap_err();
        assert!(matches!(err, JobError::Format(_)));
    }

    #[test]
    fn missing_section_is_a_format_error() {
        let writer = SectionedFileWriter::new().unwrap();
        let data = writer.finish(&meta()).unwrap();
        let file = SectionedFile::open(&data).unwrap();
        let err = file.read_json_section::<Meta>("absent").unwrap_err();
        assert!(err.to_string().contains("missing section"));
    }
}
