//! Built-in local resource kinds
//!
//! - `archive_file`: packages `source_dir` or `source_file` into a zip at
//!   `output_path`, exposing `output_hash` (BLAKE3 of the archive bytes)
//!   and `output_size`; the archive reads as gone once its sources change
//! - `random_id`: random bytes rendered as hex, stable across applies and
//!   regenerated only when `byte_length` or `keepers` change
//!
//! Both are served by [`LocalProvider`], which touches only the local
//! filesystem relative to the document directory.

use crate::document::Attributes;
use crate::error::ProviderError;
use crate::provider::{Provider, ProviderResponse};
use crate::schema::{AttributeSchema, AttributeType, ResourceSchema};
use crate::state::ResourceRecord;
use serde_json::{Value, json};
use std::fs;
use std::io::{self, Cursor, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const ARCHIVE_FILE: &str = "archive_file";
pub const RANDOM_ID: &str = "random_id";

/// Bytes of a v4 UUID carrying neither version nor variant bits
const UUID_RANDOM_BYTES: [usize; 14] = [0, 1, 2, 3, 4, 5, 7, 9, 10, 11, 12, 13, 14, 15];

/// Schemas of the built-in kinds.
pub fn schemas() -> Vec<ResourceSchema> {
    let input = |ty| AttributeSchema::new(ty).force_new();
    vec![
        ResourceSchema::new(ARCHIVE_FILE)
            .attribute(
                "type",
                input(AttributeType::String).allowed([json!("zip")]),
            )
            .attribute("source_dir", input(AttributeType::String))
            .attribute("source_file", input(AttributeType::String))
            .attribute("source_hash", input(AttributeType::String))
            .attribute("output_path", input(AttributeType::String).required())
            .attribute(
                "output_hash",
                AttributeSchema::new(AttributeType::String).computed(),
            )
            .attribute(
                "output_size",
                AttributeSchema::new(AttributeType::Number).computed(),
            )
            .attribute(
                "source_content_hash",
                AttributeSchema::new(AttributeType::String).computed(),
            ),
        ResourceSchema::new(RANDOM_ID)
            .attribute("byte_length", input(AttributeType::Number).required())
            .attribute("prefix", AttributeSchema::new(AttributeType::String))
            .attribute(
                "keepers",
                input(AttributeType::Map).element(AttributeType::String),
            )
            .attribute("hex", AttributeSchema::new(AttributeType::String).computed()),
    ]
}

/// Content hash of a file, or of a directory tree.
///
/// Directories hash every regular file's relative path and contents in
/// sorted order, so the result is independent of traversal order and
/// modification times.
pub fn content_hash(path: &Path) -> io::Result<String> {
    let meta = fs::metadata(path)?;
    if meta.is_file() {
        return Ok(blake3::hash(&fs::read(path)?).to_hex().to_string());
    }

    let mut hasher = blake3::Hasher::new();
    for (relative, full) in collect_files(path)? {
        hasher.update(relative.as_bytes());
        hasher.update(&[0]);
        hasher.update(&fs::read(&full)?);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Regular files below `root` as (relative path with `/` separators, full path), sorted.
fn collect_files(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry
            .path()
            .strip_prefix(root)
            .map_err(io::Error::other)?
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        files.push((relative, entry.path().to_path_buf()));
    }
    Ok(files)
}

/// Build a deterministic zip archive: sorted entries, fixed timestamps.
fn build_zip(files: &[(String, PathBuf)]) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buffer));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated)
            .last_modified_time(zip::DateTime::default())
            .unix_permissions(0o644);
        for (name, full) in files {
            zip.start_file(name.as_str(), options).map_err(io::Error::other)?;
            zip.write_all(&fs::read(full)?)?;
        }
        zip.finish().map_err(io::Error::other)?;
    }
    Ok(buffer)
}

fn string_attr<'a>(attributes: &'a Attributes, name: &str) -> Option<&'a str> {
    attributes.get(name).and_then(Value::as_str)
}

fn rejected(kind: &str, e: impl std::fmt::Display) -> ProviderError {
    ProviderError::rejected(format!("{kind}: {e}"))
}

/// Provider for the `archive` and `random` prefixes.
#[derive(Debug, Clone)]
pub struct LocalProvider {
    base_dir: PathBuf,
}

impl LocalProvider {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// The single `source_dir` or `source_file` of an archive, resolved.
    fn archive_source(&self, attributes: &Attributes) -> Result<(PathBuf, bool), ProviderError> {
        match (
            string_attr(attributes, "source_dir"),
            string_attr(attributes, "source_file"),
        ) {
            (Some(dir), None) => Ok((self.resolve(dir), true)),
            (None, Some(file)) => Ok((self.resolve(file), false)),
            _ => Err(rejected(
                ARCHIVE_FILE,
                "exactly one of source_dir or source_file must be set",
            )),
        }
    }

    fn create_archive(&self, attributes: &Attributes) -> Result<ProviderResponse, ProviderError> {
        let output = string_attr(attributes, "output_path")
            .ok_or_else(|| rejected(ARCHIVE_FILE, "output_path is required"))?;
        let output = self.resolve(output);

        let (source, is_dir) = self.archive_source(attributes)?;
        let files = if is_dir {
            collect_files(&source).map_err(|e| rejected(ARCHIVE_FILE, e))?
        } else {
            let name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| rejected(ARCHIVE_FILE, "source_file has no file name"))?;
            vec![(name, source.clone())]
        };
        let source_hash = content_hash(&source).map_err(|e| rejected(ARCHIVE_FILE, e))?;

        let bytes = build_zip(&files).map_err(|e| rejected(ARCHIVE_FILE, e))?;
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent).map_err(|e| rejected(ARCHIVE_FILE, e))?;
        }
        fs::write(&output, &bytes).map_err(|e| rejected(ARCHIVE_FILE, e))?;

        let hash = blake3::hash(&bytes).to_hex().to_string();
        log::debug!(
            "Wrote archive {} ({} files, {} bytes)",
            output.display(),
            files.len(),
            bytes.len()
        );

        let mut computed = Attributes::new();
        computed.insert("output_hash".into(), json!(hash));
        computed.insert("output_size".into(), json!(bytes.len()));
        computed.insert("source_content_hash".into(), json!(source_hash));
        Ok(ProviderResponse { id: hash, computed })
    }

    /// The archive on disk, provided it still packages the current sources.
    fn read_archive(&self, prior: &ResourceRecord) -> Option<Attributes> {
        let output = string_attr(&prior.attributes, "output_path")?;
        let bytes = fs::read(self.resolve(output)).ok()?;
        let hash = blake3::hash(&bytes).to_hex().to_string();
        if string_attr(&prior.computed, "output_hash") != Some(hash.as_str()) {
            return None;
        }

        if let Some(recorded) = string_attr(&prior.computed, "source_content_hash") {
            let (source, _) = self.archive_source(&prior.attributes).ok()?;
            let current = content_hash(&source).ok()?;
            if current != recorded {
                log::info!("Sources of {} changed since it was packaged", prior.address());
                return None;
            }
        }
        Some(prior.attributes.clone())
    }

    fn random_response(attributes: &Attributes, hex: String) -> ProviderResponse {
        let prefix = string_attr(attributes, "prefix").unwrap_or_default();
        let mut computed = Attributes::new();
        computed.insert("hex".into(), json!(hex));
        ProviderResponse {
            id: format!("{prefix}{hex}"),
            computed,
        }
    }

    fn create_random(attributes: &Attributes) -> Result<ProviderResponse, ProviderError> {
        let length = attributes
            .get("byte_length")
            .and_then(Value::as_u64)
            .filter(|n| (1..=64).contains(n))
            .ok_or_else(|| rejected(RANDOM_ID, "byte_length must be between 1 and 64"))?;
        let length = length as usize;

        let mut bytes = Vec::with_capacity(length + UUID_RANDOM_BYTES.len());
        while bytes.len() < length {
            let uuid = uuid::Uuid::new_v4();
            let raw = uuid.as_bytes();
            bytes.extend(UUID_RANDOM_BYTES.iter().map(|&i| raw[i]));
        }
        bytes.truncate(length);

        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        Ok(Self::random_response(attributes, hex))
    }
}

impl Provider for LocalProvider {
    fn name(&self) -> &str {
        "local"
    }

    fn create(
        &self,
        kind: &str,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        match kind {
            ARCHIVE_FILE => self.create_archive(attributes),
            RANDOM_ID => Self::create_random(attributes),
            other => Err(ProviderError::rejected(format!(
                "local provider does not manage '{other}'"
            ))),
        }
    }

    fn update(
        &self,
        prior: &ResourceRecord,
        attributes: &Attributes,
    ) -> Result<ProviderResponse, ProviderError> {
        match prior.kind.as_str() {
            RANDOM_ID => {
                let hex = string_attr(&prior.computed, "hex")
                    .ok_or_else(|| rejected(RANDOM_ID, "prior state has no hex value"))?;
                Ok(Self::random_response(attributes, hex.to_string()))
            }
            kind => self.create(kind, attributes),
        }
    }

    fn delete(&self, prior: &ResourceRecord) -> Result<(), ProviderError> {
        if prior.kind != ARCHIVE_FILE {
            return Ok(());
        }
        let Some(output) = string_attr(&prior.attributes, "output_path") else {
            return Ok(());
        };
        match fs::remove_file(self.resolve(output)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(rejected(ARCHIVE_FILE, e)),
        }
    }

    fn read(&self, prior: &ResourceRecord) -> Result<Option<Attributes>, ProviderError> {
        match prior.kind.as_str() {
            ARCHIVE_FILE => Ok(self.read_archive(prior)),
            _ => Ok(Some(prior.attributes.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::ResourceStatus;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn record(kind: &str, response: &ProviderResponse, attributes: Attributes) -> ResourceRecord {
        ResourceRecord {
            kind: kind.into(),
            name: "test".into(),
            id: response.id.clone(),
            attributes,
            computed: response.computed.clone(),
            dependencies: Vec::new(),
            status: ResourceStatus::Created,
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_content_hash_directory_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("pkg")).unwrap();
        fs::write(dir.path().join("pkg/a.py"), "a").unwrap();
        fs::write(dir.path().join("b.py"), "b").unwrap();

        let first = content_hash(dir.path()).unwrap();
        assert_eq!(first, content_hash(dir.path()).unwrap());

        fs::write(dir.path().join("b.py"), "changed").unwrap();
        assert_ne!(first, content_hash(dir.path()).unwrap());
    }

    #[test]
    fn test_content_hash_missing_path() {
        assert!(content_hash(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_archive_file_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lambda")).unwrap();
        fs::write(dir.path().join("lambda/handler.py"), "def handler(e, c): pass\n").unwrap();
        let provider = LocalProvider::new(dir.path());

        let attributes = attrs(json!({
            "source_dir": "lambda",
            "output_path": "build/lambda.zip",
        }));
        let first = provider.create(ARCHIVE_FILE, &attributes).unwrap();
        let second = provider.create(ARCHIVE_FILE, &attributes).unwrap();
        assert_eq!(first.id, second.id);
        assert!(dir.path().join("build/lambda.zip").exists());
        assert!(first.computed["output_size"].as_u64().unwrap() > 0);

        let rec = record(ARCHIVE_FILE, &first, attributes.clone());
        assert_eq!(provider.read(&rec).unwrap(), Some(attributes));

        provider.delete(&rec).unwrap();
        assert_eq!(provider.read(&rec).unwrap(), None);
        // deleting again is fine
        provider.delete(&rec).unwrap();
    }

    #[test]
    fn test_archive_reads_gone_after_source_edit() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("lambda")).unwrap();
        fs::write(dir.path().join("lambda/handler.py"), "def handler(e, c): pass\n").unwrap();
        let provider = LocalProvider::new(dir.path());

        let attributes = attrs(json!({
            "source_dir": "lambda",
            "output_path": "build/lambda.zip",
        }));
        let response = provider.create(ARCHIVE_FILE, &attributes).unwrap();
        assert_eq!(
            response.computed["source_content_hash"],
            json!(content_hash(&dir.path().join("lambda")).unwrap())
        );
        let rec = record(ARCHIVE_FILE, &response, attributes.clone());
        assert_eq!(provider.read(&rec).unwrap(), Some(attributes.clone()));

        fs::write(
            dir.path().join("lambda/handler.py"),
            "def handler(e, c): return 1\n",
        )
        .unwrap();
        assert_eq!(provider.read(&rec).unwrap(), None);

        let rebuilt = provider.create(ARCHIVE_FILE, &attributes).unwrap();
        assert_ne!(rebuilt.computed["output_hash"], response.computed["output_hash"]);
    }

    #[test]
    fn test_archive_file_requires_one_source() {
        let dir = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(dir.path());
        let err = provider
            .create(ARCHIVE_FILE, &attrs(json!({ "output_path": "x.zip" })))
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message.contains("exactly one"));
    }

    #[test]
    fn test_random_id_length_and_prefix() {
        let provider = LocalProvider::new(".");
        let attributes = attrs(json!({ "byte_length": 20, "prefix": "app-" }));
        let response = provider.create(RANDOM_ID, &attributes).unwrap();
        let hex = response.computed["hex"].as_str().unwrap().to_string();
        assert_eq!(hex.len(), 40);
        assert_eq!(response.id, format!("app-{hex}"));

        let other = provider.create(RANDOM_ID, &attributes).unwrap();
        assert_ne!(other.computed["hex"], response.computed["hex"]);
    }

    #[test]
    fn test_random_id_has_no_fixed_positions() {
        let provider = LocalProvider::new(".");
        let attributes = attrs(json!({ "byte_length": 16 }));
        let hexes: Vec<String> = (0..64)
            .map(|_| {
                let response = provider.create(RANDOM_ID, &attributes).unwrap();
                response.computed["hex"].as_str().unwrap().to_string()
            })
            .collect();

        // where a raw v4 uuid keeps its version nibble and variant bits
        let version: std::collections::BTreeSet<char> =
            hexes.iter().map(|h| h.chars().nth(12).unwrap()).collect();
        let variant: std::collections::BTreeSet<char> =
            hexes.iter().map(|h| h.chars().nth(16).unwrap()).collect();
        assert!(version.len() > 1);
        assert!(variant.iter().any(|c| !matches!(c, '8' | '9' | 'a' | 'b')));
    }

    #[test]
    fn test_random_id_update_keeps_hex() {
        let provider = LocalProvider::new(".");
        let attributes = attrs(json!({ "byte_length": 4 }));
        let response = provider.create(RANDOM_ID, &attributes).unwrap();
        let rec = record(RANDOM_ID, &response, attributes);

        let updated = provider
            .update(&rec, &attrs(json!({ "byte_length": 4, "prefix": "x-" })))
            .unwrap();
        assert_eq!(updated.computed["hex"], response.computed["hex"]);
        assert!(updated.id.starts_with("x-"));
    }

    #[test]
    fn test_random_id_rejects_bad_length() {
        let provider = LocalProvider::new(".");
        assert!(
            provider
                .create(RANDOM_ID, &attrs(json!({ "byte_length": 0 })))
                .is_err()
        );
    }

    #[test]
    fn test_builtin_schemas() {
        let schemas = schemas();
        let archive = schemas.iter().find(|s| s.kind == ARCHIVE_FILE).unwrap();
        assert!(archive.attributes["output_hash"].computed);
        assert!(archive.forces_replacement("source_hash"));
        let random = schemas.iter().find(|s| s.kind == RANDOM_ID).unwrap();
        assert!(random.forces_replacement("keepers"));
        assert!(!random.forces_replacement("prefix"));
        assert!(archive.attributes["source_content_hash"].computed);
    }
}
