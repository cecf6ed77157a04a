use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid yaml in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("bundle {0} has no releases")]
    NoReleases(String),

    #[error("{bundle} has no release {release}")]
    UnknownRelease { bundle: String, release: String },

    #[error("invalid object in {bundle}: {message}")]
    Object { bundle: String, message: String },

    #[error("unknown manifest {0}")]
    UnknownManifest(String),
}

/// Where versioned template sets come from.
pub trait ManifestSource: Send + Sync {
    /// Available releases of `bundle`, oldest first.
    fn releases(&self, bundle: &str) -> Result<Vec<String>, ManifestError>;

    /// Every document of `release`, in file name order.
    fn load(&self, bundle: &str, release: &str)
    -> Result<Vec<Value>, ManifestError>;
}

/// Reads `<root>/<bundle>/manifests/<release>/*.yaml`.
#[derive(Clone, Debug)]
pub struct FileManifestSource {
    root: PathBuf,
}

impl FileManifestSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn bundle_dir(&self, bundle: &str) -> PathBuf {
        self.root.join(bundle).join("manifests")
    }
}

fn read_dir(path: &Path) -> Result<Vec<fs::DirEntry>, ManifestError> {
    let io = |source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    };
    fs::read_dir(path)
        .map_err(io)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io)
}

impl ManifestSource for FileManifestSource {
    fn releases(&self, bundle: &str) -> Result<Vec<String>, ManifestError> {
        let mut releases: Vec<String> = read_dir(&self.bundle_dir(bundle))?
            .into_iter()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .collect();
        sort_releases(&mut releases);
        Ok(releases)
    }

    fn load(
        &self,
        bundle: &str,
        release: &str,
    ) -> Result<Vec<Value>, ManifestError> {
        let dir = self.bundle_dir(bundle).join(release);
        if !dir.is_dir() {
            return Err(ManifestError::UnknownRelease {
                bundle: bundle.to_string(),
                release: release.to_string(),
            });
        }
        let mut files: Vec<PathBuf> = read_dir(&dir)?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()),
                    Some("yaml" | "yml")
                )
            })
            .collect();
        files.sort();

        let mut docs = Vec::new();
        for path in files {
            let text = fs::read_to_string(&path).map_err(|source| {
                ManifestError::Io {
                    path: path.clone(),
                    source,
                }
            })?;
            docs.extend(parse_documents(&text).map_err(|source| {
                ManifestError::Yaml {
                    path: path.clone(),
                    source,
                }
            })?);
        }
        debug!(%bundle, %release, objects = docs.len(), "loaded manifests");
        Ok(docs)
    }
}

/// All non-empty documents of a multi-document YAML stream.
pub fn parse_documents(text: &str) -> Result<Vec<Value>, serde_yaml::Error> {
    let mut out = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(text) {
        let value = Value::deserialize(doc)?;
        if !value.is_null() {
            out.push(value);
        }
    }
    Ok(out)
}

/// Order releases by their numeric components, so `v1.10.0` follows
/// `v1.9.2`.
pub fn sort_releases(releases: &mut [String]) {
    releases.sort_by_cached_key(|r| (numeric_key(r), r.clone()));
}

fn numeric_key(release: &str) -> Vec<u64> {
    release
        .split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, body: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, body).unwrap();
    }

    #[test]
    fn releases_sort_numerically() {
        let mut r = vec![
            "v1.10.0".to_string(),
            "v0.59.0".to_string(),
            "v1.9.2".to_string(),
        ];
        sort_releases(&mut r);
        assert_eq!(r, vec!["v0.59.0", "v1.9.2", "v1.10.0"]);
    }

    #[test]
    fn multi_document_files_skip_empty_docs() {
        let docs = parse_documents(
            "---\napiVersion: v1\nkind: Namespace\nmetadata:\n  name: kubevirt\n\
             ---\n---\n\
             apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: kubevirt-operator\n",
        )
        .unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1]["kind"], "ServiceAccount");
    }

    #[test]
    fn file_source_reads_in_name_order() {
        let dir = tempdir().unwrap();
        write(
            dir.path(),
            "operator/manifests/v1.1.0/b.yaml",
            "kind: Second\n",
        );
        write(
            dir.path(),
            "operator/manifests/v1.1.0/a.yaml",
            "kind: First\n",
        );
        write(dir.path(), "operator/manifests/v1.1.0/notes.txt", "ignored");
        write(dir.path(), "operator/manifests/v1.0.0/a.yaml", "kind: Old\n");

        let src = FileManifestSource::new(dir.path());
        assert_eq!(src.releases("operator").unwrap(), vec!["v1.0.0", "v1.1.0"]);
        let docs = src.load("operator", "v1.1.0").unwrap();
        let kinds: Vec<_> = docs.iter().map(|d| d["kind"].clone()).collect();
        assert_eq!(kinds, vec!["First", "Second"]);
    }

    #[test]
    fn unknown_release_is_reported() {
        let dir = tempdir().unwrap();
        write(dir.path(), "operator/manifests/v1.0.0/a.yaml", "kind: Old\n");
        let src = FileManifestSource::new(dir.path());
        assert!(matches!(
            src.load("operator", "v9.9.9"),
            Err(ManifestError::UnknownRelease { .. })
        ));
        assert!(matches!(
            src.releases("custom_resource"),
            Err(ManifestError::Io { .. })
        ));
    }
}
