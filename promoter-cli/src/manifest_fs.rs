// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Filesystem `ManifestLoader` (spec §4.2, §6): either a flat list of
//! whole manifest files, or a thin-manifest directory tree where
//! registries and images are split across two parallel trees and paired
//! by group name.

use std::fs;
use std::path::{Path, PathBuf};

use serde_yml::Value;

use promoter_core::error::PromoterError;
use promoter_core::manifest::{Manifest, ManifestLoader};

/// Loads manifests from explicit file paths and/or a thin-manifest
/// directory root. At least one source must be configured.
pub struct FsManifestLoader {
    pub explicit_paths: Vec<PathBuf>,
    pub thin_manifest_dir: Option<PathBuf>,
}

impl ManifestLoader for FsManifestLoader {
    fn load(&self) -> Result<Vec<Manifest>, PromoterError> {
        let mut manifests = Vec::new();

        for path in &self.explicit_paths {
            let bytes = fs::read(path).map_err(|e| {
                PromoterError::InvalidManifest(format!("reading manifest {}: {e}", path.display()))
            })?;
            manifests.push(Manifest::from_yaml(&bytes)?);
        }

        if let Some(root) = &self.thin_manifest_dir {
            manifests.extend(load_thin_manifests(root)?);
        }

        if manifests.is_empty() {
            return Err(PromoterError::InvalidManifest(
                "no manifests loaded: pass --manifest or --thin-manifest-dir".into(),
            ));
        }

        Ok(manifests)
    }
}

fn load_thin_manifests(root: &Path) -> Result<Vec<Manifest>, PromoterError> {
    let manifests_root = root.join("manifests");
    let images_root = root.join("images");

    let mut groups: Vec<String> = Vec::new();
    for entry in fs::read_dir(&manifests_root).map_err(|e| {
        PromoterError::InvalidManifest(format!("reading thin-manifest directory {}: {e}", manifests_root.display()))
    })? {
        let entry = entry.map_err(|e| PromoterError::InvalidManifest(e.to_string()))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            groups.push(entry.file_name().to_string_lossy().into_owned());
        }
    }
    groups.sort();

    let mut out = Vec::with_capacity(groups.len());
    for group in groups {
        let registries_path = manifests_root.join(&group).join("promoter-manifest.yaml");
        let images_path = images_root.join(&group).join("images.yaml");

        let registries_bytes = fs::read(&registries_path).map_err(|e| {
            PromoterError::InvalidManifest(format!(
                "thin manifest group '{group}' is missing {}: {e}",
                registries_path.display()
            ))
        })?;
        let images_bytes = fs::read(&images_path).map_err(|e| {
            PromoterError::InvalidManifest(format!(
                "thin manifest group '{group}' is missing {}: {e}",
                images_path.display()
            ))
        })?;

        out.push(merge_thin_manifest(&registries_path, &registries_bytes, &images_path, &images_bytes)?);
    }
    Ok(out)
}

/// Combine a `{registries: [...]}` document and an `{images: [...]}`
/// document into one `Manifest`, validating through the same
/// `Manifest::from_yaml` entry point a whole-file manifest uses.
fn merge_thin_manifest(
    registries_path: &Path,
    registries_bytes: &[u8],
    images_path: &Path,
    images_bytes: &[u8],
) -> Result<Manifest, PromoterError> {
    let registries_doc: Value = serde_yml::from_slice(registries_bytes)?;
    let images_doc: Value = serde_yml::from_slice(images_bytes)?;

    let Some(registries_field) = registries_doc.get("registries") else {
        return Err(PromoterError::InvalidManifest(format!(
            "{} does not declare a top-level 'registries' key",
            registries_path.display()
        )));
    };
    let Some(images_field) = images_doc.get("images") else {
        return Err(PromoterError::InvalidManifest(format!(
            "{} does not declare a top-level 'images' key",
            images_path.display()
        )));
    };

    let mut merged = serde_yml::Mapping::new();
    merged.insert(Value::from("registries"), registries_field.clone());
    merged.insert(Value::from("images"), images_field.clone());

    let combined = serde_yml::to_string(&Value::Mapping(merged))?;
    Manifest::from_yaml(combined.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        let mut f = fs::File::create(path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn explicit_paths_load_independently() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yaml");
        let digest = "sha256:".to_string() + &"0".repeat(64);
        write(
            &path,
            &format!(
                "registries:\n  - name: gcr.io/foo\n    src: true\n  - name: gcr.io/bar\nimages:\n  - name: a\n    dmap:\n      \"{digest}\": [\"0.9\"]\n"
            ),
        );

        let loader = FsManifestLoader {
            explicit_paths: vec![path],
            thin_manifest_dir: None,
        };
        let manifests = loader.load().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].source_registry().name.as_str(), "gcr.io/foo");
    }

    #[test]
    fn thin_manifest_dir_pairs_groups_by_name() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        let digest = "sha256:".to_string() + &"1".repeat(64);

        write(
            &root.join("manifests/staging/promoter-manifest.yaml"),
            "registries:\n  - name: gcr.io/foo\n    src: true\n  - name: gcr.io/bar\n",
        );
        write(
            &root.join("images/staging/images.yaml"),
            &format!("images:\n  - name: a\n    dmap:\n      \"{digest}\": [\"0.9\"]\n"),
        );

        let loader = FsManifestLoader {
            explicit_paths: vec![],
            thin_manifest_dir: Some(root.to_path_buf()),
        };
        let manifests = loader.load().unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].images.len(), 1);
    }

    #[test]
    fn missing_images_pair_fails_with_path_in_message() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(
            &root.join("manifests/staging/promoter-manifest.yaml"),
            "registries:\n  - name: gcr.io/foo\n    src: true\n",
        );
        // images/staging/images.yaml intentionally absent.

        let loader = FsManifestLoader {
            explicit_paths: vec![],
            thin_manifest_dir: Some(root.to_path_buf()),
        };
        let err = loader.load().unwrap_err().to_string();
        assert!(err.contains("images.yaml"), "error should name the missing path: {err}");
    }
}
