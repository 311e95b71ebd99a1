//! File-backed session credential store.
//!
//! Layout: `<dir>/creds.json` plus one `key-<key-name>.json` per key entry. Writes
//! are atomic (temp file + rename) and skipped when the content digest matches
//! what is already on disk, so replaying identical credential updates is a no-op.

use std::{
    collections::{BTreeMap, HashMap},
    fs,
    path::{Path, PathBuf},
};

use chrono::Local;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{errors::Error, Result};

const CREDS_FILE: &str = "creds.json";
const KEY_FILE_PREFIX: &str = "key-";

/// Identity record plus key material, both opaque to the bot.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub creds: Option<serde_json::Value>,
    pub keys: BTreeMap<String, serde_json::Value>,
}

impl Credentials {
    /// True when nothing was ever paired (fresh QR flow).
    pub fn is_fresh(&self) -> bool {
        self.creds.is_none()
    }
}

/// Incremental change emitted by the protocol client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CredentialsUpdate {
    /// Full replacement of the identity record.
    pub creds: Option<serde_json::Value>,
    /// `Some` upserts a key, `None` deletes it.
    pub keys: BTreeMap<String, Option<serde_json::Value>>,
}

/// What a `save` call actually did on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub written: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl SaveReport {
    pub fn is_noop(&self) -> bool {
        self.written == 0 && self.removed == 0
    }
}

#[derive(Debug)]
pub struct FileSessionStore {
    dir: PathBuf,
    digests: HashMap<String, [u8; 32]>,
}

impl FileSessionStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            digests: HashMap::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load whatever is on disk. A missing directory yields fresh credentials.
    pub fn load(&mut self) -> Result<Credentials> {
        let mut out = Credentials::default();
        if !self.dir.exists() {
            return Ok(out);
        }

        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(stem) = name.strip_suffix(".json") else {
                continue;
            };
            if !entry.file_type()?.is_file()
                || (name != CREDS_FILE && !stem.starts_with(KEY_FILE_PREFIX))
            {
                continue;
            }

            let bytes = fs::read(entry.path())?;
            let value: serde_json::Value = serde_json::from_slice(&bytes).map_err(|e| {
                Error::Session(format!("corrupt session file {}: {e}", entry.path().display()))
            })?;
            self.digests.insert(name.clone(), digest(&bytes));

            if name == CREDS_FILE {
                out.creds = Some(value);
            } else if let Some(key) = stem.strip_prefix(KEY_FILE_PREFIX) {
                out.keys.insert(unfix_file_name(key), value);
            }
        }

        Ok(out)
    }

    /// Apply an update. Files whose content is unchanged are not rewritten.
    pub fn save(&mut self, update: &CredentialsUpdate) -> Result<SaveReport> {
        let mut report = SaveReport::default();
        if update.creds.is_none() && update.keys.is_empty() {
            return Ok(report);
        }
        fs::create_dir_all(&self.dir)?;

        if let Some(creds) = &update.creds {
            self.write_entry(CREDS_FILE, creds, &mut report)?;
        }

        for (key, value) in &update.keys {
            let file = key_file_name(key);
            match value {
                Some(v) => self.write_entry(&file, v, &mut report)?,
                None => {
                    let path = self.dir.join(&file);
                    self.digests.remove(&file);
                    match fs::remove_file(&path) {
                        Ok(()) => report.removed += 1,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                            report.unchanged += 1
                        }
                        Err(e) => return Err(Error::Io(e)),
                    }
                }
            }
        }

        Ok(report)
    }

    /// Retire the session after an explicit logout.
    ///
    /// The directory is renamed to `<dir>.logged-out-<timestamp>` so the next start
    /// goes through pairing again. Returns the archive path, if anything existed.
    pub fn invalidate(&mut self) -> Result<Option<PathBuf>> {
        self.digests.clear();
        if !self.dir.exists() {
            return Ok(None);
        }

        let stamp = Local::now().format("%Y%m%d%H%M%S");
        let file_name = self
            .dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidPath {
                path: self.dir.clone(),
                reason: "session dir has no file name".to_string(),
            })?;
        let mut archive = self.dir.with_file_name(format!("{file_name}.logged-out-{stamp}"));
        let mut n = 1;
        while archive.exists() {
            archive = self
                .dir
                .with_file_name(format!("{file_name}.logged-out-{stamp}-{n}"));
            n += 1;
        }

        fs::rename(&self.dir, &archive)?;
        Ok(Some(archive))
    }

    fn write_entry(
        &mut self,
        file: &str,
        value: &serde_json::Value,
        report: &mut SaveReport,
    ) -> Result<()> {
        let bytes = serde_json::to_vec(value)?;
        let d = digest(&bytes);
        let path = self.dir.join(file);

        if self.digests.get(file) == Some(&d) && path.exists() {
            report.unchanged += 1;
            return Ok(());
        }

        write_atomic(&path, &bytes)?;
        self.digests.insert(file.to_string(), d);
        report.written += 1;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| Error::InvalidPath {
            path: path.to_path_buf(),
            reason: "missing file name".to_string(),
        })?;
    let tmp = path.with_file_name(format!(".{file_name}.tmp"));
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn digest(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

/// Keys live in their own `key-` namespace so no key name can land on `creds.json`.
fn key_file_name(key: &str) -> String {
    format!("{KEY_FILE_PREFIX}{}.json", fix_file_name(key))
}

/// Key names may contain path separators and colons; percent-escape them so the
/// mapping back from file name to key is exact.
fn fix_file_name(key: &str) -> String {
    key.replace('%', "%25")
        .replace('/', "%2F")
        .replace(':', "%3A")
}

fn unfix_file_name(stem: &str) -> String {
    stem.replace("%3A", ":")
        .replace("%2F", "/")
        .replace("%25", "%")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update_with(creds: serde_json::Value, keys: &[(&str, Option<serde_json::Value>)]) -> CredentialsUpdate {
        CredentialsUpdate {
            creds: Some(creds),
            keys: keys
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        }
    }

    #[test]
    fn missing_directory_means_fresh_pairing() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = FileSessionStore::new(tmp.path().join("session"));
        let creds = store.load().unwrap();
        assert!(creds.is_fresh());
        assert!(creds.keys.is_empty());
    }

    #[test]
    fn save_then_load_round_trips_through_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("session");
        let mut store = FileSessionStore::new(&dir);

        let report = store
            .save(&update_with(
                json!({"me": {"id": "123@s"}}),
                &[("pre-key:1", Some(json!({"k": 1}))), ("app/state", Some(json!([1, 2])))],
            ))
            .unwrap();
        assert_eq!(report.written, 3);
        assert!(dir.join("creds.json").exists());
        assert!(dir.join("key-pre-key%3A1.json").exists());
        assert!(dir.join("key-app%2Fstate.json").exists());

        let mut reopened = FileSessionStore::new(&dir);
        let creds = reopened.load().unwrap();
        assert_eq!(creds.creds, Some(json!({"me": {"id": "123@s"}})));
        assert_eq!(creds.keys.get("app/state"), Some(&json!([1, 2])));
        assert_eq!(creds.keys.get("pre-key:1"), Some(&json!({"k": 1})));
        assert_eq!(creds.keys.len(), 2);
    }

    #[test]
    fn identical_updates_are_not_rewritten() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("session");
        let mut store = FileSessionStore::new(&dir);
        let update = update_with(json!({"me": "x"}), &[("session-a", Some(json!("k")))]);

        assert_eq!(store.save(&update).unwrap().written, 2);
        let second = store.save(&update).unwrap();
        assert!(second.is_noop());
        assert_eq!(second.unchanged, 2);

        // A fresh store instance learns digests from disk on load.
        let mut reopened = FileSessionStore::new(&dir);
        reopened.load().unwrap();
        assert!(reopened.save(&update).unwrap().is_noop());

        let creds = reopened.load().unwrap();
        assert_eq!(creds.creds, Some(json!({"me": "x"})));
    }

    #[test]
    fn changed_content_is_written_and_deleted_keys_removed() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("session");
        let mut store = FileSessionStore::new(&dir);
        store
            .save(&update_with(json!({"v": 1}), &[("k1", Some(json!(1)))]))
            .unwrap();

        let report = store
            .save(&update_with(json!({"v": 2}), &[("k1", None), ("k2", None)]))
            .unwrap();
        assert_eq!(report.written, 1);
        assert_eq!(report.removed, 1);
        assert_eq!(report.unchanged, 1);

        let creds = store.load().unwrap();
        assert_eq!(creds.creds, Some(json!({"v": 2})));
        assert!(creds.keys.is_empty());
    }

    #[test]
    fn key_named_creds_does_not_clobber_the_identity_record() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("session");
        let mut store = FileSessionStore::new(&dir);
        store.save(&update_with(json!({"me": "id"}), &[])).unwrap();
        store
            .save(&CredentialsUpdate {
                creds: None,
                keys: [("creds".to_string(), Some(json!({"k": 1})))].into(),
            })
            .unwrap();

        let creds = FileSessionStore::new(&dir).load().unwrap();
        assert_eq!(creds.creds, Some(json!({"me": "id"})));
        assert_eq!(creds.keys.get("creds"), Some(&json!({"k": 1})));
        assert_eq!(creds.keys.len(), 1);
    }

    #[test]
    fn unrelated_files_in_the_directory_are_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("session");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("notes.json"), b"not even json").unwrap();
        assert!(FileSessionStore::new(&dir).load().unwrap().is_fresh());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("session");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("creds.json"), b"{not json").unwrap();
        let err = FileSessionStore::new(&dir).load().unwrap_err();
        assert!(matches!(err, Error::Session(_)));
    }

    #[test]
    fn invalidate_archives_the_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("session");
        let mut store = FileSessionStore::new(&dir);
        store.save(&update_with(json!({"v": 1}), &[])).unwrap();

        let archive = store.invalidate().unwrap().unwrap();
        assert!(!dir.exists());
        assert!(archive.join("creds.json").exists());
        assert!(archive
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("session.logged-out-"));

        assert!(store.load().unwrap().is_fresh());
        assert_eq!(store.invalidate().unwrap(), None);
    }
}
