//! Bootstrap mode flag (spec §4.1 `--set-bootstrap-mode`/`--clear-bootstrap-mode`).
//!
//! Bootstrap mode is a single marker file: its mere presence means "treat
//! `optional_installs` as required installs for this run", used during
//! initial device provisioning before a user has had a chance to opt into
//! anything. The flag carries no content; only existence matters.

use std::path::Path;

pub fn set(flag_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = flag_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(flag_path, b"")
}

pub fn clear(flag_path: &Path) -> std::io::Result<()> {
    match std::fs::remove_file(flag_path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

pub fn is_set(flag_path: &Path) -> bool {
    flag_path.is_file()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_then_clear_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join(".cimian.bootstrap");
        assert!(!is_set(&flag));
        set(&flag).unwrap();
        assert!(is_set(&flag));
        clear(&flag).unwrap();
        assert!(!is_set(&flag));
    }

    #[test]
    fn clearing_absent_flag_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let flag = dir.path().join(".cimian.bootstrap");
        assert!(clear(&flag).is_ok());
    }
}
