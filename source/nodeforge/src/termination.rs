//! Termination-log write on fatal process exit.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

pub const TERMINATION_LOG_PATH: &str = "/dev/termination-log";

/// Records the fatal error where the platform picks up termination messages.
/// Best-effort: the exit path must not fail on logging.
pub fn write_termination_log(message: &str) {
    write_termination_log_to(Path::new(TERMINATION_LOG_PATH), message);
}

pub fn write_termination_log_to(path: &Path, message: &str) {
    if fs::write(path, message).is_ok() {
        let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o644));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_message_with_expected_permissions() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("termination-log");

        write_termination_log_to(&path, "bootstrap failed: no such file");

        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "bootstrap failed: no such file"
        );
        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[test]
    fn unwritable_path_is_ignored() {
        write_termination_log_to(Path::new("/nonexistent/dir/termination-log"), "msg");
    }
}
