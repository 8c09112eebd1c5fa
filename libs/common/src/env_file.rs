//! Environment file seeding
//!
//! Values already present in the process environment always win, so an env file
//! can seed credentials for development without shadowing what the deployment sets.

use std::path::Path;
use tracing::{debug, warn};

/// Load `path` into the process environment, only filling unset variables
///
/// A missing file is not an error; the number of variables set is returned.
pub fn load_env_file(path: &Path) -> Result<usize, dotenv::Error> {
    let entries = match dotenv::from_path_iter(path) {
        Ok(entries) => entries,
        Err(dotenv::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Env file {} not found, skipping", path.display());
            return Ok(0);
        },
        Err(e) => {
            warn!("Failed to read env file {}: {}", path.display(), e);
            return Err(e);
        },
    };

    let mut applied = 0;
    for entry in entries {
        let (key, value) = entry?;
        if std::env::var_os(&key).is_none() {
            std::env::set_var(&key, value);
            applied += 1;
        }
    }
    debug!("Loaded {} variables from {}", applied, path.display());
    Ok(applied)
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn env_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file
    }

    #[test]
    fn test_load_env_file_does_not_override() {
        let file = env_file(&[
            "MODQTT_ENV_FILE_TEST_NEW=from_file",
            "MODQTT_ENV_FILE_TEST_SET=from_file",
        ]);

        std::env::remove_var("MODQTT_ENV_FILE_TEST_NEW");
        std::env::set_var("MODQTT_ENV_FILE_TEST_SET", "from_env");

        let applied = load_env_file(file.path()).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(
            std::env::var("MODQTT_ENV_FILE_TEST_NEW").unwrap(),
            "from_file"
        );
        assert_eq!(
            std::env::var("MODQTT_ENV_FILE_TEST_SET").unwrap(),
            "from_env"
        );
    }

    #[test]
    fn test_comments_and_quotes() {
        let file = env_file(&[
            "# broker credentials",
            "",
            "MODQTT_ENV_FILE_TEST_TAIL=1883 # local broker",
            "MODQTT_ENV_FILE_TEST_QUOTED=\"with spaces\"",
        ]);
        std::env::remove_var("MODQTT_ENV_FILE_TEST_TAIL");
        std::env::remove_var("MODQTT_ENV_FILE_TEST_QUOTED");

        assert_eq!(load_env_file(file.path()).unwrap(), 2);
        assert_eq!(std::env::var("MODQTT_ENV_FILE_TEST_TAIL").unwrap(), "1883");
        assert_eq!(
            std::env::var("MODQTT_ENV_FILE_TEST_QUOTED").unwrap(),
            "with spaces"
        );
    }

    #[test]
    fn test_missing_file_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(load_env_file(&dir.path().join(".env")).unwrap(), 0);
    }
}
