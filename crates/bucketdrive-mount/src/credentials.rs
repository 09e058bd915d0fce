//! Credential file generation for rclone.
//!
//! rclone reads its S3 remote definition from an INI-style config file.
//! The file is regenerated on every start from the stored [`Connection`]
//! and written atomically (temp file in the same directory, then rename),
//! so rclone never observes a half-written file.

use std::fmt::Write as _;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::MountError;
use crate::settings::Connection;

/// Render the credential file contents for `connection` under `remote_name`.
pub fn render(connection: &Connection, remote_name: &str) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    let _ = writeln!(out, "[{remote_name}]");
    let _ = writeln!(out, "type = s3");
    let _ = writeln!(out, "provider = Minio");
    let _ = writeln!(out, "access_key_id = {}", connection.access_key);
    let _ = writeln!(out, "secret_access_key = {}", connection.secret_key);
    let _ = writeln!(
        out,
        "endpoint = {}://{}",
        connection.scheme(),
        connection.bare_endpoint()
    );
    let _ = writeln!(out, "force_path_style = true");
    out
}

/// Write the credential file to `path`, replacing any previous version.
///
/// The parent directory is created if it does not exist. On Unix the file
/// ends up with mode `0600`.
pub fn materialize(
    connection: &Connection,
    remote_name: &str,
    path: &Path,
) -> Result<PathBuf, MountError> {
    let config_write = |source: std::io::Error| MountError::ConfigWrite {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(config_write)?;

    // persist() keeps the temp file's mode
    let mut temp = NamedTempFile::new_in(parent).map_err(config_write)?;
    restrict_permissions(temp.as_file()).map_err(config_write)?;
    temp.write_all(render(connection, remote_name).as_bytes())
        .map_err(config_write)?;
    temp.as_file().sync_all().map_err(config_write)?;
    temp.persist(path).map_err(|e| config_write(e.error))?;

    debug!(path = %path.display(), remote = remote_name, "Wrote rclone credential file");
    Ok(path.to_path_buf())
}

#[cfg(unix)]
fn restrict_permissions(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_file: &std::fs::File) -> std::io::Result<()> {
    // Files under the per-user profile already inherit an owner-only ACL
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn connection() -> Connection {
        Connection {
            endpoint: "http://minio.example.com:9000".to_string(),
            access_key: "AKIA".to_string(),
            secret_key: "s3cr3t".to_string(),
            bucket: "b".to_string(),
            use_ssl: false,
        }
    }

    #[test]
    fn render_matches_rclone_layout() {
        let rendered = render(&connection(), "minio");
        assert_eq!(
            rendered,
            "[minio]\n\
             type = s3\n\
             provider = Minio\n\
             access_key_id = AKIA\n\
             secret_access_key = s3cr3t\n\
             endpoint = http://minio.example.com:9000\n\
             force_path_style = true\n"
        );
    }

    #[test]
    fn render_uses_https_when_ssl_enabled() {
        let mut conn = connection();
        conn.use_ssl = true;
        // Stored scheme is replaced by the one implied by the flag
        assert!(render(&conn, "minio").contains("endpoint = https://minio.example.com:9000\n"));
    }

    #[test]
    fn materialize_replaces_previous_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rclone.conf");
        std::fs::write(&path, "stale contents that are much longer than anything else").unwrap();

        let written = materialize(&connection(), "minio", &path).unwrap();
        assert_eq!(written, path);
        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("[minio]\n"));
        assert!(!contents.contains("stale"));

        // No temp files left behind
        let entries = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn materialize_creates_parent_directory() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("rclone.conf");
        materialize(&connection(), "minio", &path).unwrap();
        assert!(path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn materialize_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rclone.conf");
        materialize(&connection(), "minio", &path).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn materialize_into_a_file_fails_with_config_write() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let err = materialize(&connection(), "minio", &blocker.join("rclone.conf")).unwrap_err();
        assert!(matches!(err, MountError::ConfigWrite { .. }));
    }
}
