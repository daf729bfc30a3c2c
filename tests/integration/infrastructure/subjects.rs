use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tempfile::TempDir;
use wirecheck::Timeouts;

/// Bounds loose enough for a loaded CI machine.
pub fn test_timeouts() -> Timeouts {
    Timeouts {
        epsilon: Duration::from_millis(3),
        accept: Duration::from_secs(3),
        read: Duration::from_millis(150),
        write: Duration::from_millis(150),
        settle: Duration::from_millis(300),
        stop: Duration::from_secs(5),
    }
}

/// Subject executables for a test, plus a scratch directory for scripted ones.
pub struct SubjectFixtures {
    dir: TempDir,
}

impl SubjectFixtures {
    pub fn new() -> Result<Self> {
        let dir = TempDir::new().context("Failed to create fixture directory")?;
        Ok(Self { dir })
    }

    pub fn reference_server() -> PathBuf {
        PathBuf::from(env!("CARGO_BIN_EXE_reference-server"))
    }

    pub fn reference_client() -> PathBuf {
        PathBuf::from(env!("CARGO_BIN_EXE_reference-client"))
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Writes an executable shell script named `name`.
    pub fn script(&self, name: &str, body: &str) -> Result<PathBuf> {
        let path = self.dir.path().join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body))
            .with_context(|| format!("Failed to write script {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(path)
    }

    /// Lays out `server` and `client` links to the reference binaries, as a
    /// solution directory would.
    pub fn reference_solution(&self) -> Result<PathBuf> {
        let solution = self.dir.path().join("solution");
        fs::create_dir_all(&solution)?;
        std::os::unix::fs::symlink(Self::reference_server(), solution.join("server"))?;
        std::os::unix::fs::symlink(Self::reference_client(), solution.join("client"))?;
        Ok(solution)
    }
}
