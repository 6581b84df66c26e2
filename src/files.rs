//! Pid file, instance id and file hashing.
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use fs2::FileExt;
use md5::Md5;
use sha1::Sha1;
use sha2::Digest;
use tracing::{debug, warn};

use crate::observe;

/// Writes the daemon pid and keeps an exclusive lock on the file for the
/// daemon's lifetime. A held lock means another daemon owns this pid file.
pub fn create_pid_file(path: &Path) -> io::Result<File> {
    let mut file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(false)
        .open(path)?;
    file.try_lock_exclusive().map_err(|_| {
        io::Error::new(
            io::ErrorKind::AddrInUse,
            format!("pid file {path:?} is locked by a running daemon"),
        )
    })?;
    file.set_len(0)?;
    writeln!(file, "{}", std::process::id())?;
    file.sync_all()?;
    Ok(file)
}

/// Removes the pid file on shutdown.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        debug!("could not remove pid file {path:?}: {e}");
    }
}

/// Pid of a running daemon, if the pid file names one that is alive.
pub fn daemon_pid(path: &Path) -> Option<u32> {
    let raw = fs::read_to_string(path).ok()?;
    let pid: u32 = raw.trim().parse().ok()?;
    if pid != 0 && observe::pid_alive(pid) {
        Some(pid)
    } else {
        None
    }
}

/// Reads the persistent instance id, generating and saving one on first
/// use.
pub fn instance_id(path: &Path) -> io::Result<String> {
    if let Ok(raw) = fs::read_to_string(path) {
        let id = raw.trim().to_string();
        if !id.is_empty() {
            return Ok(id);
        }
        warn!("id file {path:?} is empty, generating a new id");
    }
    reset_instance_id(path)
}

/// Generates a fresh instance id and rewrites the id file.
pub fn reset_instance_id(path: &Path) -> io::Result<String> {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let hostname = nix::unistd::gethostname()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_default();
    let seed = format!("{hostname}:{}:{nanos}", std::process::id());
    let id = format!("{:x}", Md5::digest(seed.as_bytes()));
    fs::write(path, format!("{id}\n"))?;
    Ok(id)
}

/// Prints SHA1 and MD5 digests of a file, or of stdin when no file is
/// given (`-H`).
pub fn print_hashes(file: Option<&str>) -> io::Result<()> {
    let (label, data) = match file {
        Some(path) => (path.to_string(), fs::read(path)?),
        None => {
            let mut data = Vec::new();
            io::stdin().read_to_end(&mut data)?;
            ("-".to_string(), data)
        }
    };
    println!("SHA1({label}) = {:x}", Sha1::digest(&data));
    println!("MD5({label})  = {:x}", Md5::digest(&data));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_file_contains_our_pid_and_is_locked() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vigil.pid");
        let _file = create_pid_file(&path).expect("create");
        assert_eq!(daemon_pid(&path), Some(std::process::id()));

        let second = create_pid_file(&path);
        assert!(second.is_err(), "second daemon must not take the pid file");
    }

    #[test]
    fn instance_id_is_stable_until_reset() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vigil.id");
        let first = instance_id(&path).expect("generate");
        assert_eq!(first.len(), 32);
        let second = instance_id(&path).expect("reread");
        assert_eq!(first, second);
        let reset = reset_instance_id(&path).expect("reset");
        assert_ne!(first, reset);
    }

    #[test]
    fn stale_pid_file_is_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("vigil.pid");
        fs::write(&path, format!("{}\n", u32::MAX - 2)).expect("write");
        assert_eq!(daemon_pid(&path), None);
    }
}
