// mlmm-server/src/discovery/mod.rs
//
// Copyright (c) 2025 Arcella Team
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE>
// or the MIT license <LICENSE-MIT>, at your option.
// This file may not be copied, modified, or distributed
// except according to those terms.

//! Discovery files: how a freshly launched client finds the running server.
//!
//! After a successful bind the server writes its process id and port, each as a
//! bare decimal integer, to [`PID_FILE`] and [`PORT_FILE`] in the discovery
//! directory (the working directory by default). Files are overwritten on
//! every start and never locked; two servers sharing a directory race and the
//! last writer wins.

use std::path::Path;
use std::str::FromStr;

use tokio::fs;

use crate::error::{MlmmError, Result as MlmmResult};

pub const PID_FILE: &str = "mlmm_pid.txt";
pub const PORT_FILE: &str = "mlmm_port.txt";

/// What the discovery files advertise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLocation {
    pub pid: u32,
    pub port: u16,
}

/// Writes this process's id and `port` to the discovery files in `dir`.
pub async fn publish(dir: &Path, port: u16) -> MlmmResult<ServerLocation> {
    let location = ServerLocation {
        pid: std::process::id(),
        port,
    };
    write(dir, &location).await?;
    tracing::info!(
        "Published discovery files in {:?} (pid {}, port {})",
        dir, location.pid, location.port
    );
    Ok(location)
}

/// Writes the port file before the pid file, so a failed write never leaves a
/// fresh pid next to a stale port.
pub async fn write(dir: &Path, location: &ServerLocation) -> MlmmResult<()> {
    write_value(&dir.join(PORT_FILE), location.port).await?;
    write_value(&dir.join(PID_FILE), location.pid).await
}

/// Reads the discovery files in `dir`.
pub async fn read(dir: &Path) -> MlmmResult<ServerLocation> {
    Ok(ServerLocation {
        pid: read_value(&dir.join(PID_FILE)).await?,
        port: read_value(&dir.join(PORT_FILE)).await?,
    })
}

async fn write_value(path: &Path, value: impl ToString) -> MlmmResult<()> {
    fs::write(path, value.to_string())
        .await
        .map_err(|e| MlmmError::io_with_path(path, e))
}

async fn read_value<T: FromStr>(path: &Path) -> MlmmResult<T> {
    let contents = fs::read_to_string(path).await.map_err(|e| {
        MlmmError::Discovery(format!("cannot read {:?}: {} (is the server running?)", path, e))
    })?;
    contents.trim().parse::<T>().map_err(|_| {
        MlmmError::Discovery(format!("{:?} does not contain a number: {:?}", path, contents))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_publish_writes_bare_integers() {
        let temp_dir = TempDir::new().unwrap();

        let location = publish(temp_dir.path(), 40123).await.unwrap();

        assert_eq!(location.pid, std::process::id());
        let pid = std::fs::read_to_string(temp_dir.path().join(PID_FILE)).unwrap();
        let port = std::fs::read_to_string(temp_dir.path().join(PORT_FILE)).unwrap();
        assert_eq!(pid, std::process::id().to_string());
        assert_eq!(port, "40123");
    }

    #[tokio::test]
    async fn test_publish_overwrites_previous_files() {
        let temp_dir = TempDir::new().unwrap();
        write(temp_dir.path(), &ServerLocation { pid: 1, port: 1111 }).await.unwrap();

        publish(temp_dir.path(), 2222).await.unwrap();

        let location = read(temp_dir.path()).await.unwrap();
        assert_eq!(location.port, 2222);
        assert_eq!(location.pid, std::process::id());
    }

    #[tokio::test]
    async fn test_failed_port_write_leaves_no_pid_file() {
        let temp_dir = TempDir::new().unwrap();
        // A directory in place of the port file makes its write fail.
        std::fs::create_dir(temp_dir.path().join(PORT_FILE)).unwrap();

        let err = publish(temp_dir.path(), 3333).await.unwrap_err();

        assert!(matches!(err, MlmmError::IoWithPath { .. }), "{:?}", err);
        assert!(!temp_dir.path().join(PID_FILE).exists());
    }

    #[tokio::test]
    async fn test_read_tolerates_trailing_newline() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(PID_FILE), "4242\n").unwrap();
        std::fs::write(temp_dir.path().join(PORT_FILE), " 5000\r\n").unwrap();

        let location = read(temp_dir.path()).await.unwrap();
        assert_eq!(location, ServerLocation { pid: 4242, port: 5000 });
    }

    #[tokio::test]
    async fn test_read_missing_or_garbled_files() {
        let temp_dir = TempDir::new().unwrap();
        assert!(matches!(read(temp_dir.path()).await, Err(MlmmError::Discovery(_))));

        std::fs::write(temp_dir.path().join(PID_FILE), "4242").unwrap();
        std::fs::write(temp_dir.path().join(PORT_FILE), "not-a-port").unwrap();
        assert!(matches!(read(temp_dir.path()).await, Err(MlmmError::Discovery(_))));
    }

    #[tokio::test]
    async fn test_publish_into_missing_dir_fails_with_path() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        let err = publish(&missing, 1).await.unwrap_err();
        assert!(matches!(err, MlmmError::IoWithPath { .. }));
    }
}
