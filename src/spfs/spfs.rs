// SPDX-License-Identifier: GPL-2.0-or-later

//! Sandboxed private file system: a dedicated worker thread owns every
//! open file handle and is reached only through message passing, so
//! "one handle per filename" is enforced structurally rather than by
//! convention.

use common::{ArcLogger, LogEntry, LogLevel};
use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write as _},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SpfsError {
    #[error("invalid filename: {0}")]
    InvalidFilename(String),

    #[error("file already open: {0}")]
    AlreadyOpen(String),

    #[error("handle not open")]
    FileNotOpen,

    #[error("short write: wrote {wrote} of {want} bytes")]
    WriteIncomplete { wrote: usize, want: usize },

    #[error("io error: {0}")]
    Io(String),

    #[error("worker shut down")]
    WorkerGone,
}

impl From<std::io::Error> for SpfsError {
    fn from(e: std::io::Error) -> Self {
        SpfsError::Io(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileHandle(u64);

enum Command {
    Open {
        filename: String,
        reply: oneshot::Sender<Result<FileHandle, SpfsError>>,
    },
    Write {
        handle: FileHandle,
        bytes: Vec<u8>,
        reply: oneshot::Sender<Result<(), SpfsError>>,
    },
    Read {
        handle: FileHandle,
        offset: u64,
        len: usize,
        reply: oneshot::Sender<Result<Vec<u8>, SpfsError>>,
    },
    Close {
        handle: FileHandle,
        reply: oneshot::Sender<Result<(), SpfsError>>,
    },
    Delete {
        filename: String,
        reply: oneshot::Sender<Result<(), SpfsError>>,
    },
    Check {
        filename: String,
        reply: oneshot::Sender<Result<(bool, u64), SpfsError>>,
    },
}

/// Handle to the worker thread. Cheap to clone; every clone shares the
/// same underlying file table.
#[derive(Clone)]
pub struct Spfs {
    tx: mpsc::UnboundedSender<Command>,
}

impl Spfs {
    /// Spawns the worker thread rooted at `root`. `root` must already
    /// exist (see `env::parse_config`, which creates it).
    #[must_use]
    pub fn new(root: PathBuf, logger: ArcLogger) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        std::thread::Builder::new()
            .name("spfs-worker".to_owned())
            .spawn(move || worker_loop(root, rx, logger))
            .expect("failed to spawn spfs worker thread");
        Self { tx }
    }

    pub async fn open(&self, filename: &str) -> Result<FileHandle, SpfsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Open {
                filename: filename.to_owned(),
                reply,
            })
            .map_err(|_| SpfsError::WorkerGone)?;
        rx.await.map_err(|_| SpfsError::WorkerGone)?
    }

    /// Appends `bytes` to the file's end; the write cursor for reads
    /// (`offset`) is independent and never moved by this call.
    pub async fn write(&self, handle: FileHandle, bytes: Vec<u8>) -> Result<(), SpfsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Write {
                handle,
                bytes,
                reply,
            })
            .map_err(|_| SpfsError::WorkerGone)?;
        rx.await.map_err(|_| SpfsError::WorkerGone)?
    }

    pub async fn read(
        &self,
        handle: FileHandle,
        offset: u64,
        len: usize,
    ) -> Result<Vec<u8>, SpfsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Read {
                handle,
                offset,
                len,
                reply,
            })
            .map_err(|_| SpfsError::WorkerGone)?;
        rx.await.map_err(|_| SpfsError::WorkerGone)?
    }

    pub async fn close(&self, handle: FileHandle) -> Result<(), SpfsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Close { handle, reply })
            .map_err(|_| SpfsError::WorkerGone)?;
        rx.await.map_err(|_| SpfsError::WorkerGone)?
    }

    pub async fn delete(&self, filename: &str) -> Result<(), SpfsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Delete {
                filename: filename.to_owned(),
                reply,
            })
            .map_err(|_| SpfsError::WorkerGone)?;
        rx.await.map_err(|_| SpfsError::WorkerGone)?
    }

    pub async fn check(&self, filename: &str) -> Result<(bool, u64), SpfsError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Check {
                filename: filename.to_owned(),
                reply,
            })
            .map_err(|_| SpfsError::WorkerGone)?;
        rx.await.map_err(|_| SpfsError::WorkerGone)?
    }
}

struct OpenFile {
    file: File,
    filename: String,
}

fn worker_loop(root: PathBuf, mut rx: mpsc::UnboundedReceiver<Command>, logger: ArcLogger) {
    let mut handles: HashMap<u64, OpenFile> = HashMap::new();
    let mut by_name: HashMap<String, u64> = HashMap::new();
    let mut next_id: u64 = 1;

    while let Some(cmd) = rx.blocking_recv() {
        match cmd {
            Command::Open { filename, reply } => {
                let result = (|| -> Result<FileHandle, SpfsError> {
                    if let Some(&id) = by_name.get(&filename) {
                        return Ok(FileHandle(id));
                    }
                    let path = resolve(&root, &filename)?;
                    let file = OpenOptions::new()
                        .create(true)
                        .read(true)
                        .append(true)
                        .open(&path)?;
                    let id = next_id;
                    next_id += 1;
                    handles.insert(
                        id,
                        OpenFile {
                            file,
                            filename: filename.clone(),
                        },
                    );
                    by_name.insert(filename, id);
                    Ok(FileHandle(id))
                })();
                logger.log(LogEntry::new(
                    LogLevel::Debug,
                    "spfs",
                    format!("open: {result:?}"),
                ));
                reply.send(result).ok();
            }
            Command::Write {
                handle,
                bytes,
                reply,
            } => {
                let result = (|| -> Result<(), SpfsError> {
                    let open_file = handles.get_mut(&handle.0).ok_or(SpfsError::FileNotOpen)?;
                    let want = bytes.len();
                    let wrote = open_file.file.write(&bytes)?;
                    if wrote != want {
                        return Err(SpfsError::WriteIncomplete { wrote, want });
                    }
                    Ok(())
                })();
                reply.send(result).ok();
            }
            Command::Read {
                handle,
                offset,
                len,
                reply,
            } => {
                let result = (|| -> Result<Vec<u8>, SpfsError> {
                    let open_file = handles.get_mut(&handle.0).ok_or(SpfsError::FileNotOpen)?;
                    let cursor = open_file.file.stream_position()?;
                    open_file.file.seek(SeekFrom::Start(offset))?;
                    let mut buf = vec![0u8; len];
                    let read_result = open_file.file.read_exact(&mut buf);
                    open_file.file.seek(SeekFrom::Start(cursor))?;
                    match read_result {
                        Ok(()) => Ok(buf),
                        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                            let mut short = vec![0u8; 0];
                            open_file.file.seek(SeekFrom::Start(offset))?;
                            open_file.file.read_to_end(&mut short)?;
                            open_file.file.seek(SeekFrom::Start(cursor))?;
                            Ok(short)
                        }
                        Err(e) => Err(e.into()),
                    }
                })();
                reply.send(result).ok();
            }
            Command::Close { handle, reply } => {
                let result = if let Some(open_file) = handles.remove(&handle.0) {
                    by_name.remove(&open_file.filename);
                    Ok(())
                } else {
                    Err(SpfsError::FileNotOpen)
                };
                reply.send(result).ok();
            }
            Command::Delete { filename, reply } => {
                let result = (|| -> Result<(), SpfsError> {
                    let path = resolve(&root, &filename)?;
                    if by_name.contains_key(&filename) {
                        return Err(SpfsError::AlreadyOpen(filename));
                    }
                    match std::fs::remove_file(&path) {
                        Ok(()) => Ok(()),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                        Err(e) => Err(e.into()),
                    }
                })();
                reply.send(result).ok();
            }
            Command::Check { filename, reply } => {
                let result = (|| -> Result<(bool, u64), SpfsError> {
                    let path = resolve(&root, &filename)?;
                    match std::fs::metadata(&path) {
                        Ok(meta) => Ok((true, meta.len())),
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok((false, 0)),
                        Err(e) => Err(e.into()),
                    }
                })();
                reply.send(result).ok();
            }
        }
    }
}

/// Rejects path traversal (`..`), absolute paths, and empty
/// components so a filename can never escape `root`.
fn resolve(root: &Path, filename: &str) -> Result<PathBuf, SpfsError> {
    if filename.is_empty() {
        return Err(SpfsError::InvalidFilename(filename.to_owned()));
    }
    let path = Path::new(filename);
    if path.is_absolute() {
        return Err(SpfsError::InvalidFilename(filename.to_owned()));
    }
    for component in path.components() {
        match component {
            std::path::Component::Normal(_) => {}
            _ => return Err(SpfsError::InvalidFilename(filename.to_owned())),
        }
    }
    Ok(root.join(path))
}

#[cfg(test)]
mod test {
    use super::*;
    use common::DummyLogger;
    use pretty_assertions::assert_eq;

    fn new_spfs() -> (Spfs, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let spfs = Spfs::new(dir.path().to_path_buf(), DummyLogger::new());
        (spfs, dir)
    }

    #[tokio::test]
    async fn write_then_read_back() {
        let (spfs, _dir) = new_spfs();
        let h = spfs.open("a.bin").await.unwrap();
        spfs.write(h, vec![1, 2, 3, 4, 5]).await.unwrap();
        let read = spfs.read(h, 1, 3).await.unwrap();
        assert_eq!(read, vec![2, 3, 4]);
        spfs.close(h).await.unwrap();
    }

    #[tokio::test]
    async fn read_does_not_move_write_cursor() {
        let (spfs, _dir) = new_spfs();
        let h = spfs.open("a.bin").await.unwrap();
        spfs.write(h, vec![1, 2, 3]).await.unwrap();
        spfs.read(h, 0, 1).await.unwrap();
        spfs.write(h, vec![4, 5]).await.unwrap();
        let all = spfs.read(h, 0, 5).await.unwrap();
        assert_eq!(all, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn opening_an_already_open_filename_is_a_no_op() {
        let (spfs, _dir) = new_spfs();
        let h1 = spfs.open("a.bin").await.unwrap();
        let h2 = spfs.open("a.bin").await.unwrap();
        assert_eq!(h1, h2);
        spfs.write(h1, vec![1, 2, 3]).await.unwrap();
        assert_eq!(spfs.read(h2, 0, 3).await.unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn reopen_after_close_succeeds() {
        let (spfs, _dir) = new_spfs();
        let h = spfs.open("a.bin").await.unwrap();
        spfs.close(h).await.unwrap();
        let h2 = spfs.open("a.bin").await.unwrap();
        spfs.close(h2).await.unwrap();
    }

    #[tokio::test]
    async fn check_reports_existence_and_size() {
        let (spfs, _dir) = new_spfs();
        let (exists, size) = spfs.check("a.bin").await.unwrap();
        assert_eq!((exists, size), (false, 0));

        let h = spfs.open("a.bin").await.unwrap();
        spfs.write(h, vec![1, 2, 3]).await.unwrap();
        spfs.close(h).await.unwrap();

        let (exists, size) = spfs.check("a.bin").await.unwrap();
        assert_eq!((exists, size), (true, 3));
    }

    #[tokio::test]
    async fn delete_removes_file() {
        let (spfs, _dir) = new_spfs();
        let h = spfs.open("a.bin").await.unwrap();
        spfs.close(h).await.unwrap();
        spfs.delete("a.bin").await.unwrap();
        let (exists, _) = spfs.check("a.bin").await.unwrap();
        assert!(!exists);
    }

    #[tokio::test]
    async fn read_on_unopened_handle_is_an_error() {
        let (spfs, _dir) = new_spfs();
        let h = spfs.open("a.bin").await.unwrap();
        spfs.close(h).await.unwrap();
        let err = spfs.read(h, 0, 1).await.unwrap_err();
        assert_eq!(err, SpfsError::FileNotOpen);
    }

    #[tokio::test]
    async fn rejects_path_traversal() {
        let (spfs, _dir) = new_spfs();
        let err = spfs.open("../escape.bin").await.unwrap_err();
        assert_eq!(err, SpfsError::InvalidFilename("../escape.bin".to_owned()));
    }
}
