//! File Exchange (spec §4.6): a short-lived stream endpoint serving
//! upload/download/delete over an in-memory store, broadcasting offers and
//! deletions through the Control Session.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use log::{debug, info};
use parking_lot::RwLock;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use crate::connections::ConnectionRegistry;
use crate::error::{HubError, HubResult};
use crate::protocol::timestamp;
use crate::registry::{ParticipantId, Registry};

/// A file held in the in-memory store (spec §3).
pub struct SharedFile {
    pub id: u32,
    pub filename: String,
    pub size: u64,
    pub uploader_id: ParticipantId,
    pub uploader_username: String,
    pub bytes: Vec<u8>,
    #[allow(dead_code)] // carried for parity with spec §3's record shape
    pub timestamp: String,
}

#[derive(Default)]
struct Store {
    files: HashMap<u32, SharedFile>,
}

/// In-memory file store plus the TCP endpoint that serves it.
pub struct FileExchange {
    store: RwLock<Store>,
    next_id: AtomicU32,
    registry: Arc<Registry>,
    max_file_size: u64,
}

impl FileExchange {
    #[must_use]
    pub fn new(registry: Arc<Registry>, max_file_size: u64) -> Arc<Self> {
        Arc::new(Self {
            store: RwLock::new(Store::default()),
            next_id: AtomicU32::new(0),
            registry,
            max_file_size,
        })
    }

    fn insert(&self, filename: String, uploader_id: ParticipantId, uploader_username: String, bytes: Vec<u8>) -> u32 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let file = SharedFile {
            id,
            filename,
            size: bytes.len() as u64,
            uploader_id,
            uploader_username,
            bytes,
            timestamp: timestamp(),
        };
        self.store.write().files.insert(id, file);
        id
    }

    fn get_for_download(&self, id: u32) -> Option<(String, u64, Vec<u8>)> {
        self.store
            .read()
            .files
            .get(&id)
            .map(|f| (f.filename.clone(), f.size, f.bytes.clone()))
    }

    fn delete(&self, id: u32, by: ParticipantId) -> HubResult<()> {
        let mut store = self.store.write();
        match store.files.get(&id) {
            None => Err(HubError::FileNotFound(id)),
            Some(file) if file.uploader_id != by => {
                Err(HubError::UnauthorizedDelete { file_id: id, by })
            }
            Some(_) => {
                store.files.remove(&id);
                Ok(())
            }
        }
    }

    /// Runs the file-exchange TCP acceptor: one request per connection.
    pub async fn run(
        self: Arc<Self>,
        listener: TcpListener,
        connections: Arc<ConnectionRegistry>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("file exchange acceptor shutting down");
                    return;
                }
                accepted = listener.accept() => {
                    let Ok((stream, addr)) = accepted else { continue };
                    let exchange = Arc::clone(&self);
                    let guard = connections.register();
                    tokio::spawn(async move {
                        let _guard = guard;
                        if let Err(err) = exchange.serve_one(stream).await {
                            debug!("file session from {addr} ended: {err}");
                        }
                    });
                }
            }
        }
    }

    async fn serve_one(&self, stream: TcpStream) -> HubResult<()> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .map_err(HubError::StreamIo)?;
        if n == 0 {
            return Ok(());
        }
        let line = line.trim_end_matches(['\r', '\n']);

        if let Some(rest) = line.strip_prefix("UPLOAD:") {
            self.handle_upload(&mut reader, rest).await
        } else if let Some(rest) = line.strip_prefix("DOWNLOAD:") {
            self.handle_download(&mut reader, rest).await
        } else if let Some(rest) = line.strip_prefix("DELETE:") {
            self.handle_delete(&mut reader, rest).await
        } else {
            Err(HubError::Protocol(format!("unrecognized file command: {line}")))
        }
    }

    async fn handle_upload(
        &self,
        reader: &mut BufReader<TcpStream>,
        rest: &str,
    ) -> HubResult<()> {
        let mut parts = rest.splitn(3, ':');
        let (Some(pid_str), Some(filename), Some(size_str)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return self.reply_error(reader, "malformed UPLOAD").await;
        };
        let Ok(uploader_id) = pid_str.parse::<ParticipantId>() else {
            return self.reply_error(reader, "invalid participant id").await;
        };
        let Ok(size) = size_str.parse::<u64>() else {
            return self.reply_error(reader, "invalid size").await;
        };

        if size > self.max_file_size {
            let err = HubError::UploadTooLarge {
                size,
                limit: self.max_file_size,
            };
            return self.reply_error(reader, &err.to_string()).await;
        }

        let mut body = vec![0u8; size as usize];
        let mut received = 0usize;
        while received < body.len() {
            match reader.read(&mut body[received..]).await {
                Ok(0) => break,
                Ok(n) => received += n,
                Err(_) => break,
            }
        }
        if received < body.len() {
            // Partial upload: discard and report the error (spec §7
            // UPLOAD-INCOMPLETE), never storing the file.
            let err = HubError::UploadIncomplete {
                expected: size,
                got: received as u64,
            };
            return self.reply_error(reader, &err.to_string()).await;
        }

        let Some(uploader) = self.registry.lookup(uploader_id) else {
            return self.reply_error(reader, "unknown participant").await;
        };
        let uploader_username = uploader.username.clone();
        let file_id = self.insert(filename.to_string(), uploader_id, uploader_username.clone(), body);

        reader
            .get_mut()
            .write_all(format!("SUCCESS:{file_id}").as_bytes())
            .await
            .map_err(HubError::StreamIo)?;

        self.registry.broadcast(&format!(
            "FILE_OFFER:{file_id}:{filename}:{size}:{uploader_username}:{uploader_id}"
        ));
        Ok(())
    }

    async fn handle_download(
        &self,
        reader: &mut BufReader<TcpStream>,
        rest: &str,
    ) -> HubResult<()> {
        let Ok(file_id) = rest.parse::<u32>() else {
            return self.reply_error(reader, "invalid file id").await;
        };
        match self.get_for_download(file_id) {
            None => self.reply_error(reader, "File not found").await,
            Some((filename, size, bytes)) => {
                let stream = reader.get_mut();
                stream
                    .write_all(format!("FILE:{filename}:{size}\n").as_bytes())
                    .await
                    .map_err(HubError::StreamIo)?;
                stream.write_all(&bytes).await.map_err(HubError::StreamIo)?;
                Ok(())
            }
        }
    }

    async fn handle_delete(
        &self,
        reader: &mut BufReader<TcpStream>,
        rest: &str,
    ) -> HubResult<()> {
        let mut parts = rest.splitn(2, ':');
        let (Some(id_str), Some(pid_str)) = (parts.next(), parts.next()) else {
            return self.reply_error(reader, "malformed DELETE").await;
        };
        let (Ok(file_id), Ok(by)) = (id_str.parse::<u32>(), pid_str.parse::<ParticipantId>()) else {
            return self.reply_error(reader, "malformed DELETE").await;
        };

        match self.delete(file_id, by) {
            Ok(()) => {
                reader
                    .get_mut()
                    .write_all(format!("DELETE_SUCCESS:{file_id}").as_bytes())
                    .await
                    .map_err(HubError::StreamIo)?;
                self.registry.broadcast(&format!("FILE_DELETED:{file_id}"));
                Ok(())
            }
            Err(HubError::FileNotFound(_)) => self.reply_error(reader, "File not found").await,
            Err(HubError::UnauthorizedDelete { .. }) => {
                self.reply_error(reader, "not the uploader").await
            }
            Err(other) => Err(other),
        }
    }

    async fn reply_error(&self, reader: &mut BufReader<TcpStream>, reason: &str) -> HubResult<()> {
        reader
            .get_mut()
            .write_all(format!("ERROR:{reason}\n").as_bytes())
            .await
            .map_err(HubError::StreamIo)
    }
}
