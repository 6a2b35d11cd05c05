//! File access service: LIST/READ/WRITE framing and dispatch over the
//! broker/engine pair on [`CHANNEL_FILES`]. Structurally this is the
//! broker's other consumer besides the parameter registry — same
//! request/response shape, but correlated by a 16-bit `request_id`
//! instead of a `message_type`, because the three commands here share
//! return codes and a request/response pair alone can't disambiguate
//! two outstanding READs (see [`crate::broker`]).
//!
//! OS-level file I/O is an explicit non-goal: this module owns the wire
//! header codec and command dispatch only, against a [`FileBackend`]
//! trait the embedder implements over whatever storage backs it.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::debug;

use crate::broker::{CorrelationKey, RequestBroker};
use crate::config::{CHANNEL_FILES, ENGINE_TICK};
use crate::engine::Engine;
use crate::error::{BrokerError, FileError};

const CMD_LIST: u8 = 1;
const CMD_LIST_RESP: u8 = 2;
const CMD_READ: u8 = 3;
const CMD_READ_RESP: u8 = 4;
const CMD_WRITE: u8 = 5;
const CMD_WRITE_RESP: u8 = 6;

/// `offset == APPEND` means "append" for writes (§6).
pub const APPEND: u32 = 0xFFFF_FFFF;

/// Fixed header length: command, return_code, request_id, offset,
/// data_length, path_length, reserved[3].
const HEADER_LEN: usize = 1 + 1 + 2 + 4 + 4 + 1 + 3;

/// A path can be at most 255 bytes — `path_length` is a wire `u8`.
const MAX_PATH_LEN: usize = u8::MAX as usize;

/// One entry as returned by [`FileBackend::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub size: u32,
    pub is_dir: bool,
}

/// The embedder-supplied seam at which real storage plugs in. This crate
/// never touches a filesystem itself.
pub trait FileBackend: Send + Sync {
    fn list(&self, path: &str) -> Result<Vec<DirEntry>, FileError>;
    fn read(&self, path: &str, offset: u32, len: u32) -> Result<Vec<u8>, FileError>;
    /// `offset` is `None` for an append write (wire offset [`APPEND`]).
    fn write(&self, path: &str, offset: Option<u32>, data: &[u8]) -> Result<usize, FileError>;
}

struct FileHeader<'a> {
    command: u8,
    return_code: u8,
    request_id: u16,
    offset: u32,
    path: &'a str,
    data: &'a [u8],
}

fn encode_header(header: &FileHeader) -> Vec<u8> {
    let path_bytes = header.path.as_bytes();
    let mut block = Vec::with_capacity(HEADER_LEN + path_bytes.len() + header.data.len());
    block.push(header.command);
    block.push(header.return_code);
    block.extend_from_slice(&header.request_id.to_le_bytes());
    block.extend_from_slice(&header.offset.to_le_bytes());
    block.extend_from_slice(&(header.data.len() as u32).to_le_bytes());
    block.push(path_bytes.len() as u8);
    block.extend_from_slice(&[0u8; 3]);
    block.extend_from_slice(path_bytes);
    block.extend_from_slice(header.data);
    block
}

struct DecodedHeader {
    command: u8,
    return_code: u8,
    request_id: u16,
    offset: u32,
    path: String,
    data: Vec<u8>,
}

fn decode_header(block: &[u8]) -> Option<DecodedHeader> {
    if block.len() < HEADER_LEN {
        return None;
    }
    let command = block[0];
    let return_code = block[1];
    let request_id = u16::from_le_bytes(block[2..4].try_into().ok()?);
    let offset = u32::from_le_bytes(block[4..8].try_into().ok()?);
    let data_length = u32::from_le_bytes(block[8..12].try_into().ok()?) as usize;
    let path_length = block[12] as usize;

    let path_start = HEADER_LEN;
    let path_end = path_start.checked_add(path_length)?;
    let data_end = path_end.checked_add(data_length)?;
    if data_end != block.len() {
        return None;
    }

    let path = String::from_utf8(block[path_start..path_end].to_vec()).ok()?;
    let data = block[path_end..data_end].to_vec();
    Some(DecodedHeader { command, return_code, request_id, offset, path, data })
}

/// Serialize [`DirEntry`] values into a LIST_RESP payload: for each entry,
/// `{name_len: u8, name: bytes, size: u32 LE, is_dir: u8}`. The wire
/// format for listings is not dictated by the external spec beyond "a
/// directory-list segment scan"; this is this crate's own framing for it.
fn encode_entries(entries: &[DirEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for entry in entries {
        let name = entry.name.as_bytes();
        out.push(name.len().min(MAX_PATH_LEN) as u8);
        out.extend_from_slice(&name[..name.len().min(MAX_PATH_LEN)]);
        out.extend_from_slice(&entry.size.to_le_bytes());
        out.push(entry.is_dir as u8);
    }
    out
}

/// Parse a LIST_RESP payload back into [`DirEntry`] values. Malformed
/// trailing bytes stop the scan rather than erroring — a short read is
/// treated as "as many entries as fit".
pub fn decode_entries(data: &[u8]) -> Vec<DirEntry> {
    let mut entries = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let Some(&name_len) = data.get(offset) else { break };
        let name_len = name_len as usize;
        offset += 1;
        if offset + name_len + 4 + 1 > data.len() {
            break;
        }
        let name = String::from_utf8_lossy(&data[offset..offset + name_len]).into_owned();
        offset += name_len;
        let size = u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap());
        offset += 4;
        let is_dir = data[offset] != 0;
        offset += 1;
        entries.push(DirEntry { name, size, is_dir });
    }
    entries
}

/// Owns request-id allocation and the background thread that services
/// incoming LIST/READ/WRITE requests and correlates incoming *_RESP
/// frames back to the broker.
pub struct FileService {
    engine: Arc<Engine>,
    broker: Arc<RequestBroker>,
    backend: Arc<dyn FileBackend>,
    next_request_id: AtomicU16,
}

impl FileService {
    pub fn new(engine: Arc<Engine>, broker: Arc<RequestBroker>, backend: Arc<dyn FileBackend>) -> Arc<Self> {
        Arc::new(FileService {
            engine,
            broker,
            backend,
            next_request_id: AtomicU16::new(1),
        })
    }

    /// Allocate the next request id, wrapping `0 -> 1` (`0` is never
    /// issued — it would be indistinguishable from "no request").
    fn alloc_request_id(&self) -> u16 {
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    /// Blocking directory listing. On success, `resp_buf` receives the
    /// raw LIST_RESP payload (decode with [`decode_entries`]).
    pub fn list(&self, path: &str, resp_buf: &mut [u8], timeout: Duration) -> Result<(usize, u8), BrokerError> {
        let request_id = self.alloc_request_id();
        let header = FileHeader { command: CMD_LIST, return_code: 0, request_id, offset: 0, path, data: &[] };
        let request = encode_header(&header);
        self.broker.request_blocking(CHANNEL_FILES, CorrelationKey::RequestId(request_id), request, resp_buf, timeout)
    }

    /// Convenience wrapper over [`FileService::list`] that parses the
    /// response payload for the caller.
    pub fn list_entries(&self, path: &str, timeout: Duration) -> Result<(Vec<DirEntry>, u8), BrokerError> {
        let mut buf = vec![0u8; self.engine_max_block_size()];
        let (len, code) = self.list(path, &mut buf, timeout)?;
        Ok((decode_entries(&buf[..len]), code))
    }

    /// Blocking read of up to `len` bytes starting at `offset`.
    pub fn read(&self, path: &str, offset: u32, len: u32, resp_buf: &mut [u8], timeout: Duration) -> Result<(usize, u8), BrokerError> {
        let request_id = self.alloc_request_id();
        let length_bytes = len.to_le_bytes();
        let header = FileHeader { command: CMD_READ, return_code: 0, request_id, offset, path, data: &length_bytes };
        let request = encode_header(&header);
        self.broker.request_blocking(CHANNEL_FILES, CorrelationKey::RequestId(request_id), request, resp_buf, timeout)
    }

    /// Blocking write. `offset = None` requests an append (wire
    /// [`APPEND`]). The response payload, if any, is the number of bytes
    /// the backend reports having written, as a 4-byte LE integer.
    pub fn write(&self, path: &str, offset: Option<u32>, data: &[u8], timeout: Duration) -> Result<(usize, u8), BrokerError> {
        let request_id = self.alloc_request_id();
        let wire_offset = offset.unwrap_or(APPEND);
        let header = FileHeader { command: CMD_WRITE, return_code: 0, request_id, offset: wire_offset, path, data };
        let request = encode_header(&header);
        let mut resp_buf = [0u8; 4];
        let (len, return_code) =
            self.broker.request_blocking(CHANNEL_FILES, CorrelationKey::RequestId(request_id), request, &mut resp_buf, timeout)?;
        let written = if len == 4 { u32::from_le_bytes(resp_buf) as usize } else { 0 };
        Ok((written, return_code))
    }

    fn engine_max_block_size(&self) -> usize {
        self.engine.channel_max_block_size(CHANNEL_FILES).unwrap_or(4096)
    }

    /// Drain every block currently sitting in the files rx_queue.
    fn drain(&self) {
        while let Some(block) = self.engine.try_recv(CHANNEL_FILES) {
            self.handle_block(block);
        }
    }

    fn handle_block(&self, block: Vec<u8>) {
        let Some(header) = decode_header(&block) else {
            debug!("files: dropping malformed block");
            return;
        };

        match header.command {
            CMD_LIST => self.service_list(&header),
            CMD_READ => self.service_read(&header),
            CMD_WRITE => self.service_write(&header),
            CMD_LIST_RESP | CMD_READ_RESP | CMD_WRITE_RESP => {
                self.broker.deliver_response(
                    CHANNEL_FILES,
                    CorrelationKey::RequestId(header.request_id),
                    header.data,
                    header.return_code,
                );
            }
            other => debug!("files: unknown command {}", other),
        }
    }

    fn oversized(path: &str, data_len: usize, max_block_size: usize) -> bool {
        path.len() > MAX_PATH_LEN || data_len + HEADER_LEN + path.len() > max_block_size
    }

    fn service_list(&self, request: &DecodedHeader) {
        let max_block_size = self.engine_max_block_size();
        if request.path.len() > MAX_PATH_LEN {
            self.reply(CMD_LIST_RESP, request.request_id, FileError::Oversized.code(), &[]);
            return;
        }
        match self.backend.list(&request.path) {
            Ok(entries) => {
                let payload = encode_entries(&entries);
                if payload.len() + HEADER_LEN + request.path.len() > max_block_size {
                    self.reply(CMD_LIST_RESP, request.request_id, FileError::Oversized.code(), &[]);
                } else {
                    self.reply(CMD_LIST_RESP, request.request_id, 0, &payload);
                }
            }
            Err(err) => self.reply(CMD_LIST_RESP, request.request_id, err.code(), &[]),
        }
    }

    fn service_read(&self, request: &DecodedHeader) {
        if request.path.len() > MAX_PATH_LEN {
            self.reply(CMD_READ_RESP, request.request_id, FileError::Oversized.code(), &[]);
            return;
        }
        let Some(len_bytes) = request.data.get(0..4) else {
            self.reply(CMD_READ_RESP, request.request_id, FileError::Internal.code(), &[]);
            return;
        };
        let len = u32::from_le_bytes(len_bytes.try_into().unwrap());
        let max_block_size = self.engine_max_block_size();
        if len as usize + HEADER_LEN + request.path.len() > max_block_size {
            self.reply(CMD_READ_RESP, request.request_id, FileError::Oversized.code(), &[]);
            return;
        }
        match self.backend.read(&request.path, request.offset, len) {
            Ok(data) => self.reply(CMD_READ_RESP, request.request_id, 0, &data),
            Err(err) => self.reply(CMD_READ_RESP, request.request_id, err.code(), &[]),
        }
    }

    fn service_write(&self, request: &DecodedHeader) {
        let max_block_size = self.engine_max_block_size();
        if Self::oversized(&request.path, request.data.len(), max_block_size) {
            self.reply(CMD_WRITE_RESP, request.request_id, FileError::Oversized.code(), &[]);
            return;
        }
        let offset = if request.offset == APPEND { None } else { Some(request.offset) };
        match self.backend.write(&request.path, offset, &request.data) {
            Ok(written) => self.reply(CMD_WRITE_RESP, request.request_id, 0, &(written as u32).to_le_bytes()),
            Err(err) => self.reply(CMD_WRITE_RESP, request.request_id, err.code(), &[]),
        }
    }

    fn reply(&self, command: u8, request_id: u16, return_code: u8, data: &[u8]) {
        let header = FileHeader { command, return_code, request_id, offset: 0, path: "", data };
        let response = encode_header(&header);
        if self.engine.submit_block(CHANNEL_FILES, response, ENGINE_TICK).is_err() {
            debug!("files: failed to submit response for request_id {}", request_id);
        }
    }

    /// Spawn the background thread that drains the files channel and
    /// services/correlates every block that arrives on it.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let service = self.clone();
        thread::spawn(move || loop {
            service.engine.wait_for_delivery(CHANNEL_FILES, ENGINE_TICK);
            service.drain();
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::link::mock::MockLink;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct MemoryFs {
        files: StdMutex<HashMap<String, Vec<u8>>>,
    }

    impl FileBackend for MemoryFs {
        fn list(&self, path: &str) -> Result<Vec<DirEntry>, FileError> {
            let files = self.files.lock().unwrap();
            if path == "/" {
                Ok(files.keys().map(|name| DirEntry { name: name.clone(), size: files[name].len() as u32, is_dir: false }).collect())
            } else {
                Err(FileError::NotFound)
            }
        }

        fn read(&self, path: &str, offset: u32, len: u32) -> Result<Vec<u8>, FileError> {
            let files = self.files.lock().unwrap();
            let data = files.get(path).ok_or(FileError::NotFound)?;
            let offset = offset as usize;
            if offset > data.len() {
                return Ok(Vec::new());
            }
            let end = (offset + len as usize).min(data.len());
            Ok(data[offset..end].to_vec())
        }

        fn write(&self, path: &str, offset: Option<u32>, data: &[u8]) -> Result<usize, FileError> {
            let mut files = self.files.lock().unwrap();
            let entry = files.entry(path.to_string()).or_default();
            match offset {
                None => entry.extend_from_slice(data),
                Some(offset) => {
                    let offset = offset as usize;
                    if entry.len() < offset {
                        entry.resize(offset, 0);
                    }
                    let end = offset + data.len();
                    if entry.len() < end {
                        entry.resize(end, 0);
                    }
                    entry[offset..end].copy_from_slice(data);
                }
            }
            Ok(data.len())
        }
    }

    fn service() -> (Arc<FileService>, Arc<Engine>) {
        let link = Arc::new(MockLink::new());
        let engine = Engine::new(link, EngineConfig::default());
        let broker = Arc::new(RequestBroker::new(engine.clone()));
        let backend = Arc::new(MemoryFs::default());
        (FileService::new(engine.clone(), broker, backend), engine)
    }

    #[test]
    fn header_roundtrip() {
        let header = FileHeader { command: CMD_WRITE, return_code: 0, request_id: 7, offset: 42, path: "a/b.txt", data: &[1, 2, 3] };
        let encoded = encode_header(&header);
        let decoded = decode_header(&encoded).expect("valid header");
        assert_eq!(decoded.command, CMD_WRITE);
        assert_eq!(decoded.request_id, 7);
        assert_eq!(decoded.offset, 42);
        assert_eq!(decoded.path, "a/b.txt");
        assert_eq!(decoded.data, vec![1, 2, 3]);
    }

    #[test]
    fn entries_roundtrip() {
        let entries = vec![
            DirEntry { name: "a.txt".into(), size: 10, is_dir: false },
            DirEntry { name: "sub".into(), size: 0, is_dir: true },
        ];
        let encoded = encode_entries(&entries);
        assert_eq!(decode_entries(&encoded), entries);
    }

    #[test]
    fn write_then_read_roundtrip() {
        let (service, _engine) = service();
        service.handle_block(encode_header(&FileHeader { command: CMD_WRITE, return_code: 0, request_id: 1, offset: 0, path: "f.bin", data: b"hello" }));
        let reply = service.engine.try_pop_tx(CHANNEL_FILES).expect("a WRITE_RESP block");
        let decoded = decode_header(&reply).unwrap();
        assert_eq!(decoded.command, CMD_WRITE_RESP);
        assert_eq!(decoded.return_code, 0);
        assert_eq!(u32::from_le_bytes(decoded.data.try_into().unwrap()), 5);

        service.handle_block(encode_header(&FileHeader { command: CMD_READ, return_code: 0, request_id: 2, offset: 0, path: "f.bin", data: &5u32.to_le_bytes() }));
        let reply = service.engine.try_pop_tx(CHANNEL_FILES).expect("a READ_RESP block");
        let decoded = decode_header(&reply).unwrap();
        assert_eq!(decoded.command, CMD_READ_RESP);
        assert_eq!(decoded.return_code, 0);
        assert_eq!(decoded.data, b"hello".to_vec());
    }

    #[test]
    fn read_unknown_file_returns_not_found() {
        let (service, _engine) = service();
        service.handle_block(encode_header(&FileHeader { command: CMD_READ, return_code: 0, request_id: 3, offset: 0, path: "missing", data: &16u32.to_le_bytes() }));
        let reply = service.engine.try_pop_tx(CHANNEL_FILES).expect("a READ_RESP block");
        let decoded = decode_header(&reply).unwrap();
        assert_eq!(decoded.return_code, FileError::NotFound.code());
    }

    #[test]
    fn oversized_path_is_rejected_before_reaching_backend() {
        let (service, _engine) = service();
        let long_path: String = "x".repeat(MAX_PATH_LEN + 1);
        // A path this long cannot even be framed (path_length is a u8),
        // so build the header by hand with a truncated on-wire length
        // to exercise the service-side guard directly.
        let header = DecodedHeader { command: CMD_LIST, return_code: 0, request_id: 9, offset: 0, path: long_path, data: Vec::new() };
        service.service_list(&header);
        let reply = service.engine.try_pop_tx(CHANNEL_FILES).expect("a LIST_RESP block");
        let decoded = decode_header(&reply).unwrap();
        assert_eq!(decoded.return_code, FileError::Oversized.code());
    }

    #[test]
    fn resp_blocks_are_handed_to_the_broker() {
        let (service, _engine) = service();
        let mut resp_buf = [0u8; 16];
        let client = service.clone();
        let handle = thread::spawn(move || client.read("f.bin", 0, 5, &mut resp_buf, Duration::from_secs(1)).map(|result| (result, resp_buf)));

        thread::sleep(Duration::from_millis(20));
        // Whatever request_id the client allocated is the first one (1).
        service.broker.deliver_response(CHANNEL_FILES, CorrelationKey::RequestId(1), b"hello".to_vec(), 0);

        let (result, resp_buf) = handle.join().unwrap().unwrap();
        assert_eq!(result, (5, 0));
        assert_eq!(&resp_buf[..5], b"hello");
    }
}
