//! Two simulated devices exchange a WRITE followed by a READ over the
//! file service, backed on the "storage" side by a small in-memory
//! `FileBackend` — real deployments would back this with actual
//! filesystem access, which this crate deliberately doesn't implement.

#[path = "support.rs"]
mod support;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rdtlink::broker::RequestBroker;
use rdtlink::config::EngineConfig;
use rdtlink::files::{DirEntry, FileBackend, FileService};
use rdtlink::FileError;

#[derive(Default)]
struct MemoryFs {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FileBackend for MemoryFs {
    fn list(&self, path: &str) -> Result<Vec<DirEntry>, FileError> {
        let files = self.files.lock().unwrap();
        if path != "/" {
            return Err(FileError::NotFound);
        }
        Ok(files
            .iter()
            .map(|(name, data)| DirEntry { name: name.clone(), size: data.len() as u32, is_dir: false })
            .collect())
    }

    fn read(&self, path: &str, offset: u32, len: u32) -> Result<Vec<u8>, FileError> {
        let files = self.files.lock().unwrap();
        let data = files.get(path).ok_or(FileError::NotFound)?;
        let offset = offset as usize;
        let end = (offset + len as usize).min(data.len());
        Ok(data.get(offset..end).unwrap_or_default().to_vec())
    }

    fn write(&self, path: &str, offset: Option<u32>, data: &[u8]) -> Result<usize, FileError> {
        let mut files = self.files.lock().unwrap();
        let entry = files.entry(path.to_string()).or_default();
        match offset {
            None => entry.extend_from_slice(data),
            Some(offset) => {
                let offset = offset as usize;
                entry.resize(entry.len().max(offset + data.len()), 0);
                entry[offset..offset + data.len()].copy_from_slice(data);
            }
        }
        Ok(data.len())
    }
}

fn main() {
    env_logger::init();

    let storage_node = support::build_node(EngineConfig::default());
    let client_node = support::build_node(EngineConfig::default());
    support::connect(&storage_node, &client_node);
    support::pair_directly(&storage_node, &client_node);

    let storage_broker = Arc::new(RequestBroker::new(storage_node.engine.clone()));
    let storage = FileService::new(storage_node.engine.clone(), storage_broker, Arc::new(MemoryFs::default()));
    storage.spawn();

    let client_broker = Arc::new(RequestBroker::new(client_node.engine.clone()));
    let client = FileService::new(client_node.engine.clone(), client_broker, Arc::new(MemoryFs::default()));
    client.spawn();

    let timeout = Duration::from_secs(2);
    let (written, code) = client.write("greeting.txt", None, b"hello over the air", timeout).expect("write");
    println!("wrote {} bytes (return_code={})", written, code);

    let mut buf = [0u8; 64];
    let (read, code) = client.read("greeting.txt", 0, 19, &mut buf, timeout).expect("read");
    println!("read back: {:?} (return_code={})", String::from_utf8_lossy(&buf[..read]), code);

    let (entries, code) = client.list_entries("/", timeout).expect("list");
    println!("directory listing (return_code={}): {:?}", code, entries);
}
