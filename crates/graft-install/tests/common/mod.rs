//! Shared harness for pipeline integration tests.

use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use graft_install::{
    ArchiveFetcher, ArchiveTransport, CredentialProvider, FetchError, FetchSettings, Installer,
    RequestOptions, TransportResponse,
};
use graft_storage::{KvStore, MemoryKvStore};
use tempfile::TempDir;
use url::Url;
use zip::write::SimpleFileOptions;

/// One recorded archive request.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    /// URL requested.
    pub url: Url,
    /// Options after credentials were applied.
    pub options: RequestOptions,
}

/// Transport that answers from a script and records every call.
///
/// Once the script runs out every request gets a 404.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<TransportResponse>>,
    seen: Mutex<Vec<SeenRequest>>,
}

#[allow(dead_code)]
impl ScriptedTransport {
    /// Queue a 200 response carrying `body`.
    pub fn push_archive(&self, body: Vec<u8>) {
        self.push(200, body);
    }

    /// Queue an arbitrary response.
    pub fn push(&self, status: u16, body: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .push_back(TransportResponse { status, body });
    }

    /// Requests issued so far.
    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ArchiveTransport for ScriptedTransport {
    async fn get(
        &self,
        url: &Url,
        options: &RequestOptions,
        _max_bytes: u64,
    ) -> Result<TransportResponse, FetchError> {
        self.seen.lock().unwrap().push(SeenRequest {
            url: url.clone(),
            options: options.clone(),
        });
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TransportResponse {
                status: 404,
                body: Vec::new(),
            }))
    }
}

/// An installer over a temporary install root, an in-memory store and a
/// scripted transport.
#[allow(dead_code)]
pub struct PipelineHarness {
    /// The installer under test.
    pub installer: Installer,
    /// The scripted transport behind the installer.
    pub transport: Arc<ScriptedTransport>,
    /// The store mappings and tokens live in.
    pub store: Arc<MemoryKvStore>,
    root: TempDir,
}

#[allow(dead_code)]
impl PipelineHarness {
    /// Harness sending requests without credentials.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Harness whose fetcher uses `credentials`.
    pub fn with_credentials(credentials: Arc<dyn CredentialProvider>) -> Self {
        Self::build(Some(credentials))
    }

    fn build(credentials: Option<Arc<dyn CredentialProvider>>) -> Self {
        let root = TempDir::new().expect("failed to create tempdir");
        let transport = Arc::new(ScriptedTransport::default());
        let store = Arc::new(MemoryKvStore::new());

        let settings = FetchSettings::new(Url::parse("https://api.github.com").unwrap());
        let mut fetcher =
            ArchiveFetcher::new(settings, Arc::clone(&transport) as Arc<dyn ArchiveTransport>);
        if let Some(credentials) = credentials {
            fetcher = fetcher.with_credentials(credentials);
        }

        let installer = Installer::new(
            root.path(),
            fetcher,
            Arc::clone(&store) as Arc<dyn KvStore>,
        );

        Self {
            installer,
            transport,
            store,
            root,
        }
    }

    /// The install root.
    pub fn root(&self) -> &Path {
        self.root.path()
    }

    /// Sorted names of the visible entries directly under the install root.
    /// Hidden lock files are skipped.
    pub fn root_entries(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.root())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .filter(|name| !name.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}

/// Build a zip archive in memory. Names ending in `/` become directories.
#[allow(dead_code)]
pub fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, data) in entries {
        if name.ends_with('/') {
            writer
                .add_directory(*name, SimpleFileOptions::default())
                .unwrap();
        } else {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// A repository snapshot the way the archive API lays it out: one
/// `{owner}-{repo}-{sha}` folder holding everything.
#[allow(dead_code)]
pub fn snapshot(prefix: &str, files: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = format!("{prefix}/");
    let paths: Vec<(String, &[u8])> = files
        .iter()
        .map(|(name, data)| (format!("{prefix}/{name}"), *data))
        .collect();

    let mut entries: Vec<(&str, &[u8])> = vec![(dir.as_str(), b"".as_slice())];
    entries.extend(paths.iter().map(|(name, data)| (name.as_str(), *data)));
    zip_of(&entries)
}
