//! Token persistence
//!
//! `TokenStore` is the seam to whatever durable backend holds tokens. Entries
//! are keyed uniquely by (api name, client id) and `save` is an upsert.
//!
//! Two adapters ship with the crate:
//! - `FileTokenStore`: a JSON file written atomically (temp file + rename,
//!   0600 permissions). A tokio Mutex serializes writes from concurrent
//!   clients sharing the file.
//! - `MemoryTokenStore`: process-local map, for embedding and tests.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::token::Token;

/// Boxed future returned by `TokenStore` methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Persistence backend for tokens.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn TokenStore>`).
pub trait TokenStore: Send + Sync {
    /// Load the token for a pair. `Ok(None)` means not found.
    fn load<'a>(&'a self, api_name: &'a str, client_id: &'a str)
    -> StoreFuture<'a, Option<Token>>;

    /// Insert or replace the token for a pair.
    fn save<'a>(
        &'a self,
        api_name: &'a str,
        client_id: &'a str,
        token: &'a Token,
    ) -> StoreFuture<'a, ()>;
}

/// Map key for a (api, client) pair.
pub fn store_key(api_name: &str, client_id: &str) -> String {
    format!("{api_name}/{client_id}")
}

/// JSON-file token store.
///
/// The file maps `"<api>/<client_id>"` to a serialized `Token`. The in-memory
/// copy is authoritative for reads; every save rewrites the whole file.
pub struct FileTokenStore {
    path: PathBuf,
    state: Mutex<HashMap<String, Token>>,
}

impl FileTokenStore {
    /// Open the store at `path`, creating an empty `{}` file if missing.
    pub async fn open(path: PathBuf) -> Result<Self> {
        let state = if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Persistence(format!("reading token file: {e}")))?;
            let tokens: HashMap<String, Token> = serde_json::from_str(&contents)
                .map_err(|e| Error::Persistence(format!("parsing token file: {e}")))?;
            info!(path = %path.display(), entries = tokens.len(), "loaded token store");
            tokens
        } else {
            info!(path = %path.display(), "token file not found, starting with empty store");
            let tokens = HashMap::new();
            write_atomic(&path, &tokens).await?;
            tokens
        };

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored tokens.
    pub async fn len(&self) -> usize {
        self.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl TokenStore for FileTokenStore {
    fn load<'a>(
        &'a self,
        api_name: &'a str,
        client_id: &'a str,
    ) -> StoreFuture<'a, Option<Token>> {
        Box::pin(async move {
            let state = self.state.lock().await;
            Ok(state.get(&store_key(api_name, client_id)).cloned())
        })
    }

    fn save<'a>(
        &'a self,
        api_name: &'a str,
        client_id: &'a str,
        token: &'a Token,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let key = store_key(api_name, client_id);
            let previous = state.insert(key.clone(), token.clone());
            if let Err(e) = write_atomic(&self.path, &state).await {
                // Keep memory consistent with what is on disk
                match previous {
                    Some(prev) => state.insert(key, prev),
                    None => state.remove(&key),
                };
                return Err(e);
            }
            debug!(api = api_name, client_id, "saved token");
            Ok(())
        })
    }
}

/// Distinguishes temp files of concurrent writers within one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write tokens to a file atomically.
///
/// Writes a temp file in the same directory and renames it over the target.
/// Permissions are 0600 since the file holds refresh tokens.
async fn write_atomic(path: &Path, data: &HashMap<String, Token>) -> Result<()> {
    let json = serde_json::to_string_pretty(data)
        .map_err(|e| Error::Serialization(format!("serializing tokens: {e}")))?;

    let dir = path
        .parent()
        .ok_or_else(|| Error::Persistence("token path has no parent directory".into()))?;

    let file_name = path
        .file_name()
        .ok_or_else(|| Error::Persistence("token path has no file name".into()))?
        .to_string_lossy();
    let tmp_path = dir.join(format!(
        ".{file_name}.tmp.{}.{}",
        std::process::id(),
        TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Persistence(format!("writing temp token file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Persistence(format!("setting token file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Persistence(format!("renaming temp token file: {e}")))?;

    debug!(path = %path.display(), "persisted tokens");
    Ok(())
}

/// Process-local token store.
#[derive(Default)]
pub struct MemoryTokenStore {
    state: Mutex<HashMap<String, Token>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with a token for a pair.
    pub async fn insert(&self, api_name: &str, client_id: &str, token: Token) {
        self.state
            .lock()
            .await
            .insert(store_key(api_name, client_id), token);
    }

    pub async fn get(&self, api_name: &str, client_id: &str) -> Option<Token> {
        self.state
            .lock()
            .await
            .get(&store_key(api_name, client_id))
            .cloned()
    }
}

impl TokenStore for MemoryTokenStore {
    fn load<'a>(
        &'a self,
        api_name: &'a str,
        client_id: &'a str,
    ) -> StoreFuture<'a, Option<Token>> {
        Box::pin(async move { Ok(self.get(api_name, client_id).await) })
    }

    fn save<'a>(
        &'a self,
        api_name: &'a str,
        client_id: &'a str,
        token: &'a Token,
    ) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            self.insert(api_name, client_id, token.clone()).await;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn test_token(suffix: &str) -> Token {
        Token {
            access_token: Some(format!("at_{suffix}")),
            refresh_token: Some(format!("rt_{suffix}")),
            token_type: Some("Bearer".into()),
            scope: Some("read write".into()),
            expires_in: Some(3600),
            expires_at: Some(1_735_500_000_000),
        }
    }

    #[tokio::test]
    async fn roundtrip_save_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::open(path.clone()).await.unwrap();
        store.save("exact", "client-1", &test_token("1")).await.unwrap();

        // Reopen from disk
        let store2 = FileTokenStore::open(path).await.unwrap();
        let token = store2.load("exact", "client-1").await.unwrap().unwrap();
        assert_eq!(token, test_token("1"));
    }

    #[tokio::test]
    async fn load_missing_pair_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path().join("tokens.json"))
            .await
            .unwrap();
        store.save("exact", "client-1", &test_token("1")).await.unwrap();

        assert!(store.load("exact", "client-2").await.unwrap().is_none());
        assert!(store.load("google", "client-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_is_upsert_per_pair() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileTokenStore::open(dir.path().join("tokens.json"))
            .await
            .unwrap();

        store.save("exact", "client-1", &test_token("1")).await.unwrap();
        store.save("exact", "client-1", &test_token("2")).await.unwrap();
        store.save("exact", "client-2", &test_token("3")).await.unwrap();

        assert_eq!(store.len().await, 2);
        let token = store.load("exact", "client-1").await.unwrap().unwrap();
        assert_eq!(token.access_token.as_deref(), Some("at_2"));
    }

    #[tokio::test]
    async fn cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        assert!(!path.exists());
        let store = FileTokenStore::open(path.clone()).await.unwrap();
        assert!(store.is_empty().await);
        assert!(path.exists());

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, Token> = serde_json::from_str(&contents).unwrap();
        assert!(parsed.is_empty());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        tokio::fs::write(&path, "not json {{").await.unwrap();

        let result = FileTokenStore::open(path).await;
        assert!(matches!(result, Err(Error::Persistence(_))));
    }

    #[tokio::test]
    async fn empty_token_roundtrips_without_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = FileTokenStore::open(path.clone()).await.unwrap();
        store.save("exact", "c", &Token::default()).await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert!(contents.contains("\"exact/c\": {}"), "got: {contents}");

        let store2 = FileTokenStore::open(path).await.unwrap();
        assert_eq!(
            store2.load("exact", "c").await.unwrap(),
            Some(Token::default())
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");

        let store = FileTokenStore::open(path.clone()).await.unwrap();
        store.save("exact", "client-1", &test_token("1")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "token file must be 0600, got {mode:o}");
    }

    #[tokio::test]
    async fn concurrent_saves_dont_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let store = Arc::new(FileTokenStore::open(path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .save("exact", &format!("client-{i}"), &test_token(&i.to_string()))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(store.len().await, 10);
        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: HashMap<String, Token> = serde_json::from_str(&contents).unwrap();
        assert_eq!(parsed.len(), 10);
    }

    #[tokio::test]
    async fn stores_sharing_a_directory_keep_their_own_files() {
        let dir = tempfile::tempdir().unwrap();
        let a_path = dir.path().join("a.json");
        let b_path = dir.path().join("b.json");
        let a = Arc::new(FileTokenStore::open(a_path.clone()).await.unwrap());
        let b = Arc::new(FileTokenStore::open(b_path.clone()).await.unwrap());

        let mut handles = vec![];
        for i in 0..50 {
            let a = a.clone();
            let b = b.clone();
            handles.push(tokio::spawn(async move {
                a.save("api-a", &format!("client-{i}"), &test_token("a"))
                    .await
                    .unwrap();
            }));
            handles.push(tokio::spawn(async move {
                b.save("api-b", &format!("client-{i}"), &test_token("b"))
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        for (path, api) in [(&a_path, "api-a/"), (&b_path, "api-b/")] {
            let contents = tokio::fs::read_to_string(path).await.unwrap();
            let parsed: HashMap<String, Token> = serde_json::from_str(&contents).unwrap();
            assert_eq!(parsed.len(), 50, "{}", path.display());
            assert!(parsed.keys().all(|k| k.starts_with(api)), "{}", path.display());
        }

        // No temp files left behind
        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        let mut names = vec![];
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        assert_eq!(names, vec!["a.json", "b.json"]);
    }

    #[tokio::test]
    async fn memory_store_roundtrip() {
        let store = MemoryTokenStore::new();
        assert!(store.load("exact", "c").await.unwrap().is_none());

        store.save("exact", "c", &test_token("m")).await.unwrap();
        assert_eq!(
            store.load("exact", "c").await.unwrap(),
            Some(test_token("m"))
        );
    }
}
