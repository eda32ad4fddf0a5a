//! Route table file with change detection
//!
//! The file maps client codes to routes:
//!
//! ```yaml
//! ACME:
//!   url: https://acme.example/status
//!   username: acme
//!   password: 3q2+7w...   # encrypted when a key is configured
//!   protocol: REST
//!   method: POST
//!   tls_enabled: true
//!   tls_cert_path: /etc/pusher/acme.pem
//! ```
//!
//! Changes are detected by SHA-256 digest of the file contents.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use status_pusher_engine::{ClientRoute, RouteTable};
use tracing::{debug, error};

use crate::secrets::SecretCipher;

/// Route file errors
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("failed to read route file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse route file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Loads the route table and tracks the digest of the last load
#[derive(Debug)]
pub struct RouteSource {
    path: PathBuf,
    cipher: Option<SecretCipher>,
    digest: Option<String>,
}

impl RouteSource {
    pub fn new(path: impl Into<PathBuf>, cipher: Option<SecretCipher>) -> Self {
        Self {
            path: path.into(),
            cipher,
            digest: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Digest of the last successfully loaded contents
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }

    /// Whether the file differs from the last successful load
    pub async fn changed(&self) -> Result<bool, RouteError> {
        let contents = self.read().await?;
        Ok(self.digest.as_deref() != Some(digest(&contents).as_str()))
    }

    /// Parse the file and decrypt passwords
    ///
    /// The stored digest only moves forward on success, so a broken file is retried on the
    /// next check.
    pub async fn load(&mut self) -> Result<RouteTable, RouteError> {
        let contents = self.read().await?;
        let routes: BTreeMap<String, ClientRoute> =
            serde_yaml::from_slice(&contents).map_err(|source| RouteError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let table = routes
            .into_iter()
            .map(|(client_code, route)| {
                let route = self.decrypt_password(&client_code, route);
                (client_code, route)
            })
            .collect::<RouteTable>();

        let digest = digest(&contents);
        debug!(clients = table.len(), digest = %digest, "route table loaded");
        self.digest = Some(digest);
        Ok(table)
    }

    fn decrypt_password(&self, client_code: &str, mut route: ClientRoute) -> ClientRoute {
        let Some(cipher) = &self.cipher else {
            return route;
        };
        if route.password.is_empty() {
            return route;
        }
        match cipher.decrypt(&route.password) {
            Ok(password) => route.password = password,
            Err(e) => {
                error!(client_code, error = %e, "failed to decrypt route password");
                route.password.clear();
            }
        }
        route
    }

    async fn read(&self) -> Result<Vec<u8>, RouteError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|source| RouteError::Read {
                path: self.path.clone(),
                source,
            })
    }
}

fn digest(contents: &[u8]) -> String {
    hex::encode(Sha256::digest(contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const ROUTES: &str = r#"
ZETA:
  url: https://zeta.example/cb
  username: zeta
  password: plain
  protocol: SOAP
  method: POST
ACME:
  url: https://acme.example/cb
  username: acme
  password: PASSWORD
  protocol: REST
  http_method: GET
  tls_enabled: true
  tls_cert_path: /etc/acme.pem
"#;

    async fn write(dir: &TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("routes.yaml");
        tokio::fs::write(&path, contents).await.unwrap();
        path
    }

    #[tokio::test]
    async fn test_load_plaintext_routes() {
        let dir = TempDir::new().unwrap();
        let mut source = RouteSource::new(write(&dir, ROUTES).await, None);

        let table = source.load().await.unwrap();
        let codes: Vec<&str> = table.iter().map(|(code, _)| code).collect();
        assert_eq!(codes, vec!["ACME", "ZETA"]);

        let acme = table.get("ACME").unwrap();
        assert_eq!(acme.method, "GET");
        assert!(acme.tls_enabled);
        assert_eq!(acme.tls_cert_path.as_deref(), Some("/etc/acme.pem"));
        assert_eq!(acme.password, "PASSWORD");
        assert!(!table.get("ZETA").unwrap().tls_enabled);
    }

    #[tokio::test]
    async fn test_passwords_are_decrypted() {
        let dir = TempDir::new().unwrap();
        let cipher = SecretCipher::from_base64_key(&SecretCipher::generate_key()).unwrap();
        let sealed = cipher.encrypt("s3cret").unwrap();
        let path = write(&dir, &ROUTES.replace("PASSWORD", &sealed)).await;

        let table = RouteSource::new(path, Some(cipher)).load().await.unwrap();
        assert_eq!(table.get("ACME").unwrap().password, "s3cret");
        // "plain" is not a valid ciphertext, so the route loses its password
        assert!(!table.get("ZETA").unwrap().has_credentials());
    }

    #[tokio::test]
    async fn test_changed_tracks_digest() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, ROUTES).await;
        let mut source = RouteSource::new(path.clone(), None);

        assert!(source.changed().await.unwrap());
        source.load().await.unwrap();
        assert!(!source.changed().await.unwrap());

        tokio::fs::write(&path, ROUTES.replace("zeta.example", "zeta.test"))
            .await
            .unwrap();
        assert!(source.changed().await.unwrap());
        let table = source.load().await.unwrap();
        assert_eq!(table.get("ZETA").unwrap().url, "https://zeta.test/cb");
    }

    #[tokio::test]
    async fn test_broken_file_keeps_previous_digest() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, ROUTES).await;
        let mut source = RouteSource::new(path.clone(), None);
        source.load().await.unwrap();
        let loaded = source.digest().unwrap().to_string();

        tokio::fs::write(&path, "ACME: [broken").await.unwrap();
        assert!(matches!(source.load().await, Err(RouteError::Parse { .. })));
        assert_eq!(source.digest(), Some(loaded.as_str()));
        assert!(source.changed().await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_file() {
        let source = RouteSource::new("/nonexistent/routes.yaml", None);
        assert!(matches!(source.changed().await, Err(RouteError::Read { .. })));
    }
}
