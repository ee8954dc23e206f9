//! JSON secret store. Each named secret is kept as two flat string fields,
//! `{name}_key` and `{name}_token`, so the file stays diffable. A fresh key is
//! generated for every write; keys are never shared between secrets.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::secrets::{self, SecretError, SecretKey};
use crate::persist::write_json_atomic;

pub const DEFAULT_STORE_PATH: &str = "configs/config.json";

const KEY_SUFFIX: &str = "_key";
const TOKEN_SUFFIX: &str = "_token";

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("secret store not found at {}", .0.display())]
    StoreNotFound(PathBuf),
    #[error("secret '{name}' is missing '{name}_key' or '{name}_token'")]
    MissingSecret { name: String },
    #[error("secret store at {} is malformed: {reason}", .path.display())]
    MalformedStore { path: PathBuf, reason: String },
    #[error(transparent)]
    Decryption(#[from] SecretError),
    #[error("store io failed at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

type Store = Map<String, Value>;

fn key_field(name: &str) -> String {
    format!("{name}{KEY_SUFFIX}")
}

fn token_field(name: &str) -> String {
    format!("{name}{TOKEN_SUFFIX}")
}

/// Encrypts `secret` under a new key and stores both under `name`, replacing
/// any earlier entry with that name. A missing, empty or unparsable store is
/// started fresh; a store that exists but cannot be read is left alone.
pub fn encrypt_to_config(
    secret: &str,
    name: &str,
    store_path: impl AsRef<Path>,
) -> Result<(), VaultError> {
    let path = store_path.as_ref();
    let (key, token) = secrets::encrypt(secret)?;

    let mut store = load_lenient(path)?;
    store.insert(key_field(name), Value::String(key.encode()));
    store.insert(token_field(name), Value::String(token));
    write_json_atomic(path, &store).map_err(|source| VaultError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    info!(
        secret = name,
        store = %path.display(),
        key_fingerprint = %key.fingerprint(),
        "secret stored"
    );
    Ok(())
}

/// Reads `name` back out of the store and decrypts it.
pub fn decrypt_from_config(name: &str, store_path: impl AsRef<Path>) -> Result<String, VaultError> {
    let path = store_path.as_ref();
    let store = load_strict(path)?;
    let (key_text, token) = stored_pair(&store, name)?;

    let key = SecretKey::from_encoded(key_text)?;
    let secret = secrets::decrypt(&key, token)?;
    debug!(
        secret = name,
        store = %path.display(),
        key_fingerprint = %key.fingerprint(),
        "secret decrypted"
    );
    Ok(secret)
}

/// Like [`decrypt_from_config`], but refuses a token issued more than
/// `max_age` ago with `SecretError::TokenExpired`.
pub fn decrypt_from_config_within(
    name: &str,
    store_path: impl AsRef<Path>,
    max_age: Duration,
) -> Result<String, VaultError> {
    let path = store_path.as_ref();
    let store = load_strict(path)?;
    let (key_text, token) = stored_pair(&store, name)?;

    let key = SecretKey::from_encoded(key_text)?;
    let secret = secrets::decrypt_with_ttl(&key, token, max_age)?;
    debug!(
        secret = name,
        store = %path.display(),
        max_age_secs = max_age.num_seconds(),
        "secret decrypted"
    );
    Ok(secret)
}

/// When the token stored under `name` was issued. Read from the token header,
/// not authenticated.
pub fn secret_issued_at(
    name: &str,
    store_path: impl AsRef<Path>,
) -> Result<DateTime<Utc>, VaultError> {
    let store = load_strict(store_path.as_ref())?;
    let (_, token) = stored_pair(&store, name)?;
    Ok(secrets::token_issued_at(token)?)
}

/// Names of every complete secret in the store, sorted.
pub fn list_secrets(store_path: impl AsRef<Path>) -> Result<Vec<String>, VaultError> {
    let store = load_strict(store_path.as_ref())?;
    let mut names: Vec<String> = store
        .keys()
        .filter_map(|field| field.strip_suffix(KEY_SUFFIX))
        .filter(|name| {
            store
                .get(&token_field(name))
                .map(Value::is_string)
                .unwrap_or(false)
        })
        .map(str::to_string)
        .collect();
    names.sort();
    Ok(names)
}

fn stored_pair<'a>(store: &'a Store, name: &str) -> Result<(&'a str, &'a str), VaultError> {
    let key_text = store.get(&key_field(name)).and_then(Value::as_str);
    let token = store.get(&token_field(name)).and_then(Value::as_str);
    match (key_text, token) {
        (Some(key_text), Some(token)) => Ok((key_text, token)),
        _ => Err(VaultError::MissingSecret {
            name: name.to_string(),
        }),
    }
}

fn read_store(path: &Path) -> Result<Option<String>, VaultError> {
    match fs::read_to_string(path) {
        Ok(raw) => Ok(Some(raw)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(source) => Err(VaultError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn parse_store(path: &Path, raw: &str) -> Result<Store, VaultError> {
    if raw.trim().is_empty() {
        return Ok(Store::new());
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(VaultError::MalformedStore {
            path: path.to_path_buf(),
            reason: "top-level JSON must be an object".to_string(),
        }),
        Err(err) => Err(VaultError::MalformedStore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }),
    }
}

fn load_strict(path: &Path) -> Result<Store, VaultError> {
    match read_store(path)? {
        Some(raw) => parse_store(path, &raw),
        None => Err(VaultError::StoreNotFound(path.to_path_buf())),
    }
}

fn load_lenient(path: &Path) -> Result<Store, VaultError> {
    let Some(raw) = read_store(path)? else {
        return Ok(Store::new());
    };
    match parse_store(path, &raw) {
        Ok(store) => Ok(store),
        Err(err @ VaultError::MalformedStore { .. }) => {
            warn!(store = %path.display(), error = %err, "starting a fresh secret store");
            Ok(Store::new())
        }
        Err(err) => Err(err),
    }
}

#[cfg(test)]
mod tests {
    use super::{
        decrypt_from_config, decrypt_from_config_within, encrypt_to_config, list_secrets,
        secret_issued_at, VaultError,
    };
    use crate::crypto::secrets::{seal, SecretError, SecretKey};
    use chrono::{Duration, Utc};
    use base64::{engine::general_purpose::URL_SAFE, Engine};
    use proptest::prelude::*;
    use serde_json::{json, Value};
    use std::fs;
    use tempfile::TempDir;

    fn read_json(path: &std::path::Path) -> Value {
        serde_json::from_str(&fs::read_to_string(path).expect("store readable")).expect("json")
    }

    #[test]
    fn stores_and_retrieves_secret() {
        let dir = TempDir::new().expect("temp dir");
        let store = dir.path().join("configs").join("config.json");

        encrypt_to_config("ss-admin-token", "ss_admin_token", &store).expect("store secret");
        let stored = read_json(&store);
        assert!(stored["ss_admin_token_key"].is_string());
        assert!(stored["ss_admin_token_token"].is_string());
        assert!(!fs::read_to_string(&store).unwrap().contains("ss-admin-token\""));

        let secret = decrypt_from_config("ss_admin_token", &store).expect("decrypt");
        assert_eq!(secret, "ss-admin-token");
    }

    #[test]
    fn preserves_other_entries_and_overwrites_same_name() {
        let dir = TempDir::new().expect("temp dir");
        let store = dir.path().join("config.json");
        fs::write(&store, json!({"historicbamboodata_sheetid": "123"}).to_string()).unwrap();

        encrypt_to_config("first", "bamb", &store).expect("store");
        let first_key = read_json(&store)["bamb_key"].clone();
        encrypt_to_config("second", "bamb", &store).expect("overwrite");
        encrypt_to_config("other", "ss", &store).expect("store other");

        let stored = read_json(&store);
        assert_eq!(stored["historicbamboodata_sheetid"], "123");
        assert_ne!(stored["bamb_key"], first_key);
        assert_eq!(decrypt_from_config("bamb", &store).unwrap(), "second");
        assert_eq!(decrypt_from_config("ss", &store).unwrap(), "other");
    }

    #[test]
    fn malformed_or_empty_store_is_started_fresh() {
        let dir = TempDir::new().expect("temp dir");
        for (file, contents) in [("bad.json", "{not json"), ("empty.json", "")] {
            let store = dir.path().join(file);
            fs::write(&store, contents).unwrap();
            encrypt_to_config("value", "api", &store).expect("store over bad file");
            assert_eq!(decrypt_from_config("api", &store).unwrap(), "value");
        }
    }

    #[test]
    fn unreadable_store_is_not_overwritten() {
        let dir = TempDir::new().expect("temp dir");
        let store = dir.path().join("config.json");
        let mut contents = json!({"other_key": "k", "other_token": "t"})
            .to_string()
            .into_bytes();
        contents.insert(1, 0xff);
        fs::write(&store, &contents).unwrap();

        let err = encrypt_to_config("s", "api", &store).unwrap_err();
        assert!(matches!(err, VaultError::Io { .. }));
        assert_eq!(fs::read(&store).unwrap(), contents);
    }

    #[test]
    fn distinguishes_missing_store_from_missing_secret() {
        let dir = TempDir::new().expect("temp dir");
        let store = dir.path().join("config.json");

        let err = decrypt_from_config("api", &store).unwrap_err();
        assert!(matches!(err, VaultError::StoreNotFound(_)));

        fs::write(&store, json!({"api_key": "abc"}).to_string()).unwrap();
        let err = decrypt_from_config("api", &store).unwrap_err();
        assert!(matches!(err, VaultError::MissingSecret { ref name } if name == "api"));

        fs::write(&store, "").unwrap();
        let err = decrypt_from_config("api", &store).unwrap_err();
        assert!(matches!(err, VaultError::MissingSecret { .. }));

        fs::write(&store, "[1, 2]").unwrap();
        let err = decrypt_from_config("api", &store).unwrap_err();
        assert!(matches!(err, VaultError::MalformedStore { .. }));
    }

    #[test]
    fn swapped_keys_fail_to_decrypt() {
        let dir = TempDir::new().expect("temp dir");
        let store = dir.path().join("config.json");
        encrypt_to_config("one", "a", &store).unwrap();
        encrypt_to_config("two", "b", &store).unwrap();

        let mut stored = read_json(&store);
        stored["a_key"] = stored["b_key"].clone();
        fs::write(&store, stored.to_string()).unwrap();

        let err = decrypt_from_config("a", &store).unwrap_err();
        assert!(matches!(err, VaultError::Decryption(SecretError::DecryptionError(_))));
    }

    #[test]
    fn lists_complete_secrets() {
        let dir = TempDir::new().expect("temp dir");
        let store = dir.path().join("config.json");
        encrypt_to_config("x", "zeta", &store).unwrap();
        encrypt_to_config("y", "alpha", &store).unwrap();
        let mut stored = read_json(&store);
        stored["orphan_key"] = json!("k");
        fs::write(&store, stored.to_string()).unwrap();

        assert_eq!(list_secrets(&store).unwrap(), vec!["alpha", "zeta"]);
    }

    #[test]
    fn max_age_rejects_stale_tokens() {
        let dir = TempDir::new().expect("temp dir");
        let store = dir.path().join("config.json");
        encrypt_to_config("fresh", "api", &store).unwrap();
        assert_eq!(
            decrypt_from_config_within("api", &store, Duration::hours(1)).unwrap(),
            "fresh"
        );

        let key = SecretKey::generate();
        let issued = Utc::now() - Duration::days(30);
        let token = seal(&key, b"stale", issued).expect("seal");
        let mut stored = read_json(&store);
        stored["old_key"] = json!(key.encode());
        stored["old_token"] = json!(token);
        fs::write(&store, stored.to_string()).unwrap();

        assert_eq!(
            secret_issued_at("old", &store).unwrap().timestamp(),
            issued.timestamp()
        );
        assert_eq!(decrypt_from_config("old", &store).unwrap(), "stale");
        let err = decrypt_from_config_within("old", &store, Duration::days(7)).unwrap_err();
        assert!(matches!(err, VaultError::Decryption(SecretError::TokenExpired { .. })));
        assert!(matches!(
            secret_issued_at("missing", &store),
            Err(VaultError::MissingSecret { .. })
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn store_round_trips_any_secret(secret in any::<String>(), name in "[a-z_]{1,12}") {
            let dir = TempDir::new().expect("temp dir");
            let store = dir.path().join("config.json");
            encrypt_to_config(&secret, &name, &store).expect("store");
            prop_assert_eq!(decrypt_from_config(&name, &store).expect("decrypt"), secret);
        }

        #[test]
        fn tampered_store_token_is_rejected(
            index in any::<prop::sample::Index>(),
            mask in 1u8..=255,
        ) {
            let dir = TempDir::new().expect("temp dir");
            let store = dir.path().join("config.json");
            encrypt_to_config("token-value", "api", &store).expect("store");

            let mut stored = read_json(&store);
            let token = stored["api_token"].as_str().expect("token").to_string();
            let mut raw = URL_SAFE.decode(token.as_bytes()).expect("base64");
            let at = index.index(raw.len());
            raw[at] ^= mask;
            stored["api_token"] = Value::String(URL_SAFE.encode(&raw));
            fs::write(&store, stored.to_string()).unwrap();

            let result = decrypt_from_config("api", &store);
            prop_assert!(matches!(result, Err(VaultError::Decryption(SecretError::DecryptionError(_)))));
        }
    }
}
