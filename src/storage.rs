//! Secure Storage Module
//!
//! Token slots persisted on the device. Values are sealed with Windows DPAPI
//! where available.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, error, info};

#[cfg(windows)]
use windows::Win32::Security::Cryptography::{
    CryptProtectData, CryptUnprotectData, CRYPTPROTECT_UI_FORBIDDEN,
};
#[cfg(windows)]
use windows::Win32::Security::Cryptography::CRYPT_INTEGER_BLOB;

/// Slot holding the short-lived access token.
pub const ACCESS_TOKEN_KEY: &str = "accessToken";
/// Slot holding the refresh token.
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// Named string slots. Each operation is atomic on its own; there is no
/// transaction across slots.
pub trait TokenStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Deleting a missing slot is not an error.
    fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// File-per-slot secure storage
pub struct SecureStorage {
    storage_path: PathBuf,
}

impl SecureStorage {
    /// Storage rooted at an explicit directory
    pub fn with_path(storage_path: impl Into<PathBuf>) -> Self {
        let storage_path = storage_path.into();

        if let Err(e) = std::fs::create_dir_all(&storage_path) {
            error!("Failed to create storage directory: {}", e);
        }

        debug!("Secure storage initialized at: {:?}", storage_path);

        Self { storage_path }
    }

    fn slot_path(&self, key: &str) -> PathBuf {
        self.storage_path.join(format!("{}.dat", key))
    }

    #[cfg(test)]
    fn exists(&self, key: &str) -> bool {
        self.slot_path(key).exists()
    }

    #[cfg(windows)]
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        use std::ptr::null_mut;

        let input = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };

        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: null_mut(),
        };

        unsafe {
            let result = CryptProtectData(
                &input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            );

            if result.is_err() {
                return Err(StorageError::Encryption("DPAPI encryption failed".into()));
            }

            let encrypted = std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec();

            // Output buffer is owned by the system allocator
            windows::Win32::Foundation::LocalFree(windows::Win32::Foundation::HLOCAL(
                output.pbData as *mut std::ffi::c_void,
            ));

            Ok(encrypted)
        }
    }

    #[cfg(windows)]
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        use std::ptr::null_mut;

        let input = CRYPT_INTEGER_BLOB {
            cbData: data.len() as u32,
            pbData: data.as_ptr() as *mut u8,
        };

        let mut output = CRYPT_INTEGER_BLOB {
            cbData: 0,
            pbData: null_mut(),
        };

        unsafe {
            let result = CryptUnprotectData(
                &input,
                None,
                None,
                None,
                None,
                CRYPTPROTECT_UI_FORBIDDEN,
                &mut output,
            );

            if result.is_err() {
                return Err(StorageError::Decryption("DPAPI decryption failed".into()));
            }

            let decrypted = std::slice::from_raw_parts(output.pbData, output.cbData as usize).to_vec();

            windows::Win32::Foundation::LocalFree(windows::Win32::Foundation::HLOCAL(
                output.pbData as *mut std::ffi::c_void,
            ));

            Ok(decrypted)
        }
    }

    #[cfg(not(windows))]
    fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        // Development fallback, stored as-is
        Ok(data.to_vec())
    }

    #[cfg(not(windows))]
    fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, StorageError> {
        Ok(data.to_vec())
    }
}

impl TokenStore for SecureStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let file_path = self.slot_path(key);

        let encrypted = match std::fs::read(&file_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::Io(e.to_string())),
        };

        let decrypted = self.decrypt(&encrypted)?;

        String::from_utf8(decrypted)
            .map(Some)
            .map_err(|e| StorageError::Decryption(e.to_string()))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let encrypted = self.encrypt(value.as_bytes())?;

        // Write then rename so a slot is never observed half-written
        let file_path = self.slot_path(key);
        let tmp_path = self.storage_path.join(format!("{}.dat.tmp", key));
        std::fs::write(&tmp_path, encrypted).map_err(|e| StorageError::Io(e.to_string()))?;
        std::fs::rename(&tmp_path, &file_path).map_err(|e| StorageError::Io(e.to_string()))?;

        info!("Saved encrypted data for key: {}", key);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        let file_path = self.slot_path(key);

        match std::fs::remove_file(&file_path) {
            Ok(()) => {
                info!("Deleted stored data for key: {}", key);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::Io(e.to_string())),
        }
    }
}

/// In-process slots, lost on exit
#[derive(Default)]
pub struct MemoryStorage {
    slots: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.slots
            .lock()
            .map_err(|_| StorageError::Io("memory storage lock poisoned".into()))
    }
}

impl TokenStore for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.slots()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.slots()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.slots()?.remove(key);
        Ok(())
    }
}

/// Storage errors
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("Decryption error: {0}")]
    Decryption(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secure_storage_round_trips_slots() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::with_path(dir.path());

        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        storage.set(ACCESS_TOKEN_KEY, "a.b.c").unwrap();
        assert!(storage.exists(ACCESS_TOKEN_KEY));
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("a.b.c"));

        storage.set(ACCESS_TOKEN_KEY, "d.e.f").unwrap();
        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("d.e.f"));
    }

    #[test]
    fn secure_storage_delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = SecureStorage::with_path(dir.path());

        storage.set(REFRESH_TOKEN_KEY, "r").unwrap();
        storage.delete(REFRESH_TOKEN_KEY).unwrap();
        storage.delete(REFRESH_TOKEN_KEY).unwrap();
        assert!(!storage.exists(REFRESH_TOKEN_KEY));
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap(), None);
    }

    #[test]
    fn slots_are_independent() {
        let storage = MemoryStorage::new();
        storage.set(ACCESS_TOKEN_KEY, "a").unwrap();
        storage.set(REFRESH_TOKEN_KEY, "r").unwrap();
        storage.delete(ACCESS_TOKEN_KEY).unwrap();

        assert_eq!(storage.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(storage.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("r"));
    }
}
