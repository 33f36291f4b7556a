//! Stats collaborator interface
//!
//! The directory client does not own any stream state; it pulls per-mount
//! attribute values from the host's live stats registry at request time.
//! The host implements [`StatsSource`] over whatever registry it keeps.

/// Attribute keys looked up on the stats source
pub mod keys {
    pub const SERVER_NAME: &str = "server_name";
    pub const SERVER_DESCRIPTION: &str = "server_description";
    pub const SERVER_TYPE: &str = "server_type";
    pub const SERVER_URL: &str = "server_url";
    pub const GENRE: &str = "genre";
    pub const BITRATE: &str = "bitrate";
    pub const INCOMING_BITRATE: &str = "incoming_bitrate";
    pub const SUBTYPE: &str = "subtype";
    pub const AUDIO_INFO: &str = "audio_info";
    pub const LISTENERS: &str = "listeners";
    pub const MAX_LISTENERS: &str = "max_listeners";
}

/// Live per-mount attribute source
///
/// Lookups are expected to be cheap, in-memory reads; they are called from
/// the background pass while the registry read lock is held.
pub trait StatsSource: Send + Sync {
    /// Current value of an attribute for a mount, if known
    fn get(&self, mount: &str, key: &str) -> Option<String>;

    /// Mounts currently marked public by the host
    ///
    /// Used to seed a newly activated directory server with entries for
    /// every stream that should already be listed.
    fn public_mounts(&self) -> Vec<String>;
}

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::StatsSource;

    /// In-memory stats source for tests
    #[derive(Default)]
    pub struct MemoryStats {
        values: Mutex<HashMap<(String, String), String>>,
        public: Mutex<Vec<String>>,
    }

    impl MemoryStats {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set(&self, mount: &str, key: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert((mount.to_string(), key.to_string()), value.to_string());
        }

        pub fn set_public(&self, mounts: &[&str]) {
            *self.public.lock().unwrap() = mounts.iter().map(|m| m.to_string()).collect();
        }

        /// Populate the mandatory add attributes in one call
        pub fn set_basic(&self, mount: &str, name: &str, genre: &str, kind: &str, bitrate: &str) {
            self.set(mount, super::keys::SERVER_NAME, name);
            self.set(mount, super::keys::GENRE, genre);
            self.set(mount, super::keys::SERVER_TYPE, kind);
            self.set(mount, super::keys::BITRATE, bitrate);
        }
    }

    impl StatsSource for MemoryStats {
        fn get(&self, mount: &str, key: &str) -> Option<String> {
            self.values
                .lock()
                .unwrap()
                .get(&(mount.to_string(), key.to_string()))
                .cloned()
        }

        fn public_mounts(&self) -> Vec<String> {
            self.public.lock().unwrap().clone()
        }
    }
}
