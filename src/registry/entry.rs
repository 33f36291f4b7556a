//! Per-mount directory entry and its state machine
//!
//! A [`MountEntry`] tracks one mount's listing on one directory server
//! through the add → touch → remove lifecycle. Transitions are plain
//! functions taking the current time in unix seconds, so the whole machine
//! is deterministic under test; network calls happen in the store's pass,
//! never here.

use std::fmt::Write as _;

use crate::config::{
    FIRST_TOUCH_DELAY_SECS, MISSING_SID_RETRY_SECS, MISSING_STATS_BACKOFF_SECS,
    REJECTED_ADD_BACKOFF_SECS, TOUCH_INTERVAL_FLOOR_SECS, TRANSPORT_FAILURE_BACKOFF_SECS,
};
use crate::stats::{keys, StatsSource};
use crate::transport::DirectoryResponse;
use crate::util::url_escape;

/// Placeholder name some hosts report before a source sets real metadata;
/// treated the same as a missing name
const UNSPECIFIED_NAME: &str = "Unspecified name";

/// Lifecycle state of a mount entry
///
/// `Remove` is terminal: the entry is pruned on the reconciliation following
/// the remove attempt, whatever its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Not yet listed (or listing lost); next attempt is an add request
    Add,
    /// Listed; next attempt is a keep-alive touch
    Touch,
    /// Listing is being withdrawn
    Remove,
}

/// One mount's listing on one directory server
///
/// Attribute fields are stored pre-escaped so request composition is pure
/// string assembly.
#[derive(Debug)]
pub struct MountEntry {
    /// Mount name as the host knows it, e.g. `/live`
    pub mount: String,

    /// Session id issued by the directory on a successful add
    pub sid: Option<String>,

    /// Current lifecycle state
    pub state: EntryState,

    /// Stream name (escaped)
    pub name: String,
    /// Stream description (escaped)
    pub description: String,
    /// Genre (escaped)
    pub genre: String,
    /// Content type, e.g. `audio/mpeg` (escaped)
    pub server_type: String,
    /// Content subtype (escaped)
    pub subtype: String,
    /// Bitrate in kbit, explicit or derived (escaped)
    pub bitrate: String,
    /// Extra audio parameters, `key=value` pairs (escaped whole)
    pub audio_info: String,
    /// Cluster password (escaped)
    pub cluster_password: String,
    /// Public listen URL (escaped)
    pub listen_url: String,
    /// Stream homepage URL (escaped)
    pub stream_url: String,
    /// Now-playing text (escaped)
    pub now_playing: String,

    /// Unix seconds of the next scheduled attempt
    pub next_update: u64,

    /// Effective touch interval in seconds; may be raised by `TouchFreq`
    pub touch_interval: u64,

    /// Host asked for this listing to be withdrawn
    pub release: bool,

    /// Remove attempt done, entry awaits pruning
    pub remove: bool,

    /// Last message the directory sent with a rejection
    pub error_msg: Option<String>,
}

impl MountEntry {
    /// Create an entry in Add state
    ///
    /// `listen_url` and `cluster_password` are raw; they are escaped here.
    /// The caller sets the initial schedule.
    pub fn new(mount: &str, listen_url: &str, cluster_password: &str, touch_interval: u64) -> Self {
        Self {
            mount: mount.to_string(),
            sid: None,
            state: EntryState::Add,
            name: String::new(),
            description: String::new(),
            genre: String::new(),
            server_type: String::new(),
            subtype: String::new(),
            bitrate: String::new(),
            audio_info: String::new(),
            cluster_password: url_escape(cluster_password),
            listen_url: url_escape(listen_url),
            stream_url: String::new(),
            now_playing: String::new(),
            next_update: 0,
            touch_interval: touch_interval.max(TOUCH_INTERVAL_FLOOR_SECS),
            release: false,
            remove: false,
            error_msg: None,
        }
    }

    /// Schedule the next attempt `offset` seconds from `now`
    pub fn schedule(&mut self, now: u64, offset: u64) {
        self.next_update = now + offset;
    }

    /// Whether this entry's attempt is due
    pub fn is_due(&self, now: u64) -> bool {
        now >= self.next_update
    }

    /// Pull a fresh attribute snapshot for an add request
    ///
    /// Returns `false` when a mandatory field (name, genre, type, bitrate)
    /// is unavailable; the caller backs off [`MISSING_STATS_BACKOFF_SECS`]
    /// without sending anything.
    pub fn refresh_add_attributes(&mut self, stats: &dyn StatsSource) -> bool {
        let mount = self.mount.clone();
        let fetch = |key: &str| stats.get(&mount, key);

        match fetch(keys::SERVER_NAME) {
            Some(name) if name != UNSPECIFIED_NAME => self.name = url_escape(&name),
            _ => {
                tracing::info!(mount = %self.mount, "mount requires a valid name");
                return false;
            }
        }

        if let Some(value) = fetch(keys::SERVER_TYPE) {
            self.server_type = url_escape(&value);
        }
        if let Some(value) = fetch(keys::SERVER_URL) {
            self.stream_url = url_escape(&value);
        }
        if let Some(value) = fetch(keys::GENRE) {
            self.genre = url_escape(&value);
        }
        match fetch(keys::BITRATE) {
            Some(value) => self.bitrate = url_escape(&value),
            None => {
                if let Some(rate) = fetch(keys::INCOMING_BITRATE) {
                    self.bitrate = url_escape(&derive_bitrate_kbit(&rate));
                }
            }
        }
        if let Some(value) = fetch(keys::SERVER_DESCRIPTION) {
            self.description = url_escape(&value);
        }
        if let Some(value) = fetch(keys::SUBTYPE) {
            self.subtype = url_escape(&value);
        }
        if let Some(value) = fetch(keys::AUDIO_INFO) {
            self.audio_info = url_escape(&value);
        }

        if self.name.is_empty()
            || self.genre.is_empty()
            || self.server_type.is_empty()
            || self.bitrate.is_empty()
        {
            tracing::info!(
                mount = %self.mount,
                "mount requires stats (name, genre, type, bitrate)"
            );
            return false;
        }
        true
    }

    /// Compose the add request body
    ///
    /// `None` when mandatory attributes are missing; no request is sent.
    pub fn compose_add(&self) -> Option<String> {
        if self.name.is_empty()
            || self.genre.is_empty()
            || self.server_type.is_empty()
            || self.bitrate.is_empty()
        {
            return None;
        }
        let mut body = String::with_capacity(256);
        let _ = write!(
            body,
            "action=add&sn={}&genre={}&cpswd={}&desc={}&url={}&listenurl={}&type={}&stype={}&b={}&{}\r\n",
            self.name,
            self.genre,
            self.cluster_password,
            self.description,
            self.stream_url,
            self.listen_url,
            self.server_type,
            self.subtype,
            self.bitrate,
            self.audio_info,
        );
        Some(body)
    }

    /// Compose the touch request body; requires a session id
    pub fn compose_touch(&self, listeners: u32, max_listeners: u32) -> Option<String> {
        let sid = self.sid.as_deref()?;
        let mut body = String::with_capacity(128);
        let _ = write!(
            body,
            "action=touch&sid={}&st={}&listeners={}&max_listeners={}&stype={}\r\n",
            sid, self.now_playing, listeners, max_listeners, self.subtype,
        );
        Some(body)
    }

    /// Compose the remove request body; requires a session id
    pub fn compose_remove(&self) -> Option<String> {
        let sid = self.sid.as_deref()?;
        Some(format!("action=remove&sid={}", sid))
    }

    /// Apply a server-advised `TouchFreq`, floored at 30s
    ///
    /// The directory may send this on any response.
    pub fn apply_touch_freq(&mut self, response: &DirectoryResponse) {
        if let Some(secs) = response.touch_freq {
            let secs = secs.max(TOUCH_INTERVAL_FLOOR_SECS);
            if self.touch_interval != secs {
                tracing::info!(mount = %self.mount, interval = secs, "touch interval updated");
                self.touch_interval = secs;
            }
        }
    }

    /// Successful add: take the session id, move to Touch, first touch soon
    pub fn on_add_accepted(&mut self, response: &DirectoryResponse, now: u64) {
        self.apply_touch_freq(response);
        if response.sid.is_some() {
            self.sid = response.sid.clone();
        }
        self.error_msg = None;
        self.state = EntryState::Touch;
        self.schedule(now, FIRST_TOUCH_DELAY_SECS);
    }

    /// Successful touch: reschedule at the effective interval
    pub fn on_touch_accepted(&mut self, response: &DirectoryResponse, now: u64) {
        self.apply_touch_freq(response);
        self.error_msg = None;
        self.schedule(now, self.touch_interval.max(TOUCH_INTERVAL_FLOOR_SECS));
    }

    /// Directory rejected the request (`YPResponse: 0`)
    ///
    /// The entry falls back to Add and loses its session id. Backoff depends
    /// on which state was rejected: a failed add waits out the long rejection
    /// backoff, a failed touch retries the add after the transport backoff or
    /// the touch interval, whichever is larger.
    pub fn on_rejected(&mut self, response: &DirectoryResponse, now: u64) {
        self.apply_touch_freq(response);
        let message = response.message_or_default();
        match self.state {
            EntryState::Add => {
                tracing::error!(mount = %self.mount, message = %message, "directory add rejected");
                self.schedule(now, REJECTED_ADD_BACKOFF_SECS);
            }
            EntryState::Touch => {
                tracing::info!(mount = %self.mount, message = %message, "directory touch rejected");
                self.schedule(now, self.touch_interval.max(TRANSPORT_FAILURE_BACKOFF_SECS));
            }
            EntryState::Remove => {}
        }
        self.error_msg = Some(message);
        self.state = EntryState::Add;
        self.sid = None;
    }

    /// Network call could not complete
    ///
    /// Falls back to Add with the transport backoff; a failed touch waits
    /// out its interval when that is longer. The session id is dropped; a
    /// later successful add obtains a fresh one.
    pub fn on_transport_failure(&mut self, now: u64) {
        let backoff = match self.state {
            EntryState::Touch => self.touch_interval.max(TRANSPORT_FAILURE_BACKOFF_SECS),
            _ => TRANSPORT_FAILURE_BACKOFF_SECS,
        };
        self.state = EntryState::Add;
        self.sid = None;
        self.schedule(now, backoff);
    }

    /// Touch came due without a session id; retry shortly without sending
    pub fn on_missing_sid(&mut self, now: u64) {
        self.schedule(now, MISSING_SID_RETRY_SECS);
    }

    /// Stats were incomplete for an add; wait before asking again
    pub fn on_missing_stats(&mut self, now: u64) {
        self.schedule(now, MISSING_STATS_BACKOFF_SECS);
    }

    /// Attach now-playing text from a touch notification
    ///
    /// When the entry is in Touch state its schedule may be pulled forward,
    /// but never so that touches land more often than once per 30s: if the
    /// previous touch was under 30s ago the attempt is set 30s after it,
    /// otherwise it runs now. Entries due within 30s are left alone.
    pub fn apply_touch_notification(&mut self, now_playing: Option<&str>, now: u64) {
        if let Some(text) = now_playing {
            self.now_playing = url_escape(text);
        }
        if self.state != EntryState::Touch {
            return;
        }
        if self.next_update.saturating_sub(now) > TOUCH_INTERVAL_FLOOR_SECS {
            let last_touch = self.next_update.saturating_sub(self.touch_interval);
            if now.saturating_sub(TOUCH_INTERVAL_FLOOR_SECS) < last_touch {
                self.schedule(now, TOUCH_INTERVAL_FLOOR_SECS);
            } else {
                self.schedule(now, 0);
            }
        }
    }
}

/// Estimate a kbit bitrate from the measured incoming byte rate
///
/// The incoming rate jitters, so round coarsely: add ~10% and 5, then keep
/// only the top three significant bits before converting to kbit.
pub fn derive_bitrate_kbit(incoming_rate: &str) -> String {
    let raw: i64 = incoming_rate.trim().parse().unwrap_or(0);
    let mut value = (raw as f64 * 1.1) as i64 + 5;
    let mut shift = 0u32;
    while value > 7 {
        value >>= 1;
        shift += 1;
    }
    value <<= shift;
    value /= 1024;
    value.to_string()
}
