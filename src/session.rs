use crate::dashboard::{DashboardState, prepare_upload, render};
use crate::error::Result;
use crate::filter::{FilterOptions, FilterSelection};
use crate::graph::GraphOptions;
use crate::table::Table;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Page and chart color scheme
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn toggled(self) -> Self {
        match self {
            Theme::Light => Theme::Dark,
            Theme::Dark => Theme::Light,
        }
    }
}

/// A decoded, date-normalized upload
#[derive(Clone, Debug)]
pub struct Upload {
    pub file_name: String,
    pub table: Table,
}

/// Everything one user's dashboard remembers between interactions
///
/// Only the theme and the last good upload survive an interaction; filters
/// arrive fresh with every render.
#[derive(Clone, Debug, Default)]
pub struct Session {
    theme: Theme,
    upload: Option<Upload>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current color scheme; new sessions start out light
    pub fn theme(&self) -> Theme {
        self.theme
    }

    /// Flip between light and dark; returns the new theme
    pub fn toggle_theme(&mut self) -> Theme {
        self.theme = self.theme.toggled();
        self.theme
    }

    pub fn upload(&self) -> Option<&Upload> {
        self.upload.as_ref()
    }

    /// Decode and normalize a new file, replacing the previous one
    ///
    /// A file that fails to load also clears the previous upload, so the
    /// page never keeps showing data the user has replaced.
    pub fn set_upload(&mut self, file_name: &str, bytes: &[u8]) -> Result<&Upload> {
        self.clear_upload();
        match prepare_upload(bytes, file_name) {
            Ok(table) => {
                info!("loaded {} ({} rows)", file_name, table.len());
                let upload: &Upload = self.upload.insert(Upload {
                    file_name: file_name.to_string(),
                    table,
                });
                Ok(upload)
            }
            Err(e) => {
                warn!("rejected upload {}: {}", file_name, e);
                Err(e)
            }
        }
    }

    pub fn clear_upload(&mut self) {
        self.upload = None;
    }

    pub fn filter_options(&self) -> Option<FilterOptions> {
        self.upload
            .as_ref()
            .and_then(|u| FilterOptions::from_table(&u.table))
    }

    /// Render the dashboard for the current upload, `None` before any upload
    ///
    /// The chart size comes from `options`; the colors from this session's
    /// theme.
    pub fn render(
        &self,
        selection: &FilterSelection,
        options: &GraphOptions,
    ) -> Option<Result<DashboardState>> {
        let upload = self.upload.as_ref()?;
        let options = GraphOptions {
            theme: self.theme,
            ..options.clone()
        };
        Some(render(&upload.table, selection, &options))
    }
}

/// One browser's session, shared by its concurrent requests
pub type SharedSession = Arc<Mutex<Session>>;

/// Lock a shared session, recovering it if a previous holder panicked
pub fn lock_session(session: &SharedSession) -> MutexGuard<'_, Session> {
    session.lock().unwrap_or_else(|e| e.into_inner())
}

struct Slot {
    session: SharedSession,
    expires_at: Instant,
}

/// Live sessions keyed by id
///
/// Every session has its own lock, so rendering one user's dashboard never
/// waits on another user. The map lock is only held to look a session up.
///
/// A session expires `ttl` after it was last used. The store never holds
/// more than `capacity` sessions: making room evicts expired sessions
/// first, then the one closest to expiry.
pub struct SessionStore {
    slots: Mutex<HashMap<String, Slot>>,
    ttl: Duration,
    capacity: usize,
}

impl SessionStore {
    /// Create an empty store
    ///
    /// # Arguments
    /// * `ttl` - How long an unused session stays alive
    /// * `capacity` - Most sessions kept at once (at least one)
    ///
    /// # Examples
    /// ```
    /// use insightedge::session::SessionStore;
    /// use std::time::Duration;
    ///
    /// let store = SessionStore::new(Duration::from_secs(3600), 100);
    /// assert!(store.get("nobody").is_none());
    /// store.insert("abc".to_string());
    /// assert!(store.get("abc").is_some());
    /// ```
    pub fn new(ttl: Duration, capacity: usize) -> Self {
        SessionStore {
            slots: Mutex::new(HashMap::new()),
            ttl,
            capacity: capacity.max(1),
        }
    }

    /// Look up a live session and extend its lifetime
    ///
    /// Unknown and expired ids give `None`; nothing is created.
    pub fn get(&self, id: &str) -> Option<SharedSession> {
        self.get_at(id, Instant::now())
    }

    fn get_at(&self, id: &str, now: Instant) -> Option<SharedSession> {
        let mut slots = self.slots();
        match slots.get_mut(id) {
            Some(slot) if slot.expires_at > now => {
                slot.expires_at = now + self.ttl;
                Some(Arc::clone(&slot.session))
            }
            Some(_) => {
                slots.remove(id);
                debug!("session {} expired", id);
                None
            }
            None => None,
        }
    }

    /// Start a fresh session under `id`, evicting others if the store is full
    pub fn insert(&self, id: String) -> SharedSession {
        self.insert_at(id, Instant::now())
    }

    fn insert_at(&self, id: String, now: Instant) -> SharedSession {
        let mut slots = self.slots();
        sweep(&mut slots, now);
        while slots.len() >= self.capacity {
            let oldest = slots
                .iter()
                .min_by_key(|(_, slot)| slot.expires_at)
                .map(|(key, _)| key.clone());
            let Some(oldest) = oldest else { break };
            slots.remove(&oldest);
            info!("session store full, evicted {}", oldest);
        }

        let session = SharedSession::default();
        slots.insert(
            id,
            Slot {
                session: Arc::clone(&session),
                expires_at: now + self.ttl,
            },
        );
        session
    }

    /// Drop every expired session; returns how many were removed
    pub fn sweep(&self) -> usize {
        sweep(&mut self.slots(), Instant::now())
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<String, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn sweep(slots: &mut HashMap<String, Slot>, now: Instant) -> usize {
    let before = slots.len();
    slots.retain(|_, slot| slot.expires_at > now);
    before - slots.len()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DashboardError;

    const CSV: &[u8] = b"Date,Product,State,Sales Channel,Payment Method,Total Price\n\
2024-01-01,Widget,NY,Online,Card,100\n\
2024-01-05,Gadget,CA,Store,Cash,50\n";

    const HOUR: Duration = Duration::from_secs(3600);

    #[test]
    fn sessions_expire_after_their_ttl() {
        let store = SessionStore::new(HOUR, 10);
        let start = Instant::now();
        store.insert_at("a".into(), start);
        assert!(store.get_at("a", start + HOUR / 2).is_some());
        // the lookup above pushed the expiry out
        assert!(store.get_at("a", start + HOUR).is_some());
        assert!(store.get_at("a", start + HOUR * 3).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn inserting_sweeps_expired_sessions() {
        let store = SessionStore::new(HOUR, 10);
        let start = Instant::now();
        store.insert_at("a".into(), start);
        store.insert_at("b".into(), start);
        store.insert_at("c".into(), start + HOUR * 2);
        assert_eq!(store.len(), 1);
        assert!(store.get_at("c", start + HOUR * 2).is_some());
    }

    #[test]
    fn full_store_evicts_the_stalest_session() {
        let store = SessionStore::new(HOUR, 2);
        let start = Instant::now();
        store.insert_at("a".into(), start);
        store.insert_at("b".into(), start + Duration::from_secs(1));
        store.insert_at("c".into(), start + Duration::from_secs(2));
        assert_eq!(store.len(), 2);
        assert!(store.get_at("a", start).is_none());
        assert!(store.get_at("b", start).is_some());
        assert!(store.get_at("c", start).is_some());
    }

    #[test]
    fn unknown_ids_are_not_created() {
        let store = SessionStore::new(HOUR, 10);
        assert!(store.get("forged").is_none());
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn a_session_is_shared_between_lookups() {
        let store = SessionStore::new(HOUR, 10);
        let first = store.insert("a".into());
        lock_session(&first).toggle_theme();
        let again = store.get("a").unwrap();
        assert_eq!(lock_session(&again).theme(), Theme::Dark);
    }

    #[test]
    fn theme_toggles_back_and_forth() {
        let mut session = Session::new();
        assert_eq!(session.theme(), Theme::Light);
        assert_eq!(session.toggle_theme(), Theme::Dark);
        assert_eq!(session.toggle_theme(), Theme::Light);
    }

    #[test]
    fn nothing_to_render_before_upload() {
        let session = Session::new();
        assert!(session
            .render(&FilterSelection::default(), &GraphOptions::default())
            .is_none());
        assert!(session.filter_options().is_none());
    }

    #[test]
    fn upload_keeps_the_normalized_table() {
        let mut session = Session::new();
        let upload = session.set_upload("sales.csv", CSV).unwrap();
        assert_eq!(upload.table.len(), 2);
        let opts = session.filter_options().unwrap();
        assert_eq!(opts.products, vec!["Widget", "Gadget"]);
    }

    #[test]
    fn failed_upload_clears_the_previous_one() {
        let mut session = Session::new();
        session.set_upload("sales.csv", CSV).unwrap();
        let err = session
            .set_upload("bad.csv", b"Date,Product\nyesterday,Widget\n")
            .unwrap_err();
        assert!(matches!(err, DashboardError::DateParse(_)));
        assert!(session.upload().is_none());
    }

    #[test]
    fn render_uses_the_session_theme() {
        let mut session = Session::new();
        session.set_upload("sales.csv", CSV).unwrap();
        session.toggle_theme();
        let state = session
            .render(&FilterSelection::default(), &GraphOptions::default())
            .unwrap()
            .unwrap();
        assert_eq!(state.theme, Theme::Dark);
        assert_eq!(state.summary.total_orders, 2);
    }
}
