//! Registry aller Sessions, indiziert nach Anruf
//!
//! Der Lock wird nur fuer Einfuegen, Entfernen und Nachschlagen gehalten,
//! nie ueber einen await-Punkt.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use voicerelay_core::{CallId, RelayError, Result, SessionId};

use crate::session::VoiceSession;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<CallId, Arc<VoiceSession>>>>,
}

impl SessionRegistry {
    pub fn neu() -> Self {
        Self::default()
    }

    /// Belegt den Platz fuer einen Anruf; schlaegt fehl wenn er schon belegt ist
    pub fn reservieren(&self, session: Arc<VoiceSession>) -> Result<()> {
        let call_id = session.call_id();
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(&call_id) {
            return Err(RelayError::BereitsVerbunden(call_id));
        }
        sessions.insert(call_id, session);
        Ok(())
    }

    pub fn entfernen(&self, call_id: CallId) -> Option<Arc<VoiceSession>> {
        self.sessions.lock().remove(&call_id)
    }

    /// Entfernt nur, wenn der Platz noch von genau dieser Session belegt ist
    pub fn entfernen_wenn(&self, call_id: CallId, session_id: SessionId) -> Option<Arc<VoiceSession>> {
        let mut sessions = self.sessions.lock();
        match sessions.get(&call_id) {
            Some(s) if s.session_id() == session_id => sessions.remove(&call_id),
            _ => None,
        }
    }

    pub fn holen(&self, call_id: CallId) -> Option<Arc<VoiceSession>> {
        self.sessions.lock().get(&call_id).cloned()
    }

    pub fn call_ids(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.sessions.lock().keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn anzahl(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn ist_leer(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
