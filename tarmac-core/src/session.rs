use std::fmt;

use crate::models::Itinerary;
use crate::{Classify, ErrorKind};

/// Per-client state: who is logged in and the itineraries of the latest search.
///
/// Itinerary indices are positions in the most recent search result and are only
/// meaningful until the next search on the same session.
#[derive(Debug, Default)]
pub struct Session {
    user: Option<String>,
    itineraries: Vec<Itinerary>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn username(&self) -> Option<&str> {
        self.user.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    pub(crate) fn authenticate(&mut self, username: &str) {
        self.user = Some(username.to_string());
    }

    pub fn logout(&mut self) -> Result<LoggedOut, LogoutError> {
        let username = self.user.take().ok_or(LogoutError::NotLoggedIn)?;
        self.itineraries.clear();
        Ok(LoggedOut { username })
    }

    pub fn itineraries(&self) -> &[Itinerary] {
        &self.itineraries
    }

    /// Look up an itinerary by the index shown in the last search. Negative or
    /// out-of-range indices yield `None`.
    pub fn itinerary(&self, index: i32) -> Option<&Itinerary> {
        usize::try_from(index).ok().and_then(|i| self.itineraries.get(i))
    }

    pub(crate) fn replace_itineraries(&mut self, itineraries: Vec<Itinerary>) {
        self.itineraries = itineraries;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedOut {
    pub username: String,
}

impl fmt::Display for LoggedOut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Logged out {}", self.username)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LogoutError {
    #[error("Cannot log out, not logged in")]
    NotLoggedIn,
}

impl Classify for LogoutError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::Auth
    }
}
