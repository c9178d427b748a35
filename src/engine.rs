// 🔁 Session Engine - per-session roster state with live watch
//
// Every operation is a read-modify-write against the store under the
// session key. Nothing is cached in-process, so several engines (or several
// server processes over a shared store) stay consistent up to the store.
// Concurrent mutations of one key race: the last write wins.

use std::future::Future;
use std::sync::Arc;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bands::{average_age, BandTable};
use crate::error::SessionError;
use crate::rower::{Clock, Rower, SystemClock};
use crate::store::StateStore;

// ============================================================================
// STATE
// ============================================================================

/// Aggregates shown next to the roster, recomputed on every mutation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedSignals {
    /// Mean age with one decimal, e.g. "35.0"
    #[serde(rename = "averageAge")]
    pub average_age: String,

    /// Band of the mean age; empty when the crew is too young
    #[serde(rename = "averageBand")]
    pub average_category: String,

    /// Placeholder for the age input, e.g. "e.g. 1972 or 53"
    #[serde(rename = "example")]
    pub example_hint: String,
}

/// The aggregate stored under a session key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterState {
    #[serde(default)]
    pub rowers: Vec<Rower>,
    #[serde(default)]
    pub signals: DerivedSignals,
}

impl RosterState {
    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        serde_json::to_vec(self).map_err(SessionError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> Result<RosterState, SessionError> {
        serde_json::from_slice(bytes).map_err(SessionError::DecodeFailure)
    }
}

// ============================================================================
// ENGINE
// ============================================================================

#[derive(Clone)]
pub struct SessionEngine {
    store: Arc<dyn StateStore>,
    clock: Arc<dyn Clock>,
    bands: BandTable,
}

impl SessionEngine {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock))
    }

    pub fn with_clock(store: Arc<dyn StateStore>, clock: Arc<dyn Clock>) -> Self {
        SessionEngine {
            store,
            clock,
            bands: BandTable::masters(),
        }
    }

    /// Add a rower to the end of the session's roster
    pub async fn create(
        &self,
        key: &str,
        name: &str,
        birth_year_or_age: &str,
    ) -> Result<(), SessionError> {
        let value: i32 = birth_year_or_age
            .trim()
            .parse()
            .map_err(|_| SessionError::InvalidInput(birth_year_or_age.to_string()))?;

        let mut state = self.load(key).await?;
        let rower = Rower::create(name, value, self.clock.as_ref(), &self.bands)?;

        info!(session = key, rower = ?rower, "created rower");
        state.rowers.push(rower);

        self.refresh_signals(&mut state);
        self.save(key, &state).await
    }

    /// Remove the rower at `index`; later rowers shift down by one
    pub async fn delete(&self, key: &str, index: i64) -> Result<(), SessionError> {
        let mut state = self.load(key).await?;

        let len = state.rowers.len();
        let position = usize::try_from(index)
            .ok()
            .filter(|&i| i < len)
            .ok_or(SessionError::IndexOutOfRange { index, len })?;

        let removed = state.rowers.remove(position);
        info!(session = key, rower = ?removed, "deleted rower");

        self.refresh_signals(&mut state);
        self.save(key, &state).await
    }

    /// Current state of the session (empty when absent or unreadable)
    pub async fn snapshot(&self, key: &str) -> Result<RosterState, SessionError> {
        let mut state = self.load(key).await?;
        if state.rowers.is_empty() && state.signals == DerivedSignals::default() {
            self.refresh_signals(&mut state);
        }
        Ok(state)
    }

    /// Stream the session's state to `on_state` until `cancel` resolves.
    ///
    /// `on_state` is called at once with an empty roster, then with the
    /// stored state if there is one, then after every write to the key.
    /// Returns `Ok(())` on cancellation; a decode or callback error ends the
    /// watch with that error.
    pub async fn watch<F, C>(&self, key: &str, cancel: C, mut on_state: F) -> Result<(), SessionError>
    where
        F: FnMut(RosterState) -> Result<(), SessionError>,
        C: Future<Output = ()>,
    {
        let mut initial = RosterState::default();
        self.refresh_signals(&mut initial);
        on_state(initial)?;

        // Subscribe before reading so no write slips between the two
        let mut subscription = self.store.subscribe(key).await?;
        if let Some(bytes) = self.store.get(key).await? {
            match RosterState::decode(&bytes) {
                Ok(state) => on_state(state)?,
                Err(e) => warn!(session = key, error = %e, "skipping unreadable roster"),
            }
        }

        tokio::pin!(cancel);
        loop {
            tokio::select! {
                _ = &mut cancel => {
                    debug!(session = key, "watch cancelled");
                    return Ok(());
                }
                next = subscription.next_value() => {
                    let Some(bytes) = next else {
                        debug!(session = key, "store closed subscription");
                        return Ok(());
                    };
                    on_state(RosterState::decode(&bytes)?)?;
                }
            }
        }
    }

    async fn load(&self, key: &str) -> Result<RosterState, SessionError> {
        let Some(bytes) = self.store.get(key).await? else {
            return Ok(RosterState::default());
        };
        match RosterState::decode(&bytes) {
            Ok(state) => Ok(state),
            Err(e) => {
                warn!(session = key, error = %e, "discarding unreadable roster");
                Ok(RosterState::default())
            }
        }
    }

    async fn save(&self, key: &str, state: &RosterState) -> Result<(), SessionError> {
        let bytes = state.encode()?;
        let revision = self.store.put(key, bytes).await?;
        debug!(session = key, revision, rowers = state.rowers.len(), "saved roster");
        Ok(())
    }

    fn refresh_signals(&self, state: &mut RosterState) {
        state.signals = compute_signals(&state.rowers, &self.bands, self.clock.as_ref());
    }
}

/// Derive the signals for a roster. The example hint is random each call.
pub fn compute_signals(rowers: &[Rower], bands: &BandTable, clock: &dyn Clock) -> DerivedSignals {
    let average = average_age(rowers);
    let average_category = bands.band_for(average).unwrap_or_default().to_string();

    let example_age = rand::thread_rng().gen_range(bands.min_age()..bands.max_age()) as i32;
    let example_year = clock.current_year() - example_age;

    debug!(average_age = average, average_category = %average_category, "updated averages");
    DerivedSignals {
        average_age: format!("{:.1}", average),
        average_category,
        example_hint: format!("e.g. {} or {}", example_year, example_age),
    }
}
