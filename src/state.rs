use crate::db::DbClient;
use crate::db_models::{RunningRecord, SessionRecord};
use crate::geo::{FixOutcome, GeoError, GeoTrack, SamplingPolicy};
use crate::models::{
    FinishRequest, FinishResponse, FixRequest, FixResponse, RunningView, StartRequest,
    StartResponse, Update, UpdateChange,
};
use crate::progress::BookProgress;
use crate::session::{ReadingSession, SessionError};
use crate::utils;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::pin::Pin;
use tokio::sync::broadcast;

#[derive(Debug)]
pub enum Error {
    NoSuchSession,
    AlreadyRunning,
    InvalidTimestamp,
    Session(SessionError),
    Geo(GeoError),
    Storage(anyhow::Error),
}

impl From<SessionError> for Error {
    fn from(err: SessionError) -> Self {
        Error::Session(err)
    }
}

impl From<GeoError> for Error {
    fn from(err: GeoError) -> Self {
        Error::Geo(err)
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Storage(err)
    }
}

/// A session currently being read, together with its volatile GPS track.
pub struct RunningSession {
    pub session_id: String,
    pub subject: String,
    pub session: ReadingSession,
    pub track: GeoTrack,
}

struct Token {
    subject: String,
    expires_at: DateTime<Utc>,
}

/// Tuning knobs that come from the command line.
pub struct Settings {
    pub sampling: SamplingPolicy,
    pub move_threshold_meters: f64,
    pub max_fixes: usize,
    pub token_lifetime: TimeDelta,
}

pub struct State {
    pub updates: Updates,
    db: DbClient,
    settings: Settings,
    passwords: HashMap<String, String>,
    tokens: HashMap<String, Token>,
    // Keyed by subject: the map itself carries the "at most one running
    // session per reader" invariant, mirrored by the PRIMARY KEY on the
    // running_sessions table.
    running: HashMap<String, RunningSession>,
}

impl State {
    pub async fn new(
        updates: Updates,
        database_file: &Path,
        password_file: &Path,
        settings: Settings,
    ) -> anyhow::Result<Self> {
        let db = DbClient::new(database_file).await?;

        let passwords = utils::read_colon_separated_file(password_file).unwrap_or_else(|err| {
            log::warn!("Cannot read password file {password_file:?}: {err}; no logins possible");
            HashMap::new()
        });

        let mut running = HashMap::new();
        for record in db.load_running().await? {
            log::info!(
                "Resuming running session {} for {}",
                record.session_id,
                record.subject
            );
            running.insert(
                record.subject.clone(),
                RunningSession {
                    session_id: record.session_id,
                    subject: record.subject,
                    session: record.session,
                    track: GeoTrack::new(settings.max_fixes),
                },
            );
        }

        Ok(State {
            updates,
            db,
            settings,
            passwords,
            tokens: HashMap::new(),
            running,
        })
    }

    // ========================
    // Authentication
    // ========================

    pub fn authenticate(&self, username: &str, password: &str) -> bool {
        self.passwords
            .get(username)
            .is_some_and(|hash| bcrypt::verify(password, hash).unwrap_or(false))
    }

    pub fn create_token(&mut self, username: &str, password: &str, now: DateTime<Utc>) -> Option<String> {
        if !self.authenticate(username, password) {
            return None;
        }
        let token = utils::generate_id();
        self.tokens.insert(
            utils::token_hash(&token),
            Token {
                subject: username.to_string(),
                expires_at: now + self.settings.token_lifetime,
            },
        );
        Some(token)
    }

    /// Resolves a bearer token to its subject, pruning expired tokens.
    pub fn check_token(&mut self, token: &str, now: DateTime<Utc>) -> Option<String> {
        self.tokens.retain(|_, t| t.expires_at > now);
        self.tokens
            .get(&utils::token_hash(token))
            .map(|t| t.subject.clone())
    }

    // ========================
    // Session lifecycle
    // ========================

    /// Starts a session for `subject`. The insert into the running map is the
    /// single mutation point for the one-session-per-reader invariant; it
    /// happens under the state lock, and the table's PRIMARY KEY backs it
    /// durably.
    pub async fn start_session(
        &mut self,
        subject: &str,
        data: StartRequest,
        now: DateTime<Utc>,
    ) -> Result<StartResponse, Error> {
        if self.running.contains_key(subject) {
            return Err(Error::AlreadyRunning);
        }

        // A registered book supplies the page count when the caller omits it.
        let total_pages = match data.total_pages {
            Some(total) => Some(total),
            None => self
                .db
                .get_book(&data.title)
                .await?
                .and_then(|book| book.total_pages),
        };

        let session = ReadingSession::start(
            data.title,
            data.author,
            total_pages,
            data.start_page,
            now,
        )?;
        let session_id = utils::generate_id();

        let record = RunningRecord {
            subject: subject.to_string(),
            session_id: session_id.clone(),
            session: session.clone(),
        };
        self.db.insert_running(&record).await?;

        let running = RunningSession {
            session_id: session_id.clone(),
            subject: subject.to_string(),
            session,
            track: GeoTrack::new(self.settings.max_fixes),
        };
        let view = self.view(&running, now);
        self.running.insert(subject.to_string(), running);

        self.updates.send_update(
            UpdateContext {
                subject: Some(subject.to_string()),
            },
            Update::single(UpdateChange::Started { session: view }),
        );

        Ok(StartResponse {
            session_id,
            started_at: now,
            total_pages,
        })
    }

    /// Ingests one GPS fix for the subject's running session.
    pub fn add_fix(&mut self, subject: &str, data: &FixRequest) -> Result<FixResponse, Error> {
        let threshold = self.settings.move_threshold_meters;
        let sampling = self.settings.sampling;

        let running = self.running.get_mut(subject).ok_or(Error::NoSuchSession)?;
        if running.session_id != data.session_id {
            return Err(Error::NoSuchSession);
        }

        let time = DateTime::from_timestamp_millis((data.time * 1000.0) as i64)
            .ok_or(Error::InvalidTimestamp)?;
        let outcome = running.track.add_fix(data.lat, data.lon, time, &sampling)?;

        let distance_km = running.track.total_distance_km();
        let movement = running.track.classify(threshold);
        let response = FixResponse {
            outcome,
            distance_km,
            fix_count: running.track.len() as u32,
            movement,
        };

        if outcome == FixOutcome::Recorded {
            let change = UpdateChange::Fix {
                session_id: running.session_id.clone(),
                // just recorded, so the track has a last fix
                fix: *running.track.last_fix().ok_or(Error::NoSuchSession)?,
                distance_km,
                movement,
            };
            self.updates.send_update(
                UpdateContext {
                    subject: Some(subject.to_string()),
                },
                Update::single(change),
            );
        }

        Ok(response)
    }

    /// Finishes the subject's running session: validates, persists the
    /// record, folds the book aggregate, and announces the result.
    ///
    /// Validation failures leave the session running so the caller can
    /// correct the input; nothing is written before validation passes.
    pub async fn finish_session(
        &mut self,
        subject: &str,
        data: FinishRequest,
        now: DateTime<Utc>,
    ) -> Result<FinishResponse, Error> {
        let threshold = self.settings.move_threshold_meters;

        let running = self.running.get_mut(subject).ok_or(Error::NoSuchSession)?;
        if running.session_id != data.session_id {
            return Err(Error::NoSuchSession);
        }

        let summary = running.session.finish(data.end_page, now, data.reflection)?;

        let movement = running.track.classify(threshold);
        let total_pages = running.session.total_pages();
        let projection =
            total_pages.and_then(|total| running.session.project_completion(now, total));
        let record = SessionRecord::from_finished(
            &running.session_id,
            subject,
            &running.session,
            &summary,
            &running.track,
            movement,
            projection.map(|p| p.eta),
        );

        self.db.insert_session(&record).await?;
        self.db.delete_running(subject).await?;

        let prior = self.db.get_book(&record.title).await?.unwrap_or_else(|| {
            BookProgress::new(record.title.clone(), record.author.clone(), total_pages)
        });
        let is_full_completion = total_pages.is_some_and(|total| record.end_page >= total);
        let mut folded = prior.apply(&summary, is_full_completion);
        // A page count learned in this session sticks to the registry.
        folded.total_pages = folded.total_pages.or(total_pages);
        self.db.upsert_book(&folded).await?;

        self.running.remove(subject);

        let response = FinishResponse {
            session_id: record.session_id.clone(),
            title: record.title.clone(),
            end_page: record.end_page,
            pages_read: record.pages_read,
            duration_seconds: record.duration_seconds,
            pace_pages_per_minute: record.pace_pages_per_minute,
            distance_km: record.distance_km,
            movement,
            estimated_completion: record.estimated_completion,
        };
        self.updates.send_update(
            UpdateContext {
                subject: Some(subject.to_string()),
            },
            Update::single(UpdateChange::Finished {
                summary: response.clone(),
            }),
        );

        Ok(response)
    }

    // ========================
    // Read side
    // ========================

    pub async fn history(&self, subject: &str) -> Result<Vec<SessionRecord>, Error> {
        Ok(self.db.history(subject).await?)
    }

    pub async fn progress(&self) -> Result<Vec<BookProgress>, Error> {
        Ok(self.db.list_progress().await?)
    }

    fn view(&self, running: &RunningSession, now: DateTime<Utc>) -> RunningView {
        RunningView {
            session_id: running.session_id.clone(),
            title: running.session.title().to_string(),
            author: running.session.author().map(str::to_string),
            total_pages: running.session.total_pages(),
            start_page: running.session.start_page(),
            started_at: running.session.started_at(),
            elapsed_seconds: running.session.elapsed_seconds(now),
            distance_km: running.track.total_distance_km(),
            movement: running.track.classify(self.settings.move_threshold_meters),
            fix_count: running.track.len() as u32,
        }
    }

    /// Dashboard snapshot of one subject's running sessions (0 or 1 of them).
    pub fn views_for(&self, subject: &str, now: DateTime<Utc>) -> Vec<RunningView> {
        self.running
            .get(subject)
            .map(|running| self.view(running, now))
            .into_iter()
            .collect()
    }

    pub fn num_sessions(&self) -> usize {
        self.running.len()
    }

    pub fn iter_sessions(&self) -> impl Iterator<Item = &RunningSession> {
        self.running.values()
    }
}

// ========================
// Dashboard update fan-out
// ========================

pub type UpdateBroadcast =
    Result<(UpdateContext, Update), tokio_stream::wrappers::errors::BroadcastStreamRecvError>;

#[derive(Debug, Clone)]
pub struct UpdateContext {
    /// Receiver of this update; `None` reaches every stream (heartbeats).
    pub subject: Option<String>,
}

pub struct Updates {
    updates_tx: broadcast::Sender<(UpdateContext, Update)>,
}

impl Updates {
    /// Sets up the broadcast channel and the heartbeat task. Dashboards see a
    /// change no later than `heartbeat` after it happens, and an empty update
    /// at least that often to keep stopwatch displays fresh.
    pub async fn new(heartbeat: std::time::Duration) -> Self {
        let (updates_tx, _updates_rx) = broadcast::channel(64);

        let tx = updates_tx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat);
            loop {
                ticker.tick().await;
                match tx.send((UpdateContext { subject: None }, Update::heartbeat())) {
                    Ok(_) => (),
                    Err(_) => (), // this is fine.. it happens when there are no subscribers.
                }
            }
        });

        Self { updates_tx }
    }

    fn send_update(&self, context: UpdateContext, update: Update) {
        match self.updates_tx.send((context, update)) {
            Ok(_) => (),
            Err(_) => (), // this is fine.. it happens when there are no subscribers.
        }
    }

    /// Stream for one subscriber: a snapshot of their running sessions first,
    /// then every update addressed to them (plus broadcasts).
    pub async fn updates(
        &self,
        state: &State,
        subject: String,
    ) -> Pin<Box<dyn futures_util::stream::Stream<Item = UpdateBroadcast>>> {
        let updates =
            tokio_stream::wrappers::BroadcastStream::new(self.updates_tx.subscribe());

        let initial_message = (
            UpdateContext {
                subject: Some(subject.clone()),
            },
            Update::single(UpdateChange::Snapshot {
                sessions: state.views_for(&subject, Utc::now()),
            }),
        );
        let first_stream =
            futures_util::stream::once(async move { UpdateBroadcast::Ok(initial_message) });

        // Filter out messages addressed to other subscribers
        let updates = futures_util::StreamExt::filter_map(updates, move |x| {
            let subject = subject.clone();
            async move {
                let for_us = match &x {
                    Ok((context, _update)) => context
                        .subject
                        .as_ref()
                        .is_none_or(|receiver| *receiver == subject),
                    Err(_) => true,
                };
                for_us.then_some(x)
            }
        });

        let updates = futures_util::StreamExt::chain(first_stream, updates);

        Box::pin(updates)
    }
}
