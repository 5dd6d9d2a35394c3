use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::async_trait;
use serenity::http::Http;
use serenity::model::id::{ChannelId, GuildId, UserId};
use songbird::error::JoinError;
use songbird::input::ytdl;
use songbird::tracks::TrackHandle;
use songbird::{Call, Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent};
use thiserror::Error;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::check_msg;

pub const SKIP_VOTE_THRESHOLD: usize = 3;
pub const DEFAULT_VOLUME: f32 = 0.6;

type VoiceHandle = Arc<tokio::sync::Mutex<Call>>;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("could not resolve an audio source for `{query}`: {source}")]
    Resolution {
        query: String,
        #[source]
        source: songbird::input::error::Error,
    },
    #[error("audio source for `{query}` has no usable stream URL")]
    MissingSourceUrl { query: String },
    #[error("could not join the voice channel: {0}")]
    Connection(#[from] JoinError),
    #[error("could not read playlist `{url}`: {reason}")]
    Playlist { url: String, reason: String },
}

/// One user's request to play one audio source. Immutable once built.
#[derive(Debug, Clone)]
pub struct TrackRequest {
    pub requester: UserId,
    pub requester_name: String,
    pub channel: ChannelId,
    pub source_url: String,
    pub title: String,
    pub uploader: String,
    pub duration: Option<Duration>,
}

impl TrackRequest {
    pub fn describe(&self) -> String {
        let mut description = format!(
            "*{}* uploaded by {} and requested by {}",
            self.title, self.uploader, self.requester_name
        );
        if let Some(duration) = self.duration {
            let seconds = duration.as_secs();
            description.push_str(&format!(" [length: {}m {}s]", seconds / 60, seconds % 60));
        }
        description
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipVote {
    /// The requester of the current track asked for the skip; no vote needed.
    Requester,
    /// The vote pushed the tally to the threshold.
    Passed,
    /// Counted, threshold not reached yet.
    Counted(usize),
    AlreadyVoted,
}

#[derive(Default)]
struct SessionState {
    current: Option<TrackRequest>,
    pending: VecDeque<TrackRequest>,
    skip_votes: HashSet<UserId>,
    voice: Option<VoiceHandle>,
    track_handle: Option<TrackHandle>,
}

impl SessionState {
    fn next_pending(&mut self) -> Option<TrackRequest> {
        let next = self.pending.pop_front()?;
        self.current = Some(next.clone());
        self.skip_votes.clear();
        Some(next)
    }

    fn clear_current(&mut self) {
        self.current = None;
        self.track_handle = None;
        self.skip_votes.clear();
    }

    fn record_skip_vote(&mut self, voter: UserId) -> Option<SkipVote> {
        let current = self.current.as_ref()?;
        if voter == current.requester {
            return Some(SkipVote::Requester);
        }
        if !self.skip_votes.insert(voter) {
            return Some(SkipVote::AlreadyVoted);
        }
        let total = self.skip_votes.len();
        if total >= SKIP_VOTE_THRESHOLD {
            Some(SkipVote::Passed)
        } else {
            Some(SkipVote::Counted(total))
        }
    }
}

/// Per-guild playback state plus the advance loop that serializes it.
///
/// Tracks play in strict FIFO order. The loop parks while the queue is empty
/// or no voice handle is attached, and while a track is playing; `wakeup` and
/// `track_done` are the two signals that move it along.
pub struct PlaybackSession {
    guild_id: GuildId,
    state: Mutex<SessionState>,
    wakeup: Notify,
    track_done: Notify,
    driver: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackSession {
    fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            state: Mutex::new(SessionState::default()),
            wakeup: Notify::new(),
            track_done: Notify::new(),
            driver: Mutex::new(None),
        }
    }

    pub fn enqueue(&self, track: TrackRequest) {
        self.state.lock().pending.push_back(track);
        self.wakeup.notify_one();
    }

    pub fn enqueue_all(&self, tracks: Vec<TrackRequest>) {
        self.state.lock().pending.extend(tracks);
        self.wakeup.notify_one();
    }

    pub fn attach_voice(&self, call: VoiceHandle) {
        self.state.lock().voice = Some(call);
        self.wakeup.notify_one();
    }

    pub fn has_voice(&self) -> bool {
        self.state.lock().voice.is_some()
    }

    pub fn is_playing(&self) -> bool {
        let state = self.state.lock();
        state.voice.is_some() && state.current.is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn pending_titles(&self, limit: usize) -> Vec<String> {
        self.state
            .lock()
            .pending
            .iter()
            .take(limit)
            .map(|track| track.title.clone())
            .collect()
    }

    /// Description of the current track plus the skip-vote tally, if playing.
    pub fn now_playing(&self) -> Option<(String, usize)> {
        let state = self.state.lock();
        state
            .current
            .as_ref()
            .map(|track| (track.describe(), state.skip_votes.len()))
    }

    pub fn skip(&self) {
        let handle = {
            let mut state = self.state.lock();
            state.skip_votes.clear();
            state.track_handle.clone()
        };
        if let Some(handle) = handle {
            if let Err(why) = handle.stop() {
                debug!("stop signal for current track failed: {why:?}");
            }
        }
    }

    /// Returns `None` when nothing is playing.
    pub fn record_skip_vote(&self, voter: UserId) -> Option<SkipVote> {
        let outcome = self.state.lock().record_skip_vote(voter)?;
        if matches!(outcome, SkipVote::Requester | SkipVote::Passed) {
            self.skip();
        }
        Some(outcome)
    }

    pub fn set_volume(&self, volume: f32) {
        if let Some(handle) = self.state.lock().track_handle.clone() {
            if let Err(why) = handle.set_volume(volume) {
                debug!("volume change failed: {why:?}");
            }
        }
    }

    pub fn pause(&self) {
        if let Some(handle) = self.state.lock().track_handle.clone() {
            if let Err(why) = handle.pause() {
                debug!("pause failed: {why:?}");
            }
        }
    }

    pub fn resume(&self) {
        if let Some(handle) = self.state.lock().track_handle.clone() {
            if let Err(why) = handle.play() {
                debug!("resume failed: {why:?}");
            }
        }
    }

    fn begin_next(&self) -> Option<(TrackRequest, VoiceHandle)> {
        let mut state = self.state.lock();
        let call = state.voice.clone()?;
        let track = state.next_pending()?;
        Some((track, call))
    }

    fn store_track_handle(&self, handle: TrackHandle) {
        self.state.lock().track_handle = Some(handle);
    }

    // Clears the current track without signalling `track_done`; used on the
    // advance loop's own error path, which continues directly.
    fn abandon_current(&self) {
        self.state.lock().clear_current();
    }

    fn mark_track_finished(&self) {
        self.state.lock().clear_current();
        self.track_done.notify_one();
    }

    fn set_driver(&self, task: JoinHandle<()>) {
        *self.driver.lock() = Some(task);
    }

    // Best-effort teardown: every step runs even if an earlier one failed.
    fn shutdown(&self) {
        if let Some(task) = self.driver.lock().take() {
            task.abort();
        }
        let mut state = self.state.lock();
        if let Some(handle) = state.track_handle.take() {
            if let Err(why) = handle.stop() {
                debug!("stopping track during teardown failed: {why:?}");
            }
        }
        state.current = None;
        state.pending.clear();
        state.skip_votes.clear();
        state.voice = None;
    }
}

async fn drive(session: Arc<PlaybackSession>, http: Arc<Http>) {
    loop {
        let (track, call) = loop {
            if let Some(next) = session.begin_next() {
                break next;
            }
            session.wakeup.notified().await;
        };

        check_msg(
            track
                .channel
                .say(&http, format!("Now playing {}", track.describe()))
                .await,
        );

        let source = match ytdl(&track.source_url).await {
            Ok(source) => source,
            Err(why) => {
                info!(
                    "source for `{}` in guild {} failed to load: {why:?}",
                    track.title, session.guild_id.0
                );
                check_msg(
                    track
                        .channel
                        .say(&http, format!("Could not play *{}*, skipping it.", track.title))
                        .await,
                );
                session.abandon_current();
                continue;
            }
        };

        let handle = {
            let mut call = call.lock().await;
            call.play_source(source)
        };
        if let Err(why) = handle.set_volume(DEFAULT_VOLUME) {
            debug!("setting default volume failed: {why:?}");
        }
        if handle
            .add_event(
                Event::Track(TrackEvent::End),
                TrackEndNotifier {
                    session: Arc::clone(&session),
                },
            )
            .is_err()
        {
            // The track died before we could watch it; move on.
            session.abandon_current();
            continue;
        }
        session.store_track_handle(handle);

        session.track_done.notified().await;
    }
}

struct TrackEndNotifier {
    session: Arc<PlaybackSession>,
}

#[async_trait]
impl VoiceEventHandler for TrackEndNotifier {
    async fn act(&self, _ctx: &EventContext<'_>) -> Option<Event> {
        self.session.mark_track_finished();
        None
    }
}

/// One playback session per guild, created lazily, removed on explicit stop.
pub struct SessionRegistry {
    sessions: DashMap<GuildId, Arc<PlaybackSession>>,
    songbird: Arc<Songbird>,
}

impl SessionRegistry {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self {
            sessions: DashMap::new(),
            songbird,
        }
    }

    pub fn get(&self, guild_id: GuildId) -> Option<Arc<PlaybackSession>> {
        self.sessions.get(&guild_id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns the guild's session, constructing it and spawning its advance
    /// loop on first use. The map entry guarantees exactly one loop per guild.
    pub fn get_or_create(&self, guild_id: GuildId, http: &Arc<Http>) -> Arc<PlaybackSession> {
        let entry = self.sessions.entry(guild_id).or_insert_with(|| {
            let session = Arc::new(PlaybackSession::new(guild_id));
            let driver = tokio::spawn(drive(Arc::clone(&session), Arc::clone(http)));
            session.set_driver(driver);
            session
        });
        Arc::clone(entry.value())
    }

    /// Joins (or moves to) the voice channel and attaches the handle to the
    /// guild's session.
    pub async fn connect(
        &self,
        guild_id: GuildId,
        channel_id: ChannelId,
        http: &Arc<Http>,
    ) -> Result<Arc<PlaybackSession>, PlaybackError> {
        let session = self.get_or_create(guild_id, http);
        let (call, join_result) = self.songbird.join(guild_id, channel_id).await;
        join_result?;

        {
            let mut handler = call.lock().await;
            if !handler.is_deaf() {
                if let Err(why) = handler.deafen(true).await {
                    info!("deafen in guild {} failed: {why:?}", guild_id.0);
                }
            }
        }

        session.attach_voice(call);
        Ok(session)
    }

    /// Idempotent stop: cancels the loop, releases the voice handle and drops
    /// the entry. Teardown failures are logged and swallowed. Returns whether
    /// a session existed.
    pub async fn remove(&self, guild_id: GuildId) -> bool {
        let session = match self.sessions.remove(&guild_id) {
            Some((_, session)) => session,
            None => return false,
        };
        session.shutdown();
        if let Err(why) = self.songbird.remove(guild_id).await {
            info!("voice disconnect for guild {} failed: {why:?}", guild_id.0);
        }
        true
    }

    pub async fn remove_all(&self) {
        let guild_ids: Vec<GuildId> = self.sessions.iter().map(|entry| *entry.key()).collect();
        for guild_id in guild_ids {
            self.remove(guild_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(requester: u64, title: &str) -> TrackRequest {
        TrackRequest {
            requester: UserId(requester),
            requester_name: format!("user-{requester}"),
            channel: ChannelId(99),
            source_url: format!("https://example.invalid/{title}"),
            title: title.to_string(),
            uploader: "uploader".to_string(),
            duration: None,
        }
    }

    #[test]
    fn pending_tracks_dequeue_in_fifo_order() {
        let mut state = SessionState::default();
        for title in ["a", "b", "c"] {
            state.pending.push_back(request(1, title));
        }

        let order: Vec<String> =
            std::iter::from_fn(|| state.next_pending().map(|track| track.title)).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
    }

    #[test]
    fn fresh_session_is_not_playing() {
        let session = PlaybackSession::new(GuildId(1));
        assert!(!session.is_playing());
    }

    #[test]
    fn enqueue_without_voice_handle_does_not_start_playback() {
        let session = PlaybackSession::new(GuildId(1));
        for title in ["a", "b", "c"] {
            session.enqueue(request(1, title));
        }

        assert_eq!(session.pending_count(), 3);
        assert!(!session.is_playing());
        assert!(session.begin_next().is_none());
    }

    #[test]
    fn three_distinct_voters_pass_a_skip_vote() {
        let mut state = SessionState::default();
        state.pending.push_back(request(1, "track"));
        state.next_pending();

        assert_eq!(state.record_skip_vote(UserId(2)), Some(SkipVote::Counted(1)));
        assert_eq!(state.record_skip_vote(UserId(3)), Some(SkipVote::Counted(2)));
        assert_eq!(state.record_skip_vote(UserId(4)), Some(SkipVote::Passed));
    }

    #[test]
    fn requester_vote_skips_immediately() {
        let mut state = SessionState::default();
        state.pending.push_back(request(1, "track"));
        state.next_pending();

        assert_eq!(state.record_skip_vote(UserId(1)), Some(SkipVote::Requester));
    }

    #[test]
    fn duplicate_votes_are_rejected() {
        let mut state = SessionState::default();
        state.pending.push_back(request(1, "track"));
        state.next_pending();

        assert_eq!(state.record_skip_vote(UserId(2)), Some(SkipVote::Counted(1)));
        assert_eq!(state.record_skip_vote(UserId(2)), Some(SkipVote::AlreadyVoted));
    }

    #[test]
    fn votes_without_a_current_track_are_ignored() {
        let mut state = SessionState::default();
        assert_eq!(state.record_skip_vote(UserId(2)), None);
    }

    #[test]
    fn advancing_clears_skip_votes() {
        let mut state = SessionState::default();
        state.pending.push_back(request(1, "a"));
        state.pending.push_back(request(2, "b"));
        state.next_pending();
        state.record_skip_vote(UserId(3));
        state.record_skip_vote(UserId(4));
        assert!(!state.skip_votes.is_empty());

        state.next_pending();
        assert!(state.skip_votes.is_empty());

        state.clear_current();
        assert!(state.skip_votes.is_empty());
    }

    #[test]
    fn describe_includes_length_only_when_known() {
        let mut track = request(1, "song");
        track.uploader = "someone".to_string();
        track.requester_name = "requester".to_string();
        assert_eq!(
            track.describe(),
            "*song* uploaded by someone and requested by requester"
        );

        track.duration = Some(Duration::from_secs(205));
        assert_eq!(
            track.describe(),
            "*song* uploaded by someone and requested by requester [length: 3m 25s]"
        );
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let registry = SessionRegistry::new(Songbird::serenity());
        let http = Arc::new(Http::new("test-token"));

        let session = registry.get_or_create(GuildId(1), &http);
        session.enqueue(request(1, "track"));

        assert!(registry.remove(GuildId(1)).await);
        assert!(!session.is_playing());
        assert!(!registry.remove(GuildId(1)).await);
        assert!(registry.get(GuildId(1)).is_none());
    }
}
