//! The event router: the single place where named dispatch payloads are
//! decoded and turned into REST calls, control-socket writes, or voice
//! lifecycle changes.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::value::RawValue;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SessionHandle;
use crate::http::Http;
use crate::input;
use crate::model::event::Event;
use crate::model::id::{ApplicationId, GuildId, UserId};
use crate::model::interaction::{mention, Interaction, InteractionResponse};
use crate::model::message::{CreateMessage, Message};
use crate::model::voice::{VoiceServerUpdate, VoiceState};
use crate::voice::{Call, Manager};

/// The built-in voice command.
const PLAY_COMMAND: &str = "play";

/// Played when an interaction names no track.
const DEFAULT_TRACK: &str = "sirens.mp3";

/// Decides the reply, if any, to an inbound guild message.
///
/// The default [`Greeter`] answers everything with a greeting; embedders
/// swap in their own policy for real command handling.
pub trait MessagePolicy: Send + Sync {
    fn reply_to(&self, message: &Message) -> Option<String>;
}

/// Default policy: greet the author back, mentioning them.
pub struct Greeter;

impl MessagePolicy for Greeter {
    fn reply_to(&self, message: &Message) -> Option<String> {
        Some(format!("hello, {}", mention(message.author.id)))
    }
}

pub struct Router {
    http: Arc<Http>,
    manager: Arc<Manager>,
    application_id: ApplicationId,
    voice_gateway_version: u8,
    media_dir: PathBuf,
    /// Root token; every call gets a child of it.
    cancel: CancellationToken,
    bot_user: Mutex<Option<UserId>>,
    /// Tracks requested via interactions, consumed when the voice session
    /// for that guild comes up.
    pending_tracks: Mutex<HashMap<GuildId, PathBuf>>,
    /// Server updates that raced ahead of their state update; applied as
    /// soon as the call exists, so either arrival order converges.
    pending_servers: Mutex<HashMap<GuildId, (String, String)>>,
    policy: Box<dyn MessagePolicy>,
}

impl Router {
    pub(crate) fn new(
        http: Arc<Http>,
        manager: Arc<Manager>,
        application_id: ApplicationId,
        voice_gateway_version: u8,
        media_dir: PathBuf,
        cancel: CancellationToken,
        policy: Box<dyn MessagePolicy>,
    ) -> Router {
        Router {
            http,
            manager,
            application_id,
            voice_gateway_version,
            media_dir,
            cancel,
            bot_user: Mutex::new(None),
            pending_tracks: Mutex::new(HashMap::new()),
            pending_servers: Mutex::new(HashMap::new()),
            policy,
        }
    }

    pub(crate) fn set_bot_user(&self, user_id: UserId) {
        *self.bot_user.lock() = Some(user_id);
    }

    fn bot_user(&self) -> Option<UserId> {
        *self.bot_user.lock()
    }

    /// Routes one named dispatch. Payload decoding happens here, once;
    /// malformed payloads and unknown names are dropped without touching
    /// the connection.
    pub(crate) fn dispatch(&self, name: &str, payload: &RawValue, handle: &SessionHandle) {
        let event = match Event::decode(name, payload) {
            Ok(event) => event,
            Err(e) => {
                warn!("dropping undecodable {name} dispatch: {e:?}");
                return;
            },
        };

        match event {
            Event::MessageCreate(message) => self.on_message(message),
            Event::InteractionCreate(interaction) => {
                self.on_interaction(interaction, handle.clone());
            },
            Event::VoiceStateUpdate(state) => self.on_voice_state_update(state),
            Event::VoiceServerUpdate(update) => self.on_voice_server_update(update),
            // Handled by the session before routing.
            Event::Ready(_) | Event::Resumed => {},
            Event::Unknown(name) => debug!("unhandled dispatch event {name}"),
        }
    }

    fn on_message(&self, message: Message) {
        // Never converse with ourselves.
        if message.author.id.0 == self.application_id.0 || Some(message.author.id) == self.bot_user()
        {
            return;
        }

        let Some(content) = self.policy.reply_to(&message) else {
            return;
        };

        let http = Arc::clone(&self.http);
        tokio::spawn(async move {
            let reply = CreateMessage::content(content);
            match http.create_message(message.channel_id, &reply).await {
                Ok(response) if response.status.is_success() => {},
                Ok(response) => warn!("message reply rejected: {}", response.status),
                Err(e) => warn!("message reply failed: {e}"),
            }
        });
    }

    fn on_interaction(&self, interaction: Interaction, handle: SessionHandle) {
        let http = Arc::clone(&self.http);
        let media_dir = self.media_dir.clone();
        let is_play = interaction
            .command_name()
            .map(|name| name == PLAY_COMMAND)
            .unwrap_or(false);

        if !is_play {
            reply_in_background(http, interaction, "hello".to_owned());
            return;
        }

        let Some(guild_id) = interaction.guild_id else {
            reply_in_background(http, interaction, "this command only works in a server".into());
            return;
        };
        let Some(user_id) = interaction.invoker().map(|u| u.id) else {
            debug!("interaction without an invoker; ignoring");
            return;
        };

        let track = interaction
            .option_str("track")
            .unwrap_or(DEFAULT_TRACK)
            .to_owned();
        let track_path = media_dir.join(track);

        self.pending_tracks
            .lock()
            .insert(guild_id, track_path);

        tokio::spawn(async move {
            let content = match http.get_user_voice_state(guild_id, user_id).await {
                Ok(Some(state)) if state.session_id.is_some() => {
                    handle.update_voice_state(guild_id, state.channel_id, false, false);
                    format!("tuning up, {}", mention(user_id))
                },
                Ok(_) => format!(
                    "{}, please join a voice channel before using this command",
                    mention(user_id),
                ),
                Err(e) => {
                    warn!("voice state lookup failed: {e}");
                    "failed to get current voice state".to_owned()
                },
            };

            send_callback(&http, &interaction, content).await;
        });
    }

    fn on_voice_state_update(&self, state: VoiceState) {
        let Some(guild_id) = state.guild_id else {
            return;
        };

        // Other users joining and leaving is none of our business; only the
        // bot's own voice state drives session lifecycle.
        match self.bot_user() {
            Some(me) if me == state.user_id => {},
            _ => return,
        }

        match self.manager.get(guild_id) {
            None => {
                if state.channel_id.is_none() {
                    return;
                }
                let Some(session_id) = state.session_id else {
                    warn!(%guild_id, "voice state update without session id; ignoring");
                    return;
                };

                info!(%guild_id, "creating voice session");
                let call = Call::new(
                    guild_id,
                    state.user_id,
                    session_id,
                    self.voice_gateway_version,
                    self.cancel.child_token(),
                );

                self.queue_track(guild_id, &call);
                self.manager.add(guild_id, Arc::clone(&call));

                let raced_ahead = self
                    .pending_servers
                    .lock()
                    .remove(&guild_id);
                if let Some((endpoint, token)) = raced_ahead {
                    call.apply_server_update(&self.manager, endpoint, token);
                }
            },
            Some(call) => {
                if state.channel_id.is_none() {
                    info!(%guild_id, "voice channel left; destroying session");
                    self.manager.remove(guild_id);
                } else if let Some(session_id) = state.session_id {
                    call.apply_state_update(&self.manager, session_id);
                }
            },
        }
    }

    fn on_voice_server_update(&self, update: VoiceServerUpdate) {
        let Some(endpoint) = update.endpoint else {
            debug!(guild_id = %update.guild_id, "voice server update without endpoint; waiting");
            return;
        };

        match self.manager.get(update.guild_id) {
            Some(call) => call.apply_server_update(&self.manager, endpoint, update.token),
            None => {
                debug!(guild_id = %update.guild_id, "voice server update ahead of state; holding");
                self.pending_servers
                    .lock()
                    .insert(update.guild_id, (endpoint, update.token));
            },
        }
    }

    /// Queues the requested (or default) track so playback starts as soon
    /// as the media path is negotiated.
    fn queue_track(&self, guild_id: GuildId, call: &Arc<Call>) {
        let path = self
            .pending_tracks
            .lock()
            .remove(&guild_id)
            .unwrap_or_else(|| self.media_dir.join(DEFAULT_TRACK));

        match input::ffmpeg(&path) {
            Ok(source) => call.play(Box::new(source)),
            Err(e) => warn!("spawning encoder for {} failed: {e}", path.display()),
        }
    }
}

fn reply_in_background(http: Arc<Http>, interaction: Interaction, content: String) {
    tokio::spawn(async move {
        send_callback(&http, &interaction, content).await;
    });
}

/// One type-4 callback; failures are logged and never retried, the user
/// simply sees no response.
async fn send_callback(http: &Http, interaction: &Interaction, content: String) {
    let response = InteractionResponse::message(content);

    match http
        .create_interaction_response(interaction.id, &interaction.token, &response, false)
        .await
    {
        Ok(result) if result.status.is_success() => info!("interaction callback sent"),
        Ok(result) => warn!("interaction callback rejected: {}", result.status),
        Err(e) => warn!("failed to send interaction callback: {e}"),
    }
}
