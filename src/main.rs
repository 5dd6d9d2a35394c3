use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use dotenvy::dotenv;
use serenity::async_trait;
use serenity::client::{Client, Context, EventHandler};
use serenity::framework::standard::macros::hook;
use serenity::framework::standard::{CommandError, CommandResult, StandardFramework};
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::model::guild::Guild;
use serenity::model::prelude::{GuildId, VoiceState};
use serenity::prelude::{GatewayIntents, TypeMapKey};
use serenity::Result as SerenityResult;
use songbird::{SerenityInit, Songbird};
use tracing::info;

use crate::chat::CHAT_GROUP;
use crate::memes::MemeLibrary;
use crate::music::MUSIC_GROUP;
use crate::voice::SessionRegistry;

mod chat;
mod memes;
mod music;
mod playlists;
mod voice;

const DEFAULT_MEME_LIBRARY: &str = "memes.txt";

struct Handler;

pub struct VoiceManager;

impl TypeMapKey for VoiceManager {
    type Value = Arc<SessionRegistry>;
}

pub struct MemeStore;

impl TypeMapKey for MemeStore {
    type Value = Arc<MemeLibrary>;
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!("{} is connected!", ready.user.name);
    }

    async fn voice_state_update(&self, ctx: Context, _: Option<VoiceState>, new: VoiceState) {
        if new.channel_id.is_some() || new.user_id != ctx.cache.current_user_id() {
            return;
        }

        if let Some(guild_id) = new.guild_id {
            info!("disconnected from voice in guild {}, tearing the session down", guild_id.0);
            registry(&ctx).await.remove(guild_id).await;
        }
    }
}

#[hook]
async fn after(ctx: &Context, msg: &Message, command_name: &str, result: CommandResult) {
    if let Err(why) = result {
        info!("command `{command_name}` failed: {why:?}");
        check_msg(
            msg.channel_id
                .say(
                    &ctx.http,
                    format!("An error occurred while processing this request: ```\n{why}\n```"),
                )
                .await,
        );
    }
}

#[tokio::main]
async fn main() {
    dotenv().expect(".env file not found");

    tracing_subscriber::fmt::init();

    // Configure the client with your Discord bot token in the environment.
    let token = env::var("DISCORD_TOKEN").expect("Expected a token in the environment");
    let meme_path = env::var("MEME_LIBRARY").unwrap_or_else(|_| DEFAULT_MEME_LIBRARY.to_string());

    let framework = StandardFramework::new()
        .configure(|c| c.prefix("!"))
        .after(after)
        .group(&MUSIC_GROUP)
        .group(&CHAT_GROUP);

    let intents = GatewayIntents::non_privileged() | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();
    let registry = Arc::new(SessionRegistry::new(Arc::clone(&songbird)));

    let mut client = Client::builder(&token, intents)
        .event_handler(Handler)
        .framework(framework)
        .register_songbird_with(songbird)
        .await
        .expect("Err creating client");

    {
        let mut data = client.data.write().await;
        data.insert::<VoiceManager>(Arc::clone(&registry));
        data.insert::<MemeStore>(Arc::new(MemeLibrary::new(PathBuf::from(meme_path))));
    }

    tokio::spawn(async move {
        let _ = client.start().await.map_err(|why| info!("Client ended: {why:?}"));
    });

    tokio::signal::ctrl_c().await.expect("Control-C interruption failed!");

    info!("Received Ctrl-C, shutting down.");
    registry.remove_all().await;
}

pub(crate) async fn registry(ctx: &Context) -> Arc<SessionRegistry> {
    let data = ctx.data.read().await;
    data.get::<VoiceManager>()
        .expect("Session registry placed in at initialisation.")
        .clone()
}

pub(crate) async fn meme_library(ctx: &Context) -> Arc<MemeLibrary> {
    let data = ctx.data.read().await;
    data.get::<MemeStore>()
        .expect("Meme library placed in at initialisation.")
        .clone()
}

/// Checks that a message successfully sent; if not, then logs why to stdout.
pub(crate) fn check_msg(result: SerenityResult<Message>) {
    if let Err(why) = result {
        info!("Error sending message: {why:?}");
    }
}

pub(crate) fn get_guild(ctx: &Context, msg: &Message) -> CommandResult<Guild> {
    msg.guild(&ctx.cache).ok_or(CommandError::from("Guild not found"))
}

pub(crate) fn get_guild_id(ctx: &Context, msg: &Message) -> CommandResult<GuildId> {
    let guild_id = get_guild(ctx, msg)?.id;

    Ok(guild_id)
}
