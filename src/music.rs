use std::sync::Arc;

use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandResult};
use serenity::model::channel::{Channel, ChannelType, Message};
use serenity::model::guild::Guild;
use serenity::model::id::ChannelId;
use songbird::input::{ytdl, ytdl_search};
use tracing::info;

use crate::playlists::{self, UNKNOWN_UPLOADER};
use crate::voice::{PlaybackError, PlaybackSession, SkipVote, TrackRequest, SKIP_VOTE_THRESHOLD};
use crate::{check_msg, get_guild, get_guild_id, registry};

const UNKNOWN_TRACK_TITLE: &str = "UNKNOWN TRACK";
const QUEUE_PREVIEW_LIMIT: usize = 20;

#[group]
#[commands(join, summon, play, volume, pause, resume, skip, playing, queue, stop)]
struct Music;

#[command]
#[only_in(guilds)]
async fn join(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let target = args.message().trim();
    let guild = get_guild(ctx, msg)?;

    let (channel_id, channel_name) = match find_voice_channel(&guild, target) {
        Some(found) => found,
        None => {
            check_msg(msg.channel_id.say(&ctx.http, "This is not a voice channel...").await);
            return Ok(());
        }
    };

    registry(ctx).await.connect(guild.id, channel_id, &ctx.http).await?;
    check_msg(
        msg.channel_id
            .say(&ctx.http, format!("Ready to play audio in {channel_name}"))
            .await,
    );

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn summon(ctx: &Context, msg: &Message) -> CommandResult {
    connect_author(ctx, msg).await?;

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn play(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let query = args.message().trim().to_string();
    if query.is_empty() {
        check_msg(
            msg.channel_id
                .say(&ctx.http, "Give me a URL or something to search for.")
                .await,
        );
        return Ok(());
    }

    info!("play request: {query}");

    let guild_id = get_guild_id(ctx, msg)?;
    let registry = registry(ctx).await;
    let session = registry.get_or_create(guild_id, &ctx.http);

    if !session.has_voice() && connect_author(ctx, msg).await?.is_none() {
        return Ok(());
    }

    if playlists::looks_like_playlist(&query) {
        let tracks =
            playlists::tracks_from_playlist_url(&query, msg.author.id, &msg.author.name, msg.channel_id)?;
        let count = tracks.len();
        session.enqueue_all(tracks);
        check_msg(
            msg.channel_id
                .say(&ctx.http, format!("Enqueued {count} tracks from the playlist."))
                .await,
        );
    } else {
        let track = resolve_query(&query, msg).await?;
        check_msg(
            msg.channel_id
                .say(&ctx.http, format!("Enqueued {}", track.describe()))
                .await,
        );
        session.enqueue(track);
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn volume(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let value = match args.single::<u32>() {
        Ok(value) => value,
        Err(_) => {
            check_msg(
                msg.channel_id
                    .say(&ctx.http, "Tell me a volume percentage, like `!volume 60`.")
                    .await,
            );
            return Ok(());
        }
    };

    let guild_id = get_guild_id(ctx, msg)?;

    match registry(ctx).await.get(guild_id) {
        Some(session) if session.is_playing() => {
            session.set_volume(value as f32 / 100.0);
            check_msg(
                msg.channel_id
                    .say(&ctx.http, format!("Set the volume to {value}%"))
                    .await,
            );
        }
        _ => check_msg(
            msg.channel_id
                .say(&ctx.http, "Not playing any music right now...")
                .await,
        ),
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn pause(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    match registry(ctx).await.get(guild_id) {
        Some(session) if session.is_playing() => session.pause(),
        _ => check_msg(
            msg.channel_id
                .say(&ctx.http, "Not playing any music right now...")
                .await,
        ),
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn resume(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    match registry(ctx).await.get(guild_id) {
        Some(session) if session.is_playing() => session.resume(),
        _ => check_msg(
            msg.channel_id
                .say(&ctx.http, "Not playing any music right now...")
                .await,
        ),
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn skip(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let outcome = registry(ctx)
        .await
        .get(guild_id)
        .and_then(|session| session.record_skip_vote(msg.author.id));

    let reply = match outcome {
        None => "Not playing any music right now...".to_string(),
        Some(SkipVote::Requester) => "Requester requested skipping song...".to_string(),
        Some(SkipVote::Passed) => "Skip vote passed, skipping song...".to_string(),
        Some(SkipVote::Counted(count)) => {
            format!("Skip vote added, currently at [{count}/{SKIP_VOTE_THRESHOLD}]")
        }
        Some(SkipVote::AlreadyVoted) => "You have already voted to skip this song.".to_string(),
    };
    check_msg(msg.channel_id.say(&ctx.http, reply).await);

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn playing(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    let reply = match registry(ctx).await.get(guild_id).and_then(|session| session.now_playing()) {
        Some((description, votes)) => {
            format!("Now playing {description} [skips: {votes}/{SKIP_VOTE_THRESHOLD}]")
        }
        None => "Not playing anything.".to_string(),
    };
    check_msg(msg.channel_id.say(&ctx.http, reply).await);

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn queue(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;
    let titles = registry(ctx)
        .await
        .get(guild_id)
        .map(|session| session.pending_titles(QUEUE_PREVIEW_LIMIT))
        .unwrap_or_default();

    if titles.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "The queue is empty!").await);
    } else {
        let listing = titles
            .iter()
            .enumerate()
            .map(|(index, title)| format!("{} - {title}", index + 1))
            .collect::<Vec<_>>()
            .join("\n");

        check_msg(
            msg.channel_id
                .say(&ctx.http, format!("**Queue**:\n```{listing}```"))
                .await,
        );
    }

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn stop(ctx: &Context, msg: &Message) -> CommandResult {
    let guild_id = get_guild_id(ctx, msg)?;

    if registry(ctx).await.remove(guild_id).await {
        check_msg(msg.channel_id.say(&ctx.http, "Left voice channel").await);
    } else {
        check_msg(msg.reply(ctx, "Not in a voice channel").await);
    }

    Ok(())
}

/// Joins the author's current voice channel, replying and returning `None`
/// when the author is not in one.
async fn connect_author(ctx: &Context, msg: &Message) -> CommandResult<Option<Arc<PlaybackSession>>> {
    let guild = get_guild(ctx, msg)?;
    let connect_to = guild
        .voice_states
        .get(&msg.author.id)
        .and_then(|voice_state| voice_state.channel_id);

    let connect_to = match connect_to {
        Some(channel) => channel,
        None => {
            check_msg(msg.channel_id.say(&ctx.http, "You are not in a voice channel.").await);
            return Ok(None);
        }
    };

    let session = registry(ctx).await.connect(guild.id, connect_to, &ctx.http).await?;

    Ok(Some(session))
}

async fn resolve_query(query: &str, msg: &Message) -> Result<TrackRequest, PlaybackError> {
    let input = if query.starts_with("http") {
        ytdl(query).await
    } else {
        ytdl_search(query).await
    }
    .map_err(|source| PlaybackError::Resolution {
        query: query.to_string(),
        source,
    })?;

    let metadata = input.metadata;
    let source_url = metadata.source_url.ok_or_else(|| PlaybackError::MissingSourceUrl {
        query: query.to_string(),
    })?;

    Ok(TrackRequest {
        requester: msg.author.id,
        requester_name: msg.author.name.clone(),
        channel: msg.channel_id,
        source_url,
        title: metadata.title.unwrap_or_else(|| UNKNOWN_TRACK_TITLE.to_string()),
        uploader: metadata
            .artist
            .or(metadata.channel)
            .unwrap_or_else(|| UNKNOWN_UPLOADER.to_string()),
        duration: metadata.duration,
    })
}

fn find_voice_channel(guild: &Guild, target: &str) -> Option<(ChannelId, String)> {
    let by_id = parse_channel_target(target);

    guild.channels.values().find_map(|channel| {
        let channel = match channel {
            Channel::Guild(channel) if channel.kind == ChannelType::Voice => channel,
            _ => return None,
        };
        let matches = match by_id {
            Some(id) => channel.id == id,
            None => channel.name == target,
        };
        matches.then(|| (channel.id, channel.name.clone()))
    })
}

fn parse_channel_target(target: &str) -> Option<ChannelId> {
    serenity::utils::parse_channel(target)
        .or_else(|| target.parse().ok())
        .map(ChannelId)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_targets_parse_from_mentions_and_raw_ids() {
        assert_eq!(parse_channel_target("<#123456>"), Some(ChannelId(123456)));
        assert_eq!(parse_channel_target("123456"), Some(ChannelId(123456)));
        assert_eq!(parse_channel_target("General"), None);
    }
}
