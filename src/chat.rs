use std::cmp::min;
use std::time::Duration;

use rand::seq::SliceRandom;
use rand::Rng;
use serenity::client::Context;
use serenity::framework::standard::macros::{command, group};
use serenity::framework::standard::{Args, CommandResult};
use serenity::model::channel::Message;
use serenity::utils::Colour;
use tokio::time::sleep;
use tracing::info;

use crate::memes::MemeError;
use crate::{check_msg, meme_library};

const PURGE_SUMMARY_LIFETIME: Duration = Duration::from_secs(4);
const PURGE_FETCH_CAP: u64 = 100;

#[group]
#[commands(hello, flipcoin, rolldice, choose, meme, addmeme, delmsgs, help)]
struct Chat;

#[command]
async fn hello(ctx: &Context, msg: &Message) -> CommandResult {
    check_msg(
        msg.channel_id
            .say(&ctx.http, format!("Hello {}!", msg.author.name))
            .await,
    );

    Ok(())
}

#[command]
async fn flipcoin(ctx: &Context, msg: &Message) -> CommandResult {
    let heads: bool = rand::thread_rng().gen();
    let reply = if heads { "Heads!" } else { "Tails!" };
    check_msg(msg.channel_id.say(&ctx.http, reply).await);

    Ok(())
}

#[command]
async fn rolldice(ctx: &Context, msg: &Message) -> CommandResult {
    let roll = rand::thread_rng().gen_range(1..=6);
    check_msg(msg.channel_id.say(&ctx.http, format!("You rolled a {roll}")).await);

    Ok(())
}

#[command]
async fn choose(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let options: Vec<&str> = args.message().split_whitespace().collect();
    let choice = options.choose(&mut rand::thread_rng()).map(|option| option.to_string());

    match choice {
        Some(choice) => check_msg(msg.channel_id.say(&ctx.http, choice).await),
        None => check_msg(
            msg.channel_id
                .say(&ctx.http, "Give me some options to choose from.")
                .await,
        ),
    }

    Ok(())
}

#[command]
async fn meme(ctx: &Context, msg: &Message) -> CommandResult {
    match meme_library(ctx).await.random().await {
        Ok(link) => check_msg(msg.channel_id.say(&ctx.http, link).await),
        Err(MemeError::Empty) => {
            check_msg(msg.channel_id.say(&ctx.http, "The meme library is empty.").await)
        }
        Err(why) => return Err(why.into()),
    }

    Ok(())
}

#[command]
async fn addmeme(ctx: &Context, msg: &Message, args: Args) -> CommandResult {
    let entry = args.message().trim();
    if entry.is_empty() {
        check_msg(msg.channel_id.say(&ctx.http, "Give me a meme link to add.").await);
        return Ok(());
    }

    meme_library(ctx).await.add(entry).await?;
    check_msg(msg.channel_id.say(&ctx.http, "Your meme was successfully added").await);

    Ok(())
}

#[command]
#[only_in(guilds)]
async fn delmsgs(ctx: &Context, msg: &Message, mut args: Args) -> CommandResult {
    let amount = match args.single::<u64>() {
        Ok(amount) if amount > 0 => amount,
        _ => {
            check_msg(
                msg.channel_id
                    .send_message(&ctx.http, |builder| {
                        builder.embed(|embed| {
                            embed
                                .colour(Colour::RED)
                                .description("Tell me how many messages to clear, like `!delmsgs 5`.")
                        })
                    })
                    .await,
            );
            return Ok(());
        }
    };

    // One extra covers the command message itself.
    let fetch = min(amount + 1, PURGE_FETCH_CAP);
    let messages = msg
        .channel_id
        .messages(&ctx.http, |retriever| retriever.limit(fetch))
        .await?;

    let mut deleted = 0usize;
    for message in &messages {
        match message.delete(&ctx.http).await {
            Ok(()) => deleted += 1,
            Err(why) => info!("deleting message {} failed: {why:?}", message.id),
        }
    }
    let cleared = deleted.saturating_sub(1);

    let summary = msg
        .channel_id
        .send_message(&ctx.http, |builder| {
            builder.embed(|embed| {
                embed
                    .colour(Colour::BLUE)
                    .description(format!("Cleared {cleared} message(s)."))
            })
        })
        .await?;

    sleep(PURGE_SUMMARY_LIFETIME).await;
    if let Err(why) = summary.delete(&ctx.http).await {
        info!("deleting purge summary failed: {why:?}");
    }

    Ok(())
}

#[command]
async fn help(ctx: &Context, msg: &Message) -> CommandResult {
    let message = r#"
**Commands:**
    **join [CHANNEL]** - Joins the given voice channel.
    **summon** - Joins your current voice channel.
    **play [URL|Title]** - Queues a track from a URL, a search query or a youtube playlist.
    **volume [PERCENT]** - Sets the volume of the current track.
    **pause** - Pauses the current track.
    **resume** - Resumes the currently paused track.
    **skip** - Votes to skip the current track. The requester skips instantly, everyone else needs 3 votes.
    **playing** - Shows the current track and the skip vote tally.
    **queue** - Shows the queued tracks.
    **stop** - Stops playback, clears the queue and leaves the voice channel.
    **hello** - Says hello back.
    **flipcoin** - Flips a coin.
    **rolldice** - Rolls a six sided die.
    **choose [OPTIONS...]** - Picks one of the given options.
    **meme** - Posts a random meme from the library.
    **addmeme [LINK]** - Adds a meme link to the library.
    **delmsgs [AMOUNT]** - Deletes the last AMOUNT messages in this channel.
    "#;

    check_msg(msg.channel_id.say(&ctx.http, message).await);

    Ok(())
}
