use crate::moderation::policy::{parse_channel_list, validate_threshold};
use crate::moderation::{
    BroadcastPayload, ChannelId, ContributionRow, GroupId, MessageId, PolicyUpdate, UserId,
};
use crate::{BOT_NAME, Context, Error};
use poise::serenity_prelude as serenity;

const HELP_TEXT: &str = "\
I keep this server clean. Messages are removed when they carry spam links, game \
promotions or profanity, and members can be asked to bring new people in or to join \
partner servers before they may write.

Admin commands:
/night on|off: remove every message from non-admins
/channels set <server ids>: require membership in these servers
/channels clear: stop requiring other servers
/referral set <3-30>: require each member to invite this many people
/referral off: stop requiring invites
/grant <user>: let a member write without inviting anyone
/cleangroup: reset every invite count and grant in this server
/cleanuser <user>: reset one member's invite count
/top: members who invited the most people

Everyone:
/count: how many people you invited
/usercount <user>: how many people someone invited
/id: your user id and this server's id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, poise::ChoiceParameter)]
pub enum Switch {
    #[name = "on"]
    On,
    #[name = "off"]
    Off,
}

fn group_of(ctx: Context<'_>) -> Result<GroupId, Error> {
    ctx.guild_id()
        .map(|guild| GroupId(guild.get()))
        .ok_or_else(|| "This command only works in a server".into())
}

fn user_of(user: &serenity::User) -> UserId {
    UserId(user.id.get())
}

/// Numbered leaderboard lines
#[must_use]
pub fn format_leaderboard(rows: &[ContributionRow]) -> String {
    if rows.is_empty() {
        return "Nobody has invited anyone yet.".to_string();
    }
    rows.iter()
        .enumerate()
        .map(|(rank, row)| format!("{}. <@{}>: {}", rank + 1, row.user_id, row.count))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Channel and message ids from a `https://discord.com/channels/<guild>/<channel>/<message>` link
#[must_use]
pub fn parse_message_link(link: &str) -> Option<(ChannelId, MessageId)> {
    let path = link
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let path = ["discord.com/channels/", "ptb.discord.com/channels/", "canary.discord.com/channels/", "discordapp.com/channels/"]
        .iter()
        .find_map(|prefix| path.strip_prefix(prefix))?;
    let mut parts = path.split('/');
    let _guild = parts.next()?;
    let channel = parts.next()?.parse::<u64>().ok()?;
    let message = parts.next()?.parse::<u64>().ok()?;
    if parts.next().is_some() || channel == 0 || message == 0 {
        return None;
    }
    Some((ChannelId(channel), MessageId(message)))
}

/// Remove every message from non-admins while night mode is on
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn night(
    ctx: Context<'_>,
    #[description = "on or off"] mode: Switch,
) -> Result<(), Error> {
    let group = group_of(ctx)?;
    let enabled = mode == Switch::On;
    ctx.data()
        .engine
        .update_policy(group, PolicyUpdate::night_mode(enabled))
        .await;
    let reply = if enabled {
        "Night mode is on. Only admins can write now."
    } else {
        "Night mode is off."
    };
    ctx.say(reply).await?;
    Ok(())
}

/// Require membership in other servers before members may write
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("channels_set", "channels_clear"),
    subcommand_required
)]
pub async fn channels(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set the servers members must join
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD", rename = "set")]
pub async fn channels_set(
    ctx: Context<'_>,
    #[description = "Server ids separated by spaces or commas"] servers: String,
) -> Result<(), Error> {
    let group = group_of(ctx)?;
    let channels = match parse_channel_list(&servers) {
        Ok(channels) => channels,
        Err(error) => {
            ctx.say(error.to_string()).await?;
            return Ok(());
        }
    };
    let policy = ctx
        .data()
        .engine
        .update_policy(group, PolicyUpdate::required_channels(channels))
        .await;
    let list: Vec<String> = policy
        .required_channels
        .iter()
        .map(ToString::to_string)
        .collect();
    ctx.say(format!("Members must now be in: {}", list.join(", ")))
        .await?;
    Ok(())
}

/// Stop requiring other servers
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD", rename = "clear")]
pub async fn channels_clear(ctx: Context<'_>) -> Result<(), Error> {
    let group = group_of(ctx)?;
    ctx.data()
        .engine
        .update_policy(group, PolicyUpdate::required_channels(Vec::new()))
        .await;
    ctx.say("Server membership is no longer required.").await?;
    Ok(())
}

/// Require members to invite people before they may write
#[poise::command(
    slash_command,
    guild_only,
    required_permissions = "MANAGE_GUILD",
    subcommands("referral_set", "referral_off"),
    subcommand_required
)]
pub async fn referral(_ctx: Context<'_>) -> Result<(), Error> {
    Ok(())
}

/// Set how many people each member must invite
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD", rename = "set")]
pub async fn referral_set(
    ctx: Context<'_>,
    #[description = "Between 3 and 30"] count: u32,
) -> Result<(), Error> {
    let group = group_of(ctx)?;
    let threshold = match validate_threshold(count) {
        Ok(threshold) => threshold,
        Err(error) => {
            ctx.say(error.to_string()).await?;
            return Ok(());
        }
    };
    ctx.data()
        .engine
        .update_policy(group, PolicyUpdate::referral_threshold(threshold))
        .await;
    ctx.say(format!("Members must now invite {threshold} people before writing."))
        .await?;
    Ok(())
}

/// Stop requiring invites
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD", rename = "off")]
pub async fn referral_off(ctx: Context<'_>) -> Result<(), Error> {
    let group = group_of(ctx)?;
    ctx.data()
        .engine
        .update_policy(group, PolicyUpdate::referral_threshold(0))
        .await;
    ctx.say("Invites are no longer required.").await?;
    Ok(())
}

/// Let a member write without inviting anyone
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn grant(
    ctx: Context<'_>,
    #[description = "Member to exempt"] user: serenity::User,
) -> Result<(), Error> {
    let group = group_of(ctx)?;
    ctx.data().engine.grant_privilege(group, user_of(&user)).await;
    ctx.say(format!("{} can now write freely.", user.name)).await?;
    Ok(())
}

/// Reset every invite count and grant in this server
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn cleangroup(ctx: Context<'_>) -> Result<(), Error> {
    let group = group_of(ctx)?;
    ctx.data().engine.reset_group(group).await;
    ctx.say("All invite counts and grants in this server were reset.")
        .await?;
    Ok(())
}

/// Reset one member's invite count
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn cleanuser(
    ctx: Context<'_>,
    #[description = "Member to reset"] user: serenity::User,
) -> Result<(), Error> {
    let group = group_of(ctx)?;
    ctx.data().engine.ledger.reset(group, user_of(&user)).await;
    ctx.say(format!("Invite count of {} was reset.", user.name))
        .await?;
    Ok(())
}

/// Members who invited the most people
#[poise::command(slash_command, guild_only, required_permissions = "MANAGE_GUILD")]
pub async fn top(ctx: Context<'_>) -> Result<(), Error> {
    let group = group_of(ctx)?;
    let rows = ctx.data().engine.leaderboard(group).await;
    ctx.say(format_leaderboard(&rows)).await?;
    Ok(())
}

/// How many people you invited
#[poise::command(slash_command, guild_only, ephemeral)]
pub async fn count(ctx: Context<'_>) -> Result<(), Error> {
    let group = group_of(ctx)?;
    let count = ctx
        .data()
        .engine
        .ledger
        .get(group, user_of(ctx.author()))
        .await;
    ctx.say(format!("You have invited {count} people.")).await?;
    Ok(())
}

/// How many people someone invited
#[poise::command(slash_command, guild_only)]
pub async fn usercount(
    ctx: Context<'_>,
    #[description = "Member to look up"] user: serenity::User,
) -> Result<(), Error> {
    let group = group_of(ctx)?;
    let count = ctx.data().engine.ledger.get(group, user_of(&user)).await;
    ctx.say(format!("{} has invited {count} people.", user.name))
        .await?;
    Ok(())
}

/// Your user id and this server's id
#[poise::command(slash_command, ephemeral)]
pub async fn id(ctx: Context<'_>) -> Result<(), Error> {
    let reply = match ctx.guild_id() {
        Some(guild) => format!("Your id: {}\nServer id: {guild}", ctx.author().id),
        None => format!("Your id: {}", ctx.author().id),
    };
    ctx.say(reply).await?;
    Ok(())
}

/// What this bot does
#[poise::command(slash_command, ephemeral)]
pub async fn help(ctx: Context<'_>) -> Result<(), Error> {
    ctx.say(format!("**{BOT_NAME}**\n{HELP_TEXT}")).await?;
    Ok(())
}

async fn owner_only(ctx: Context<'_>) -> Result<bool, Error> {
    if ctx.data().is_owner(ctx.author().id) {
        return Ok(true);
    }
    ctx.say("Only the bot owner can broadcast.").await?;
    Ok(false)
}

/// Send a text to everyone who has messaged the bot
#[poise::command(slash_command, dm_only, check = "owner_only")]
pub async fn broadcast(
    ctx: Context<'_>,
    #[description = "Text to send"] text: String,
) -> Result<(), Error> {
    ctx.say("Broadcast started.").await?;
    let report = ctx
        .data()
        .engine
        .broadcast(BroadcastPayload::Text(text))
        .await;
    ctx.say(report.to_string()).await?;
    Ok(())
}

/// Copy a message to everyone who has messaged the bot
#[poise::command(slash_command, dm_only, check = "owner_only")]
pub async fn broadcastpost(
    ctx: Context<'_>,
    #[description = "Link to the message to copy"] link: String,
) -> Result<(), Error> {
    let Some((channel, message)) = parse_message_link(&link) else {
        ctx.say("That is not a message link.").await?;
        return Ok(());
    };
    ctx.say("Broadcast started.").await?;
    let report = ctx
        .data()
        .engine
        .broadcast(BroadcastPayload::Copy { channel, message })
        .await;
    ctx.say(report.to_string()).await?;
    Ok(())
}

/// Every command the bot registers
#[must_use]
pub fn all() -> Vec<poise::Command<crate::Data, Error>> {
    vec![
        night(),
        channels(),
        referral(),
        grant(),
        cleangroup(),
        cleanuser(),
        top(),
        count(),
        usercount(),
        id(),
        help(),
        broadcast(),
        broadcastpost(),
    ]
}
