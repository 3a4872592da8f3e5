use chrono::Utc;
use poise::serenity_prelude::{
    self as serenity, Context, CreateInteractionResponseFollowup, EventHandler, GuildId,
    Interaction, InviteCreateEvent, InviteDeleteEvent, Member, Message, Ready,
    UnavailableGuild,
};
use tracing::{debug, info, warn};

use crate::discord::{button_press, inbound_message};
use crate::moderation::{ButtonOutcome, GroupId, SubscriberRecord, UserId};
use crate::{BOT_NAME, Data, EVENT_TARGET};

pub struct Handler;

/// Shared data, absent until the framework setup has finished
async fn shared(ctx: &Context) -> Option<Data> {
    ctx.data.read().await.get::<Data>().cloned()
}

async fn refresh_invites(ctx: &Context, data: &Data, guild: GuildId) {
    if let Err(error) = data.invites.refresh(&ctx.http, guild).await {
        warn!(
            target: EVENT_TARGET,
            group_id = %guild,
            error = %error,
            "Could not snapshot invites, joins in this server will not be credited"
        );
    }
}

#[serenity::async_trait]
impl EventHandler for Handler {
    /// The cache may still be filling at this point
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!(
            target: EVENT_TARGET,
            bot = BOT_NAME,
            user = %ready.user.name,
            shard = ctx.shard_id.0,
            guilds = ready.guilds.len(),
            "Connected"
        );
    }

    async fn cache_ready(&self, ctx: Context, guilds: Vec<GuildId>) {
        let cached = ctx.cache.guild_count();
        if cached != guilds.len() {
            warn!(
                target: EVENT_TARGET,
                cached,
                reported = guilds.len(),
                "Cache and gateway disagree on server count"
            );
        }
        let Some(data) = shared(&ctx).await else {
            return;
        };
        for guild in guilds {
            refresh_invites(&ctx, &data, guild).await;
        }
        info!(target: EVENT_TARGET, servers = cached, "Cache ready, invite snapshots taken");
    }

    async fn guild_create(&self, ctx: Context, guild: serenity::Guild, _is_new: Option<bool>) {
        if let Some(data) = shared(&ctx).await {
            refresh_invites(&ctx, &data, guild.id).await;
        }
    }

    async fn guild_delete(
        &self,
        ctx: Context,
        incomplete: UnavailableGuild,
        _full: Option<serenity::Guild>,
    ) {
        if let Some(data) = shared(&ctx).await {
            data.invites.forget(incomplete.id);
        }
    }

    async fn invite_create(&self, ctx: Context, event: InviteCreateEvent) {
        if let (Some(data), Some(guild)) = (shared(&ctx).await, event.guild_id) {
            refresh_invites(&ctx, &data, guild).await;
        }
    }

    async fn invite_delete(&self, ctx: Context, event: InviteDeleteEvent) {
        if let (Some(data), Some(guild)) = (shared(&ctx).await, event.guild_id) {
            refresh_invites(&ctx, &data, guild).await;
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if msg.author.id == ctx.cache.current_user().id {
            return;
        }
        let Some(data) = shared(&ctx).await else {
            return;
        };

        let Some(inbound) = inbound_message(&msg) else {
            if !msg.author.bot {
                data.engine
                    .subscribers
                    .track(SubscriberRecord {
                        user_id: UserId(msg.author.id.get()),
                        username: Some(msg.author.name.clone()),
                        display_name: msg
                            .author
                            .global_name
                            .clone()
                            .unwrap_or_else(|| msg.author.name.clone()),
                        is_bot: false,
                        last_seen: Utc::now(),
                    })
                    .await;
            }
            return;
        };

        let verdict = data.engine.handle_message(&inbound).await;
        debug!(
            target: EVENT_TARGET,
            group_id = %inbound.group,
            user_id = %inbound.sender.id,
            message_id = %inbound.id,
            verdict = ?verdict,
            "Message handled"
        );
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        let Some(data) = shared(&ctx).await else {
            return;
        };
        let guild = new_member.guild_id;
        match data.invites.inviter_of_join(&ctx.http, guild).await {
            Ok(Some(inviter)) => {
                data.engine
                    .on_members_joined(
                        GroupId(guild.get()),
                        inviter,
                        &[UserId(new_member.user.id.get())],
                    )
                    .await;
            }
            Ok(None) => debug!(
                target: EVENT_TARGET,
                group_id = %guild,
                user_id = %new_member.user.id,
                "Join could not be attributed to an invite"
            ),
            Err(error) => warn!(
                target: EVENT_TARGET,
                group_id = %guild,
                error = %error,
                "Invite lookup after join failed"
            ),
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        let Interaction::Component(component) = interaction else {
            return;
        };
        let Some(press) = button_press(&component) else {
            return;
        };
        let Some(data) = shared(&ctx).await else {
            return;
        };

        // Acknowledge first; the engine edits the prompt itself
        if let Err(error) = component.defer(&ctx.http).await {
            warn!(target: EVENT_TARGET, error = %error, "Failed to acknowledge button");
            return;
        }
        if let ButtonOutcome::Alert(text) = data.engine.on_button(press).await {
            let followup = CreateInteractionResponseFollowup::new()
                .content(text)
                .ephemeral(true);
            if let Err(error) = component.create_followup(&ctx.http, followup).await {
                warn!(target: EVENT_TARGET, error = %error, "Failed to answer button");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handler_implements_event_handler() {
        fn assert_impl<T: EventHandler>() {}
        assert_impl::<Handler>();
    }
}
