//! Discord adapter for the moderation core
//!
//! A server is a group, a text channel is where messages and prompts live, and
//! a "required channel" is another server the member must also be in.

mod convert;
mod invites;
mod platform;

pub use convert::{button_press, inbound_message, link_entities, strip_mentions};
pub use invites::{InviteSnapshot, InviteTracker, InviteUse, attribute_join};
pub use platform::{SerenityPlatform, classify_response};

use poise::serenity_prelude::{ApplicationId, Permissions};

/// What the bot needs in a server to moderate it
#[must_use]
pub fn required_permissions() -> Permissions {
    Permissions::VIEW_CHANNEL
        | Permissions::SEND_MESSAGES
        | Permissions::READ_MESSAGE_HISTORY
        | Permissions::MANAGE_MESSAGES
        | Permissions::MODERATE_MEMBERS
        | Permissions::MANAGE_GUILD
        | Permissions::MANAGE_WEBHOOKS
}

/// Link that adds the bot to a server
#[must_use]
pub fn invite_url(application: ApplicationId) -> String {
    format!(
        "https://discord.com/oauth2/authorize?client_id={application}&scope=bot+applications.commands&permissions={}",
        required_permissions().bits()
    )
}
