//! Warning texts, prompt buttons and the callback data they carry

use super::{ChannelId, Prompt, Sender, UserId, Violation};

/// What a prompt button asks the bot to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptAction {
    /// The restricted user claims to have brought enough members
    CheckAdded(UserId),
    /// An admin exempts the user from the referral gate
    Grant(UserId),
    /// The restricted user claims to have joined the required channels
    Joined(UserId),
    Noop,
}

impl PromptAction {
    /// Encode as button callback data
    #[must_use]
    pub fn data(self) -> String {
        match self {
            Self::CheckAdded(user) => format!("check_added:{user}"),
            Self::Grant(user) => format!("grant:{user}"),
            Self::Joined(user) => format!("joined:{user}"),
            Self::Noop => "noop".to_string(),
        }
    }

    /// Decode button callback data; unknown data yields `None`
    #[must_use]
    pub fn parse(data: &str) -> Option<Self> {
        if data == "noop" {
            return Some(Self::Noop);
        }
        let (action, user) = data.split_once(':')?;
        let user = UserId(user.parse().ok()?);
        match action {
            "check_added" => Some(Self::CheckAdded(user)),
            "grant" => Some(Self::Grant(user)),
            "joined" => Some(Self::Joined(user)),
            _ => None,
        }
    }
}

const ADD_TO_SERVER: &str = "Add me to your server";

fn with_invite(prompt: Prompt, invite: Option<&str>) -> Prompt {
    match invite {
        Some(url) => prompt.link(ADD_TO_SERVER, url),
        None => prompt,
    }
}

/// Prompt for a user who has not brought enough members yet
#[must_use]
pub fn referral_prompt(sender: &Sender, threshold: u32, count: u64, invite: Option<&str>) -> Prompt {
    let remaining = u64::from(threshold).saturating_sub(count);
    let text = format!(
        "{label}, to write here you need to bring {threshold} member(s) to this server. \
         You have brought {count}, {remaining} to go.",
        label = sender.label()
    );
    let prompt = Prompt::new(text)
        .callback("I added someone", PromptAction::CheckAdded(sender.id).data())
        .callback("Grant privilege", PromptAction::Grant(sender.id).data());
    with_invite(prompt, invite).callback("Temporarily restricted", PromptAction::Noop.data())
}

/// Prompt listing the required channels `sender` has not joined
#[must_use]
pub fn channel_prompt(sender: &Sender, missing: &[ChannelId], invite: Option<&str>) -> Prompt {
    let lines: Vec<String> = missing
        .iter()
        .enumerate()
        .map(|(index, channel)| format!("{}) {channel}", index + 1))
        .collect();
    let text = format!(
        "{label}, join these servers to write here:\n{}",
        lines.join("\n"),
        label = sender.label()
    );
    let prompt = Prompt::new(text).callback("I joined", PromptAction::Joined(sender.id).data());
    with_invite(prompt, invite)
}

/// Warning posted after a content violation; gates use their own prompts
#[must_use]
pub fn violation_warning(violation: &Violation, sender: &Sender, invite: Option<&str>) -> Option<Prompt> {
    let label = sender.label();
    let text = match violation {
        Violation::ViaBot | Violation::HiddenLink => {
            format!("{label}, hidden links are not allowed here!")
        }
        Violation::SuspiciousButtons => "Game and web-app button promotions are not allowed here!".to_string(),
        Violation::GameKeywords => "Game promotions are not allowed here!".to_string(),
        Violation::BotLink | Violation::LinkText => {
            format!("{label}, ads and links are not allowed here!")
        }
        Violation::Profanity => format!("{label}, swearing is not allowed here!"),
        Violation::ServiceNotice
        | Violation::NightMode
        | Violation::Restricted
        | Violation::ReferralShortfall { .. }
        | Violation::MissingChannels(_) => return None,
    };
    Some(with_invite(Prompt::new(text), invite))
}

pub const CHECK_ADDED_SUCCESS: &str = "Requirement met. You can write in this server now.";
pub const CHANNELS_SUCCESS: &str = "Membership confirmed. You can write in this server now.";
pub const CHANNELS_OFF: &str = "The channel requirement is off. You can write in this server now.";
pub const NOT_YOUR_BUTTON: &str = "This button is not for you.";
pub const ADMINS_ONLY: &str = "Only admins can grant privilege.";

#[must_use]
pub fn grant_success(user: UserId) -> String {
    format!("Privilege granted to user {user}. They can write in this server now.")
}

#[must_use]
pub fn referral_progress(count: u64, threshold: u32) -> String {
    let remaining = u64::from(threshold).saturating_sub(count);
    format!("You have brought {count} member(s). {remaining} more needed.")
}

#[must_use]
pub fn channels_still_missing(missing: &[ChannelId]) -> String {
    let list: Vec<String> = missing.iter().map(ToString::to_string).collect();
    format!("You have not joined every required server yet: {}", list.join(", "))
}
