//! Gateway message to [`InboundMessage`]

use poise::serenity_prelude::{
    self as serenity, ActionRowComponent, ButtonKind, ComponentInteraction, MessageFlags,
    MessageType,
};

use crate::moderation::{
    Button, ButtonPress, ChannelId, Entity, EntityKind, GroupId, InboundMessage, MessageId,
    MessageKind, PostedAs, PromptAction, Sender, UserId,
};

impl From<&serenity::User> for Sender {
    fn from(user: &serenity::User) -> Self {
        Self {
            id: UserId(user.id.get()),
            username: Some(user.name.clone()),
            display_name: user.global_name.clone().unwrap_or_else(|| user.name.clone()),
            is_bot: user.bot,
        }
    }
}

/// `None` for direct messages
#[allow(deprecated)]
#[must_use]
pub fn inbound_message(message: &serenity::Message) -> Option<InboundMessage> {
    let group = GroupId(message.guild_id?.get());
    let (text, mut entities) = strip_mentions(&message.content);
    entities.extend(link_entities(&text));

    let mut inbound = InboundMessage::text(
        group,
        ChannelId(message.channel_id.get()),
        MessageId(message.id.get()),
        Sender::from(&message.author),
        text,
    );
    inbound.entities = entities;
    inbound.buttons = buttons(message);
    inbound.has_game = message.activity.is_some();
    inbound.kind = match message.kind {
        MessageType::MemberJoin => MessageKind::ServiceJoin,
        _ => MessageKind::Regular,
    };

    // A slash command response is written by the bot on behalf of the invoker
    if let Some(interaction) = &message.interaction {
        inbound.sender = Sender::from(&interaction.user);
        inbound.via_bot = Some(UserId(message.author.id.get()));
        return Some(inbound);
    }

    if message.webhook_id.is_some() {
        let crosspost = message
            .flags
            .is_some_and(|flags| flags.contains(MessageFlags::IS_CROSSPOST));
        if crosspost {
            let origin = message
                .message_reference
                .as_ref()
                .map(|reference| ChannelId(reference.channel_id.get()));
            inbound.automatic_forward = true;
            inbound.forward_origin = origin;
            inbound.posted_as = origin.map(PostedAs::Channel);
        } else {
            inbound.posted_as = Some(PostedAs::Group);
        }
    }
    Some(inbound)
}

/// `None` for presses outside a server or on buttons this bot did not make
#[must_use]
pub fn button_press(interaction: &ComponentInteraction) -> Option<ButtonPress> {
    Some(ButtonPress {
        group: GroupId(interaction.guild_id?.get()),
        channel: ChannelId(interaction.channel_id.get()),
        message: MessageId(interaction.message.id.get()),
        presser: UserId(interaction.user.id.get()),
        action: PromptAction::parse(&interaction.data.custom_id)?,
    })
}

fn buttons(message: &serenity::Message) -> Vec<Button> {
    message
        .components
        .iter()
        .flat_map(|row| row.components.iter())
        .filter_map(|component| match component {
            ActionRowComponent::Button(button) => Some(button),
            _ => None,
        })
        .map(|button| Button {
            url: match &button.data {
                ButtonKind::Link { url } => Some(url.clone()),
                _ => None,
            },
            web_app_url: None,
            launches_game: false,
        })
        .collect()
}

/// Remove `<@id>`, `<@!id>`, `<@&id>` and `<#id>` markup, one mention entity per removal
#[must_use]
pub fn strip_mentions(content: &str) -> (String, Vec<Entity>) {
    let mut text = String::with_capacity(content.len());
    let mut entities = Vec::new();
    let mut rest = content;

    while let Some(start) = rest.find('<') {
        text.push_str(&rest[..start]);
        let candidate = &rest[start..];
        match mention_len(candidate) {
            Some(len) => {
                entities.push(Entity {
                    kind: EntityKind::Mention,
                    url: None,
                });
                rest = &candidate[len..];
            }
            None => {
                text.push('<');
                rest = &candidate[1..];
            }
        }
    }
    text.push_str(rest);
    (text, entities)
}

/// Length of the mention at the start of `candidate`, if there is one
fn mention_len(candidate: &str) -> Option<usize> {
    let body = candidate.strip_prefix('<')?;
    let digits = body
        .strip_prefix("@!")
        .or_else(|| body.strip_prefix("@&"))
        .or_else(|| body.strip_prefix('@'))
        .or_else(|| body.strip_prefix('#'))?;
    let end = digits.find('>')?;
    let id = &digits[..end];
    if id.is_empty() || !id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(candidate.len() - digits.len() + end + 1)
}

/// Bare URLs and masked `[label](url)` links
#[must_use]
pub fn link_entities(text: &str) -> Vec<Entity> {
    let mut entities = Vec::new();

    let mut rest = text;
    while let Some(open) = rest.find("](") {
        let after = &rest[open + 2..];
        let Some(close) = after.find(')') else { break };
        let target = after[..close].trim_matches(['<', '>']);
        if is_url(target) {
            entities.push(Entity {
                kind: EntityKind::TextLink,
                url: Some(target.to_string()),
            });
        }
        rest = &after[close + 1..];
    }

    for word in text.split(|c: char| c.is_whitespace() || c == '(' || c == ')') {
        let word = word.trim_matches(['<', '>']);
        if is_url(word) && !entities.iter().any(|e| e.url.as_deref() == Some(word)) {
            entities.push(Entity {
                kind: EntityKind::Url,
                url: Some(word.to_string()),
            });
        }
    }
    entities
}

fn is_url(candidate: &str) -> bool {
    let lower = candidate.to_lowercase();
    lower.len() > "https://".len() && (lower.starts_with("https://") || lower.starts_with("http://"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mentions_are_stripped() {
        let (text, entities) = strip_mentions("hi <@123> and <@!45>, see <#9> <@&7>");
        assert_eq!(text, "hi  and , see  ");
        assert_eq!(entities.len(), 4);
        assert!(entities.iter().all(Entity::is_link));
    }

    #[test]
    fn test_angle_brackets_without_ids_are_kept() {
        let (text, entities) = strip_mentions("a <b> <@> <@x1> 3 < 4");
        assert_eq!(text, "a <b> <@> <@x1> 3 < 4");
        assert!(entities.is_empty());
    }

    #[test]
    fn test_masked_link_is_a_text_link() {
        let entities = link_entities("free [nitro](https://example.com/x) here");
        assert_eq!(
            entities,
            vec![Entity {
                kind: EntityKind::TextLink,
                url: Some("https://example.com/x".to_string()),
            }]
        );
    }

    #[test]
    fn test_bare_urls() {
        let entities = link_entities("go to https://a.example and <http://b.example>");
        let urls: Vec<_> = entities.iter().filter_map(|e| e.url.as_deref()).collect();
        assert_eq!(urls, vec!["https://a.example", "http://b.example"]);
        assert!(entities.iter().all(|e| e.kind == EntityKind::Url));
        assert!(link_entities("https:// alone").is_empty());
    }
}
