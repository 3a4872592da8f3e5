//! Content heuristics for spam, game promotions, links and profanity
//!
//! All checks are plain substring or whole-word lookups over the
//! lower-cased message text.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::Path;

use super::{Button, Entity, StoreResult};

/// Phrases that mark a game or tap-to-earn promotion
pub const SUSPECT_KEYWORDS: &[&str] = &[
    "open game",
    "play",
    "играть",
    "открыть игру",
    "game",
    "cattea",
    "gamee",
    "hamster",
    "notcoin",
    "tap to earn",
    "earn",
    "clicker",
];

/// Hosts and fragments that mark a game or tap-to-earn link
pub const SUSPECT_DOMAINS: &[&str] = &[
    "cattea",
    "gamee",
    "hamster",
    "notcoin",
    "tgme",
    "t.me/gamee",
    "textra.fun",
    "ton",
];

const BUTTON_URL_MARKERS: &[&str] = &["game", "play", "tgme"];

const BOT_LINK_MARKERS: &[&str] = &[
    "discord.gg",
    "discord.com/invite",
    "t.me",
    "telegram.me",
    "http://",
    "https://",
    "www.",
    "youtu.be",
    "youtube.com",
];

const HIDDEN_LINK_MARKERS: &[&str] = &[
    "discord.gg",
    "discord.com/invite",
    "t.me",
    "telegram.me",
    "http://",
    "https://",
];

const TEXT_LINK_MARKERS: &[&str] = &[
    "discord.gg",
    "discord.com/invite",
    "t.me",
    "telegram.me",
    "@",
    "www.",
    "https://youtu.be",
    "http://",
    "https://",
];

/// Fallback profanity list when no word file is configured
const DEFAULT_PROFANITY: &[&str] = &[
    "fuck", "fuckyou", "fakyou", "debil", "dalbayob", "gandon", "jalap", "qanjiq", "fohisha",
    "naxuy", "poxuy", "suka", "soska", "huy", "xuy",
];

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|needle| haystack.contains(needle))
}

/// A button that launches a game, or links or opens a web app on a suspect host
#[must_use]
pub fn has_suspicious_buttons(buttons: &[Button]) -> bool {
    buttons.iter().any(|button| {
        if button.launches_game {
            return true;
        }
        let url_suspicious = button.url.as_deref().is_some_and(|url| {
            let url = url.to_lowercase();
            contains_any(&url, SUSPECT_DOMAINS) || contains_any(&url, BUTTON_URL_MARKERS)
        });
        let web_app_suspicious = button
            .web_app_url
            .as_deref()
            .is_some_and(|url| contains_any(&url.to_lowercase(), SUSPECT_DOMAINS));
        url_suspicious || web_app_suspicious
    })
}

/// `lower` is the lower-cased message text
#[must_use]
pub fn has_game_keywords(lower: &str) -> bool {
    contains_any(lower, SUSPECT_KEYWORDS)
}

/// Any link-type entity, used for messages from bot accounts
#[must_use]
pub fn has_link_entity(entities: &[Entity]) -> bool {
    entities.iter().any(Entity::is_link)
}

#[must_use]
pub fn has_bot_link_text(lower: &str) -> bool {
    contains_any(lower, BOT_LINK_MARKERS)
}

/// A link entity whose target points off-site behind other text
#[must_use]
pub fn has_hidden_link(entities: &[Entity]) -> bool {
    entities.iter().filter(|entity| entity.is_link()).any(|entity| {
        entity
            .url
            .as_deref()
            .is_some_and(|url| contains_any(&url.to_lowercase(), HIDDEN_LINK_MARKERS))
    })
}

#[must_use]
pub fn has_link_text(lower: &str) -> bool {
    contains_any(lower, TEXT_LINK_MARKERS)
}

/// Lower-cased words: maximal runs of alphanumerics and underscores
#[must_use]
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|word| !word.is_empty())
        .map(str::to_string)
        .collect()
}

/// Whole-word profanity lookup set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfanityList {
    words: HashSet<String>,
}

impl ProfanityList {
    #[must_use]
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            words: words
                .into_iter()
                .map(|word| word.as_ref().trim().to_lowercase())
                .filter(|word| !word.is_empty())
                .collect(),
        }
    }

    #[must_use]
    pub fn builtin() -> Self {
        Self::new(DEFAULT_PROFANITY)
    }

    /// Parse a word file: one word per line, `#` starts a comment line
    #[must_use]
    pub fn parse(content: &str) -> Self {
        Self::new(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.starts_with('#')),
        )
    }

    /// Load a word file, falling back to the built-in list when it does not exist
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read
    pub async fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        match tokio::fs::read_to_string(path.as_ref()).await {
            Ok(content) => Ok(Self::parse(&content)),
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(Self::builtin()),
            Err(error) => Err(error.into()),
        }
    }

    #[must_use]
    pub fn contains_any(&self, text: &str) -> bool {
        tokenize(text).iter().any(|word| self.words.contains(word))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.words.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }
}
