//! Moderation core for Guild Warden
//!
//! Everything in here is platform neutral: the Discord adapter in
//! [`crate::discord`] converts gateway events into [`InboundMessage`]s and
//! implements [`ChatPlatform`] for the side effects.

mod broadcast;
pub mod content;
mod engine;
mod error;
mod exemption;
mod gate;
mod ledger;
mod linked;
mod model;
mod pipeline;
pub mod platform;
pub mod policy;
mod privilege;
pub mod prompts;
mod referral;
mod relief;
mod restriction;
pub mod store;
mod yaml_store;

#[cfg(test)]
pub(crate) mod testing;

pub use broadcast::{BroadcastPayload, BroadcastReport, SubscriberDirectory, SubscriberRecord};
pub use content::ProfanityList;
pub use engine::{ModerationEngine, ModerationSettings};
pub use error::{
    ConfigurationError, ModerationError, ModerationResult, PlatformError, PlatformResult,
    StoreError, StoreResult,
};
pub use exemption::{AllowList, Exemption, ExemptionCheck};
pub use gate::{ChannelCheck, ChannelGate};
pub use ledger::ContributionLedger;
pub use linked::LinkedChannelCache;
pub use model::{
    Button, ChannelId, Entity, EntityKind, GroupId, InboundMessage, MemberStatus, MessageId,
    MessageKind, PostedAs, Sender, UserId,
};
pub use pipeline::{ModerationPipeline, Verdict, Violation};
pub use platform::{ChatPlatform, Prompt, PromptButton};
pub use policy::{FieldUpdate, GroupPolicy, PolicyStore, PolicyUpdate};
pub use privilege::PrivilegeRegistry;
pub use prompts::PromptAction;
pub use referral::ReferralGate;
pub use relief::{ButtonOutcome, ButtonPress, ReliefFlow};
pub use restriction::{
    PromptKind, ReleaseReason, RestrictionMachine, RestrictionRecord, RestrictionState,
    TransitionGuard,
};
pub use store::{ContributionRow, PersistentStore, PrivilegeRow};
pub use yaml_store::YamlStore;
