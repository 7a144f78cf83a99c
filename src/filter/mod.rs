pub mod mute;
pub mod ngword;

pub use mute::MuteSet;
pub use ngword::{MatchContext, NgMatch, NgRule, NgWordList, RuleError, UserScope};
