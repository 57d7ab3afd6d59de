//! Comparison State
//!
//! Everything the controller owns, in one plain struct: the mode, both prompt
//! configurations, the four message logs and the per-lane busy flags.
//!
//! Both modes keep their own pair of logs. Switching mode never clears the
//! inactive pair; only `reset()` does.

use serde::Serialize;

use crate::messages::{ComparisonMode, MessageId, SessionId, Side};
use crate::store::MessageStore;

/// Two system prompts, one shared user input
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SystemPromptCompareConfig {
    /// Left lane's system prompt ("original")
    pub left_system_prompt: String,
    /// Right lane's system prompt ("optimized")
    pub right_system_prompt: String,
    /// Pending draft consumed by both lanes on send
    pub shared_user_input: String,
}

/// One shared system prompt, two user prompts
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct UserPromptCompareConfig {
    /// System prompt used by both lanes
    pub shared_system_prompt: String,
    /// Left lane's pending draft
    pub left_user_prompt: String,
    /// Right lane's pending draft
    pub right_user_prompt: String,
}

impl UserPromptCompareConfig {
    /// A lane's pending draft
    #[must_use]
    pub fn draft(&self, side: Side) -> &str {
        match side {
            Side::Left => &self.left_user_prompt,
            Side::Right => &self.right_user_prompt,
        }
    }

    pub(crate) fn draft_mut(&mut self, side: Side) -> &mut String {
        match side {
            Side::Left => &mut self.left_user_prompt,
            Side::Right => &mut self.right_user_prompt,
        }
    }
}

/// Busy flag and generation epoch of one lane
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct LaneStatus {
    /// A call that may still mutate this lane is in flight
    pub generating: bool,
    /// Bumped by `init*` and `reset()`; calls from an older epoch are stale
    #[serde(skip)]
    pub(crate) epoch: u64,
}

/// The full comparison state
#[derive(Clone, Debug, Default, Serialize)]
pub struct ComparisonState {
    /// Current session
    pub session_id: SessionId,
    /// Active mode
    pub mode: ComparisonMode,

    /// System-prompt comparison configuration
    pub system_config: SystemPromptCompareConfig,
    /// Left lane log, system mode
    pub left_messages: MessageStore,
    /// Right lane log, system mode
    pub right_messages: MessageStore,

    /// User-prompt comparison configuration
    pub user_config: UserPromptCompareConfig,
    /// Left lane log, user mode
    pub left_user_messages: MessageStore,
    /// Right lane log, user mode
    pub right_user_messages: MessageStore,

    /// Left lane status
    pub left: LaneStatus,
    /// Right lane status
    pub right: LaneStatus,
}

impl ComparisonState {
    /// Whether either lane is busy
    #[must_use]
    pub fn is_generating(&self) -> bool {
        self.left.generating || self.right.generating
    }

    /// Whether the left lane is busy
    #[must_use]
    pub fn is_left_generating(&self) -> bool {
        self.left.generating
    }

    /// Whether the right lane is busy
    #[must_use]
    pub fn is_right_generating(&self) -> bool {
        self.right.generating
    }

    /// Whether the given lane is busy
    #[must_use]
    pub fn is_lane_generating(&self, side: Side) -> bool {
        self.lane(side).generating
    }

    /// Status of one lane
    #[must_use]
    pub fn lane(&self, side: Side) -> &LaneStatus {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    pub(crate) fn lane_mut(&mut self, side: Side) -> &mut LaneStatus {
        match side {
            Side::Left => &mut self.left,
            Side::Right => &mut self.right,
        }
    }

    /// The log of one lane in one mode
    #[must_use]
    pub fn store(&self, mode: ComparisonMode, side: Side) -> &MessageStore {
        match (mode, side) {
            (ComparisonMode::SystemPrompt, Side::Left) => &self.left_messages,
            (ComparisonMode::SystemPrompt, Side::Right) => &self.right_messages,
            (ComparisonMode::UserPrompt, Side::Left) => &self.left_user_messages,
            (ComparisonMode::UserPrompt, Side::Right) => &self.right_user_messages,
        }
    }

    pub(crate) fn store_mut(&mut self, mode: ComparisonMode, side: Side) -> &mut MessageStore {
        match (mode, side) {
            (ComparisonMode::SystemPrompt, Side::Left) => &mut self.left_messages,
            (ComparisonMode::SystemPrompt, Side::Right) => &mut self.right_messages,
            (ComparisonMode::UserPrompt, Side::Left) => &mut self.left_user_messages,
            (ComparisonMode::UserPrompt, Side::Right) => &mut self.right_user_messages,
        }
    }

    /// The log of one lane in the active mode
    #[must_use]
    pub fn active_store(&self, side: Side) -> &MessageStore {
        self.store(self.mode, side)
    }

    /// The system prompt a lane uses in a mode
    #[must_use]
    pub fn system_prompt(&self, mode: ComparisonMode, side: Side) -> &str {
        match (mode, side) {
            (ComparisonMode::SystemPrompt, Side::Left) => &self.system_config.left_system_prompt,
            (ComparisonMode::SystemPrompt, Side::Right) => {
                &self.system_config.right_system_prompt
            }
            (ComparisonMode::UserPrompt, _) => &self.user_config.shared_system_prompt,
        }
    }

    /// Orphan every in-flight call and clear both busy flags
    ///
    /// Returns the lanes that were busy.
    pub(crate) fn invalidate_lanes(&mut self) -> Vec<Side> {
        let mut released = Vec::new();
        for side in Side::BOTH {
            let lane = self.lane_mut(side);
            lane.epoch += 1;
            if lane.generating {
                lane.generating = false;
                released.push(side);
            }
        }
        released
    }

    /// Close every streaming placeholder in all four logs
    ///
    /// Logs of the inactive mode survive `init*`, so an orphaned call's
    /// placeholder there must not stay streaming. Returns the lane and id of
    /// each message closed.
    pub(crate) fn interrupt_streaming(&mut self, marker: &str, reason: &str) -> Vec<(Side, MessageId)> {
        let mut closed = Vec::new();
        for mode in [ComparisonMode::SystemPrompt, ComparisonMode::UserPrompt] {
            for side in Side::BOTH {
                let ids = self.store_mut(mode, side).fail_streaming(marker, reason);
                closed.extend(ids.into_iter().map(|id| (side, id)));
            }
        }
        closed
    }
}
