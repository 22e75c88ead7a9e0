//! Synthetic reminders injected into the last user message before a step.
//!
//! Reminders are stored as synthetic text parts so they survive reloads and
//! show up in exports. A reminder already present on the message is not
//! added again.

use rivet_core::agent::AgentProfile;
use rivet_core::error::StoreError;
use rivet_core::message::{MessageInfo, MessageWithParts, PartKind};
use rivet_core::store::MessageStore;
use tracing::debug;

pub const PLAN_MODE: &str = "<system-reminder>\nPlan mode is active. You MUST NOT make any file edits, run commands that change state, or otherwise modify the system. Read, search and analyze, then present a plan. Stay in planning mode until the user switches agents.\n</system-reminder>";

pub const LEAVING_PLAN_MODE: &str = "<system-reminder>\nYou are switching out of planning mode. You may now edit files, run commands and use every tool available to carry out the plan.\n</system-reminder>";

pub const FINAL_STEP: &str = "<system-reminder>\nThis is the final step allowed for this request. Do not call any more tools. Summarize what was done and list anything that remains.\n</system-reminder>";

/// What the current step needs to be reminded of.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReminderContext {
    pub step: u32,
    pub max_steps: u32,
    /// The previous assistant turn ran under a planning agent.
    pub previous_was_planning: bool,
}

pub fn reminders_for(agent: &AgentProfile, ctx: ReminderContext) -> Vec<&'static str> {
    let mut out = Vec::new();
    if agent.planning {
        out.push(PLAN_MODE);
    } else if ctx.previous_was_planning {
        out.push(LEAVING_PLAN_MODE);
    }
    if ctx.step == ctx.max_steps {
        out.push(FINAL_STEP);
    }
    out
}

/// Append missing reminders to the last user message, both in the store and
/// in `history`. Returns how many parts were added.
pub async fn insert(
    store: &dyn MessageStore,
    history: &mut [MessageWithParts],
    reminders: &[&str],
) -> Result<usize, StoreError> {
    let Some(last_user) = history
        .iter_mut()
        .rev()
        .find(|m| matches!(m.info, MessageInfo::User(_)))
    else {
        return Ok(0);
    };

    let mut added = 0;
    for reminder in reminders {
        let present = last_user
            .parts
            .iter()
            .filter_map(|p| p.as_text())
            .any(|t| t.synthetic && t.text == *reminder);
        if present {
            continue;
        }
        let part = store
            .add_part(
                last_user.info.session_id(),
                last_user.info.id(),
                PartKind::synthetic_text(*reminder),
            )
            .await?;
        last_user.parts.push(part);
        added += 1;
    }
    if added > 0 {
        debug!(message_id = %last_user.info.id(), added, "Inserted reminders");
    }
    Ok(added)
}
