//! Static permission table for remediation actions.
//!
//! Every handler asks this table before acting. The table alone never lets
//! auto-fix authorize an action that rewrites history or drops local data;
//! those additionally need an explicit opt-in (see [`escalate`]).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Remediation actions known to the policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationAction {
    GitSafeDirectory,
    OpenShellManual,
    DestructiveReset,
    SafeFixNetwork,
    SkipContinue,
    Abort,
    AddOriginHttps,
    AddOriginSsh,
    AddOriginToken,
    OpenTokenPage,
    StaleLockCleanup,
    SetUpstreamTracking,
    RenormalizeLineEndings,
    RebuildIndex,
    SyncWithRemote,
    AutoStash,
}

impl RemediationAction {
    pub const ALL: [RemediationAction; 16] = [
        RemediationAction::GitSafeDirectory,
        RemediationAction::OpenShellManual,
        RemediationAction::DestructiveReset,
        RemediationAction::SafeFixNetwork,
        RemediationAction::SkipContinue,
        RemediationAction::Abort,
        RemediationAction::AddOriginHttps,
        RemediationAction::AddOriginSsh,
        RemediationAction::AddOriginToken,
        RemediationAction::OpenTokenPage,
        RemediationAction::StaleLockCleanup,
        RemediationAction::SetUpstreamTracking,
        RemediationAction::RenormalizeLineEndings,
        RemediationAction::RebuildIndex,
        RemediationAction::SyncWithRemote,
        RemediationAction::AutoStash,
    ];

    pub fn name(self) -> &'static str {
        match self {
            RemediationAction::GitSafeDirectory => "git_safe_directory",
            RemediationAction::OpenShellManual => "open_shell_manual",
            RemediationAction::DestructiveReset => "destructive_reset",
            RemediationAction::SafeFixNetwork => "safe_fix_network",
            RemediationAction::SkipContinue => "skip_continue",
            RemediationAction::Abort => "abort",
            RemediationAction::AddOriginHttps => "add_origin_https",
            RemediationAction::AddOriginSsh => "add_origin_ssh",
            RemediationAction::AddOriginToken => "add_origin_token",
            RemediationAction::OpenTokenPage => "open_token_page",
            RemediationAction::StaleLockCleanup => "stale_lock_cleanup",
            RemediationAction::SetUpstreamTracking => "set_upstream_tracking",
            RemediationAction::RenormalizeLineEndings => "renormalize_line_endings",
            RemediationAction::RebuildIndex => "rebuild_index",
            RemediationAction::SyncWithRemote => "sync_with_remote",
            RemediationAction::AutoStash => "auto_stash",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|action| action.name() == name)
    }

    /// Opt-in flag required in addition to auto-fix, if any.
    pub fn escalation_flag(self) -> Option<EscalationFlag> {
        match self {
            RemediationAction::DestructiveReset | RemediationAction::SyncWithRemote => {
                Some(EscalationFlag::DestructiveReset)
            }
            RemediationAction::SafeFixNetwork => Some(EscalationFlag::SafeReset),
            _ => None,
        }
    }
}

impl fmt::Display for RemediationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Permission rule for one action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemediationRule {
    pub destructive: bool,
    pub allow_ci: bool,
    pub allow_autofix: bool,
    pub requires_interactive: bool,
    pub requires_confirmation: bool,
}

const fn rule(
    destructive: bool,
    allow_ci: bool,
    allow_autofix: bool,
    requires_interactive: bool,
    requires_confirmation: bool,
) -> RemediationRule {
    RemediationRule {
        destructive,
        allow_ci,
        allow_autofix,
        requires_interactive,
        requires_confirmation,
    }
}

pub fn rule_for(action: RemediationAction) -> RemediationRule {
    match action {
        RemediationAction::GitSafeDirectory => rule(false, true, true, false, true),
        RemediationAction::OpenShellManual => rule(false, false, false, true, true),
        RemediationAction::DestructiveReset => rule(true, false, false, true, true),
        RemediationAction::SafeFixNetwork => rule(false, false, false, true, true),
        RemediationAction::SkipContinue => rule(false, true, true, false, false),
        RemediationAction::Abort => rule(false, true, true, false, false),
        RemediationAction::AddOriginHttps => rule(false, false, false, true, true),
        RemediationAction::AddOriginSsh => rule(false, true, true, false, false),
        RemediationAction::AddOriginToken => rule(false, false, false, true, true),
        RemediationAction::OpenTokenPage => rule(false, false, false, true, false),
        RemediationAction::StaleLockCleanup => rule(false, true, true, false, false),
        RemediationAction::SetUpstreamTracking => rule(false, true, true, false, false),
        RemediationAction::RenormalizeLineEndings => rule(false, true, true, false, false),
        RemediationAction::RebuildIndex => rule(false, true, true, false, false),
        RemediationAction::SyncWithRemote => rule(true, false, false, true, true),
        RemediationAction::AutoStash => rule(false, true, true, false, true),
    }
}

/// Result of a gate check. `reason` is empty when allowed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub reason: String,
}

impl GateDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: String::new(),
        }
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
        }
    }
}

/// Check an action by name. Unknown names are never allowed.
pub fn can_run_named(name: &str, ci_mode: bool, autofix: bool, interactive: bool) -> GateDecision {
    match RemediationAction::from_name(name) {
        Some(action) => can_run(action, ci_mode, autofix, interactive),
        None => GateDecision::block("unknown remediation action"),
    }
}

pub fn can_run(action: RemediationAction, ci_mode: bool, autofix: bool, interactive: bool) -> GateDecision {
    let rule = rule_for(action);
    if ci_mode && !rule.allow_ci {
        return GateDecision::block("action disabled in CI mode");
    }
    if autofix && !rule.allow_autofix {
        return GateDecision::block("action disabled in auto-fix mode");
    }
    if rule.requires_interactive && !interactive {
        return GateDecision::block("action requires interactive mode");
    }
    GateDecision::allow()
}

/// Auto-fix implies consent, so it never asks.
pub fn requires_confirmation(action: RemediationAction, autofix: bool) -> bool {
    !autofix && rule_for(action).requires_confirmation
}

/// Explicit opt-ins that widen the gate for high-impact actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationFlag {
    SafeReset,
    DestructiveReset,
}

impl EscalationFlag {
    pub fn cli_flag(self) -> &'static str {
        match self {
            EscalationFlag::SafeReset => "--safe-reset",
            EscalationFlag::DestructiveReset => "--destructive-reset",
        }
    }
}

/// Which explicit opt-ins the operator passed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OptIns {
    pub safe_reset: bool,
    pub destructive_reset: bool,
}

impl OptIns {
    pub fn has(self, flag: EscalationFlag) -> bool {
        match flag {
            EscalationFlag::SafeReset => self.safe_reset,
            EscalationFlag::DestructiveReset => self.destructive_reset,
        }
    }
}

/// Full gate: the table plus the opt-in escalation.
///
/// In auto-fix mode an escalated action needs its opt-in even if the table
/// would allow it; with the opt-in present, a table block caused by CI or
/// auto-fix is lifted. Interactivity is derived as `!ci_mode`.
pub fn escalate(action: RemediationAction, ci_mode: bool, autofix: bool, opt_ins: OptIns) -> GateDecision {
    let flag = action.escalation_flag();
    if autofix && let Some(flag) = flag && !opt_ins.has(flag) {
        return GateDecision::block(format!("action requires {} in auto-fix mode", flag.cli_flag()));
    }
    let decision = can_run(action, ci_mode, autofix, !ci_mode);
    if !decision.allowed && autofix && flag.is_some_and(|f| opt_ins.has(f)) {
        return GateDecision::allow();
    }
    decision
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_action_is_blocked() {
        let d = can_run_named("format_disk", false, false, true);
        assert!(!d.allowed);
        assert_eq!(d.reason, "unknown remediation action");
    }

    #[test]
    fn names_round_trip() {
        for action in RemediationAction::ALL {
            assert_eq!(RemediationAction::from_name(action.name()), Some(action));
        }
    }

    #[test]
    fn ci_block_reason_is_checked_first() {
        let d = can_run(RemediationAction::OpenShellManual, true, true, false);
        assert_eq!(d.reason, "action disabled in CI mode");
        let d = can_run(RemediationAction::OpenShellManual, false, true, true);
        assert_eq!(d.reason, "action disabled in auto-fix mode");
        let d = can_run(RemediationAction::OpenShellManual, false, false, false);
        assert_eq!(d.reason, "action requires interactive mode");
        assert!(can_run(RemediationAction::OpenShellManual, false, false, true).allowed);
    }

    #[test]
    fn lock_cleanup_is_allowed_everywhere() {
        for (ci, autofix, interactive) in [(true, true, false), (false, false, true), (true, false, false)] {
            assert!(can_run(RemediationAction::StaleLockCleanup, ci, autofix, interactive).allowed);
        }
    }

    #[test]
    fn autofix_never_asks_for_confirmation() {
        for action in RemediationAction::ALL {
            assert!(!requires_confirmation(action, true));
        }
        assert!(requires_confirmation(RemediationAction::DestructiveReset, false));
        assert!(!requires_confirmation(RemediationAction::SkipContinue, false));
    }

    #[test]
    fn automated_mode_is_never_looser_for_interactive_actions() {
        for action in RemediationAction::ALL {
            if !rule_for(action).requires_interactive {
                continue;
            }
            let automated = can_run(action, true, true, false);
            let manual = can_run(action, false, false, true);
            assert!(!automated.allowed || manual.allowed, "{action}");
        }
    }

    #[test]
    fn destructive_actions_are_flagged_destructive() {
        assert!(rule_for(RemediationAction::DestructiveReset).destructive);
        assert!(rule_for(RemediationAction::SyncWithRemote).destructive);
        assert!(!rule_for(RemediationAction::StaleLockCleanup).destructive);
    }

    #[test]
    fn destructive_reset_needs_opt_in_under_autofix() {
        for ci_mode in [true, false] {
            let blocked = escalate(RemediationAction::DestructiveReset, ci_mode, true, OptIns::default());
            assert!(!blocked.allowed);
            assert_eq!(blocked.reason, "action requires --destructive-reset in auto-fix mode");

            let opt_in = OptIns {
                destructive_reset: true,
                ..OptIns::default()
            };
            assert!(escalate(RemediationAction::DestructiveReset, ci_mode, true, opt_in).allowed);
        }
    }

    #[test]
    fn safe_reset_flag_does_not_unlock_destructive_reset() {
        let opt_in = OptIns {
            safe_reset: true,
            ..OptIns::default()
        };
        assert!(!escalate(RemediationAction::DestructiveReset, true, true, opt_in).allowed);
        assert!(escalate(RemediationAction::SafeFixNetwork, true, true, opt_in).allowed);
    }

    #[test]
    fn non_escalated_actions_follow_the_table() {
        let d = escalate(RemediationAction::OpenShellManual, true, true, OptIns {
            safe_reset: true,
            destructive_reset: true,
        });
        assert!(!d.allowed);
        assert_eq!(d.reason, "action disabled in CI mode");
    }
}
