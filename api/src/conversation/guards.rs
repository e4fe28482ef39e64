//! Cross-cutting checks evaluated before phase dispatch, in a fixed order.
//! Matching is pure so each guard can be tested against synthetic input;
//! the engine performs the side effects.

use healthybites_core::conversation::{InboundAction, Phase};
use healthybites_core::profile::MealType;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    FeedbackCapture,
    CancelRequest,
    ProfileUpdate,
}

impl Guard {
    pub const ORDER: [Guard; 3] = [
        Guard::FeedbackCapture,
        Guard::CancelRequest,
        Guard::ProfileUpdate,
    ];

    pub fn matches(self, input: &GuardInput<'_>) -> bool {
        match self {
            Guard::FeedbackCapture => {
                input.feedback_window.is_some()
                    && input.action.is_none()
                    && input.text.is_some()
                    && is_idle(input.phase)
            }
            Guard::CancelRequest => matches!(
                input.action,
                Some(
                    InboundAction::RequestCancel { .. }
                        | InboundAction::ConfirmCancel { .. }
                        | InboundAction::KeepOrder
                )
            ),
            Guard::ProfileUpdate => {
                matches!(input.action, Some(InboundAction::UpdateProfile))
                    || (*input.phase == Phase::AskUpdate
                        && input.text.is_some_and(|t| t.eq_ignore_ascii_case("yes")))
            }
        }
    }
}

/// What the guards look at for one inbound event.
#[derive(Debug, Clone, Copy)]
pub struct GuardInput<'a> {
    pub phase: &'a Phase,
    pub text: Option<&'a str>,
    pub action: Option<&'a InboundAction>,
    pub feedback_window: Option<MealType>,
}

/// Steady phases where free text is not an answer to a question. Feedback
/// is only captured here so an OTP or an address is never taken for it.
pub fn is_idle(phase: &Phase) -> bool {
    matches!(phase, Phase::ShowMenu | Phase::Complete)
}

/// Guards that apply to `input`, in evaluation order.
pub fn matching<'a>(input: &'a GuardInput<'a>) -> impl Iterator<Item = Guard> + 'a {
    Guard::ORDER
        .into_iter()
        .filter(move |guard| guard.matches(input))
}
