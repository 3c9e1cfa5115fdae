//! Outbound copy. One locale; wording lives here so handlers only decide
//! which message to send.

use inkline_contracts::{ConversationStatus, OfferedSlot, Question, QuestionKind};

pub const GREETING: &str = "Hi! Thanks for getting in touch. I'll ask a few quick questions so the artist has everything they need.";
pub const OPT_OUT_ACK: &str =
    "You've been unsubscribed and won't hear from us again. Reply START if you change your mind.";
pub const OPT_BACK_IN_ACK: &str = "Welcome back! Let's pick up your enquiry.";
pub const HANDOVER_NOTICE: &str =
    "Thanks for bearing with me. I've passed your enquiry to the artist, who will reply personally.";
pub const HOLD_MESSAGE: &str =
    "The artist has your enquiry and will get back to you soon. Reply RESUME to continue with me instead.";
pub const HUMAN_REQUEST_ACK: &str = "No problem, I've asked the artist to reply to you directly.";
pub const REFUND_ACK: &str =
    "I've flagged your refund request to the artist, who will get back to you personally.";
pub const DELETE_DATA_ACK: &str =
    "I've passed your data request to the artist, who will confirm once it has been handled.";
pub const RESUME_ACK: &str = "Great, let's carry on.";
pub const COMPLETED: &str =
    "That's everything I need, thank you! The artist will review your idea and be in touch.";
pub const TIME_WINDOWS_REQUEST: &str = "None of the current slots seem to work. Which days and times usually suit you (e.g. weekday evenings)?";
pub const TIME_WINDOWS_REASK: &str =
    "Sorry, which days or times usually work for you? For example \"weekday evenings\".";
pub const TIME_WINDOWS_ACK: &str = "Thanks, I've noted your availability and will come back with options.";
pub const TOUR_OFFER_REASK: &str =
    "Sorry, would you like to book on the guest dates? Please reply yes or no.";
pub const WAITLISTED: &str = "No problem, I've added you to the waitlist and will let you know about future dates.";
pub const REENGAGE: &str = "Welcome back! Let's pick up where we left off.";
pub const BUNDLE_REASK_SUFFIX: &str = "Just one thing at a time please, so I get it right.";

pub fn prompt_for(question: &Question) -> String {
    if question.required {
        question.prompt.clone()
    } else {
        format!("{} (or reply SKIP)", question.prompt)
    }
}

pub fn repair_reask(question: &Question, attempt: u32) -> String {
    let hint = match question.kind {
        QuestionKind::Dimensions => "Please give a width and height, for example 10x15cm.",
        QuestionKind::Amount => "Please give a number, for example £300.",
        QuestionKind::Place => "Please tell me the town or city you're based in.",
        QuestionKind::Media => "Please attach a photo, or reply SKIP.",
        QuestionKind::Text => "Could you say a little more?",
    };
    if attempt <= 1 {
        format!("Sorry, I didn't quite catch that. {hint}")
    } else {
        format!("Sorry, I still couldn't read that. {hint}")
    }
}

pub fn bundle_reask(question: &Question) -> String {
    format!("{BUNDLE_REASK_SUFFIX} {}", prompt_for(question))
}

pub fn tour_offer(city: &str, dates: &str) -> String {
    format!(
        "Good news, the artist is guesting in {city} on {dates}. Would you like to book there instead? (yes/no)"
    )
}

pub fn slot_options(slots: &[OfferedSlot]) -> String {
    let mut out = String::from("Here are the available appointments:");
    for (i, slot) in slots.iter().enumerate() {
        out.push_str(&format!("\n{}. {}", i + 1, slot.label));
    }
    out.push_str("\nReply with the number of the one you'd like.");
    out
}

pub fn slot_reask(slots: &[OfferedSlot]) -> String {
    format!(
        "Sorry, which one? Reply with a single number from 1 to {}.",
        slots.len()
    )
}

pub fn slot_booked(slot: &OfferedSlot) -> String {
    format!("You're booked in for {}. See you then!", slot.label)
}

/// Copy for statuses where the bot only acknowledges.
pub fn acknowledgement(status: ConversationStatus) -> Option<&'static str> {
    match status {
        ConversationStatus::PendingApproval => {
            Some("Thanks! The artist is reviewing your enquiry and will be in touch.")
        }
        ConversationStatus::AwaitingDeposit => {
            Some("Thanks! Your booking will be confirmed once the deposit is received.")
        }
        ConversationStatus::DepositPaid => {
            Some("Thanks, your deposit is in. I'll send appointment options shortly.")
        }
        ConversationStatus::Waitlisted => Some("You're on the waitlist, I'll message you when dates open up."),
        ConversationStatus::NeedsFollowUp => Some("Thanks, the studio will follow up with you soon."),
        ConversationStatus::Booked => Some("You're all booked in. Any questions, the artist will pick them up."),
        _ => None,
    }
}
