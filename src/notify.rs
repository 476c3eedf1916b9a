//! Grade-change notifications. Pure mapping from a ledger event to a message
//! draft plus the selector addressing it; persistence happens in the
//! dispatcher, on the same transaction as the ledger write.

use crate::dispatch::{MessageDraft, Selector};

pub enum GradeEvent<'a> {
    Added {
        student_user_id: &'a str,
        subject_name: &'a str,
        value: i64,
    },
    Canceled {
        student_user_id: &'a str,
        subject_name: &'a str,
        value: i64,
    },
}

pub fn for_event(event: &GradeEvent<'_>) -> (MessageDraft, Selector) {
    match event {
        GradeEvent::Added {
            student_user_id,
            subject_name,
            value,
        } => (
            MessageDraft {
                subject: "New grade".to_string(),
                body: format!(
                    "You received a new grade in {}. Your grade: {}.",
                    subject_name, value
                ),
            },
            Selector::Student {
                user_id: student_user_id.to_string(),
            },
        ),
        GradeEvent::Canceled {
            student_user_id,
            subject_name,
            value,
        } => (
            MessageDraft {
                subject: "Grade canceled".to_string(),
                body: format!(
                    "Your grade ({}) in {} was canceled.",
                    value, subject_name
                ),
            },
            Selector::Student {
                user_id: student_user_id.to_string(),
            },
        ),
    }
}
