pub mod engine;

pub use engine::{
    AttachmentChange, CreatedFanOut, DeleteOutcome, LastMessageChange, MessageEdit,
    NotificationEngine, RecipientNotifications,
};
