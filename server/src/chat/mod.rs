pub mod chats;
pub mod form;
pub mod groups;
pub mod messages;
